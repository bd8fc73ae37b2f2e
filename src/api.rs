use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ChainInfo;
use crate::csv_export::{export_filename, to_csv};
use crate::dispatch::{Dispatcher, FallbackReason, FetchOutcome, FetchRequest};
use crate::error::FetchError;
use crate::filter::{summarize, unique_assets, DateRange, FilterSet, Summary, ALL};
use crate::types::{Record, RecordKind};

/// Shown for any upstream or internal failure; details stay in the logs
const RETRY_MESSAGE: &str = "Failed to fetch transactions. Please try again.";

/// Shown when an upstream rejects the request as invalid
const REJECTED_MESSAGE: &str = "Account was rejected by the upstream source";

pub struct AppState {
    pub dispatcher: Dispatcher,
}

/// Query params shared by the transactions and export endpoints
#[derive(Debug, Deserialize)]
pub struct TransactionsQueryParams {
    pub wallet: Option<String>,
    #[serde(default = "default_chain")]
    pub chain: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub mock: bool,
    pub date: Option<String>,
    pub asset: Option<String>,
    pub side: Option<String>,
    pub search: Option<String>,
}

fn default_chain() -> String {
    "solana".to_string()
}

fn default_kind() -> String {
    RecordKind::Spot.to_string()
}

impl TransactionsQueryParams {
    pub fn request(&self) -> Result<FetchRequest, ApiError> {
        let account = self
            .wallet
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .ok_or_else(|| ApiError::bad_request("Wallet address is required"))?;
        let kind = self.kind.parse::<RecordKind>().map_err(ApiError::bad_request)?;

        Ok(FetchRequest {
            account: account.to_string(),
            chain: self.chain.clone(),
            kind,
            force_mock: self.mock,
        })
    }

    pub fn filters(&self) -> Result<FilterSet, ApiError> {
        let date = match self.date.as_deref() {
            Some(d) => d.parse::<DateRange>().map_err(ApiError::bad_request)?,
            None => DateRange::All,
        };
        let or_all = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(ALL)
                .to_string()
        };

        Ok(FilterSet {
            date,
            asset: or_all(&self.asset),
            side: or_all(&self.side),
            search: self.search.clone().unwrap_or_default(),
        })
    }
}

/// A caller-facing failure, rendered as `{ "error": ... }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: RETRY_MESSAGE.to_string(),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(e: FetchError) -> Self {
        if e.kind.is_client_error() && e.user_visible {
            Self::bad_request(e.message)
        } else if e.kind.is_client_error() {
            warn!("Upstream rejected request: {}", e);
            Self::bad_request(REJECTED_MESSAGE)
        } else {
            error!("Fetch failed: {}", e);
            Self::internal()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

/// Response for transactions list
#[derive(Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<Record>,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub summary: Summary,
    /// Assets in the unfiltered result, for the asset selector
    pub assets: Vec<String>,
    pub source: &'static str,
    pub fallback: bool,
    pub fallback_reason: Option<FallbackReason>,
}

/// Fetch through the dispatcher and apply the query's filters
///
/// Also returns the distinct assets seen before filtering.
async fn fetch_filtered(
    state: &AppState,
    params: &TransactionsQueryParams,
) -> Result<(FetchRequest, FetchOutcome, Vec<String>), ApiError> {
    let request = params.request()?;
    let filters = params.filters()?;

    let mut outcome = state.dispatcher.fetch(&request).await?;
    let fetched = outcome.records.len();
    let assets = unique_assets(&outcome.records);
    outcome.records = filters.apply(&outcome.records, Utc::now());

    info!(
        "{} {} records for {} on {} ({} after filters, source {})",
        fetched, request.kind, request.account, request.chain, outcome.records.len(), outcome.source
    );
    Ok((request, outcome, assets))
}

/// GET /api/transactions - Normalized history with summary
pub async fn get_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionsQueryParams>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let (_, outcome, assets) = fetch_filtered(&state, &params).await?;

    Ok(Json(TransactionsResponse {
        summary: summarize(&outcome.records, outcome.kind),
        assets,
        kind: outcome.kind,
        source: outcome.source,
        fallback: outcome.is_fallback(),
        fallback_reason: outcome.fallback,
        transactions: outcome.records,
    }))
}

/// GET /api/export - Filtered history as a CSV download
pub async fn get_export(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionsQueryParams>,
) -> Result<Response, ApiError> {
    let (request, outcome, _) = fetch_filtered(&state, &params).await?;

    let body = to_csv(&outcome.records, outcome.kind).map_err(|e| {
        error!("CSV export failed: {:#}", e);
        ApiError::internal()
    })?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        export_filename(outcome.kind, &request.account)
    );
    let fallback = outcome
        .fallback
        .map(|r| r.to_string())
        .unwrap_or_else(|| "none".to_string());

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::HeaderName::from_static("x-data-fallback"), fallback),
        ],
        body,
    )
        .into_response())
}

/// GET /api/chains - Supported chains and perp venues
pub async fn get_chains(State(state): State<Arc<AppState>>) -> Json<&'static [ChainInfo]> {
    Json(state.dispatcher.chains())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use axum::body::to_bytes;
    use axum::http::Uri;
    use serde_json::Value;

    const SOL_ADDR: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const EVM_ADDR: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    fn state() -> State<Arc<AppState>> {
        State(Arc::new(AppState {
            dispatcher: Dispatcher::new(SourceConfig::offline()).unwrap(),
        }))
    }

    fn query(uri: &str) -> Query<TransactionsQueryParams> {
        Query::try_from_uri(&uri.parse::<Uri>().unwrap()).unwrap()
    }

    async fn body_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn transactions(uri: &str) -> (StatusCode, Value) {
        let response = get_transactions(state(), query(uri)).await.into_response();
        body_json(response).await
    }

    #[test]
    fn test_query_defaults() {
        let Query(params) = query(&format!("/api/transactions?wallet={}", SOL_ADDR));
        let request = params.request().unwrap();
        assert_eq!(request.chain, "solana");
        assert_eq!(request.kind, RecordKind::Spot);
        assert!(!request.force_mock);
        assert_eq!(params.filters().unwrap(), FilterSet::default());
    }

    #[tokio::test]
    async fn test_missing_wallet_is_bad_request() {
        let (status, body) = transactions("/api/transactions?chain=solana").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Wallet address is required");

        let (status, _) = transactions("/api/transactions?wallet=%20%20").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_account_is_bad_request() {
        let (status, body) = transactions("/api/transactions?wallet=0xnope&chain=ethereum&mock=true").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("0x-prefixed"));
    }

    #[test]
    fn test_upstream_text_is_not_returned() {
        let raw = "getSignaturesForAddress failed (-32602): Invalid param: WrongSize";
        let e = ApiError::from(FetchError::invalid_account(raw));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.message, REJECTED_MESSAGE);

        let e = ApiError::from(FetchError::unauthorized("Invalid API Key: abc123"));
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.message, RETRY_MESSAGE);
    }

    #[tokio::test]
    async fn test_rejected_account_body_hides_upstream_text() {
        let e = ApiError::from(FetchError::invalid_account("Error! Invalid address format (raw body)"));
        let (status, body) = body_json(e.into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body["error"].as_str().unwrap().contains("raw body"));
    }

    #[tokio::test]
    async fn test_unsupported_combination_is_bad_request() {
        let uri = format!("/api/transactions?wallet={}&chain=solana&type=perp", SOL_ADDR);
        let (status, _) = transactions(&uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mock_perp_response() {
        let uri = format!("/api/transactions?wallet={}&chain=hyperliquid&type=perp&mock=true", EVM_ADDR);
        let (status, body) = transactions(&uri).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "perp");
        assert_eq!(body["fallback"], true);
        assert_eq!(body["fallback_reason"], "requested");
        assert_eq!(body["summary"]["kind"], "perp");

        let rows = body["transactions"].as_array().unwrap();
        assert_eq!(body["summary"]["trade_count"], rows.len());
        for row in rows {
            assert_eq!(row["kind"], "perp");
            assert_eq!(row["exit_price"].is_null(), row["pnl"].is_null());
        }
    }

    #[tokio::test]
    async fn test_filters_are_applied() {
        let uri = format!("/api/transactions?wallet={}&mock=true&side=BUY", SOL_ADDR);
        let (status, body) = transactions(&uri).await;

        assert_eq!(status, StatusCode::OK);
        let rows = body["transactions"].as_array().unwrap();
        assert!(rows.iter().all(|r| r["side"] == "BUY"));
        // the selector still lists assets hidden by the side filter
        assert!(!body["assets"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_headers_and_body() {
        let uri = format!("/api/export?wallet={}&mock=true", SOL_ADDR);
        let response = get_export(state(), query(&uri)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"spot-export-7xKXtg2C.csv\""
        );
        assert_eq!(headers["x-data-fallback"], "mock data requested");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("timestamp,chain,asset,side,quantity,price,total,fees,hash\n"));
    }

    #[tokio::test]
    async fn test_chains_listing() {
        let Json(chains) = get_chains(state()).await;
        assert!(chains.iter().any(|c| c.id == "solana"));
        assert!(chains.iter().any(|c| c.id == "hyperliquid" && c.market == RecordKind::Perp));
    }
}
