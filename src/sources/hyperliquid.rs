//! Hyperliquid perp adapter
//!
//! Open positions come from the clearinghouse snapshot; closed positions
//! are reconstructed from closing fills, which report the realized PnL.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::classify::classify_perp_side;
use crate::error::FetchError;
use crate::sources::http::send_json;
use crate::sources::Source;
use crate::types::{PerpRecord, PositionClose, Record};

pub const EXCHANGE_NAME: &str = "Hyperliquid";
pub const CHAIN_ID: &str = "hyperliquid";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseState {
    #[serde(default)]
    asset_positions: Vec<Value>,
    /// Snapshot time, ms
    time: i64,
}

#[derive(Debug, Deserialize)]
struct AssetPosition {
    position: PositionData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub coin: String,
    pub szi: String,
    #[serde(default)]
    pub entry_px: Option<String>,
    #[serde(default)]
    pub leverage: Option<Leverage>,
    #[serde(default)]
    pub cum_funding: Option<CumFunding>,
}

#[derive(Debug, Deserialize)]
pub struct Leverage {
    pub value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumFunding {
    pub since_open: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub coin: String,
    pub px: String,
    pub sz: String,
    /// ms
    pub time: i64,
    pub start_position: String,
    pub dir: String,
    pub closed_pnl: String,
    pub hash: String,
    #[serde(default)]
    pub fee: String,
    pub tid: u64,
    #[serde(default)]
    pub liquidation: Option<Value>,
}

pub struct HyperliquidSource {
    client: Client,
    base_url: String,
}

impl HyperliquidSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn info<T: serde::de::DeserializeOwned>(&self, request_type: &str, account: &str) -> Result<T, FetchError> {
        let request = self
            .client
            .post(format!("{}/info", self.base_url))
            .json(&json!({ "type": request_type, "user": account }));
        send_json(request, request_type).await
    }
}

#[async_trait]
impl Source for HyperliquidSource {
    fn name(&self) -> &'static str {
        "hyperliquid"
    }

    async fn fetch(&self, account: &str) -> Result<Vec<Record>, FetchError> {
        let (state, fills): (ClearinghouseState, Vec<Value>) = tokio::try_join!(
            self.info("clearinghouseState", account),
            self.info("userFills", account),
        )?;

        let snapshot_time = ms_to_utc(state.time).unwrap_or_else(Utc::now);
        let open: Vec<PerpRecord> = decode_each::<AssetPosition>(state.asset_positions, "position")
            .iter()
            .filter_map(|p| map_open_position(&p.position, snapshot_time))
            .collect();
        let closed: Vec<PerpRecord> = decode_each::<Fill>(fills, "fill")
            .iter()
            .filter_map(map_closing_fill)
            .collect();

        info!(
            "Hyperliquid: {} open positions, {} closed for {}",
            open.len(),
            closed.len(),
            account
        );
        Ok(open.into_iter().chain(closed).map(Record::Perp).collect())
    }
}

fn decode_each<T: serde::de::DeserializeOwned>(items: Vec<Value>, what: &str) -> Vec<T> {
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|v| {
            serde_json::from_value(v)
                .map_err(|e| debug!("Skipping malformed {}: {}", what, e))
                .ok()
        })
        .collect();
    if decoded.len() < total {
        warn!("Skipped {} malformed hyperliquid {} entries", total - decoded.len(), what);
    }
    decoded
}

fn ms_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn num(value: &str) -> Option<f64> {
    value.trim().parse().ok()
}

/// An open position as of `snapshot_time`
pub fn map_open_position(p: &PositionData, snapshot_time: DateTime<Utc>) -> Option<PerpRecord> {
    let size = num(&p.szi)?;
    if size == 0.0 {
        return None;
    }
    // cumFunding is reported as paid; flip so received funding is positive
    let funding = p
        .cum_funding
        .as_ref()
        .and_then(|f| num(&f.since_open))
        .map(|paid| -paid)
        .unwrap_or(0.0);

    Some(PerpRecord {
        timestamp: snapshot_time,
        asset: p.coin.clone(),
        side: classify_perp_side(size),
        quantity: size.abs(),
        position_size: size,
        entry_price: p.entry_px.as_deref().and_then(num).unwrap_or(0.0),
        close: None,
        fees: 0.0,
        funding,
        exchange: EXCHANGE_NAME.to_string(),
        leverage: p.leverage.as_ref().map(|l| l.value).filter(|v| *v > 0.0),
        liquidation: false,
        hash: format!("{}-open-{}", p.coin, snapshot_time.timestamp_millis()),
        chain: CHAIN_ID.to_string(),
    })
}

fn is_closing(fill: &Fill) -> bool {
    fill.dir.starts_with("Close") || fill.dir.contains(" > ") || fill.liquidation.is_some()
}

/// A closed position reconstructed from its closing fill
///
/// Entry price is recovered from `pnl = (exit - entry) * position_size`.
pub fn map_closing_fill(fill: &Fill) -> Option<PerpRecord> {
    if !is_closing(fill) {
        return None;
    }
    let exit_price = num(&fill.px)?;
    let size = num(&fill.sz)?;
    let start = num(&fill.start_position)?;
    let pnl = num(&fill.closed_pnl).unwrap_or(0.0);

    // A flip closes the whole starting position
    let closed_qty = if fill.dir.contains(" > ") { start.abs() } else { size.abs() };
    if closed_qty == 0.0 {
        return None;
    }
    let sign = if start != 0.0 {
        start.signum()
    } else if fill.dir.contains("Short") {
        -1.0
    } else {
        1.0
    };
    let position_size = sign * closed_qty;
    let entry_price = exit_price - pnl / position_size;

    Some(PerpRecord {
        timestamp: ms_to_utc(fill.time)?,
        asset: fill.coin.clone(),
        side: classify_perp_side(position_size),
        quantity: closed_qty,
        position_size,
        entry_price,
        close: Some(PositionClose { exit_price, pnl }),
        fees: num(&fill.fee).unwrap_or(0.0).abs(),
        funding: 0.0,
        exchange: EXCHANGE_NAME.to_string(),
        leverage: None,
        liquidation: fill.liquidation.as_ref().is_some_and(|v| !v.is_null()),
        hash: format!("{}-{}", fill.hash, fill.tid),
        chain: CHAIN_ID.to_string(),
    })
}
