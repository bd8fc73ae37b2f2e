//! Solana JSON-RPC adapter
//!
//! Lists recent signatures for the account, then fetches each transaction
//! through a bounded-concurrency fan-out. Balance deltas come from the
//! transaction meta; parsed transfer instructions cover movements that do
//! not show up as a balance change of the wallet itself.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{lamports_to_sol, mint_symbol, CHAIN_ID, SOL_DECIMALS};
use crate::classify::{classify_spot_side, classify_transfer, derive_price, priced, scale_amount};
use crate::error::{FetchError, FetchErrorKind};
use crate::sources::http::{send_json, Throttle};
use crate::sources::Source;
use crate::types::{Record, SpotRecord, SpotSide};

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub err: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    #[serde(default)]
    pub block_time: Option<i64>,
    pub meta: Option<TransactionMeta>,
    pub transaction: TransactionBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub pre_balances: Vec<u64>,
    #[serde(default)]
    pub post_balances: Vec<u64>,
    #[serde(default)]
    pub pre_token_balances: Option<Vec<TokenBalance>>,
    #[serde(default)]
    pub post_token_balances: Option<Vec<TokenBalance>>,
    #[serde(default)]
    pub inner_instructions: Option<Vec<InnerInstructions>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: usize,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize)]
pub struct UiTokenAmount {
    pub amount: String,
    pub decimals: u32,
}

#[derive(Debug, Deserialize)]
pub struct InnerInstructions {
    #[serde(default)]
    pub instructions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionBody {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub account_keys: Vec<AccountKey>,
    #[serde(default)]
    pub instructions: Vec<Value>,
}

/// `jsonParsed` returns objects, plain `json` encoding returns strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AccountKey {
    Parsed { pubkey: String },
    Plain(String),
}

impl AccountKey {
    fn pubkey(&self) -> &str {
        match self {
            Self::Parsed { pubkey } => pubkey,
            Self::Plain(key) => key,
        }
    }
}

/// A transfer instruction touching the wallet
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTransfer {
    pub asset: String,
    pub amount: f64,
    pub incoming: bool,
}

pub struct SolanaRpcSource {
    client: Client,
    url: String,
    limit: usize,
    concurrency: usize,
    throttle: Throttle,
}

impl SolanaRpcSource {
    pub fn new(client: Client, url: &str, limit: usize, concurrency: usize, min_interval: Duration) -> Self {
        Self {
            client,
            url: url.to_string(),
            limit: limit.min(1000),
            concurrency: concurrency.max(1),
            throttle: Throttle::new(min_interval),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>, FetchError> {
        self.throttle.wait().await;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse<T> = send_json(self.client.post(&self.url).json(&body), method).await?;

        if let Some(err) = response.error {
            return Err(rpc_error(method, err));
        }
        Ok(response.result)
    }

    async fn get_signatures(&self, account: &str) -> Result<Vec<SignatureInfo>, FetchError> {
        let signatures: Vec<SignatureInfo> = self
            .call("getSignaturesForAddress", json!([account, { "limit": self.limit }]))
            .await?
            .ok_or_else(|| FetchError::internal("getSignaturesForAddress returned no result"))?;

        Ok(signatures.into_iter().filter(|s| s.err.is_none()).collect())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionResult>, FetchError> {
        self.call(
            "getTransaction",
            json!([signature, {
                "encoding": "jsonParsed",
                "maxSupportedTransactionVersion": 0,
                "commitment": "confirmed",
            }]),
        )
        .await
    }
}

#[async_trait]
impl Source for SolanaRpcSource {
    fn name(&self) -> &'static str {
        "solana-rpc"
    }

    async fn fetch(&self, account: &str) -> Result<Vec<Record>, FetchError> {
        let signatures = self.get_signatures(account).await?;
        let requested = signatures.len();
        debug!("Fetching {} transactions for {}", requested, account);

        let results: Vec<Result<Vec<SpotRecord>, FetchError>> = stream::iter(signatures)
            .map(|sig| async move {
                let tx = self.get_transaction(&sig.signature).await?;
                Ok::<_, FetchError>(tx
                    .map(|tx| map_transaction(&sig, &tx, account))
                    .unwrap_or_default())
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        let mut rate_limited = 0usize;
        for result in results {
            match result {
                Ok(batch) => records.extend(batch.into_iter().map(Record::Spot)),
                Err(e) => {
                    skipped += 1;
                    if e.kind == FetchErrorKind::UpstreamUnavailable {
                        rate_limited += 1;
                    }
                    debug!("Skipping transaction: {}", e);
                }
            }
        }

        if skipped > 0 {
            warn!(
                "Skipped {} of {} transactions for {} ({} upstream unavailable)",
                skipped, requested, account, rate_limited
            );
        }
        info!("Solana RPC produced {} records for {}", records.len(), account);
        Ok(records)
    }
}

fn rpc_error(method: &str, err: RpcError) -> FetchError {
    let message = format!("{} failed ({}): {}", method, err.code, err.message);
    match err.code {
        -32602 => FetchError::invalid_account(message),
        429 | -32005 => FetchError::unavailable(message),
        -32099..=-32000 => FetchError::unavailable(message),
        _ => FetchError::internal(message),
    }
}

fn block_time(sig: &SignatureInfo, tx: &TransactionResult) -> Option<DateTime<Utc>> {
    let secs = tx.block_time.or(sig.block_time)?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Reduce one confirmed transaction to the wallet's spot records
///
/// One record per mint whose wallet-owned balance changed; otherwise a
/// native SOL movement; otherwise any parsed transfer touching the wallet.
/// The network fee is booked on the first record only.
pub fn map_transaction(sig: &SignatureInfo, tx: &TransactionResult, wallet: &str) -> Vec<SpotRecord> {
    let Some(meta) = tx.meta.as_ref() else {
        return Vec::new();
    };
    if meta.err.is_some() {
        return Vec::new();
    }
    let Some(timestamp) = block_time(sig, tx) else {
        return Vec::new();
    };

    let keys = &tx.transaction.message.account_keys;
    let wallet_index = keys.iter().position(|k| k.pubkey() == wallet);
    let fee_lamports = if wallet_index == Some(0) { meta.fee as f64 } else { 0.0 };

    let native_lamports = wallet_index
        .and_then(|i| {
            let pre = *meta.pre_balances.get(i)?;
            let post = *meta.post_balances.get(i)?;
            Some(post as f64 - pre as f64 + fee_lamports)
        })
        .unwrap_or(0.0);

    let token_deltas = token_deltas(meta, wallet);
    let fees = lamports_to_sol(fee_lamports);
    let make = |asset: String, side: SpotSide, quantity: f64, price: Option<f64>| {
        SpotRecord::derived(timestamp, CHAIN_ID, asset, side, quantity, price, 0.0, &sig.signature)
    };

    let mut records: Vec<SpotRecord> = if !token_deltas.is_empty() {
        token_deltas
            .into_iter()
            .map(|(mint, delta)| {
                let side = classify_spot_side(native_lamports, delta);
                let price = priced(derive_price(native_lamports.abs(), delta.abs(), SOL_DECIMALS));
                make(mint_symbol(&mint), side, delta, price)
            })
            .collect()
    } else if native_lamports != 0.0 {
        vec![make(
            "SOL".to_string(),
            classify_transfer(native_lamports),
            lamports_to_sol(native_lamports),
            Some(1.0),
        )]
    } else {
        parsed_transfers(tx, meta, wallet)
            .into_iter()
            .map(|t| {
                let side = if t.incoming { SpotSide::TransferIn } else { SpotSide::TransferOut };
                let price = (t.asset == "SOL").then_some(1.0);
                make(t.asset, side, t.amount, price)
            })
            .collect()
    };

    if let Some(first) = records.first_mut() {
        first.fees = fees;
    }
    records
}

/// Net change per mint across token accounts owned by the wallet
fn token_deltas(meta: &TransactionMeta, wallet: &str) -> BTreeMap<String, f64> {
    let mut deltas: BTreeMap<String, f64> = BTreeMap::new();
    let owned = |b: &&TokenBalance| b.owner.as_deref() == Some(wallet);

    for (balances, sign) in [(&meta.post_token_balances, 1.0), (&meta.pre_token_balances, -1.0)] {
        for balance in balances.iter().flatten().filter(owned) {
            if let Some(amount) = scale_amount(&balance.ui_token_amount.amount, balance.ui_token_amount.decimals) {
                *deltas.entry(balance.mint.clone()).or_default() += sign * amount;
            }
        }
    }

    deltas.retain(|_, delta| delta.abs() > f64::EPSILON);
    deltas
}

/// System and SPL token transfers (top-level and inner) touching the wallet
pub fn parsed_transfers(tx: &TransactionResult, meta: &TransactionMeta, wallet: &str) -> Vec<ParsedTransfer> {
    let inner = meta
        .inner_instructions
        .iter()
        .flatten()
        .flat_map(|group| group.instructions.iter());

    tx.transaction
        .message
        .instructions
        .iter()
        .chain(inner)
        .filter_map(|ix| parse_transfer(ix, wallet, tx, meta))
        .collect()
}

/// Token balance entry for the account at `address`
fn token_account<'a>(tx: &TransactionResult, meta: &'a TransactionMeta, address: &str) -> Option<&'a TokenBalance> {
    let index = tx
        .transaction
        .message
        .account_keys
        .iter()
        .position(|k| k.pubkey() == address)?;
    meta.post_token_balances
        .iter()
        .flatten()
        .chain(meta.pre_token_balances.iter().flatten())
        .find(|b| b.account_index == index)
}

fn parse_transfer(ix: &Value, wallet: &str, tx: &TransactionResult, meta: &TransactionMeta) -> Option<ParsedTransfer> {
    let parsed = ix.get("parsed")?;
    let kind = parsed.get("type")?.as_str()?;
    let info = parsed.get("info")?;
    let field = |name: &str| info.get(name).and_then(Value::as_str);

    let source = field("source");
    let destination = field("destination");
    let authority = field("authority");

    let incoming = if destination == Some(wallet) {
        true
    } else if source == Some(wallet) || authority == Some(wallet) {
        false
    } else {
        return None;
    };

    match (ix.get("program").and_then(Value::as_str), kind) {
        (Some("system"), "transfer") => {
            let lamports = info.get("lamports")?.as_u64()?;
            Some(ParsedTransfer {
                asset: "SOL".to_string(),
                amount: lamports_to_sol(lamports as f64),
                incoming,
            })
        }
        (Some("spl-token"), "transferChecked") => {
            let mint = field("mint")?;
            let token_amount = info.get("tokenAmount")?;
            let raw = token_amount.get("amount")?.as_str()?;
            let decimals = token_amount.get("decimals")?.as_u64()? as u32;
            Some(ParsedTransfer {
                asset: mint_symbol(mint),
                amount: scale_amount(raw, decimals)?,
                incoming,
            })
        }
        // Unchecked transfers carry no mint; it comes from the token balances
        // of either side, and without them the transfer is skipped
        (Some("spl-token"), "transfer") => {
            let raw = field("amount")?;
            let balance = source
                .and_then(|a| token_account(tx, meta, a))
                .or_else(|| destination.and_then(|a| token_account(tx, meta, a)))?;
            Some(ParsedTransfer {
                asset: mint_symbol(&balance.mint),
                amount: scale_amount(raw, balance.ui_token_amount.decimals)?,
                incoming,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};

    const WALLET: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const OTHER: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn sig() -> SignatureInfo {
        SignatureInfo {
            signature: "sig1".to_string(),
            block_time: Some(1714564800),
            err: None,
        }
    }

    fn tx(value: Value) -> TransactionResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_swap_sol_for_usdc() {
        // wallet pays 1.5 SOL (+ fee) and receives 300 USDC
        let tx = tx(json!({
            "blockTime": 1714564800,
            "meta": {
                "err": null,
                "fee": 5000,
                "preBalances": [10_000_000_000u64, 1_000_000],
                "postBalances": [8_499_995_000u64, 1_000_000],
                "preTokenBalances": [{
                    "accountIndex": 1, "mint": USDC, "owner": WALLET,
                    "uiTokenAmount": { "amount": "0", "decimals": 6 }
                }],
                "postTokenBalances": [{
                    "accountIndex": 1, "mint": USDC, "owner": WALLET,
                    "uiTokenAmount": { "amount": "300000000", "decimals": 6 }
                }],
                "innerInstructions": []
            },
            "transaction": {
                "message": {
                    "accountKeys": [
                        { "pubkey": WALLET, "signer": true, "writable": true },
                        { "pubkey": "TokenAcct111111111111111111111111111111111", "signer": false, "writable": true }
                    ],
                    "instructions": []
                }
            }
        }));

        let records = map_transaction(&sig(), &tx, WALLET);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.asset, "USDC");
        assert_eq!(r.side, SpotSide::Sell);
        assert_eq!(r.quantity, 300.0);
        assert!((r.price.unwrap() - 0.005).abs() < 1e-12);
        assert_eq!(r.fees, 0.000005);
        assert_eq!(r.hash, "sig1");
    }

    #[test]
    fn test_native_transfer_out() {
        let tx = tx(json!({
            "blockTime": 1714564800,
            "meta": {
                "fee": 5000,
                "preBalances": [2_000_000_000u64, 0],
                "postBalances": [999_995_000u64, 1_000_000_000u64]
            },
            "transaction": { "message": { "accountKeys": [WALLET, OTHER] } }
        }));

        let records = map_transaction(&sig(), &tx, WALLET);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].side, SpotSide::TransferOut);
        assert_eq!(records[0].asset, "SOL");
        assert_eq!(records[0].quantity, 1.0);
    }

    #[test]
    fn test_parsed_transfer_without_balance_change() {
        // wallet is only the authority; the token account is not owner-tagged
        let tx = tx(json!({
            "blockTime": 1714564800,
            "meta": {
                "fee": 5000,
                "preBalances": [5000u64, 100],
                "postBalances": [0u64, 100],
                "innerInstructions": [{
                    "index": 0,
                    "instructions": [{
                        "program": "spl-token",
                        "parsed": {
                            "type": "transferChecked",
                            "info": {
                                "source": "SrcTokenAcct",
                                "destination": "DstTokenAcct",
                                "authority": WALLET,
                                "mint": USDC,
                                "tokenAmount": { "amount": "2500000", "decimals": 6, "uiAmount": 2.5 }
                            }
                        }
                    }]
                }]
            },
            "transaction": { "message": { "accountKeys": [OTHER, WALLET], "instructions": [] } }
        }));

        let records = map_transaction(&sig(), &tx, WALLET);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].side, SpotSide::TransferOut);
        assert_eq!(records[0].asset, "USDC");
        assert_eq!(records[0].quantity, 2.5);
        assert_eq!(records[0].price, None);
        // the wallet did not pay the fee
        assert_eq!(records[0].fees, 0.0);
    }

    #[test]
    fn test_unchecked_token_transfer_resolves_mint() {
        // balances without an owner tag, as older nodes return them
        let tx = tx(json!({
            "blockTime": 1714564800,
            "meta": {
                "fee": 5000,
                "preBalances": [5000u64, 100, 100],
                "postBalances": [0u64, 100, 100],
                "preTokenBalances": [{
                    "accountIndex": 2, "mint": USDC,
                    "uiTokenAmount": { "amount": "0", "decimals": 6 }
                }],
                "postTokenBalances": [{
                    "accountIndex": 2, "mint": USDC,
                    "uiTokenAmount": { "amount": "4000000", "decimals": 6 }
                }]
            },
            "transaction": {
                "message": {
                    "accountKeys": [OTHER, WALLET, "DstTokenAcct"],
                    "instructions": [{
                        "program": "spl-token",
                        "parsed": {
                            "type": "transfer",
                            "info": {
                                "source": "SrcTokenAcct",
                                "destination": "DstTokenAcct",
                                "authority": WALLET,
                                "amount": "4000000"
                            }
                        }
                    }]
                }
            }
        }));

        let records = map_transaction(&sig(), &tx, WALLET);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].asset, "USDC");
        assert_eq!(records[0].side, SpotSide::TransferOut);
        assert_eq!(records[0].quantity, 4.0);
    }

    #[test]
    fn test_unchecked_transfer_without_balances_is_skipped() {
        let tx = tx(json!({
            "blockTime": 1714564800,
            "meta": { "fee": 5000, "preBalances": [0u64, 100], "postBalances": [0u64, 100] },
            "transaction": {
                "message": {
                    "accountKeys": [OTHER, WALLET],
                    "instructions": [{
                        "program": "spl-token",
                        "parsed": {
                            "type": "transfer",
                            "info": { "source": "SrcTokenAcct", "destination": "DstTokenAcct", "authority": WALLET, "amount": "1" }
                        }
                    }]
                }
            }
        }));
        assert!(map_transaction(&sig(), &tx, WALLET).is_empty());
    }

    #[test]
    fn test_no_movement_yields_nothing() {
        let tx = tx(json!({
            "blockTime": 1714564800,
            "meta": { "fee": 5000, "preBalances": [0u64, 100], "postBalances": [0u64, 100] },
            "transaction": { "message": { "accountKeys": [OTHER, WALLET], "instructions": [] } }
        }));
        assert!(map_transaction(&sig(), &tx, WALLET).is_empty());
    }

    #[test]
    fn test_failed_transaction_is_ignored() {
        let tx = tx(json!({
            "blockTime": 1714564800,
            "meta": {
                "err": { "InstructionError": [0, { "Custom": 1 }] },
                "fee": 5000,
                "preBalances": [2_000_000_000u64],
                "postBalances": [1_000_000_000u64]
            },
            "transaction": { "message": { "accountKeys": [WALLET] } }
        }));
        assert!(map_transaction(&sig(), &tx, WALLET).is_empty());
    }

    async fn fake_rpc(Json(body): Json<Value>) -> Response {
        let ok = |result: Value| Json(json!({ "jsonrpc": "2.0", "id": 1, "result": result })).into_response();
        match (body["method"].as_str(), body["params"][0].as_str()) {
            (Some("getSignaturesForAddress"), _) => ok(json!([
                { "signature": "sig-a", "blockTime": 1714564800, "err": null },
                { "signature": "sig-b", "blockTime": 1714564700, "err": null },
                { "signature": "sig-c", "blockTime": 1714564600, "err": null },
                { "signature": "sig-failed", "blockTime": 1714564500, "err": { "InstructionError": [0, "Custom"] } }
            ])),
            (Some("getTransaction"), Some("sig-b")) => StatusCode::TOO_MANY_REQUESTS.into_response(),
            (Some("getTransaction"), Some(_)) => ok(json!({
                "blockTime": 1714564800,
                "meta": {
                    "fee": 5000,
                    "preBalances": [2_000_000_000u64, 0],
                    "postBalances": [999_995_000u64, 1_000_000_000u64]
                },
                "transaction": { "message": { "accountKeys": [WALLET, OTHER] } }
            })),
            _ => StatusCode::BAD_REQUEST.into_response(),
        }
    }

    #[tokio::test]
    async fn test_failed_detail_fetch_is_skipped() {
        let app = Router::new().route("/", post(fake_rpc));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = Client::builder().no_proxy().build().unwrap();
        let source = SolanaRpcSource::new(client, &format!("http://{}/", addr), 10, 4, Duration::ZERO);

        let records = source.fetch(WALLET).await.unwrap();
        let mut hashes: Vec<&str> = records.iter().map(|r| r.hash()).collect();
        hashes.sort();
        assert_eq!(hashes, vec!["sig-a", "sig-c"]);
    }

    #[test]
    fn test_rpc_error_mapping() {
        let err = |code| rpc_error("m", RpcError { code, message: "x".into() }).kind;
        assert_eq!(err(-32602), FetchErrorKind::InvalidAccount);
        assert_eq!(err(429), FetchErrorKind::UpstreamUnavailable);
        assert_eq!(err(-32005), FetchErrorKind::UpstreamUnavailable);
        assert_eq!(err(-32601), FetchErrorKind::InternalError);
    }
}
