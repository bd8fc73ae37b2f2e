//! Etherscan multichain explorer adapter (EVM chains)
//!
//! Normal transactions carry the native value and gas; token transfers
//! carry ERC-20 movements. Both lists are fetched for the account and
//! joined on transaction hash.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classify::{classify_spot_side, classify_transfer, derive_price, priced, scale_amount};
use crate::config::ChainInfo;
use crate::error::FetchError;
use crate::sources::http::{send_json, Throttle};
use crate::sources::{shorten, Source};
use crate::types::{Record, SpotRecord};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    result: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalTx {
    pub hash: String,
    pub time_stamp: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub value: String,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub gas_price: String,
    #[serde(default)]
    pub is_error: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTx {
    pub hash: String,
    pub time_stamp: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub contract_address: String,
    #[serde(default)]
    pub token_symbol: String,
    pub token_decimal: String,
}

pub struct EtherscanSource {
    client: Client,
    base_url: String,
    api_key: String,
    chain: &'static ChainInfo,
    limit: usize,
    throttle: Throttle,
}

impl EtherscanSource {
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: &str,
        chain: &'static ChainInfo,
        limit: usize,
        min_interval: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            chain,
            limit,
            throttle: Throttle::new(min_interval),
        }
    }

    async fn account_list<T: DeserializeOwned>(&self, action: &str, account: &str) -> Result<Vec<T>, FetchError> {
        let chain_id = self
            .chain
            .evm_chain_id
            .ok_or_else(|| FetchError::unsupported(format!("{} is not an EVM chain", self.chain.name)))?;

        self.throttle.wait().await;
        let request = self.client.get(&self.base_url).query(&[
            ("chainid", chain_id.to_string()),
            ("module", "account".to_string()),
            ("action", action.to_string()),
            ("address", account.to_string()),
            ("page", "1".to_string()),
            ("offset", self.limit.to_string()),
            ("sort", "desc".to_string()),
            ("apikey", self.api_key.clone()),
        ]);

        let envelope: Envelope = send_json(request, action).await?;
        let items = envelope_items(envelope, action)?;
        Ok(decode_items(items, action))
    }
}

#[async_trait]
impl Source for EtherscanSource {
    fn name(&self) -> &'static str {
        "etherscan"
    }

    async fn fetch(&self, account: &str) -> Result<Vec<Record>, FetchError> {
        let normal: Vec<NormalTx> = self.account_list("txlist", account).await?;
        let tokens: Vec<TokenTx> = self.account_list("tokentx", account).await?;

        let records = map_history(&normal, &tokens, account, self.chain);
        info!(
            "Etherscan {} returned {} txs, {} token transfers, {} records",
            self.chain.id,
            normal.len(),
            tokens.len(),
            records.len()
        );
        Ok(records.into_iter().map(Record::Spot).collect())
    }
}

/// Unwrap the `{status, message, result}` envelope
fn envelope_items(envelope: Envelope, action: &str) -> Result<Vec<Value>, FetchError> {
    match envelope.result {
        Value::Array(items) => Ok(items),
        Value::String(text) if envelope.status != "1" => {
            let lower = text.to_lowercase();
            let message = format!("{} failed: {} ({})", action, envelope.message, text);
            if lower.contains("api key") {
                Err(FetchError::unauthorized(message))
            } else if lower.contains("rate limit") {
                Err(FetchError::unavailable(message))
            } else if lower.contains("address") {
                Err(FetchError::invalid_account(message))
            } else {
                Err(FetchError::internal(message))
            }
        }
        Value::Null if envelope.message.starts_with("No transactions found") => Ok(Vec::new()),
        other => Err(FetchError::internal(format!(
            "{} returned unexpected result: {}",
            action,
            other.to_string().chars().take(100).collect::<String>()
        ))),
    }
}

fn decode_items<T: DeserializeOwned>(items: Vec<Value>, action: &str) -> Vec<T> {
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Skipping malformed {} item: {}", action, e);
                None
            }
        })
        .collect();

    if decoded.len() < total {
        warn!("Skipped {} malformed {} items", total - decoded.len(), action);
    }
    decoded
}

fn parse_time(secs: &str) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs.parse().ok()?, 0).single()
}

fn parse_f64(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

/// Signed wei flow for the wallet in one normal transaction
fn native_delta(tx: &NormalTx, wallet: &str) -> f64 {
    let value = parse_f64(&tx.value);
    let sent = tx.from.eq_ignore_ascii_case(wallet);
    let received = tx.to.eq_ignore_ascii_case(wallet);
    match (sent, received) {
        (true, false) => -value,
        (false, true) => value,
        _ => 0.0,
    }
}

/// Gas cost in native units when the wallet sent the transaction
fn gas_fee(tx: &NormalTx, wallet: &str, decimals: u32) -> f64 {
    if !tx.from.eq_ignore_ascii_case(wallet) {
        return 0.0;
    }
    parse_f64(&tx.gas_used) * parse_f64(&tx.gas_price) / 10f64.powi(decimals as i32)
}

struct TokenLeg {
    symbol: String,
    delta: f64,
    timestamp: Option<DateTime<Utc>>,
}

/// Join normal transactions and token transfers into spot records
pub fn map_history(normal: &[NormalTx], tokens: &[TokenTx], wallet: &str, chain: &ChainInfo) -> Vec<SpotRecord> {
    let decimals = chain.native_decimals;
    let by_hash: HashMap<&str, &NormalTx> = normal.iter().map(|tx| (tx.hash.as_str(), tx)).collect();

    // hash -> contract -> net wallet delta
    let mut legs: BTreeMap<&str, BTreeMap<String, TokenLeg>> = BTreeMap::new();
    for t in tokens {
        let Ok(token_decimals) = t.token_decimal.parse::<u32>() else { continue };
        let Some(amount) = scale_amount(&t.value, token_decimals) else { continue };
        let signed = if t.to.eq_ignore_ascii_case(wallet) && !t.from.eq_ignore_ascii_case(wallet) {
            amount
        } else if t.from.eq_ignore_ascii_case(wallet) && !t.to.eq_ignore_ascii_case(wallet) {
            -amount
        } else {
            continue;
        };
        let leg = legs
            .entry(t.hash.as_str())
            .or_default()
            .entry(t.contract_address.to_lowercase())
            .or_insert_with(|| TokenLeg {
                symbol: if t.token_symbol.is_empty() {
                    shorten(&t.contract_address, 6, 4)
                } else {
                    t.token_symbol.clone()
                },
                delta: 0.0,
                timestamp: parse_time(&t.time_stamp),
            });
        leg.delta += signed;
    }

    let mut records = Vec::new();

    for (hash, contracts) in &legs {
        let tx = by_hash.get(hash).copied();
        if tx.is_some_and(|tx| tx.is_error == "1") {
            continue;
        }
        let native_wei = tx.map(|tx| native_delta(tx, wallet)).unwrap_or(0.0);
        let mut fees = tx.map(|tx| gas_fee(tx, wallet, decimals)).unwrap_or(0.0);

        for leg in contracts.values().filter(|l| l.delta != 0.0) {
            let Some(timestamp) = leg.timestamp else { continue };
            let side = classify_spot_side(native_wei, leg.delta);
            let price = priced(derive_price(native_wei.abs(), leg.delta.abs(), decimals));
            records.push(SpotRecord::derived(
                timestamp,
                chain.id,
                leg.symbol.clone(),
                side,
                leg.delta,
                price,
                fees,
                *hash,
            ));
            fees = 0.0;
        }
    }

    for tx in normal {
        if legs.contains_key(tx.hash.as_str()) || tx.is_error == "1" {
            continue;
        }
        let wei = native_delta(tx, wallet);
        if wei == 0.0 {
            continue;
        }
        let Some(timestamp) = parse_time(&tx.time_stamp) else { continue };
        records.push(SpotRecord::derived(
            timestamp,
            chain.id,
            chain.native_symbol,
            classify_transfer(wei),
            wei / 10f64.powi(decimals as i32),
            Some(1.0),
            gas_fee(tx, wallet, decimals),
            &tx.hash,
        ));
    }

    records
}
