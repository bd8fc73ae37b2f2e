//! Helius enhanced-transactions indexer
//!
//! One batched call per account returns parsed events with per-account
//! native and token balance changes, which map directly onto spot records.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{lamports_to_sol, mint_symbol, CHAIN_ID, SOL_DECIMALS};
use crate::classify::{classify_spot_side, classify_transfer, derive_price, priced, scale_amount};
use crate::error::FetchError;
use crate::sources::http::send_json;
use crate::sources::Source;
use crate::types::{Record, SpotRecord};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedTransaction {
    pub signature: String,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub fee_payer: String,
    #[serde(default)]
    pub transaction_error: Option<serde_json::Value>,
    #[serde(default)]
    pub account_data: Vec<AccountData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    pub account: String,
    #[serde(default)]
    pub native_balance_change: i64,
    #[serde(default)]
    pub token_balance_changes: Vec<TokenBalanceChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalanceChange {
    pub user_account: String,
    pub mint: String,
    pub raw_token_amount: RawTokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTokenAmount {
    pub token_amount: String,
    pub decimals: u32,
}

pub struct HeliusSource {
    client: Client,
    base_url: String,
    api_key: String,
    limit: usize,
}

impl HeliusSource {
    pub fn new(client: Client, base_url: &str, api_key: &str, limit: usize) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            // the endpoint caps a page at 100 events
            limit: limit.min(100),
        }
    }
}

#[async_trait]
impl Source for HeliusSource {
    fn name(&self) -> &'static str {
        "helius"
    }

    async fn fetch(&self, account: &str) -> Result<Vec<Record>, FetchError> {
        let request = self
            .client
            .get(format!("{}/v0/addresses/{}/transactions", self.base_url, account))
            .query(&[("api-key", self.api_key.as_str())])
            .query(&[("limit", self.limit)]);

        let events: Vec<serde_json::Value> = send_json(request, "helius transactions").await?;
        let total = events.len();
        let records = map_events(events, account);

        info!("Helius returned {} events, {} records for {}", total, records.len(), account);
        Ok(records)
    }
}

/// Decode and map each event on its own; undecodable events are skipped
pub fn map_events(events: Vec<serde_json::Value>, wallet: &str) -> Vec<Record> {
    let mut skipped = 0usize;
    let records: Vec<Record> = events
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<EnhancedTransaction>(value) {
            Ok(event) => map_event(&event, wallet),
            Err(e) => {
                skipped += 1;
                debug!("Skipping malformed helius event: {}", e);
                None
            }
        })
        .map(Record::Spot)
        .collect();

    if skipped > 0 {
        warn!("Skipped {} malformed helius events", skipped);
    }
    records
}

/// Reduce one event to the wallet's spot movement, if it had one
pub fn map_event(event: &EnhancedTransaction, wallet: &str) -> Option<SpotRecord> {
    if event.transaction_error.as_ref().is_some_and(|e| !e.is_null()) {
        return None;
    }

    let timestamp = Utc.timestamp_opt(event.timestamp, 0).single()?;
    let paid_fee = event.fee_payer == wallet;
    let fee_lamports = if paid_fee { event.fee as f64 } else { 0.0 };

    // Balance change net of the network fee
    let native_lamports: f64 = event
        .account_data
        .iter()
        .filter(|a| a.account == wallet)
        .map(|a| a.native_balance_change as f64)
        .sum::<f64>()
        + fee_lamports;

    // Net change per mint for token accounts owned by the wallet
    let mut token_deltas: HashMap<&str, f64> = HashMap::new();
    for change in event
        .account_data
        .iter()
        .flat_map(|a| a.token_balance_changes.iter())
        .filter(|c| c.user_account == wallet)
    {
        let Some(amount) = scale_amount(&change.raw_token_amount.token_amount, change.raw_token_amount.decimals)
        else {
            continue;
        };
        *token_deltas.entry(change.mint.as_str()).or_default() += amount;
    }

    let primary = token_deltas
        .into_iter()
        .filter(|(_, delta)| *delta != 0.0)
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()));

    let fees = lamports_to_sol(fee_lamports);

    match primary {
        Some((mint, token_delta)) => {
            let side = classify_spot_side(native_lamports, token_delta);
            let price = priced(derive_price(native_lamports.abs(), token_delta.abs(), SOL_DECIMALS));
            Some(SpotRecord::derived(
                timestamp,
                CHAIN_ID,
                mint_symbol(mint),
                side,
                token_delta,
                price,
                fees,
                &event.signature,
            ))
        }
        None if native_lamports != 0.0 => Some(SpotRecord::derived(
            timestamp,
            CHAIN_ID,
            "SOL",
            classify_transfer(native_lamports),
            lamports_to_sol(native_lamports),
            Some(1.0),
            fees,
            &event.signature,
        )),
        None => None,
    }
}
