//! Filtering and summary statistics over fetched records
//!
//! Every function takes a borrowed slice and returns a new vector; the
//! input is never mutated.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::types::{Record, RecordKind, SpotSide};

/// Selector value meaning "no filtering"
pub const ALL: &str = "all";

/// Date window relative to now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateRange {
    #[default]
    All,
    Week,
    Month,
}

impl DateRange {
    pub fn days(&self) -> Option<i64> {
        match self {
            Self::All => None,
            Self::Week => Some(7),
            Self::Month => Some(30),
        }
    }
}

impl FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(format!("unknown date range: {}", other)),
        }
    }
}

/// Keep records at or after `now - N days`
pub fn filter_by_date(records: &[Record], range: DateRange, now: DateTime<Utc>) -> Vec<Record> {
    match range.days() {
        None => records.to_vec(),
        Some(days) => {
            let cutoff = now - Duration::days(days);
            records
                .iter()
                .filter(|r| r.timestamp() >= cutoff)
                .cloned()
                .collect()
        }
    }
}

pub fn filter_by_asset(records: &[Record], asset: &str) -> Vec<Record> {
    if asset == ALL {
        return records.to_vec();
    }
    records.iter().filter(|r| r.asset() == asset).cloned().collect()
}

pub fn filter_by_side(records: &[Record], side: &str) -> Vec<Record> {
    if side == ALL {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|r| r.side_label() == side)
        .cloned()
        .collect()
}

/// Case-insensitive substring match on asset, hash or side
pub fn filter_by_search(records: &[Record], query: &str) -> Vec<Record> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|r| {
            r.asset().to_lowercase().contains(&needle)
                || r.hash().to_lowercase().contains(&needle)
                || r.side_label().to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

/// The full filter chain, as sent by the table view or the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSet {
    pub date: DateRange,
    pub asset: String,
    pub side: String,
    pub search: String,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            date: DateRange::All,
            asset: ALL.to_string(),
            side: ALL.to_string(),
            search: String::new(),
        }
    }
}

impl FilterSet {
    /// Apply date, asset, side and search filters in that order
    pub fn apply(&self, records: &[Record], now: DateTime<Utc>) -> Vec<Record> {
        let out = filter_by_date(records, self.date, now);
        let out = filter_by_asset(&out, &self.asset);
        let out = filter_by_side(&out, &self.side);
        filter_by_search(&out, &self.search)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SpotSummary {
    pub trade_count: usize,
    pub total_buys: f64,
    pub total_sells: f64,
    pub total_fees: f64,
    pub unique_asset_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PerpSummary {
    pub trade_count: usize,
    pub total_pnl: f64,
    pub total_fees: f64,
    pub total_funding: f64,
    pub open_position_count: usize,
    pub unique_asset_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Summary {
    Spot(SpotSummary),
    Perp(PerpSummary),
}

/// Totals over the records of the requested kind; others are ignored
pub fn summarize(records: &[Record], kind: RecordKind) -> Summary {
    match kind {
        RecordKind::Spot => {
            let mut summary = SpotSummary::default();
            let mut assets = HashSet::new();
            for record in records {
                let Record::Spot(r) = record else { continue };
                summary.trade_count += 1;
                summary.total_fees += r.fees;
                match r.side {
                    SpotSide::Buy => summary.total_buys += r.total.unwrap_or(0.0),
                    SpotSide::Sell => summary.total_sells += r.total.unwrap_or(0.0),
                    _ => {}
                }
                assets.insert(r.asset.as_str());
            }
            summary.unique_asset_count = assets.len();
            Summary::Spot(summary)
        }
        RecordKind::Perp => {
            let mut summary = PerpSummary::default();
            let mut assets = HashSet::new();
            for record in records {
                let Record::Perp(r) = record else { continue };
                summary.trade_count += 1;
                summary.total_fees += r.fees;
                summary.total_funding += r.funding;
                match r.pnl() {
                    Some(pnl) => summary.total_pnl += pnl,
                    None => summary.open_position_count += 1,
                }
                assets.insert(r.asset.as_str());
            }
            summary.unique_asset_count = assets.len();
            Summary::Perp(summary)
        }
    }
}

/// Distinct assets in first-seen order, for populating the asset selector
pub fn unique_assets(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.asset()))
        .map(|r| r.asset().to_string())
        .collect()
}
