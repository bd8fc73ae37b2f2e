//! Canonical record shapes
//!
//! Every source adapter reduces its upstream data to one of two flat
//! shapes: [`SpotRecord`] for transfers/trades and [`PerpRecord`] for
//! perpetual positions. Consumers receive them wrapped in the [`Record`]
//! tagged union and match on it exhaustively.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Which record shape a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[default]
    Spot,
    Perp,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Perp => "perp",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(Self::Spot),
            "perp" | "perps" | "futures" => Ok(Self::Perp),
            other => Err(format!("unknown record type: {}", other)),
        }
    }
}

/// Spot trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpotSide {
    Buy,
    Sell,
    /// Movement that could not be classified as a trade
    Transfer,
    TransferIn,
    TransferOut,
}

impl SpotSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Transfer => "TRANSFER",
            Self::TransferIn => "TRANSFER_IN",
            Self::TransferOut => "TRANSFER_OUT",
        }
    }
}

impl fmt::Display for SpotSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Perpetual position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerpSide {
    Long,
    Short,
}

impl PerpSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

impl fmt::Display for PerpSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One spot transfer or trade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpotRecord {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub chain: String,
    pub asset: String,
    pub side: SpotSide,
    pub quantity: f64,
    /// Unit price in the chain's native currency; `None` when unpriced
    pub price: Option<f64>,
    pub total: Option<f64>,
    pub fees: f64,
    pub hash: String,
}

impl SpotRecord {
    /// Build a record whose total is derived from quantity and price
    #[allow(clippy::too_many_arguments)]
    pub fn derived(
        timestamp: DateTime<Utc>,
        chain: impl Into<String>,
        asset: impl Into<String>,
        side: SpotSide,
        quantity: f64,
        price: Option<f64>,
        fees: f64,
        hash: impl Into<String>,
    ) -> Self {
        let quantity = quantity.abs();
        Self {
            timestamp,
            chain: chain.into(),
            asset: asset.into(),
            side,
            quantity,
            price,
            total: price.map(|p| quantity * p),
            fees: fees.abs(),
            hash: hash.into(),
        }
    }
}

/// Exit leg of a closed position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionClose {
    pub exit_price: f64,
    pub pnl: f64,
}

/// One perpetual position, open or closed
#[derive(Debug, Clone, PartialEq)]
pub struct PerpRecord {
    /// Open time for open positions, close time for closed ones
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub side: PerpSide,
    pub quantity: f64,
    pub position_size: f64,
    pub entry_price: f64,
    /// `None` while the position is open
    pub close: Option<PositionClose>,
    pub fees: f64,
    pub funding: f64,
    pub exchange: String,
    pub leverage: Option<f64>,
    pub liquidation: bool,
    pub hash: String,
    pub chain: String,
}

impl PerpRecord {
    pub fn is_open(&self) -> bool {
        self.close.is_none()
    }

    pub fn exit_price(&self) -> Option<f64> {
        self.close.map(|c| c.exit_price)
    }

    pub fn pnl(&self) -> Option<f64> {
        self.close.map(|c| c.pnl)
    }
}

#[derive(Serialize)]
struct PerpRecordJson<'a> {
    #[serde(serialize_with = "serialize_timestamp")]
    timestamp: &'a DateTime<Utc>,
    asset: &'a str,
    side: PerpSide,
    quantity: f64,
    position_size: f64,
    entry_price: f64,
    exit_price: Option<f64>,
    pnl: Option<f64>,
    fees: f64,
    funding: f64,
    exchange: &'a str,
    leverage: Option<f64>,
    liquidation: bool,
    hash: &'a str,
    chain: &'a str,
}

impl Serialize for PerpRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        PerpRecordJson {
            timestamp: &self.timestamp,
            asset: &self.asset,
            side: self.side,
            quantity: self.quantity,
            position_size: self.position_size,
            entry_price: self.entry_price,
            exit_price: self.exit_price(),
            pnl: self.pnl(),
            fees: self.fees,
            funding: self.funding,
            exchange: &self.exchange,
            leverage: self.leverage,
            liquidation: self.liquidation,
            hash: &self.hash,
            chain: &self.chain,
        }
        .serialize(serializer)
    }
}

/// A canonical record of either shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Spot(SpotRecord),
    Perp(PerpRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Spot(_) => RecordKind::Spot,
            Self::Perp(_) => RecordKind::Perp,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Spot(r) => r.timestamp,
            Self::Perp(r) => r.timestamp,
        }
    }

    pub fn asset(&self) -> &str {
        match self {
            Self::Spot(r) => &r.asset,
            Self::Perp(r) => &r.asset,
        }
    }

    pub fn hash(&self) -> &str {
        match self {
            Self::Spot(r) => &r.hash,
            Self::Perp(r) => &r.hash,
        }
    }

    pub fn side_label(&self) -> &'static str {
        match self {
            Self::Spot(r) => r.side.as_str(),
            Self::Perp(r) => r.side.as_str(),
        }
    }
}

impl From<SpotRecord> for Record {
    fn from(record: SpotRecord) -> Self {
        Self::Spot(record)
    }
}

impl From<PerpRecord> for Record {
    fn from(record: PerpRecord) -> Self {
        Self::Perp(record)
    }
}

/// Drop duplicate records and order newest-first
///
/// Two records are duplicates when kind, hash, asset and side all match.
/// The first occurrence wins; ties on timestamp keep their input order.
pub fn normalize(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    let mut out: Vec<Record> = records
        .into_iter()
        .filter(|r| {
            seen.insert((
                r.kind(),
                r.hash().to_string(),
                r.asset().to_string(),
                r.side_label(),
            ))
        })
        .collect();
    out.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    out
}

/// RFC 3339 with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_timestamp<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_timestamp(ts))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    pub fn spot(secs: i64, asset: &str, side: SpotSide, quantity: f64, price: f64, hash: &str) -> Record {
        SpotRecord::derived(at(secs), "solana", asset, side, quantity, Some(price), 0.000005, hash).into()
    }

    pub fn perp(secs: i64, asset: &str, size: f64, entry: f64, close: Option<(f64, f64)>, hash: &str) -> Record {
        PerpRecord {
            timestamp: at(secs),
            asset: asset.to_string(),
            side: if size >= 0.0 { PerpSide::Long } else { PerpSide::Short },
            quantity: size.abs(),
            position_size: size,
            entry_price: entry,
            close: close.map(|(exit_price, pnl)| PositionClose { exit_price, pnl }),
            fees: 1.5,
            funding: -0.25,
            exchange: "Hyperliquid".to_string(),
            leverage: Some(5.0),
            liquidation: false,
            hash: hash.to_string(),
            chain: "hyperliquid".to_string(),
        }
        .into()
    }
}
