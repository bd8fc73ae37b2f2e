//! Seeded synthetic history
//!
//! Used for demos, for sources without a configured live adapter, and as
//! the fallback when a live upstream is unavailable. The generator is
//! seeded from the account, source and record kind, so the same request
//! yields the same history for a given `now`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::classify::{classify_perp_side, realized_pnl};
use crate::config::{AccountFormat, ChainInfo};
use crate::error::FetchError;
use crate::sources::Source;
use crate::types::{PerpRecord, PositionClose, Record, RecordKind, SpotRecord, SpotSide};

const HISTORY_DAYS: i64 = 90;

/// Reference USD prices used to derive native-denominated quotes
const USD_PRICES: &[(&str, f64)] = &[
    ("SOL", 150.0),
    ("ETH", 3200.0),
    ("POL", 0.55),
    ("BNB", 580.0),
    ("BTC", 64000.0),
    ("USDC", 1.0),
    ("USDT", 1.0),
    ("BONK", 0.000024),
    ("JUP", 1.05),
    ("WIF", 2.6),
    ("JTO", 3.1),
    ("LINK", 14.5),
    ("UNI", 7.8),
    ("ARB", 0.95),
    ("OP", 2.2),
    ("PEPE", 0.0000085),
    ("DOGE", 0.15),
    ("AVAX", 34.0),
];

const SOLANA_TOKENS: &[&str] = &["SOL", "USDC", "BONK", "JUP", "WIF", "JTO"];
const EVM_TOKENS: &[&str] = &["USDC", "USDT", "LINK", "UNI", "ARB", "OP", "PEPE"];
const PERP_ASSETS: &[&str] = &["BTC", "ETH", "SOL", "ARB", "DOGE", "AVAX"];

const BASE58: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const HEX: &[u8] = b"0123456789abcdef";

fn usd_price(symbol: &str) -> f64 {
    USD_PRICES
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, p)| *p)
        .unwrap_or(1.0)
}

/// FNV-1a, stable across builds and platforms
fn seed_for(parts: &[&str]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for byte in part.bytes().chain(std::iter::once(0xff)) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

fn jitter(rng: &mut StdRng, std_dev: f64) -> f64 {
    Normal::new(0.0, std_dev)
        .map(|n| n.sample(rng))
        .unwrap_or(0.0)
}

pub struct SyntheticSource {
    chain: &'static ChainInfo,
    kind: RecordKind,
    now: DateTime<Utc>,
}

impl SyntheticSource {
    pub fn new(chain: &'static ChainInfo, kind: RecordKind) -> Self {
        Self::at(chain, kind, Utc::now())
    }

    /// Generate relative to a fixed clock
    pub fn at(chain: &'static ChainInfo, kind: RecordKind, now: DateTime<Utc>) -> Self {
        Self { chain, kind, now }
    }

    pub fn generate(&self, account: &str) -> Vec<Record> {
        let mut rng = StdRng::seed_from_u64(seed_for(&[account, self.chain.id, self.kind.as_str()]));
        let count = rng.gen_range(12..=40);

        let mut records: Vec<Record> = (0..count)
            .map(|_| match self.kind {
                RecordKind::Spot => Record::Spot(self.spot_record(&mut rng)),
                RecordKind::Perp => Record::Perp(self.perp_record(&mut rng)),
            })
            .collect();
        records.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        records
    }

    fn timestamp(&self, rng: &mut StdRng, max_days: i64) -> DateTime<Utc> {
        self.now - Duration::seconds(rng.gen_range(0..max_days * 86_400))
    }

    fn hash(&self, rng: &mut StdRng) -> String {
        match self.chain.account_format {
            AccountFormat::Base58 => (0..88)
                .map(|_| BASE58[rng.gen_range(0..BASE58.len())] as char)
                .collect(),
            _ => {
                let hex: String = (0..64).map(|_| HEX[rng.gen_range(0..HEX.len())] as char).collect();
                format!("0x{}", hex)
            }
        }
    }

    fn spot_record(&self, rng: &mut StdRng) -> SpotRecord {
        let native = self.chain.native_symbol;
        let native_usd = usd_price(native);
        let evm = self.chain.account_format == AccountFormat::Hex;

        let tokens: Vec<&str> = if evm {
            std::iter::once(native).chain(EVM_TOKENS.iter().copied()).collect()
        } else {
            SOLANA_TOKENS.to_vec()
        };
        let asset = tokens[rng.gen_range(0..tokens.len())];

        let side = match rng.gen_range(0..10) {
            0 => SpotSide::TransferIn,
            1 => SpotSide::TransferOut,
            2..=5 => SpotSide::Buy,
            _ => SpotSide::Sell,
        };

        // Quote in native units so the native asset itself prices at 1
        let price = if asset == native {
            1.0
        } else {
            let drift = (1.0 + jitter(rng, 0.08)).max(0.2);
            usd_price(asset) * drift / native_usd
        };

        let notional_usd = rng.gen_range(25.0..5_000.0);
        let quantity = notional_usd / native_usd / price;
        let fees = if evm {
            rng.gen_range(0.0002..0.004)
        } else {
            rng.gen_range(0.000005..0.0002)
        };

        SpotRecord::derived(
            self.timestamp(rng, HISTORY_DAYS),
            self.chain.id,
            asset,
            side,
            quantity,
            Some(price),
            fees,
            self.hash(rng),
        )
    }

    fn perp_record(&self, rng: &mut StdRng) -> PerpRecord {
        let asset = PERP_ASSETS[rng.gen_range(0..PERP_ASSETS.len())];
        let entry_price = usd_price(asset) * (1.0 + jitter(rng, 0.1)).max(0.3);
        let notional = rng.gen_range(500.0..50_000.0);
        let direction = if rng.gen_bool(0.55) { 1.0 } else { -1.0 };
        let position_size = direction * notional / entry_price;
        let leverage = rng.gen_range(1..=25) as f64;
        let funding = jitter(rng, notional * 0.0005);

        let open = rng.gen_bool(0.25);
        let liquidation = !open && rng.gen_bool(0.06);

        let close = if open {
            None
        } else {
            let change = if liquidation {
                // Liquidated positions close against the position
                -direction * (0.9 / leverage)
            } else {
                jitter(rng, 0.05)
            };
            let exit_price = entry_price * (1.0 + change).max(0.01);
            Some(PositionClose {
                exit_price,
                pnl: realized_pnl(entry_price, exit_price, position_size),
            })
        };

        let timestamp = if open {
            self.timestamp(rng, 7)
        } else {
            self.timestamp(rng, HISTORY_DAYS)
        };
        let fees = notional * if open { 0.00035 } else { 0.0007 };

        PerpRecord {
            timestamp,
            asset: asset.to_string(),
            side: classify_perp_side(position_size),
            quantity: position_size.abs(),
            position_size,
            entry_price,
            close,
            fees,
            funding,
            exchange: self.chain.name.to_string(),
            leverage: Some(leverage),
            liquidation,
            hash: self.hash(rng),
            chain: self.chain.settlement_chain.to_string(),
        }
    }
}

#[async_trait]
impl Source for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn fetch(&self, account: &str) -> Result<Vec<Record>, FetchError> {
        Ok(self.generate(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::find_chain;
    use chrono::TimeZone;

    const SOL_ADDR: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const EVM_ADDR: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_564_800, 0).unwrap()
    }

    fn generate(chain: &str, kind: RecordKind, account: &str) -> Vec<Record> {
        SyntheticSource::at(find_chain(chain).unwrap(), kind, now()).generate(account)
    }

    #[test]
    fn test_spot_invariants() {
        for (chain, account) in [("solana", SOL_ADDR), ("ethereum", EVM_ADDR), ("polygon", EVM_ADDR)] {
            let records = generate(chain, RecordKind::Spot, account);
            assert!((12..=40).contains(&records.len()));

            for record in &records {
                let Record::Spot(r) = record else { panic!("expected spot") };
                let price = r.price.unwrap();
                let total = r.total.unwrap();
                assert!(r.quantity > 0.0 && price > 0.0);
                assert!((total - r.quantity * price).abs() <= 1e-9 * total.max(1.0));
                assert!(r.fees >= 0.0);
                assert_eq!(r.chain, chain);
                assert!(r.timestamp <= now());
                assert!(r.timestamp >= now() - Duration::days(HISTORY_DAYS));
            }
        }
    }

    #[test]
    fn test_perp_invariants() {
        let records = generate("hyperliquid", RecordKind::Perp, EVM_ADDR);
        for record in &records {
            let Record::Perp(r) = record else { panic!("expected perp") };
            assert_eq!(r.exit_price().is_none(), r.pnl().is_none());
            assert_eq!(r.side, classify_perp_side(r.position_size));
            assert_eq!(r.quantity, r.position_size.abs());
            assert!(r.leverage.unwrap() >= 1.0);
            assert!(!(r.liquidation && r.is_open()));
            if r.liquidation {
                assert!(r.pnl().unwrap() < 0.0);
            }
            if let Some(close) = r.close {
                let expected = realized_pnl(r.entry_price, close.exit_price, r.position_size);
                assert!((close.pnl - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_sorted_newest_first() {
        let records = generate("solana", RecordKind::Spot, SOL_ADDR);
        assert!(records.windows(2).all(|w| w[0].timestamp() >= w[1].timestamp()));
    }

    #[test]
    fn test_deterministic_per_request() {
        let a = generate("solana", RecordKind::Spot, SOL_ADDR);
        let b = generate("solana", RecordKind::Spot, SOL_ADDR);
        assert_eq!(a, b);

        let other_account = generate("solana", RecordKind::Spot, "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM");
        assert_ne!(a, other_account);

        let perps = generate("drift", RecordKind::Perp, SOL_ADDR);
        assert!(perps.iter().all(|r| r.kind() == RecordKind::Perp));
    }

    #[test]
    fn test_hash_format_follows_chain() {
        let sol = generate("solana", RecordKind::Spot, SOL_ADDR);
        assert_eq!(sol[0].hash().len(), 88);

        let eth = generate("ethereum", RecordKind::Spot, EVM_ADDR);
        assert!(eth[0].hash().starts_with("0x"));
        assert_eq!(eth[0].hash().len(), 66);
    }
}
