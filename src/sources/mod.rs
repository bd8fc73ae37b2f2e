//! Source adapters
//!
//! Each adapter turns one upstream's native response into canonical
//! [`Record`]s. Item-level failures (one malformed transaction, one failed
//! detail fetch) are skipped inside the adapter; batch-level failures are
//! returned as a [`FetchError`] for the dispatcher to act on.
//!
//! # Components
//!
//! - [`solana::helius`] - Helius enhanced-transactions indexer
//! - [`solana::rpc`] - Solana JSON-RPC with bounded detail fan-out
//! - [`etherscan`] - Etherscan multichain explorer for EVM chains
//! - [`hyperliquid`] - Hyperliquid perp positions
//! - [`synthetic`] - Seeded demo data and universal fallback

pub mod etherscan;
pub mod http;
pub mod hyperliquid;
pub mod solana;
pub mod synthetic;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::types::Record;

pub use etherscan::EtherscanSource;
pub use hyperliquid::HyperliquidSource;
pub use solana::helius::HeliusSource;
pub use solana::rpc::SolanaRpcSource;
pub use synthetic::SyntheticSource;

/// `head...tail` display form of a long address, counted in characters
pub fn shorten(address: &str, head: usize, tail: usize) -> String {
    let len = address.chars().count();
    if len <= head + tail + 2 {
        return address.to_string();
    }
    let start: String = address.chars().take(head).collect();
    let end: String = address.chars().skip(len - tail).collect();
    format!("{}...{}", start, end)
}

/// The adapter contract: account identifier in, canonical records out
#[async_trait]
pub trait Source: Send + Sync {
    /// Short adapter name for logs and responses
    fn name(&self) -> &'static str;

    async fn fetch(&self, account: &str) -> Result<Vec<Record>, FetchError>;
}
