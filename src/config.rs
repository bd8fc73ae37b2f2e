//! Source metadata and adapter configuration

use clap::Args;
use serde::Serialize;
use std::time::Duration;

use crate::error::FetchError;
use crate::types::RecordKind;

/// Default public Solana RPC endpoint
pub const DEFAULT_SOLANA_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

pub const DEFAULT_HELIUS_BASE_URL: &str = "https://api.helius.xyz";

pub const DEFAULT_ETHERSCAN_BASE_URL: &str = "https://api.etherscan.io/v2/api";

pub const DEFAULT_HYPERLIQUID_BASE_URL: &str = "https://api.hyperliquid.xyz";

/// Upper bound on concurrent detail fetches within one request
pub const MAX_RPC_CONCURRENCY: usize = 20;

/// How a source identifies accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountFormat {
    /// Base58 public key, 32-44 characters
    Base58,
    /// `0x` followed by 40 hex digits
    Hex,
    /// Cosmos-style bech32 address with the given human-readable prefix
    Bech32(&'static str),
}

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

impl AccountFormat {
    pub fn is_valid(&self, account: &str) -> bool {
        match self {
            Self::Base58 => {
                (32..=44).contains(&account.len())
                    && account.chars().all(|c| BASE58_ALPHABET.contains(c))
            }
            Self::Hex => {
                account.len() == 42
                    && (account.starts_with("0x") || account.starts_with("0X"))
                    && account[2..].chars().all(|c| c.is_ascii_hexdigit())
            }
            Self::Bech32(hrp) => match account.strip_prefix(hrp).and_then(|s| s.strip_prefix('1')) {
                Some(data) => {
                    (38..=58).contains(&data.len()) && data.chars().all(|c| BECH32_CHARSET.contains(c))
                }
                None => false,
            },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Base58 => "a base58 address of 32-44 characters".to_string(),
            Self::Hex => "a 0x-prefixed 40 hex digit address".to_string(),
            Self::Bech32(hrp) => format!("a {}1... address", hrp),
        }
    }
}

/// Static metadata for one chain or perp venue
#[derive(Debug, Clone, Serialize)]
pub struct ChainInfo {
    pub id: &'static str,
    pub name: &'static str,
    /// Display colour used by the table view
    pub color: &'static str,
    pub market: RecordKind,
    pub account_format: AccountFormat,
    /// Settlement chain reported on perp records
    pub settlement_chain: &'static str,
    pub native_symbol: &'static str,
    pub native_decimals: u32,
    /// EVM chain id, for explorer APIs
    pub evm_chain_id: Option<u64>,
}

const fn spot(
    id: &'static str,
    name: &'static str,
    color: &'static str,
    account_format: AccountFormat,
    native_symbol: &'static str,
    native_decimals: u32,
    evm_chain_id: Option<u64>,
) -> ChainInfo {
    ChainInfo {
        id,
        name,
        color,
        market: RecordKind::Spot,
        account_format,
        settlement_chain: id,
        native_symbol,
        native_decimals,
        evm_chain_id,
    }
}

const fn venue(
    id: &'static str,
    name: &'static str,
    color: &'static str,
    account_format: AccountFormat,
    settlement_chain: &'static str,
) -> ChainInfo {
    ChainInfo {
        id,
        name,
        color,
        market: RecordKind::Perp,
        account_format,
        settlement_chain,
        native_symbol: "USDC",
        native_decimals: 6,
        evm_chain_id: None,
    }
}

pub static CHAINS: &[ChainInfo] = &[
    spot("solana", "Solana", "#14F195", AccountFormat::Base58, "SOL", 9, None),
    spot("ethereum", "Ethereum", "#627EEA", AccountFormat::Hex, "ETH", 18, Some(1)),
    spot("base", "Base", "#0052FF", AccountFormat::Hex, "ETH", 18, Some(8453)),
    spot("arbitrum", "Arbitrum", "#28A0F0", AccountFormat::Hex, "ETH", 18, Some(42161)),
    spot("optimism", "Optimism", "#FF0420", AccountFormat::Hex, "ETH", 18, Some(10)),
    spot("polygon", "Polygon", "#8247E5", AccountFormat::Hex, "POL", 18, Some(137)),
    spot("bsc", "BNB Chain", "#F3BA2F", AccountFormat::Hex, "BNB", 18, Some(56)),
    venue("hyperliquid", "Hyperliquid", "#97FCE4", AccountFormat::Hex, "hyperliquid"),
    venue("dydx", "dYdX", "#6966FF", AccountFormat::Bech32("dydx"), "dydx"),
    venue("gmx", "GMX", "#2D42FC", AccountFormat::Hex, "arbitrum"),
    venue("drift", "Drift", "#E2A0FF", AccountFormat::Base58, "solana"),
    venue("vertex", "Vertex", "#7A5CFF", AccountFormat::Hex, "arbitrum"),
    venue("aevo", "Aevo", "#F4F4F4", AccountFormat::Hex, "aevo"),
];

pub fn find_chain(id: &str) -> Option<&'static ChainInfo> {
    let id = id.trim();
    CHAINS.iter().find(|c| c.id.eq_ignore_ascii_case(id))
}

/// Resolve a source id for the requested record kind and check the account
pub fn resolve_source(
    chain: &str,
    kind: RecordKind,
    account: &str,
) -> Result<&'static ChainInfo, FetchError> {
    let info = find_chain(chain)
        .ok_or_else(|| FetchError::unsupported(format!("unknown chain or exchange '{}'", chain)).user_visible())?;

    if info.market != kind {
        return Err(FetchError::unsupported(format!(
            "{} does not provide {} records",
            info.name, kind
        ))
        .user_visible());
    }

    if !info.account_format.is_valid(account.trim()) {
        return Err(FetchError::invalid_account(format!(
            "{} accounts must be {}",
            info.name,
            info.account_format.describe()
        ))
        .user_visible());
    }

    Ok(info)
}

/// Upstream credentials and endpoints, one flag per setting with an env fallback
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Helius API key (enables the Solana indexer adapter)
    #[arg(long, env = "HELIUS_API_KEY", hide_env_values = true)]
    pub helius_api_key: Option<String>,

    #[arg(long, env = "HELIUS_BASE_URL", default_value = DEFAULT_HELIUS_BASE_URL)]
    pub helius_base_url: String,

    /// Solana JSON-RPC endpoint; empty disables the RPC adapter
    #[arg(long, env = "SOLANA_RPC_URL", default_value = DEFAULT_SOLANA_RPC_URL)]
    pub solana_rpc_url: String,

    /// Etherscan API key (enables EVM chains)
    #[arg(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    pub etherscan_api_key: Option<String>,

    #[arg(long, env = "ETHERSCAN_BASE_URL", default_value = DEFAULT_ETHERSCAN_BASE_URL)]
    pub etherscan_base_url: String,

    /// Hyperliquid info API; empty disables the exchange adapter
    #[arg(long, env = "HYPERLIQUID_BASE_URL", default_value = DEFAULT_HYPERLIQUID_BASE_URL)]
    pub hyperliquid_base_url: String,

    /// Timeout for every upstream call, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10")]
    pub request_timeout_secs: u64,

    /// Concurrent transaction detail fetches per request
    #[arg(long, env = "RPC_CONCURRENCY", default_value = "8")]
    pub rpc_concurrency: usize,

    /// Maximum transactions fetched per account
    #[arg(long, env = "HISTORY_LIMIT", default_value = "50")]
    pub history_limit: usize,
}

impl SourceArgs {
    pub fn into_config(self) -> SourceConfig {
        SourceConfig {
            helius_api_key: non_empty(self.helius_api_key),
            helius_base_url: self.helius_base_url,
            solana_rpc_url: non_empty(Some(self.solana_rpc_url)),
            etherscan_api_key: non_empty(self.etherscan_api_key),
            etherscan_base_url: self.etherscan_base_url,
            hyperliquid_base_url: non_empty(Some(self.hyperliquid_base_url)),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            rpc_concurrency: self.rpc_concurrency.clamp(1, MAX_RPC_CONCURRENCY),
            history_limit: self.history_limit.clamp(1, 1000),
            rpc_min_interval: Duration::from_millis(100),
            etherscan_min_interval: Duration::from_millis(250),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Resolved adapter configuration
///
/// An endpoint or key left as `None` means the matching adapter is not
/// configured and requests for it are served synthetically.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub helius_api_key: Option<String>,
    pub helius_base_url: String,
    pub solana_rpc_url: Option<String>,
    pub etherscan_api_key: Option<String>,
    pub etherscan_base_url: String,
    pub hyperliquid_base_url: Option<String>,
    pub request_timeout: Duration,
    pub rpc_concurrency: usize,
    pub history_limit: usize,
    /// Minimum spacing between Solana RPC calls
    pub rpc_min_interval: Duration,
    /// Etherscan free tier allows 5 calls per second
    pub etherscan_min_interval: Duration,
}

impl SourceConfig {
    /// No live sources configured; every request is served synthetically
    pub fn offline() -> Self {
        Self {
            helius_api_key: None,
            helius_base_url: DEFAULT_HELIUS_BASE_URL.to_string(),
            solana_rpc_url: None,
            etherscan_api_key: None,
            etherscan_base_url: DEFAULT_ETHERSCAN_BASE_URL.to_string(),
            hyperliquid_base_url: None,
            request_timeout: Duration::from_secs(10),
            rpc_concurrency: 8,
            history_limit: 50,
            rpc_min_interval: Duration::from_millis(100),
            etherscan_min_interval: Duration::from_millis(250),
        }
    }
}
