//! Adapter selection and synthetic fallback
//!
//! A request resolves its source and validates the account first, then
//! goes to the live adapter when one is configured. Only an
//! `UpstreamUnavailable` failure is downgraded to synthetic data; every
//! other failure reaches the caller.

use reqwest::Client;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{resolve_source, ChainInfo, SourceConfig, CHAINS};
use crate::error::FetchError;
use crate::sources::http::build_client;
use crate::sources::{EtherscanSource, HeliusSource, HyperliquidSource, SolanaRpcSource, Source, SyntheticSource};
use crate::types::{normalize, Record, RecordKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub account: String,
    pub chain: String,
    pub kind: RecordKind,
    pub force_mock: bool,
}

/// Why a response was served from the synthetic generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The caller asked for mock data
    Requested,
    /// No credential or endpoint for the requested source
    NotConfigured,
    /// The live adapter failed with an upstream outage or rate limit
    Downgraded,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "mock data requested",
            Self::NotConfigured => "source not configured",
            Self::Downgraded => "upstream unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub records: Vec<Record>,
    pub kind: RecordKind,
    /// Name of the adapter that produced the records
    pub source: &'static str,
    pub fallback: Option<FallbackReason>,
}

impl FetchOutcome {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

pub struct Dispatcher {
    config: SourceConfig,
    client: Client,
    chains: &'static [ChainInfo],
}

impl Dispatcher {
    pub fn new(config: SourceConfig) -> Result<Self, FetchError> {
        let client = build_client(config.request_timeout)?;
        Ok(Self {
            config,
            client,
            chains: CHAINS,
        })
    }

    /// The chain and venue table served to clients
    pub fn chains(&self) -> &'static [ChainInfo] {
        self.chains
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        let account = request.account.trim();
        let chain = resolve_source(&request.chain, request.kind, account)?;
        let synthetic = SyntheticSource::new(chain, request.kind);

        if request.force_mock {
            info!("Serving synthetic {} data for {} on {}", request.kind, account, chain.id);
            let records = synthetic.fetch(account).await?;
            return Ok(outcome(records, request.kind, &synthetic, Some(FallbackReason::Requested)));
        }

        let live = self.live_source(chain);
        dispatch(account, request.kind, live.as_deref(), &synthetic).await
    }

    /// The configured live adapter for a chain, if any
    fn live_source(&self, chain: &'static ChainInfo) -> Option<Box<dyn Source>> {
        let cfg = &self.config;
        let client = self.client.clone();

        match (chain.market, chain.id) {
            (RecordKind::Spot, "solana") => {
                if let Some(key) = &cfg.helius_api_key {
                    Some(Box::new(HeliusSource::new(
                        client,
                        &cfg.helius_base_url,
                        key,
                        cfg.history_limit,
                    )) as Box<dyn Source>)
                } else {
                    cfg.solana_rpc_url.as_ref().map(|url| {
                        Box::new(SolanaRpcSource::new(
                            client,
                            url,
                            cfg.history_limit,
                            cfg.rpc_concurrency,
                            cfg.rpc_min_interval,
                        )) as Box<dyn Source>
                    })
                }
            }
            (RecordKind::Spot, _) if chain.evm_chain_id.is_some() => {
                cfg.etherscan_api_key.as_ref().map(|key| {
                    Box::new(EtherscanSource::new(
                        client,
                        &cfg.etherscan_base_url,
                        key,
                        chain,
                        cfg.history_limit,
                        cfg.etherscan_min_interval,
                    )) as Box<dyn Source>
                })
            }
            (RecordKind::Perp, "hyperliquid") => cfg
                .hyperliquid_base_url
                .as_ref()
                .map(|url| Box::new(HyperliquidSource::new(client, url)) as Box<dyn Source>),
            _ => None,
        }
    }
}

fn outcome(
    records: Vec<Record>,
    kind: RecordKind,
    source: &dyn Source,
    fallback: Option<FallbackReason>,
) -> FetchOutcome {
    FetchOutcome {
        records: normalize(records),
        kind,
        source: source.name(),
        fallback,
    }
}

/// Invoke `live` and decide whether its failure may fall back to `synthetic`
pub async fn dispatch(
    account: &str,
    kind: RecordKind,
    live: Option<&dyn Source>,
    synthetic: &dyn Source,
) -> Result<FetchOutcome, FetchError> {
    let Some(live) = live else {
        info!("No live {} source configured, serving synthetic data for {}", kind, account);
        let records = synthetic.fetch(account).await?;
        return Ok(outcome(records, kind, synthetic, Some(FallbackReason::NotConfigured)));
    };

    debug!("Fetching {} records for {} from {}", kind, account, live.name());
    match live.fetch(account).await {
        Ok(records) => {
            info!("{} returned {} records for {}", live.name(), records.len(), account);
            Ok(outcome(records, kind, live, None))
        }
        Err(e) if e.kind.allows_fallback() => {
            warn!("{} failed for {}, downgrading to synthetic data: {}", live.name(), account, e);
            let records = synthetic.fetch(account).await?;
            Ok(outcome(records, kind, synthetic, Some(FallbackReason::Downgraded)))
        }
        Err(e) => {
            warn!("{} failed for {}: {}", live.name(), account, e);
            Err(e)
        }
    }
}
