//! Fetch one account's history, filter it and write the CSV export
//!
//! Usage:
//!   cargo run --bin export -- <wallet> --chain ethereum --type spot --date month

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use ledger_export::config::SourceArgs;
use ledger_export::csv_export::{export_filename, to_csv};
use ledger_export::filter::{summarize, DateRange, FilterSet, Summary, ALL};
use ledger_export::{Dispatcher, FetchRequest, RecordKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Export a wallet's trade history as CSV")]
struct Args {
    /// Account identifier (wallet address)
    wallet: String,

    /// Chain or perp venue id
    #[arg(short, long, default_value = "solana")]
    chain: String,

    /// Record type: spot or perp
    #[arg(short = 't', long = "type", default_value = "spot")]
    kind: RecordKind,

    /// Serve synthetic data instead of calling the live source
    #[arg(long)]
    mock: bool,

    /// Date window: all, week or month
    #[arg(long, default_value = "all")]
    date: DateRange,

    #[arg(long, default_value = ALL)]
    asset: String,

    #[arg(long, default_value = ALL)]
    side: String,

    /// Case-insensitive match on asset, hash or side
    #[arg(long, default_value = "")]
    search: String,

    /// Directory the CSV file is written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    #[command(flatten)]
    sources: SourceArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()
                .add_directive("ledger_export=info".parse().context("Invalid log directive")?),
        )
        .init();

    let args = Args::parse();
    let dispatcher = Dispatcher::new(args.sources.into_config()).context("Failed to build dispatcher")?;

    let request = FetchRequest {
        account: args.wallet.trim().to_string(),
        chain: args.chain.clone(),
        kind: args.kind,
        force_mock: args.mock,
    };
    let outcome = dispatcher
        .fetch(&request)
        .await
        .with_context(|| format!("Failed to fetch {} history for {}", request.kind, request.account))?;

    if let Some(reason) = outcome.fallback {
        warn!("Serving synthetic data ({})", reason);
    }

    let filters = FilterSet {
        date: args.date,
        asset: args.asset,
        side: args.side,
        search: args.search,
    };
    let records = filters.apply(&outcome.records, Utc::now());
    info!(
        "{} of {} records match filters (source: {})",
        records.len(),
        outcome.records.len(),
        outcome.source
    );

    if records.is_empty() {
        info!("No transactions found");
    }
    match summarize(&records, outcome.kind) {
        Summary::Spot(s) => info!(
            "Trades: {} | Buys: {:.4} | Sells: {:.4} | Fees: {:.6} | Assets: {}",
            s.trade_count, s.total_buys, s.total_sells, s.total_fees, s.unique_asset_count
        ),
        Summary::Perp(s) => info!(
            "Positions: {} | Open: {} | PnL: {:.2} | Fees: {:.2} | Funding: {:.2} | Assets: {}",
            s.trade_count,
            s.open_position_count,
            s.total_pnl,
            s.total_fees,
            s.total_funding,
            s.unique_asset_count
        ),
    }

    let csv = to_csv(&records, outcome.kind)?;
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;
    let path = args.out_dir.join(export_filename(outcome.kind, &request.account));
    std::fs::write(&path, csv).with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Wrote {}", path.display());
    Ok(())
}
