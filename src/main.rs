use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use ledger_export::api::{self, AppState};
use ledger_export::config::SourceArgs;
use ledger_export::Dispatcher;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the web server to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: std::net::IpAddr,

    /// Port to run the web server on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,

    #[command(flatten)]
    sources: SourceArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()
                .add_directive("ledger_export=info".parse().context("Invalid log directive")?),
        )
        .init();

    let args = Args::parse();
    let config = args.sources.into_config();

    info!("Starting ledger export server");
    info!(
        "Solana: {}",
        match (&config.helius_api_key, &config.solana_rpc_url) {
            (Some(_), _) => "helius",
            (None, Some(_)) => "rpc",
            (None, None) => "synthetic",
        }
    );
    info!(
        "EVM chains: {}",
        if config.etherscan_api_key.is_some() { "etherscan" } else { "synthetic" }
    );
    info!(
        "Hyperliquid: {}",
        if config.hyperliquid_base_url.is_some() { "live" } else { "synthetic" }
    );

    let dispatcher = Dispatcher::new(config).context("Failed to build dispatcher")?;
    let state = Arc::new(AppState { dispatcher });

    // Build router
    let app = Router::new()
        .route("/api/transactions", get(api::get_transactions))
        .route("/api/export", get(api::get_export))
        .route("/api/chains", get(api::get_chains))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state);

    let addr = SocketAddr::new(args.host, args.port);
    info!("Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
