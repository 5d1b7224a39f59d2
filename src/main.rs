#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use ibc_exporter::config::{self, LoggingConfig, MonitorConfig};
use ibc_exporter::filter::{ExcludedSequences, NameFilter};
use ibc_exporter::health::EndpointHealth;
use ibc_exporter::poll::{self, ChainPoller, PollerConfig};
use ibc_exporter::rest::{ChainQuery, HttpChainClient};
use ibc_exporter::scan::ScanFilters;
use ibc_exporter::server::{self, AppState};
use ibc_exporter::store::SnapshotStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "IBC packet backlog and client health exporter")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short = 'c', default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("ibc-exporter: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let cfg = config::load_config(&args.config)?;
    init_logging(&cfg.logging);

    info!(
        chains = cfg.chains.len(),
        poll_interval_secs = cfg.exporter.poll_interval_secs,
        "starting ibc-exporter"
    );

    let excluded = Arc::new(
        ExcludedSequences::from_config(&cfg.excluded_sequences)
            .context("invalid [excluded_sequences] config")?,
    );
    let health = Arc::new(EndpointHealth::new(
        cfg.chains
            .iter()
            .map(|c| (c.chain_id.clone(), c.rest_endpoints.clone())),
    ));
    let store = Arc::new(SnapshotStore::new(
        cfg.chains.iter().map(|c| c.chain_id.clone()).collect(),
    ));
    let shutdown = Arc::new(AtomicBool::new(false));

    for chain in &cfg.chains {
        let query: Arc<dyn ChainQuery> = Arc::new(HttpChainClient::new(
            &chain.chain_id,
            Arc::clone(&health),
            Duration::from_secs(cfg.exporter.request_timeout_secs),
        )?);
        let poller = ChainPoller::new(
            poller_config(&cfg, chain),
            query,
            Arc::clone(&health),
            Arc::clone(&store),
            Arc::clone(&excluded),
        );
        poll::spawn(poller, Arc::clone(&shutdown));
    }

    let state = AppState {
        store: Arc::clone(&store),
        started: Instant::now(),
    };
    let app = server::router(state);
    let addr: SocketAddr = cfg
        .exporter
        .listen_address
        .parse()
        .context("invalid exporter.listen_address")?;
    info!(%addr, "metrics server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal())
        .await
        .context("metrics server failed")?;

    shutdown.store(true, Ordering::Relaxed);
    info!("ibc-exporter shutdown complete");
    Ok(())
}

fn poller_config(cfg: &MonitorConfig, chain: &config::ChainConfig) -> PollerConfig {
    PollerConfig {
        chain_id: chain.chain_id.clone(),
        poll_interval: Duration::from_secs(cfg.exporter.poll_interval_secs),
        tick_timeout: Duration::from_secs(cfg.exporter.tick_timeout_secs),
        state_refresh_interval: Duration::from_secs(chain.state_refresh_interval_secs),
        counterparty_chain_ids: cfg.counterparty_chain_ids(chain),
        static_channels: chain.channels.clone(),
        filters: ScanFilters {
            clients: NameFilter::new(
                chain.whitelist_clients.clone(),
                chain.blacklist_clients.clone(),
            ),
            connections: NameFilter::new(
                chain.whitelist_connections.clone(),
                chain.blacklist_connections.clone(),
            ),
            channels: NameFilter::new(
                chain.whitelist_channels.clone(),
                chain.blacklist_channels.clone(),
            ),
        },
    }
}

fn init_logging(cfg: &LoggingConfig) {
    // Prefer the configured level unless RUST_LOG is set.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.level.clone()));

    if cfg.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
