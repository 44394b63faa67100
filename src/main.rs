// =============================================================================
// Candlecast — Main Entry Point
// =============================================================================
//
// Serves historical candles, technical indicators and live trade ticks.
// Without a Finnhub key the live channel runs on the simulated feed.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod error;
mod feed;
mod indicators;
mod market_data;
mod protocol;
mod registry;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{ServerConfig, CONFIG_FILE};
use crate::feed::{FinnhubFeed, LiveFeedSource, SimulatedFeed};
use crate::market_data::YahooChartClient;

/// How often expired cache slots are swept.
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Candlecast starting up");

    let mut config = ServerConfig::load(CONFIG_FILE).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        ServerConfig::default()
    });
    config.apply_env()?;
    config.validate()?;

    // ── 2. Upstream collaborators ────────────────────────────────────────
    let historical = Arc::new(YahooChartClient::new(
        config.yahoo_base_url.clone(),
        config.fetch_timeout(),
    )?);

    let live: Arc<dyn LiveFeedSource> = if config.use_simulated_feed() {
        warn!(
            tick_ms = config.simulated_tick_millis,
            "No Finnhub key configured (or simulation forced), live channel uses simulated trades"
        );
        Arc::new(SimulatedFeed::new(config.simulated_tick()))
    } else {
        Arc::new(FinnhubFeed::new(
            config.finnhub_ws_url.clone(),
            config.finnhub_api_key.clone(),
        ))
    };

    // ── 3. Shared state ──────────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, historical, live);

    // ── 4. Cache sweep ───────────────────────────────────────────────────
    let sweep_state = state.clone();
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let purged = sweep_state.cache.purge_expired();
            if purged > 0 {
                info!(purged, remaining = sweep_state.cache.len(), "cache sweep");
            }
        }
    });

    // ── 5. API server ────────────────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    sweeper.abort();
    state.shutdown().await;
    info!("Candlecast stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    warn!("Shutdown signal received, stopping gracefully");
}
