//! Trading engine server — headless process, no UI, no inbound HTTP.
//!
//! # Usage
//! ```sh
//! OBSERVABILITY_INTERVAL=60 cargo run --bin triad-server
//! ```
//!
//! # Metrics output
//! Metrics are emitted as JSON to stdout with prefix `METRICS_JSON:` on
//! `OBSERVABILITY_INTERVAL` seconds (default 60). Prometheus text is
//! available via `Metrics::render` for anything that wants to scrape it out
//! of process.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

use triad_trader::application::indicators::IndicatorPipeline;
use triad_trader::application::pattern_store::{PatternStore, PatternStoreConfig};
use triad_trader::application::position_manager::PositionManagerConfig;
use triad_trader::application::risk_manager::RiskManager;
use triad_trader::application::signal_generator::{SignalGenerator, SignalGeneratorConfig};
use triad_trader::application::trader::TraderManager;
use triad_trader::config::Config;
use triad_trader::domain::errors::CoreError;
use triad_trader::domain::ports::ExchangeConnector;
use triad_trader::domain::types::Exchange;
use triad_trader::infrastructure::exchange::MockConnector;
use triad_trader::infrastructure::observability::{Metrics, MetricsReporter};
use triad_trader::infrastructure::persistence::{
    Database, SqlitePatternRepository, SqliteTraderRepository, SqliteTradeRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "trading engine starting");

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;

    let trader_repo: Arc<dyn triad_trader::domain::repositories::TraderRepository> =
        Arc::new(SqliteTraderRepository::new(db.pool.clone()));
    let trade_repo: Arc<dyn triad_trader::domain::repositories::TradeRepository> =
        Arc::new(SqliteTradeRepository::new(db.pool.clone()));
    let pattern_repo: Arc<dyn triad_trader::domain::repositories::PatternRepository> =
        Arc::new(SqlitePatternRepository::new(db.pool.clone()));

    let risk_manager = RiskManager::new(config.risk.config.clone());
    let pattern_store = Arc::new(PatternStore::new(pattern_repo, PatternStoreConfig::default()));
    let signal_generator = Arc::new(SignalGenerator::new(pattern_store.clone(), SignalGeneratorConfig::default()));
    let indicator_pipeline = Arc::new(IndicatorPipeline::new());

    // v1.0 only ever trades with demo balances (`TraderConfig::validate`
    // rejects `virtual_money = false`), so every exchange is served by the
    // deterministic in-memory connector rather than `BinanceConnector` /
    // `BitgetConnector` placing real orders. Those connectors are fully
    // implemented and exercised by their own tests; swapping this closure
    // is the whole integration point for a future real-money release.
    let connector_factory = Arc::new(|exchange: Exchange| -> Result<Arc<dyn ExchangeConnector>, CoreError> {
        info!(%exchange, "provisioning demo-balance connector");
        Ok(Arc::new(MockConnector::new()) as Arc<dyn ExchangeConnector>)
    });

    let trader_manager = TraderManager::new(
        connector_factory,
        trader_repo,
        trade_repo,
        risk_manager.clone(),
        signal_generator,
        indicator_pipeline,
        PositionManagerConfig::default(),
    );

    let recovered = trader_manager.recover_traders().await?;
    info!(recovered, "traders recovered from persisted state");

    let (risk_cancel_tx, risk_cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(risk_manager.clone().run(risk_cancel_rx));

    if config.observability.enabled {
        let metrics = Metrics::new()?;
        let (reporter_cancel_tx, reporter_cancel_rx) = tokio::sync::watch::channel(false);
        let reporter = MetricsReporter::new(
            trader_manager.clone(),
            risk_manager.clone(),
            pattern_store.clone(),
            metrics,
            config.observability.interval_seconds,
        );
        tokio::spawn(reporter.run(reporter_cancel_rx));
        info!(interval = config.observability.interval_seconds, "metrics reporter started");

        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received, stopping background loops");
        let _ = reporter_cancel_tx.send(true);
    } else {
        info!("metrics reporting disabled");
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
    }

    let _ = risk_cancel_tx.send(true);

    for trader in trader_manager.get_all_traders().await {
        let _ = trader_manager.stop_trader(&trader.id()).await;
    }

    info!("trading engine stopped");
    Ok(())
}
