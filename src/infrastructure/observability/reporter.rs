//! Push-based metrics reporter.
//!
//! Periodically outputs metrics as structured JSON to stdout and updates the
//! Prometheus gauges in `Metrics`. No HTTP server, no incoming connections —
//! only outbound data.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{info, warn};

use crate::application::pattern_store::PatternStore;
use crate::application::risk_manager::RiskManager;
use crate::application::trader::TraderManager;
use crate::domain::pattern::PatternQuery;
use crate::infrastructure::observability::metrics::Metrics;

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub active_traders: usize,
    pub emergency_stop_active: bool,
    pub pattern_store_size: usize,
    pub traders: Vec<TraderSnapshot>,
}

#[derive(Serialize)]
pub struct TraderSnapshot {
    pub trader_id: String,
    pub state: String,
    pub open_positions: usize,
    pub unrealized_pnl: f64,
    pub error_count: u32,
}

/// Outputs metrics as structured JSON logs on a configurable interval.
pub struct MetricsReporter {
    trader_manager: Arc<TraderManager>,
    risk_manager: Arc<RiskManager>,
    pattern_store: Arc<PatternStore>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        trader_manager: Arc<TraderManager>,
        risk_manager: Arc<RiskManager>,
        pattern_store: Arc<PatternStore>,
        metrics: Metrics,
        interval_seconds: u64,
    ) -> Self {
        Self {
            trader_manager,
            risk_manager,
            pattern_store,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Runs the reporter in a loop, outputting metrics periodically until
    /// `cancel` flips to `true`.
    pub async fn run(self, mut cancel: tokio::sync::watch::Receiver<bool>) {
        info!(interval = ?self.interval, "metrics reporter starting");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("metrics reporter stopping");
                        return;
                    }
                }
            }

            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{json}");
                        info!(
                            active_traders = snapshot.active_traders,
                            uptime_seconds = snapshot.uptime_seconds,
                            "metrics snapshot published"
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let uptime = self.start_time.elapsed().as_secs();
        let traders = self.trader_manager.get_all_traders().await;
        let emergency_stop_active = self.risk_manager.is_global_stop_active();
        let pattern_count = self
            .pattern_store
            .query(&PatternQuery::default())
            .await
            .map(|p| p.len())
            .unwrap_or(0);

        self.metrics.active_traders_count.set(traders.len() as f64);
        self.metrics.emergency_stop_active.set(if emergency_stop_active { 1.0 } else { 0.0 });
        self.metrics.pattern_store_size.set(pattern_count as f64);
        self.metrics.uptime_seconds.set(uptime as f64);

        let mut trader_snapshots = Vec::with_capacity(traders.len());
        for trader in &traders {
            let id = trader.id();
            let open_positions = trader.position_manager().open_positions_for_trader(&id);
            let unrealized_pnl: f64 = open_positions
                .iter()
                .map(|p| p.unrealized_pnl.to_f64().unwrap_or(0.0))
                .sum();

            self.metrics.set_open_positions(&id, open_positions.len() as f64);
            self.metrics.set_unrealized_pnl(&id, unrealized_pnl);

            trader_snapshots.push(TraderSnapshot {
                trader_id: id,
                state: trader.state().to_string(),
                open_positions: open_positions.len(),
                unrealized_pnl,
                error_count: trader.error_count(),
            });
        }

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_traders: traders.len(),
            emergency_stop_active,
            pattern_store_size: pattern_count,
            traders: trader_snapshots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_with_expected_fields() {
        let snapshot = MetricsSnapshot {
            timestamp: "2026-01-10T10:00:00Z".to_string(),
            uptime_seconds: 3600,
            version: "0.1.0".to_string(),
            active_traders: 1,
            emergency_stop_active: false,
            pattern_store_size: 4,
            traders: vec![TraderSnapshot {
                trader_id: "trader-1".to_string(),
                state: "Running".to_string(),
                open_positions: 1,
                unrealized_pnl: 42.5,
                error_count: 0,
            }],
        };

        let json = serde_json::to_string(&snapshot).expect("failed to serialize");
        assert!(json.contains("trader-1"));
        assert!(json.contains("42.5"));
    }
}
