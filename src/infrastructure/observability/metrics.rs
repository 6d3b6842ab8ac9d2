//! Prometheus metrics definitions for the trading engine.
//!
//! All metrics use the `triad_` prefix and are read-only from the engine's
//! perspective — nothing here accepts inbound requests, see the module doc
//! on `infrastructure::observability`.

use prometheus::{
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics for the trading engine.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Number of active (non-deleted) traders, 0-3.
    pub active_traders_count: GenericGauge<AtomicF64>,
    /// Open position count per trader.
    pub open_positions_count: GenericGaugeVec<AtomicF64>,
    /// Unrealized P&L per trader, in quote currency.
    pub unrealized_pnl: GenericGaugeVec<AtomicF64>,
    /// 1 when the global emergency stop is active, 0 otherwise.
    pub emergency_stop_active: GenericGauge<AtomicF64>,
    /// Number of patterns currently stored.
    pub pattern_store_size: GenericGauge<AtomicF64>,
    /// Latest aggregate risk score per trader, 0-1.
    pub risk_score: GenericGaugeVec<AtomicF64>,
    /// Total orders placed, labeled by exchange/side/status.
    pub orders_total: CounterVec,
    /// Circuit breaker status per exchange (0=closed, 1=open).
    pub circuit_breaker_status: GaugeVec,
    /// Uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
    /// Exchange API call latency in seconds.
    pub api_latency_seconds: HistogramVec,
    /// Trading signals generated, labeled by strategy and action.
    pub trade_signals_total: CounterVec,
    /// Closed-trade win rate per trader (0-1).
    pub win_rate_current: GenericGaugeVec<AtomicF64>,
}

impl Metrics {
    /// Creates a new `Metrics` instance with every gauge/counter registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let active_traders_count =
            Gauge::with_opts(Opts::new("triad_active_traders_count", "Number of active traders (0-3)"))?;
        registry.register(Box::new(active_traders_count.clone()))?;

        let open_positions_count = GaugeVec::new(
            Opts::new("triad_open_positions_count", "Open positions per trader"),
            &["trader_id"],
        )?;
        registry.register(Box::new(open_positions_count.clone()))?;

        let unrealized_pnl = GaugeVec::new(
            Opts::new("triad_unrealized_pnl", "Unrealized P&L per trader"),
            &["trader_id"],
        )?;
        registry.register(Box::new(unrealized_pnl.clone()))?;

        let emergency_stop_active = Gauge::with_opts(Opts::new(
            "triad_emergency_stop_active",
            "1 when the global emergency stop is active",
        ))?;
        registry.register(Box::new(emergency_stop_active.clone()))?;

        let pattern_store_size =
            Gauge::with_opts(Opts::new("triad_pattern_store_size", "Patterns currently stored"))?;
        registry.register(Box::new(pattern_store_size.clone()))?;

        let risk_score = GaugeVec::new(
            Opts::new("triad_risk_score", "Aggregate risk score per trader (0-1)"),
            &["trader_id"],
        )?;
        registry.register(Box::new(risk_score.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("triad_orders_total", "Total orders placed"),
            &["exchange", "side", "status"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let circuit_breaker_status = GaugeVec::new(
            Opts::new("triad_circuit_breaker_status", "Circuit breaker status (0=closed, 1=open)"),
            &["exchange"],
        )?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new("triad_uptime_seconds", "Server uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let api_latency_seconds = HistogramVec::new(
            HistogramOpts::new("triad_api_latency_seconds", "Exchange API request latency in seconds")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["exchange", "endpoint"],
        )?;
        registry.register(Box::new(api_latency_seconds.clone()))?;

        let trade_signals_total = CounterVec::new(
            Opts::new("triad_trade_signals_total", "Trading signals generated"),
            &["strategy", "action"],
        )?;
        registry.register(Box::new(trade_signals_total.clone()))?;

        let win_rate_current = GaugeVec::new(
            Opts::new("triad_win_rate_current", "Closed-trade win rate per trader (0-1)"),
            &["trader_id"],
        )?;
        registry.register(Box::new(win_rate_current.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            active_traders_count,
            open_positions_count,
            unrealized_pnl,
            emergency_stop_active,
            pattern_store_size,
            risk_score,
            orders_total,
            circuit_breaker_status,
            uptime_seconds,
            api_latency_seconds,
            trade_signals_total,
            win_rate_current,
        })
    }

    /// Renders all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn set_open_positions(&self, trader_id: &str, count: f64) {
        self.open_positions_count.with_label_values(&[trader_id]).set(count);
    }

    pub fn set_unrealized_pnl(&self, trader_id: &str, pnl: f64) {
        self.unrealized_pnl.with_label_values(&[trader_id]).set(pnl);
    }

    pub fn set_risk_score(&self, trader_id: &str, score: f64) {
        self.risk_score.with_label_values(&[trader_id]).set(score);
    }

    pub fn inc_orders(&self, exchange: &str, side: &str, status: &str) {
        self.orders_total.with_label_values(&[exchange, side, status]).inc();
    }

    pub fn set_circuit_breaker(&self, exchange: &str, open: bool) {
        self.circuit_breaker_status.with_label_values(&[exchange]).set(if open { 1.0 } else { 0.0 });
    }

    pub fn observe_api_latency(&self, exchange: &str, endpoint: &str, latency: f64) {
        self.api_latency_seconds.with_label_values(&[exchange, endpoint]).observe(latency);
    }

    pub fn inc_signals(&self, strategy: &str, action: &str) {
        self.trade_signals_total.with_label_values(&[strategy, action]).inc();
    }

    pub fn set_win_rate(&self, trader_id: &str, rate: f64) {
        self.win_rate_current.with_label_values(&[trader_id]).set(rate);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to build default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_metric_under_the_triad_prefix() {
        let metrics = Metrics::new().expect("failed to create metrics");
        assert!(metrics.render().contains("triad_"));
    }

    #[test]
    fn per_trader_gauges_carry_the_trader_id_label() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.set_open_positions("trader-1", 2.0);
        metrics.set_unrealized_pnl("trader-1", 150.5);
        let output = metrics.render();
        assert!(output.contains("trader_id=\"trader-1\""));
    }

    #[test]
    fn order_counter_increments_by_label() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.inc_orders("binance", "buy", "filled");
        metrics.inc_orders("bitget", "sell", "rejected");
        let output = metrics.render();
        assert!(output.contains("triad_orders_total"));
    }
}
