//! Push-based observability.
//!
//! This module provides observability through **outbound data only** — no
//! HTTP server, no incoming requests. Metrics are pushed via:
//!
//! 1. **Structured JSON logs**: periodic JSON output to stdout (for Loki,
//!    Fluentd, CloudWatch).
//! 2. **Prometheus**: gauges/counters rendered on demand via `Metrics::render`.
//!
//! This system only sends data, it never accepts requests.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
