//! Observability configuration (push-based — no HTTP server, see
//! `infrastructure::observability`).

use std::env;

#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("OBSERVABILITY_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            interval_seconds: env::var("OBSERVABILITY_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }
}
