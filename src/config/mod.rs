//! Configuration module for the trading core.
//!
//! Ambient (process-wide) configuration — broker credentials, the shared
//! risk envelope, and observability — is loaded from environment variables,
//! organized by domain, mirroring the split used throughout this codebase
//! for every other concern. Per-trader configuration (`TraderConfig`) is
//! NOT loaded from the environment: it is supplied by the operator when
//! calling `TraderManager::create_trader` and is out of scope for this
//! module.

mod broker_config;
mod observability_config;
mod risk_env_config;

pub use broker_config::{BinanceEnvConfig, BitgetEnvConfig, BrokerEnvConfig};
pub use observability_config::ObservabilityEnvConfig;
pub use risk_env_config::RiskEnvConfig;

use anyhow::{Context, Result};

/// Aggregate process configuration, composed from the sub-configs above.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerEnvConfig,
    pub risk: RiskEnvConfig,
    pub observability: ObservabilityEnvConfig,
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let broker = BrokerEnvConfig::from_env();
        let risk = RiskEnvConfig::from_env().context("failed to load risk config")?;
        let observability = ObservabilityEnvConfig::from_env();
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://triad.db".to_string());

        Ok(Self {
            broker,
            risk,
            observability,
            database_url,
        })
    }
}
