//! Global risk envelope loaded from the environment (spec §3 `RiskConfig`).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

use crate::domain::risk::RiskConfig;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub config: RiskConfig,
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).with_context(|| format!("invalid decimal for {key}: {raw}"))
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(raw) => raw.parse::<f64>().with_context(|| format!("invalid float for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(raw) => raw.parse::<u64>().with_context(|| format!("invalid u64 for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        let config = RiskConfig {
            max_total_budget: env_decimal("RISK_MAX_TOTAL_BUDGET", "10000")?,
            max_leverage_per_trader: env_decimal("RISK_MAX_LEVERAGE_PER_TRADER", "3")?,
            max_total_leverage: env_decimal("RISK_MAX_TOTAL_LEVERAGE", "9")?,
            max_exposure_per_trader: env_decimal("RISK_MAX_EXPOSURE_PER_TRADER", "3000")?,
            max_total_exposure: env_decimal("RISK_MAX_TOTAL_EXPOSURE", "9000")?,
            max_daily_loss: env_decimal("RISK_MAX_DAILY_LOSS", "500")?,
            stop_loss_percentage: env_decimal("RISK_STOP_LOSS_PERCENTAGE", "0.02")?,
            monitoring_interval_seconds: env_u64("RISK_MONITORING_INTERVAL_SECONDS", 15)?,
            warn_threshold: env_f64("RISK_WARN_THRESHOLD", 0.6)?,
            block_threshold: env_f64("RISK_BLOCK_THRESHOLD", 0.85)?,
        };
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(Self { config })
    }
}
