//! Risk domain value types: the static configuration, the composite score
//! returned by continuous evaluation, and the recommendation levels that
//! drive escalation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_total_budget: Decimal,
    pub max_leverage_per_trader: Decimal,
    pub max_total_leverage: Decimal,
    pub max_exposure_per_trader: Decimal,
    pub max_total_exposure: Decimal,
    pub max_daily_loss: Decimal,
    pub stop_loss_percentage: Decimal,
    pub monitoring_interval_seconds: u64,
    pub warn_threshold: f64,
    pub block_threshold: f64,
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_total_budget <= Decimal::ZERO {
            return Err("max_total_budget must be > 0".into());
        }
        if self.monitoring_interval_seconds == 0 {
            return Err("monitoring_interval_seconds must be > 0".into());
        }
        if !(0.0..1.0).contains(&self.warn_threshold) || !(0.0..=1.0).contains(&self.block_threshold)
        {
            return Err("warn_threshold/block_threshold must be in [0, 1)".into());
        }
        if self.warn_threshold >= self.block_threshold {
            return Err("warn_threshold must be < block_threshold".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskRecommendation {
    Allow,
    Warn,
    Block,
    EmergencyStop,
}

/// Composite risk assessment from `RiskManager::check_risk_limits`. Only
/// losses contribute to `pnl_score` — profitable traders never escalate to
/// `EmergencyStop` through P&L alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskScore {
    pub budget_score: f64,
    pub leverage_score: f64,
    pub exposure_score: f64,
    pub pnl_score: f64,
    pub recommendation: RiskRecommendation,
}

impl RiskScore {
    /// Mean of the four component scores, clamped to [0, 1].
    pub fn composite(&self) -> f64 {
        ((self.budget_score + self.leverage_score + self.exposure_score + self.pnl_score) / 4.0)
            .clamp(0.0, 1.0)
    }
}
