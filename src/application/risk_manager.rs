//! Risk Manager (spec §4.8): the pre-trade gate every position open must
//! pass, plus continuous evaluation and emergency-stop handling. Grounded on
//! the teacher's `risk_management/risk_manager.rs` actor shape — a
//! `tokio::select!`-driven `run()` loop over interval tickers — generalized
//! from its portfolio-wide validator pipeline down to the four checks this
//! system names.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::application::position_manager::PositionManager;
use crate::domain::errors::RiskViolation;
use crate::domain::risk::{RiskConfig, RiskRecommendation, RiskScore};
use crate::domain::types::ExitReason;

/// Emitted whenever an emergency stop fires, for anything downstream
/// (trader state machines, operators) to react to. `None` means a global
/// stop.
#[derive(Debug, Clone)]
pub struct StopEvent {
    pub trader_id: Option<String>,
}

pub struct RiskManager {
    config: RwLock<RiskConfig>,
    position_manager: RwLock<Option<Weak<PositionManager>>>,
    exposure_per_trader: RwLock<HashMap<String, Decimal>>,
    leverage_per_trader: RwLock<HashMap<String, Decimal>>,
    stopped_traders: RwLock<HashSet<String>>,
    global_stop: AtomicBool,
    stop_tx: broadcast::Sender<StopEvent>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Arc<Self> {
        let (stop_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            config: RwLock::new(config),
            position_manager: RwLock::new(None),
            exposure_per_trader: RwLock::new(HashMap::new()),
            leverage_per_trader: RwLock::new(HashMap::new()),
            stopped_traders: RwLock::new(HashSet::new()),
            global_stop: AtomicBool::new(false),
            stop_tx,
        })
    }

    /// Second phase of construction: `PositionManager` needs a
    /// `RiskManager` to gate opens, and `RiskManager` needs a
    /// `PositionManager` to evaluate rolling P&L and to close positions
    /// during an emergency stop. Breaking the cycle with a `Weak` here
    /// means `RiskManager` never keeps the `PositionManager` alive.
    pub fn wire_position_manager(&self, position_manager: &Arc<PositionManager>) {
        *self.position_manager.write().unwrap() = Some(Arc::downgrade(position_manager));
    }

    pub fn subscribe_stop_events(&self) -> broadcast::Receiver<StopEvent> {
        self.stop_tx.subscribe()
    }

    pub fn update_config(&self, config: RiskConfig) {
        *self.config.write().unwrap() = config;
    }

    /// Pre-trade gate (spec §4.8 step 1-4).
    pub fn can_open_position(
        &self,
        trader_id: &str,
        notional: Decimal,
        leverage: Decimal,
    ) -> Result<(), RiskViolation> {
        if self.global_stop.load(Ordering::SeqCst) || self.stopped_traders.read().unwrap().contains(trader_id) {
            return Err(RiskViolation::EmergencyStopActive {
                trader_id: Some(trader_id.to_string()),
            });
        }

        let config = self.config.read().unwrap().clone();
        self.validate_leverage(trader_id, leverage, &config)?;
        self.validate_budget(trader_id, notional, &config)?;
        Ok(())
    }

    /// Called by `TraderManager::createTrader` before instantiating a new
    /// trader: confirms `max_stake` still fits under the global budget even
    /// before any position is opened.
    pub fn validate_trader_creation(&self, max_stake: Decimal) -> Result<(), RiskViolation> {
        let config = self.config.read().unwrap();
        let total_exposure: Decimal = self.exposure_per_trader.read().unwrap().values().copied().sum();
        if total_exposure + max_stake > config.max_total_budget {
            return Err(RiskViolation::BudgetExceeded {
                required: total_exposure + max_stake,
                available: config.max_total_budget - total_exposure,
            });
        }
        Ok(())
    }

    fn validate_leverage(&self, trader_id: &str, leverage: Decimal, config: &RiskConfig) -> Result<(), RiskViolation> {
        if leverage > config.max_leverage_per_trader {
            return Err(RiskViolation::LeverageExceeded {
                requested: leverage,
                max: config.max_leverage_per_trader,
            });
        }
        let leverages = self.leverage_per_trader.read().unwrap();
        let total: Decimal = leverages.values().copied().sum::<Decimal>() - leverages.get(trader_id).copied().unwrap_or(Decimal::ZERO) + leverage;
        if total > config.max_total_leverage {
            return Err(RiskViolation::LeverageExceeded {
                requested: total,
                max: config.max_total_leverage,
            });
        }
        Ok(())
    }

    fn validate_budget(&self, trader_id: &str, notional: Decimal, config: &RiskConfig) -> Result<(), RiskViolation> {
        let exposures = self.exposure_per_trader.read().unwrap();
        let trader_exposure = exposures.get(trader_id).copied().unwrap_or(Decimal::ZERO);
        if trader_exposure + notional > config.max_exposure_per_trader {
            return Err(RiskViolation::ExposureExceeded {
                scope: trader_id.to_string(),
                requested: trader_exposure + notional,
                max: config.max_exposure_per_trader,
            });
        }

        let total_exposure: Decimal = exposures.values().copied().sum();
        if total_exposure + notional > config.max_total_exposure {
            return Err(RiskViolation::ExposureExceeded {
                scope: "global".to_string(),
                requested: total_exposure + notional,
                max: config.max_total_exposure,
            });
        }
        if total_exposure + notional > config.max_total_budget {
            return Err(RiskViolation::BudgetExceeded {
                required: total_exposure + notional,
                available: config.max_total_budget - total_exposure,
            });
        }
        Ok(())
    }

    /// Called by `PositionManager` after a position successfully opens, so
    /// the next `can_open_position` call sees updated exposure.
    pub fn record_position_opened(&self, trader_id: &str, notional: Decimal, leverage: Decimal) {
        *self.exposure_per_trader.write().unwrap().entry(trader_id.to_string()).or_insert(Decimal::ZERO) += notional;
        *self.leverage_per_trader.write().unwrap().entry(trader_id.to_string()).or_insert(Decimal::ZERO) += leverage;
    }

    pub fn record_position_closed(&self, trader_id: &str, notional: Decimal, leverage: Decimal) {
        if let Some(v) = self.exposure_per_trader.write().unwrap().get_mut(trader_id) {
            *v = (*v - notional).max(Decimal::ZERO);
        }
        if let Some(v) = self.leverage_per_trader.write().unwrap().get_mut(trader_id) {
            *v = (*v - leverage).max(Decimal::ZERO);
        }
    }

    /// Continuous evaluation (spec §4.8): a `RiskScore` plus, when rolling
    /// loss breaches the daily cap, an `EmergencyStop` recommendation.
    pub async fn check_risk_limits(&self, trader_id: &str) -> RiskScore {
        let config = self.config.read().unwrap().clone();

        let rolling_pnl = match self.position_manager() {
            Some(pm) => pm.rolling_24h_pnl(trader_id).await,
            None => Decimal::ZERO,
        };
        let rolling_loss = if rolling_pnl < Decimal::ZERO { -rolling_pnl } else { Decimal::ZERO };

        let trader_exposure = self
            .exposure_per_trader
            .read()
            .unwrap()
            .get(trader_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let total_exposure: Decimal = self.exposure_per_trader.read().unwrap().values().copied().sum();
        let trader_leverage = self
            .leverage_per_trader
            .read()
            .unwrap()
            .get(trader_id)
            .copied()
            .unwrap_or(Decimal::ZERO);

        let budget_score = 1.0 - ratio(total_exposure, config.max_total_budget);
        let leverage_score = 1.0 - ratio(trader_leverage, config.max_leverage_per_trader);
        let exposure_score = 1.0 - ratio(trader_exposure, config.max_exposure_per_trader);
        let pnl_score = 1.0 - ratio(rolling_loss, config.max_daily_loss);

        let score = RiskScore {
            budget_score,
            leverage_score,
            exposure_score,
            pnl_score,
            recommendation: RiskRecommendation::Allow,
        };
        let utilization = 1.0 - score.composite();

        let recommendation = if rolling_loss > config.max_daily_loss {
            RiskRecommendation::EmergencyStop
        } else if utilization >= config.block_threshold {
            RiskRecommendation::Block
        } else if utilization >= config.warn_threshold {
            RiskRecommendation::Warn
        } else {
            RiskRecommendation::Allow
        };

        RiskScore {
            recommendation,
            ..score
        }
    }

    /// Idempotent: a second call for a target already stopped is a no-op,
    /// per spec §4.8.
    pub async fn emergency_stop(&self, trader_id: Option<&str>) {
        match trader_id {
            Some(id) => {
                let newly_stopped = self.stopped_traders.write().unwrap().insert(id.to_string());
                if !newly_stopped {
                    return;
                }
                warn!(trader_id = id, "emergency stop triggered for trader");
                if let Some(pm) = self.position_manager() {
                    pm.close_all_for_trader(id, ExitReason::Manual).await;
                }
                let _ = self.stop_tx.send(StopEvent { trader_id: Some(id.to_string()) });
            }
            None => {
                if self.global_stop.swap(true, Ordering::SeqCst) {
                    return;
                }
                error!("global emergency stop triggered");
                if let Some(pm) = self.position_manager() {
                    pm.close_all(ExitReason::Manual).await;
                }
                let _ = self.stop_tx.send(StopEvent { trader_id: None });
            }
        }
    }

    pub fn clear_global_stop(&self) {
        self.global_stop.store(false, Ordering::SeqCst);
    }

    pub fn is_global_stop_active(&self) -> bool {
        self.global_stop.load(Ordering::SeqCst)
    }

    /// Whether `trader_id` (or the whole system) is currently under an
    /// emergency stop. Used by `PositionManager::open_position` to recheck
    /// after an order fills, in case a stop landed mid-tick between the
    /// pre-trade gate and the fill.
    pub fn is_stopped(&self, trader_id: &str) -> bool {
        self.global_stop.load(Ordering::SeqCst) || self.stopped_traders.read().unwrap().contains(trader_id)
    }

    fn position_manager(&self) -> Option<Arc<PositionManager>> {
        self.position_manager.read().unwrap().as_ref().and_then(Weak::upgrade)
    }

    /// Monitoring loop: escalates per `checkRiskLimits` for every tracked
    /// trader, at `monitoringIntervalSeconds`. Runs until `cancel` flips to
    /// `true`; that is a cooperative shutdown, never a failure.
    pub async fn run(self: Arc<Self>, mut cancel: tokio::sync::watch::Receiver<bool>) {
        let interval_secs = self.config.read().unwrap().monitoring_interval_seconds;
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let trader_ids: Vec<String> = self.exposure_per_trader.read().unwrap().keys().cloned().collect();
                    for trader_id in trader_ids {
                        let score = self.check_risk_limits(&trader_id).await;
                        match score.recommendation {
                            RiskRecommendation::EmergencyStop => self.emergency_stop(Some(&trader_id)).await,
                            RiskRecommendation::Block => warn!(trader_id, composite = score.composite(), "risk block threshold reached"),
                            RiskRecommendation::Warn => info!(trader_id, composite = score.composite(), "risk warn threshold reached"),
                            RiskRecommendation::Allow => {}
                        }
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("risk manager monitoring loop shutting down");
                        return;
                    }
                }
            }
        }
    }
}

fn ratio(value: Decimal, max: Decimal) -> f64 {
    if max <= Decimal::ZERO {
        return 1.0;
    }
    use rust_decimal::prelude::ToPrimitive;
    (value / max).to_f64().unwrap_or(1.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> RiskConfig {
        RiskConfig {
            max_total_budget: dec!(10000),
            max_leverage_per_trader: dec!(3),
            max_total_leverage: dec!(9),
            max_exposure_per_trader: dec!(3000),
            max_total_exposure: dec!(9000),
            max_daily_loss: dec!(500),
            stop_loss_percentage: dec!(0.02),
            monitoring_interval_seconds: 15,
            warn_threshold: 0.6,
            block_threshold: 0.85,
        }
    }

    #[test]
    fn leverage_above_per_trader_cap_is_denied() {
        let rm = RiskManager::new(config());
        let result = rm.can_open_position("t1", dec!(100), dec!(4));
        assert!(matches!(result, Err(RiskViolation::LeverageExceeded { .. })));
    }

    #[test]
    fn exposure_above_trader_cap_is_denied() {
        let rm = RiskManager::new(config());
        rm.record_position_opened("t1", dec!(2900), dec!(1));
        let result = rm.can_open_position("t1", dec!(200), dec!(1));
        assert!(matches!(result, Err(RiskViolation::ExposureExceeded { .. })));
    }

    #[tokio::test]
    async fn emergency_stop_is_idempotent() {
        let rm = RiskManager::new(config());
        rm.emergency_stop(Some("t1")).await;
        rm.emergency_stop(Some("t1")).await;
        assert!(matches!(
            rm.can_open_position("t1", dec!(1), dec!(1)),
            Err(RiskViolation::EmergencyStopActive { .. })
        ));
    }
}
