//! Position Manager (spec §4.7): owns the open-position lifecycle end to
//! end — sizing, order submission, P&L, monitoring, and recovery after a
//! restart. Grounded on the teacher's much thinner
//! `risk_management/position_manager.rs` (a trailing-stop tracker keyed by
//! position id), generalized into the full lifecycle this system names.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::risk_manager::RiskManager;
use crate::domain::errors::PositionError;
use crate::domain::ports::{ExchangeConnector, OrderSide, OrderType};
use crate::domain::repositories::TradeRepository;
use crate::domain::types::{ExitReason, Position, PositionSide, PositionStatus, Signal, SignalAction};

#[derive(Debug, Clone)]
pub struct PositionManagerConfig {
    /// Fallback notional staked on a single position at full confidence when
    /// a caller doesn't supply a per-trader `max_stake_override` — a
    /// `PositionManager` is shared across every trader on an exchange
    /// (`TraderManager::services_for`), so the trader's own
    /// `TraderConfig::max_stake_amount` is the value that actually governs
    /// sizing in practice (spec §4.7 `size = round(maxStake * confidence /
    /// price, step)`).
    pub max_stake: Decimal,
    pub min_fill_ratio: Decimal,
    pub monitoring_interval_seconds: u64,
    pub reopen_confidence_floor: f64,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            max_stake: Decimal::from(1000),
            min_fill_ratio: Decimal::new(95, 2),
            monitoring_interval_seconds: 10,
            reopen_confidence_floor: 0.5,
        }
    }
}

pub struct PositionManager {
    connector: Arc<dyn ExchangeConnector>,
    repo: Arc<dyn TradeRepository>,
    risk_manager: Arc<RiskManager>,
    config: PositionManagerConfig,
    open: RwLock<HashMap<String, Position>>,
}

impl PositionManager {
    pub fn new(
        connector: Arc<dyn ExchangeConnector>,
        repo: Arc<dyn TradeRepository>,
        risk_manager: Arc<RiskManager>,
        config: PositionManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            repo,
            risk_manager,
            config,
            open: RwLock::new(HashMap::new()),
        })
    }

    pub async fn open_position(
        &self,
        signal: &Signal,
        trader_id: &str,
        symbol: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        max_stake_override: Option<Decimal>,
    ) -> Result<Position, PositionError> {
        if !signal.is_actionable(self.config.reopen_confidence_floor) {
            return Err(PositionError::NotActionable);
        }

        let ticker = self.connector.get_ticker(symbol).await?;
        let price = ticker.last_price;

        let step_size = self.connector.step_size(symbol).await?;
        let max_stake = max_stake_override.unwrap_or(self.config.max_stake);
        let raw_size = max_stake * Decimal::try_from(signal.confidence).unwrap_or(Decimal::ONE) / price;
        let size = round_to_step(raw_size, step_size);

        let minimum = self.connector.minimum_order_size(symbol).await?;
        if size < minimum {
            return Err(PositionError::BelowMinimumSize { size, minimum });
        }

        let notional = size * price;
        let leverage = Decimal::ONE;
        self.risk_manager.can_open_position(trader_id, notional, leverage)?;

        let side = match signal.action {
            SignalAction::Buy => OrderSide::Buy,
            SignalAction::Sell => OrderSide::Sell,
            _ => return Err(PositionError::NotActionable),
        };

        let order = self
            .connector
            .place_order(symbol, side, OrderType::Market, size, None)
            .await?;

        let fill_ratio = if order.requested_quantity.is_zero() {
            Decimal::ZERO
        } else {
            order.filled_quantity / order.requested_quantity
        };
        if fill_ratio < self.config.min_fill_ratio {
            return Err(PositionError::PartialFillRejected {
                filled: order.filled_quantity,
                requested: order.requested_quantity,
            });
        }

        let position = Position {
            id: Uuid::new_v4().to_string(),
            trader_id: trader_id.to_string(),
            symbol: symbol.to_string(),
            side: match side {
                OrderSide::Buy => PositionSide::Long,
                OrderSide::Sell => PositionSide::Short,
            },
            entry_price: order.average_fill_price,
            quantity: order.filled_quantity,
            current_price: order.average_fill_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            stop_loss_price: stop_loss,
            take_profit_price: take_profit,
            trailing_active: false,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
            status: PositionStatus::Open,
        };

        self.repo.create(&position).await.map_err(|e| {
            error!(error = %e, "failed to persist opened position");
            PositionError::NotFound(position.id.clone())
        })?;
        self.risk_manager.record_position_opened(trader_id, notional, leverage);
        self.open.write().unwrap().insert(position.id.clone(), position.clone());

        info!(position_id = %position.id, symbol, side = ?position.side, "position opened");

        // An emergency stop may have landed on `trader_id` between the
        // pre-trade gate above and this fill. Rather than leave a position
        // open under an active stop, close it immediately.
        if self.risk_manager.is_stopped(trader_id) {
            warn!(position_id = %position.id, trader_id, "emergency stop landed mid-open, closing immediately");
            return self.close_position(&position.id, ExitReason::Manual).await;
        }

        Ok(position)
    }

    pub async fn update_position(&self, id: &str, current_price: Option<Decimal>) -> Result<(), PositionError> {
        let symbol = {
            let open = self.open.read().unwrap();
            open.get(id).ok_or_else(|| PositionError::NotFound(id.to_string()))?.symbol.clone()
        };
        let price = match current_price {
            Some(p) => p,
            None => self.connector.get_ticker(&symbol).await?.last_price,
        };

        let snapshot = {
            let mut open = self.open.write().unwrap();
            let position = open.get_mut(id).ok_or_else(|| PositionError::NotFound(id.to_string()))?;
            position.current_price = price;
            position.unrealized_pnl = position.unrealized_pnl_at(price);
            position.clone()
        };

        self.repo.update(&snapshot).await.map_err(|e| {
            error!(error = %e, "failed to persist position update");
            PositionError::NotFound(id.to_string())
        })
    }

    pub async fn refresh_position(&self, id: &str) -> Result<(), PositionError> {
        let symbol = {
            let open = self.open.read().unwrap();
            open.get(id).ok_or_else(|| PositionError::NotFound(id.to_string()))?.symbol.clone()
        };
        let exchange_positions = self.connector.get_positions().await?;
        let Some(live) = exchange_positions.iter().find(|p| p.symbol == symbol) else {
            return Ok(());
        };

        let mut open = self.open.write().unwrap();
        if let Some(position) = open.get_mut(id) {
            position.quantity = live.quantity;
            position.entry_price = live.entry_price;
        }
        Ok(())
    }

    pub async fn close_position(&self, id: &str, reason: ExitReason) -> Result<Position, PositionError> {
        let position = {
            let open = self.open.read().unwrap();
            open.get(id).cloned().ok_or_else(|| PositionError::NotFound(id.to_string()))?
        };

        let closing_side = match position.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };
        let order = self
            .connector
            .place_order(&position.symbol, closing_side, OrderType::Market, position.quantity, None)
            .await?;

        let realized_pnl = match position.side {
            PositionSide::Long => (order.average_fill_price - position.entry_price) * position.quantity,
            PositionSide::Short => (position.entry_price - order.average_fill_price) * position.quantity,
        };
        let closed_at = Utc::now();

        self.repo
            .close(id, closed_at, realized_pnl, reason)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to persist position close");
                PositionError::NotFound(id.to_string())
            })?;

        self.risk_manager.record_position_closed(
            &position.trader_id,
            position.quantity * order.average_fill_price,
            Decimal::ONE,
        );

        let mut closed = position;
        closed.current_price = order.average_fill_price;
        closed.realized_pnl = realized_pnl;
        closed.closed_at = Some(closed_at);
        closed.exit_reason = Some(reason);
        closed.status = PositionStatus::Closed;

        self.open.write().unwrap().remove(id);
        info!(position_id = id, reason = ?reason, realized_pnl = %realized_pnl, "position closed");
        Ok(closed)
    }

    pub async fn update_stop_loss(&self, id: &str, price: Decimal, trailing_activated: bool) -> Result<(), PositionError> {
        let snapshot = {
            let mut open = self.open.write().unwrap();
            let position = open.get_mut(id).ok_or_else(|| PositionError::NotFound(id.to_string()))?;
            position.stop_loss_price = Some(price);
            position.trailing_active = trailing_activated;
            position.clone()
        };
        self.repo.update_stop_loss(id, price).await.map_err(|e| {
            error!(error = %e, "failed to persist stop loss update");
            PositionError::NotFound(id.to_string())
        })?;
        let _ = snapshot;
        Ok(())
    }

    pub async fn update_take_profit(&self, id: &str, price: Decimal) -> Result<(), PositionError> {
        {
            let mut open = self.open.write().unwrap();
            let position = open.get_mut(id).ok_or_else(|| PositionError::NotFound(id.to_string()))?;
            position.take_profit_price = Some(price);
        }
        self.repo.update_take_profit(id, price).await.map_err(|e| {
            error!(error = %e, "failed to persist take profit update");
            PositionError::NotFound(id.to_string())
        })
    }

    /// Reconciles persisted open trades against the exchange after a
    /// restart: present on the exchange → rebuild in memory; missing →
    /// closed as `Orphaned`, realized P&L set to the last-known computed
    /// P&L (spec §4.7) rather than left at zero.
    pub async fn recover_positions(&self) -> Result<(), PositionError> {
        let persisted = self.repo.find_open().await.map_err(|e| {
            error!(error = %e, "failed to load open trades for recovery");
            PositionError::NotFound("<recovery>".to_string())
        })?;
        let exchange_positions = self.connector.get_positions().await?;

        let mut orphaned = Vec::new();
        let mut open = self.open.write().unwrap();
        for position in persisted {
            let present = exchange_positions.iter().any(|p| p.symbol == position.symbol);
            if present {
                open.insert(position.id.clone(), position);
            } else {
                orphaned.push(position);
            }
        }
        drop(open);

        for position in orphaned {
            let realized_pnl = position.unrealized_pnl_at(position.current_price);
            if let Err(e) = self.repo.close(&position.id, Utc::now(), realized_pnl, ExitReason::Orphaned).await {
                warn!(position_id = %position.id, error = %e, "failed to close orphaned position");
            }
        }
        Ok(())
    }

    pub async fn close_all_for_trader(&self, trader_id: &str, reason: ExitReason) {
        let ids: Vec<String> = self
            .open
            .read()
            .unwrap()
            .values()
            .filter(|p| p.trader_id == trader_id)
            .map(|p| p.id.clone())
            .collect();
        for id in ids {
            if let Err(e) = self.close_position(&id, reason).await {
                error!(position_id = id, error = %e, "failed to close position during trader stop");
            }
        }
    }

    pub async fn close_all(&self, reason: ExitReason) {
        let ids: Vec<String> = self.open.read().unwrap().keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.close_position(&id, reason).await {
                error!(position_id = id, error = %e, "failed to close position during global stop");
            }
        }
    }

    /// Snapshot of a trader's currently open positions, newest data already
    /// reflected since entries are updated in place by the monitoring loop.
    pub fn open_positions_for_trader(&self, trader_id: &str) -> Vec<Position> {
        self.open
            .read()
            .unwrap()
            .values()
            .filter(|p| p.trader_id == trader_id)
            .cloned()
            .collect()
    }

    /// Realized (last 24h, from persistence) plus unrealized (live, from
    /// memory) P&L for `trader_id` — the rolling figure `RiskManager` gates
    /// the daily loss cap against.
    pub async fn rolling_24h_pnl(&self, trader_id: &str) -> Decimal {
        let since = Utc::now() - chrono::Duration::hours(24);
        let realized: Decimal = self
            .repo
            .find_by_trader(trader_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.status == PositionStatus::Closed && p.closed_at.is_some_and(|t| t >= since))
            .map(|p| p.realized_pnl)
            .sum();
        let unrealized: Decimal = self
            .open
            .read()
            .unwrap()
            .values()
            .filter(|p| p.trader_id == trader_id)
            .map(|p| p.unrealized_pnl)
            .sum();
        realized + unrealized
    }

    /// Monitoring loop (spec §4.7): refreshes every open position each
    /// tick and closes on stop-loss/take-profit breach. Per-position
    /// failures are logged, never abort the loop.
    pub async fn run(self: Arc<Self>, mut cancel: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.config.monitoring_interval_seconds));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ids: Vec<String> = self.open.read().unwrap().keys().cloned().collect();
                    for id in ids {
                        if let Err(e) = self.check_one(&id).await {
                            warn!(position_id = id, error = %e, "position monitoring tick failed");
                        }
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("position manager monitoring loop shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn check_one(&self, id: &str) -> Result<(), PositionError> {
        self.update_position(id, None).await?;
        let (side, price, stop_loss, take_profit) = {
            let open = self.open.read().unwrap();
            let position = open.get(id).ok_or_else(|| PositionError::NotFound(id.to_string()))?;
            (position.side, position.current_price, position.stop_loss_price, position.take_profit_price)
        };

        let exit = match side {
            PositionSide::Long => {
                if stop_loss.is_some_and(|sl| price <= sl) {
                    Some(ExitReason::StopLoss)
                } else if take_profit.is_some_and(|tp| price >= tp) {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
            PositionSide::Short => {
                if stop_loss.is_some_and(|sl| price >= sl) {
                    Some(ExitReason::StopLoss)
                } else if take_profit.is_some_and(|tp| price <= tp) {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
        };

        if let Some(reason) = exit {
            self.close_position(id, reason).await?;
        }
        Ok(())
    }
}

fn round_to_step(size: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return size;
    }
    (size / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_down_to_step_size() {
        let rounded = round_to_step(Decimal::new(1234, 3), Decimal::new(1, 2));
        assert_eq!(rounded, Decimal::new(123, 2));
    }
}
