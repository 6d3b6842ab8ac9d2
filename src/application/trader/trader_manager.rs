//! Trader Manager (spec §4.9): creates, starts, stops and recovers AI
//! Traders, enforcing the 3-instance ceiling and reusing one exchange
//! connector (and the Position Manager / Market Data Processor built on top
//! of it) per exchange. Grounded on the teacher's `Application` struct in
//! `src/application/mod.rs` — a top-level owner of shared services behind a
//! single lock guarding structural mutation, reads allowed to proceed
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::application::indicators::IndicatorPipeline;
use crate::application::market_data_processor::MarketDataProcessor;
use crate::application::position_manager::{PositionManager, PositionManagerConfig};
use crate::application::risk_manager::RiskManager;
use crate::application::signal_generator::SignalGenerator;
use crate::application::trader::AiTrader;
use crate::domain::errors::CoreError;
use crate::domain::ports::ExchangeConnector;
use crate::domain::repositories::{TradeRepository, TraderRepository, TraderRow};
use crate::domain::types::{is_hot_swappable_change, Exchange, HotSwapConfig, TraderConfig, TraderState};

/// Hard ceiling from spec §4.9, enforced here and re-checked by the
/// persistence schema as defense in depth.
pub const MAX_ACTIVE_TRADERS: usize = 3;

pub struct TraderHealth {
    pub is_healthy: bool,
    pub status: TraderState,
    pub last_update: Option<chrono::DateTime<Utc>>,
    pub exchange_connector_healthy: bool,
    pub error_count: u32,
    pub issues: Vec<String>,
}

/// How stale `lastUpdate` may be before health reporting flags it, in
/// multiples of the trader's own loop cadence would be more precise, but a
/// fixed ceiling is the simplest bound that still catches a wedged loop.
const STALENESS_THRESHOLD_SECS: i64 = 600;

type ConnectorFactory = dyn Fn(Exchange) -> Result<Arc<dyn ExchangeConnector>, CoreError> + Send + Sync;

struct ExchangeServices {
    connector: Arc<dyn ExchangeConnector>,
    market_data: Arc<MarketDataProcessor>,
    position_manager: Arc<PositionManager>,
    /// Kept alive so the position manager's monitoring loop, spawned the
    /// first time this exchange is touched, can be cancelled if this
    /// `TraderManager` is ever torn down. Never flipped today — the
    /// process lifetime is the loop lifetime.
    _monitoring_cancel: tokio::sync::watch::Sender<bool>,
}

pub struct TraderManager {
    traders: RwLock<HashMap<String, Arc<AiTrader>>>,
    exchanges: RwLock<HashMap<Exchange, ExchangeServices>>,
    connector_factory: Arc<ConnectorFactory>,
    trader_repo: Arc<dyn TraderRepository>,
    trade_repo: Arc<dyn TradeRepository>,
    risk_manager: Arc<RiskManager>,
    signal_generator: Arc<SignalGenerator>,
    indicator_pipeline: Arc<IndicatorPipeline>,
    position_manager_config: PositionManagerConfig,
}

impl TraderManager {
    pub fn new(
        connector_factory: Arc<ConnectorFactory>,
        trader_repo: Arc<dyn TraderRepository>,
        trade_repo: Arc<dyn TradeRepository>,
        risk_manager: Arc<RiskManager>,
        signal_generator: Arc<SignalGenerator>,
        indicator_pipeline: Arc<IndicatorPipeline>,
        position_manager_config: PositionManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            traders: RwLock::new(HashMap::new()),
            exchanges: RwLock::new(HashMap::new()),
            connector_factory,
            trader_repo,
            trade_repo,
            risk_manager,
            signal_generator,
            indicator_pipeline,
            position_manager_config,
        })
    }

    async fn services_for(&self, exchange: Exchange) -> Result<(Arc<MarketDataProcessor>, Arc<PositionManager>, Arc<dyn ExchangeConnector>), CoreError> {
        {
            let exchanges = self.exchanges.read().await;
            if let Some(services) = exchanges.get(&exchange) {
                return Ok((services.market_data.clone(), services.position_manager.clone(), services.connector.clone()));
            }
        }

        let mut exchanges = self.exchanges.write().await;
        if let Some(services) = exchanges.get(&exchange) {
            return Ok((services.market_data.clone(), services.position_manager.clone(), services.connector.clone()));
        }

        let connector = (self.connector_factory)(exchange)?;
        connector.connect().await?;
        let market_data = Arc::new(MarketDataProcessor::new(connector.clone(), self.indicator_pipeline.clone()));
        let position_manager = PositionManager::new(
            connector.clone(),
            self.trade_repo.clone(),
            self.risk_manager.clone(),
            self.position_manager_config.clone(),
        );

        let (monitoring_cancel, monitoring_cancel_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(position_manager.clone().run(monitoring_cancel_rx));

        exchanges.insert(
            exchange,
            ExchangeServices {
                connector: connector.clone(),
                market_data: market_data.clone(),
                position_manager: position_manager.clone(),
                _monitoring_cancel: monitoring_cancel,
            },
        );
        Ok((market_data, position_manager, connector))
    }

    pub async fn create_trader(&self, config: TraderConfig) -> Result<String, CoreError> {
        let mut traders = self.traders.write().await;
        if traders.len() >= MAX_ACTIVE_TRADERS {
            return Err(CoreError::MaxTradersExceeded);
        }
        config.validate()?;
        self.risk_manager.validate_trader_creation(config.max_stake_amount)?;

        let (market_data, position_manager, connector) = self.services_for(config.exchange).await?;

        let row = TraderRow {
            config: config.clone(),
            status: TraderState::Idle,
            balance: Decimal::ZERO,
        };
        self.trader_repo.create(&row).await?;

        let trader = AiTrader::new(config.clone(), connector, market_data, self.signal_generator.clone(), position_manager);
        let id = config.id.clone();
        traders.insert(id.clone(), trader);
        info!(trader_id = %id, "trader created");
        Ok(id)
    }

    pub async fn start_trader(&self, id: &str) -> Result<(), CoreError> {
        let trader = self.get_trader(id).await?;
        trader.start().await?;
        self.trader_repo.update_status(id, trader.state()).await?;
        Ok(())
    }

    pub async fn stop_trader(&self, id: &str) -> Result<(), CoreError> {
        let trader = self.get_trader(id).await?;
        trader.stop().await?;
        self.trader_repo.update_status(id, trader.state()).await?;
        Ok(())
    }

    pub async fn update_trader_hot(&self, id: &str, patch: &HotSwapConfig) -> Result<(), CoreError> {
        let trader = self.get_trader(id).await?;
        trader.update_config(patch);
        Ok(())
    }

    /// Full config replacement (spec §4.9 `updateTrader`): stops a running
    /// trader, swaps the instance state, persists, and restarts if it was
    /// running before the call.
    pub async fn update_trader(&self, id: &str, new_config: TraderConfig) -> Result<(), CoreError> {
        let trader = self.get_trader(id).await?;
        let old_config = trader.config_snapshot();
        let was_running = matches!(trader.state(), TraderState::Running | TraderState::Paused);

        if is_hot_swappable_change(&old_config, &new_config) {
            let patch = HotSwapConfig {
                min_return_percent: Some(new_config.min_return_percent),
                max_risk_level: Some(new_config.max_risk_level),
                min_confidence_threshold: Some(new_config.min_confidence_threshold),
            };
            trader.update_config(&patch);
            self.trader_repo.update_config(id, &trader.config_snapshot()).await?;
            return Ok(());
        }

        if was_running {
            trader.stop().await?;
        }
        trader.replace_config(new_config)?;
        self.trader_repo.update_config(id, &trader.config_snapshot()).await?;
        self.trader_repo
            .update_status(id, trader.state())
            .await?;
        if was_running {
            trader.start().await?;
        }
        Ok(())
    }

    pub async fn delete_trader(&self, id: &str) -> Result<(), CoreError> {
        let trader = {
            let traders = self.traders.read().await;
            traders.get(id).cloned().ok_or_else(|| CoreError::TraderNotFound(id.to_string()))?
        };
        if matches!(trader.state(), TraderState::Running | TraderState::Paused | TraderState::Starting) {
            trader.stop().await?;
        }
        trader.cleanup().await;
        self.traders.write().await.remove(id);
        self.trader_repo.delete(id).await?;
        info!(trader_id = id, "trader deleted");
        Ok(())
    }

    /// Rebuilds every persisted trader row as a Stopped instance and
    /// reconciles its exchange's positions. Never auto-starts.
    pub async fn recover_traders(&self) -> Result<usize, CoreError> {
        let rows = self.trader_repo.find_all().await?;
        let mut recovered = 0;
        let mut traders = self.traders.write().await;
        for row in rows {
            if traders.len() >= MAX_ACTIVE_TRADERS {
                warn!(trader_id = %row.config.id, "skipping recovery beyond trader ceiling");
                continue;
            }
            let (market_data, position_manager, connector) = self.services_for(row.config.exchange).await?;
            if let Err(e) = position_manager.recover_positions().await {
                error!(trader_id = %row.config.id, error = %e, "position recovery failed");
            }
            let trader = AiTrader::new(
                row.config.clone(),
                connector,
                market_data,
                self.signal_generator.clone(),
                position_manager,
            );
            traders.insert(row.config.id.clone(), trader);
            recovered += 1;
        }
        Ok(recovered)
    }

    pub async fn get_trader(&self, id: &str) -> Result<Arc<AiTrader>, CoreError> {
        self.traders
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::TraderNotFound(id.to_string()))
    }

    pub async fn get_all_traders(&self) -> Vec<Arc<AiTrader>> {
        self.traders.read().await.values().cloned().collect()
    }

    pub async fn trader_count(&self) -> usize {
        self.traders.read().await.len()
    }

    pub async fn check_trader_health(&self, id: &str) -> Result<TraderHealth, CoreError> {
        let trader = self.get_trader(id).await?;
        Ok(self.health_of(&trader).await)
    }

    pub async fn check_all_traders_health(&self) -> Vec<(String, TraderHealth)> {
        let traders = self.get_all_traders().await;
        let mut out = Vec::with_capacity(traders.len());
        for trader in traders {
            let id = trader.id();
            let health = self.health_of(&trader).await;
            out.push((id, health));
        }
        out
    }

    async fn health_of(&self, trader: &Arc<AiTrader>) -> TraderHealth {
        let status = trader.state();
        let last_update = trader.last_tick_at();
        let mut issues = Vec::new();

        if status == TraderState::Error {
            issues.push("trader is in error state".to_string());
        }

        let connector_healthy = if let Ok((_, _, connector)) = self.services_for(trader.config_snapshot().exchange).await {
            let healthy = connector.is_connected().await;
            if !healthy {
                issues.push("exchange connector reports disconnected".to_string());
            }
            healthy
        } else {
            issues.push("exchange connector unavailable".to_string());
            false
        };

        if let Some(last) = last_update {
            let age = (Utc::now() - last).num_seconds();
            if age > STALENESS_THRESHOLD_SECS && matches!(status, TraderState::Running | TraderState::Paused) {
                issues.push(format!("no tick observed in {age}s"));
            }
        }

        TraderHealth {
            is_healthy: issues.is_empty(),
            status,
            last_update,
            exchange_connector_healthy: connector_healthy,
            error_count: trader.error_count(),
            issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CandlestickInterval, StrategyKind};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRepo {
        count: AtomicUsize,
    }

    #[async_trait]
    impl TraderRepository for CountingRepo {
        async fn create(&self, _row: &TraderRow) -> Result<(), CoreError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn find_all(&self) -> Result<Vec<TraderRow>, CoreError> {
            Ok(vec![])
        }
        async fn find_by_id(&self, _id: &str) -> Result<Option<TraderRow>, CoreError> {
            Ok(None)
        }
        async fn update_status(&self, _id: &str, _status: TraderState) -> Result<(), CoreError> {
            Ok(())
        }
        async fn update_config(&self, _id: &str, _config: &TraderConfig) -> Result<(), CoreError> {
            Ok(())
        }
        async fn update_balance(&self, _id: &str, _balance: Decimal) -> Result<(), CoreError> {
            Ok(())
        }
        async fn delete(&self, _id: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn count(&self) -> Result<usize, CoreError> {
            Ok(self.count.load(Ordering::SeqCst))
        }
    }

    fn sample_config(id: &str) -> TraderConfig {
        TraderConfig {
            id: id.to_string(),
            name: "t".into(),
            exchange: Exchange::Binance,
            symbol: "BTCUSDT".into(),
            virtual_money: true,
            max_stake_amount: dec!(100),
            max_risk_level: 3,
            max_trading_duration_secs: 3600,
            min_return_percent: dec!(0.01),
            strategy: StrategyKind::TrendFollowing,
            candlestick_interval: CandlestickInterval::OneHour,
            min_confidence_threshold: 0.5,
        }
    }

    #[test]
    fn ceiling_constant_matches_spec() {
        assert_eq!(MAX_ACTIVE_TRADERS, 3);
    }

    #[test]
    fn sample_config_is_valid() {
        assert!(sample_config("t1").validate().is_ok());
    }
}
