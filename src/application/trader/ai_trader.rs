//! AI Trader (spec §4.6): one instance per running trader config, owning its
//! own state machine and trading-loop task. Grounded on the teacher's
//! `risk_state_manager.rs` shape (a long-lived struct wrapping mutable state
//! behind `&self` with interior locking, driven by an external tick), scaled
//! up to a full start/stop/pause lifecycle over a `tokio::select!` loop.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::indicators::IndicatorRequest;
use crate::application::market_data_processor::MarketDataProcessor;
use crate::application::position_manager::PositionManager;
use crate::application::signal_generator::SignalGenerator;
use crate::application::strategies::{build_strategy, Strategy};
use crate::domain::errors::CoreError;
use crate::domain::pattern::MarketConditions;
use crate::domain::ports::ExchangeConnector;
use crate::domain::types::{HotSwapConfig, TraderConfig, TraderState};

/// Consecutive tick failures tolerated in `Error` state before the trader
/// gives up trying to self-heal and stays there until an operator acts.
const MAX_ERROR_RETRIES: u32 = 5;
const ERROR_BACKOFF_SECS: u64 = 30;

pub struct AiTrader {
    config: RwLock<TraderConfig>,
    state: RwLock<TraderState>,
    connector: Arc<dyn ExchangeConnector>,
    market_data: Arc<MarketDataProcessor>,
    strategy: RwLock<Box<dyn Strategy>>,
    signal_generator: Arc<SignalGenerator>,
    position_manager: Arc<PositionManager>,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
    error_count: AtomicU32,
    paused: AtomicBool,
    cancel_tx: RwLock<Option<watch::Sender<bool>>>,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AiTrader {
    pub fn new(
        config: TraderConfig,
        connector: Arc<dyn ExchangeConnector>,
        market_data: Arc<MarketDataProcessor>,
        signal_generator: Arc<SignalGenerator>,
        position_manager: Arc<PositionManager>,
    ) -> Arc<Self> {
        let strategy = build_strategy(config.strategy);
        Arc::new(Self {
            state: RwLock::new(TraderState::Idle),
            config: RwLock::new(config),
            connector,
            market_data,
            strategy: RwLock::new(strategy),
            signal_generator,
            position_manager,
            last_tick_at: RwLock::new(None),
            error_count: AtomicU32::new(0),
            paused: AtomicBool::new(false),
            cancel_tx: RwLock::new(None),
            loop_handle: tokio::sync::Mutex::new(None),
        })
    }

    pub fn id(&self) -> String {
        self.config.read().unwrap().id.clone()
    }

    pub fn state(&self) -> TraderState {
        *self.state.read().unwrap()
    }

    pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        *self.last_tick_at.read().unwrap()
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn position_manager(&self) -> &Arc<PositionManager> {
        &self.position_manager
    }

    fn transition(&self, next: TraderState) -> Result<(), CoreError> {
        let mut state = self.state.write().unwrap();
        if !state.can_transition(next) {
            return Err(CoreError::IllegalStateTransition { from: *state, to: next });
        }
        info!(trader_id = %self.id(), from = %*state, to = %next, "trader state transition");
        *state = next;
        Ok(())
    }

    /// Starts the trading loop. Legal only from `Idle` or `Stopped`.
    pub async fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        self.transition(TraderState::Starting)?;

        if !self.connector.is_connected().await {
            self.connector.connect().await?;
        }

        self.transition(TraderState::Running)?;

        let (tx, rx) = watch::channel(false);
        *self.cancel_tx.write().unwrap() = Some(tx);
        self.error_count.store(0, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let trader = Arc::clone(self);
        let handle = tokio::spawn(async move { trader.run(rx).await });
        *self.loop_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Legal only from `Running`. The loop keeps ticking but skips acting
    /// on signals while paused.
    pub fn pause(&self) -> Result<(), CoreError> {
        self.transition(TraderState::Paused)?;
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Legal only from `Paused`.
    pub fn resume(&self) -> Result<(), CoreError> {
        self.transition(TraderState::Running)?;
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stops the trading loop without touching open positions — closing
    /// them is an operator decision, not an implicit side effect of stop.
    pub async fn stop(self: &Arc<Self>) -> Result<(), CoreError> {
        self.transition(TraderState::Stopping)?;

        if let Some(tx) = self.cancel_tx.write().unwrap().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(trader_id = %self.id(), error = %e, "trading loop task did not join cleanly");
            }
        }

        self.transition(TraderState::Stopped)?;
        Ok(())
    }

    /// Releases held resources. Safe to call from any terminal state;
    /// does not touch the state machine itself.
    pub async fn cleanup(&self) {
        *self.cancel_tx.write().unwrap() = None;
        *self.loop_handle.lock().await = None;
    }

    /// Applies only the hot-swappable subset without a restart (spec §4.6).
    pub fn update_config(&self, patch: &HotSwapConfig) {
        let mut config = self.config.write().unwrap();
        config.apply_hot_swap(patch);
    }

    /// Full config replacement. Caller is responsible for stop/start around
    /// this when the trader is running — swapping strategy or symbol under
    /// a live loop would race the in-flight tick.
    pub fn replace_config(&self, new_config: TraderConfig) -> Result<(), CoreError> {
        new_config.validate()?;
        *self.strategy.write().unwrap() = build_strategy(new_config.strategy);
        *self.config.write().unwrap() = new_config;
        Ok(())
    }

    pub fn config_snapshot(&self) -> TraderConfig {
        self.config.read().unwrap().clone()
    }

    async fn run(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        loop {
            let cadence = {
                let config = self.config.read().unwrap();
                config.candlestick_interval.loop_cadence_seconds()
            };
            let mut sleep = Box::pin(tokio::time::sleep(std::time::Duration::from_secs(cadence)));

            tokio::select! {
                _ = &mut sleep => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!(trader_id = %self.id(), "trading loop cancelled");
                        return;
                    }
                }
            }

            if self.paused.load(Ordering::SeqCst) {
                continue;
            }

            match self.tick().await {
                Ok(()) => {
                    self.error_count.store(0, Ordering::SeqCst);
                    if self.state() == TraderState::Error {
                        // Self-healed: a clean tick after a transient error
                        // is treated as recovery back into Running.
                        if self.transition(TraderState::Running).is_err() {
                            warn!(trader_id = %self.id(), "could not leave error state after a clean tick");
                        }
                    }
                }
                Err(e) => {
                    error!(trader_id = %self.id(), error = %e, "trading loop tick failed");
                    let retries = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
                    if self.state() != TraderState::Error {
                        if let Err(e) = self.transition(TraderState::Error) {
                            error!(trader_id = %self.id(), error = %e, "failed to record error state");
                        }
                    }
                    if retries >= MAX_ERROR_RETRIES {
                        warn!(trader_id = %self.id(), retries, "exceeded error retry budget, trader remains in error state");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(ERROR_BACKOFF_SECS)) => {}
                        _ = cancel.changed() => {
                            if *cancel.borrow() {
                                return;
                            }
                        }
                    }
                }
            }

            *self.last_tick_at.write().unwrap() = Some(Utc::now());
        }
    }

    /// One iteration of the trading loop (spec §4.6 steps 1-6).
    async fn tick(&self) -> Result<(), CoreError> {
        let (trader_id, symbol, interval, min_confidence, max_stake) = {
            let config = self.config.read().unwrap();
            (
                config.id.clone(),
                config.symbol.clone(),
                config.candlestick_interval,
                config.min_confidence_threshold,
                config.max_stake_amount,
            )
        };

        let requests: Vec<IndicatorRequest> = self.strategy.read().unwrap().required_indicators();
        let Some(processed) = self.market_data.process_tick(&symbol, interval, &requests).await? else {
            return Ok(());
        };

        let raw_signal = {
            let strategy = self.strategy.read().unwrap();
            strategy.generate_signal(&processed.candles, &processed.indicators)
        };

        let open_positions = self.position_manager.open_positions_for_trader(&trader_id);

        let conditions = MarketConditions {
            exchange: self.config.read().unwrap().exchange,
            symbol: symbol.clone(),
            timeframe: interval,
            indicators: processed.indicators.current.clone(),
            current_price: processed.latest_price,
            as_of: processed.timestamp,
        };

        let signal = self
            .signal_generator
            .compose(raw_signal, &conditions, &open_positions)
            .await?;

        if signal.is_actionable(min_confidence) {
            match self
                .position_manager
                .open_position(&signal, &trader_id, &symbol, None, None, Some(max_stake))
                .await
            {
                Ok(position) => info!(trader_id = %trader_id, position_id = %position.id, "position opened from signal"),
                Err(e) => warn!(trader_id = %trader_id, error = %e, "signal was actionable but position could not be opened"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CandlestickInterval, Exchange, StrategyKind};
    use rust_decimal_macros::dec;

    fn sample_config() -> TraderConfig {
        TraderConfig {
            id: "trader-1".into(),
            name: "Test Trader".into(),
            exchange: Exchange::Binance,
            symbol: "BTCUSDT".into(),
            virtual_money: true,
            max_stake_amount: dec!(1000),
            max_risk_level: 5,
            max_trading_duration_secs: 3600,
            min_return_percent: dec!(0.01),
            strategy: StrategyKind::TrendFollowing,
            candlestick_interval: CandlestickInterval::OneHour,
            min_confidence_threshold: 0.5,
        }
    }

    #[test]
    fn illegal_transition_is_rejected() {
        assert!(!TraderState::Idle.can_transition(TraderState::Running));
        assert!(TraderState::Idle.can_transition(TraderState::Starting));
    }

    #[test]
    fn hot_swap_config_leaves_identity_fields_untouched() {
        let config = sample_config();
        let mut patched = config.clone();
        patched.apply_hot_swap(&HotSwapConfig {
            min_return_percent: Some(dec!(0.05)),
            max_risk_level: None,
            min_confidence_threshold: None,
        });
        assert_eq!(patched.min_return_percent, dec!(0.05));
        assert_eq!(patched.id, config.id);
        assert!(crate::domain::types::is_hot_swappable_change(&config, &patched));
    }
}
