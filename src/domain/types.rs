//! Core trading types shared across the indicator, strategy, position and
//! risk subsystems. All money/price/size fields are `Decimal`; confidences,
//! ratios and indicator values are `f64`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Exchange a trader instance is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Binance,
    Bitget,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Binance => write!(f, "binance"),
            Exchange::Bitget => write!(f, "bitget"),
        }
    }
}

impl FromStr for Exchange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(Exchange::Binance),
            "bitget" => Ok(Exchange::Bitget),
            other => anyhow::bail!("unknown exchange: {other}"),
        }
    }
}

/// Candlestick interval (the spec's "enumerated timeframe").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandlestickInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl CandlestickInterval {
    pub fn to_seconds(self) -> i64 {
        match self {
            CandlestickInterval::OneMinute => 60,
            CandlestickInterval::FiveMinutes => 300,
            CandlestickInterval::FifteenMinutes => 900,
            CandlestickInterval::OneHour => 3600,
            CandlestickInterval::FourHours => 14_400,
            CandlestickInterval::OneDay => 86_400,
        }
    }

    /// Cadence the trading loop should tick at for this interval, clamped to
    /// the [5s, 300s] bound the spec requires for the per-trader loop.
    pub fn loop_cadence_seconds(self) -> u64 {
        (self.to_seconds() as u64).clamp(5, 300)
    }

    pub fn to_binance_str(self) -> &'static str {
        match self {
            CandlestickInterval::OneMinute => "1m",
            CandlestickInterval::FiveMinutes => "5m",
            CandlestickInterval::FifteenMinutes => "15m",
            CandlestickInterval::OneHour => "1h",
            CandlestickInterval::FourHours => "4h",
            CandlestickInterval::OneDay => "1d",
        }
    }

    pub fn to_bitget_str(self) -> &'static str {
        match self {
            CandlestickInterval::OneMinute => "1min",
            CandlestickInterval::FiveMinutes => "5min",
            CandlestickInterval::FifteenMinutes => "15min",
            CandlestickInterval::OneHour => "1h",
            CandlestickInterval::FourHours => "4h",
            CandlestickInterval::OneDay => "1day",
        }
    }
}

impl FromStr for CandlestickInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" | "1min" => Ok(CandlestickInterval::OneMinute),
            "5m" | "5min" => Ok(CandlestickInterval::FiveMinutes),
            "15m" | "15min" => Ok(CandlestickInterval::FifteenMinutes),
            "1h" => Ok(CandlestickInterval::OneHour),
            "4h" => Ok(CandlestickInterval::FourHours),
            "1d" | "1day" => Ok(CandlestickInterval::OneDay),
            other => anyhow::bail!("unknown candlestick interval: {other}"),
        }
    }
}

/// The three strategy variants the spec names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    TrendFollowing,
    MeanReversion,
    Breakout,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::TrendFollowing => write!(f, "TrendFollowing"),
            StrategyKind::MeanReversion => write!(f, "MeanReversion"),
            StrategyKind::Breakout => write!(f, "Breakout"),
        }
    }
}

/// Immutable-after-construction trader configuration. Replaced wholesale on
/// update (see `TraderManager::update_trader`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderConfig {
    pub id: String,
    pub name: String,
    pub exchange: Exchange,
    pub symbol: String,
    pub virtual_money: bool,
    pub max_stake_amount: Decimal,
    pub max_risk_level: u8,
    pub max_trading_duration_secs: u64,
    pub min_return_percent: Decimal,
    pub strategy: StrategyKind,
    pub candlestick_interval: CandlestickInterval,
    pub min_confidence_threshold: f64,
}

impl TraderConfig {
    /// Validates the invariants from the data model. Called once at
    /// construction and again whenever a full replacement is requested.
    pub fn validate(&self) -> Result<(), crate::domain::errors::CoreError> {
        use crate::domain::errors::CoreError;

        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "id".into(),
                reason: "must not be blank".into(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "name".into(),
                reason: "must not be blank".into(),
            });
        }
        if self.symbol.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "symbol".into(),
                reason: "must not be blank".into(),
            });
        }
        if !self.virtual_money {
            return Err(CoreError::InvalidConfig {
                field: "virtual_money".into(),
                reason: "v1.0 requires demo balances only".into(),
            });
        }
        if self.max_stake_amount <= Decimal::ZERO {
            return Err(CoreError::InvalidConfig {
                field: "max_stake_amount".into(),
                reason: "must be > 0".into(),
            });
        }
        if !(1..=10).contains(&self.max_risk_level) {
            return Err(CoreError::InvalidConfig {
                field: "max_risk_level".into(),
                reason: "must be in [1, 10]".into(),
            });
        }
        if self.max_trading_duration_secs == 0 {
            return Err(CoreError::InvalidConfig {
                field: "max_trading_duration_secs".into(),
                reason: "must be > 0".into(),
            });
        }
        if self.min_return_percent < Decimal::ZERO {
            return Err(CoreError::InvalidConfig {
                field: "min_return_percent".into(),
                reason: "must be >= 0".into(),
            });
        }
        Ok(())
    }

    /// Fields the spec marks hot-swappable via `AiTrader::update_config`.
    pub fn apply_hot_swap(&mut self, patch: &HotSwapConfig) {
        if let Some(v) = patch.min_return_percent {
            self.min_return_percent = v;
        }
        if let Some(v) = patch.max_risk_level {
            self.max_risk_level = v;
        }
        if let Some(v) = patch.min_confidence_threshold {
            self.min_confidence_threshold = v;
        }
    }
}

/// The narrow hot-swappable subset of `TraderConfig` (spec §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotSwapConfig {
    pub min_return_percent: Option<Decimal>,
    pub max_risk_level: Option<u8>,
    pub min_confidence_threshold: Option<f64>,
}

/// Returns true if `new` is reachable from `old` purely via the hot-swap
/// fields (i.e. nothing besides the three hot-swappable fields differs).
pub fn is_hot_swappable_change(old: &TraderConfig, new: &TraderConfig) -> bool {
    old.id == new.id
        && old.name == new.name
        && old.exchange == new.exchange
        && old.symbol == new.symbol
        && old.virtual_money == new.virtual_money
        && old.max_stake_amount == new.max_stake_amount
        && old.max_trading_duration_secs == new.max_trading_duration_secs
        && old.strategy == new.strategy
        && old.candlestick_interval == new.candlestick_interval
}

/// Trader lifecycle state machine (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraderState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl fmt::Display for TraderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl TraderState {
    /// Returns whether `self -> next` is a legal transition per spec §3.
    pub fn can_transition(self, next: TraderState) -> bool {
        use TraderState::*;
        match (self, next) {
            (Idle, Starting) => true,
            (Starting, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Stopping) => true,
            (Paused, Stopping) => true,
            (Starting, Stopping) => true,
            (Stopping, Stopped) => true,
            (Stopped, Starting) => true,
            (_, Error) if self != Stopped && self != Error => true,
            _ => false,
        }
    }
}

/// A single OHLCV candle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candlestick {
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candlestick {
    /// Validates the single-candle OHLC invariant from spec §3.
    pub fn is_valid(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high && self.close_time > self.open_time
    }
}

/// Validates that a candle sequence is strictly monotonic in `open_time` and
/// each candle individually satisfies its OHLC invariant.
pub fn validate_candle_sequence(candles: &[Candlestick]) -> bool {
    if candles.iter().any(|c| !c.is_valid()) {
        return false;
    }
    candles.windows(2).all(|w| w[1].open_time > w[0].open_time)
}

/// A scalar indicator value, or MACD's composite line/signal/histogram.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum IndicatorValue {
    Scalar(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
}

impl IndicatorValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            IndicatorValue::Scalar(v) => Some(*v),
            IndicatorValue::Macd { .. } => None,
        }
    }
}

/// Mapping from indicator name ("RSI", "MACD", "SMA_20", "BB_upper", ...) to
/// its computed value. Absent keys mean "not computable" for that indicator.
pub type IndicatorSnapshot = HashMap<String, IndicatorValue>;

/// Directional action a `Signal` recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub confidence: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub indicator_snapshot: IndicatorSnapshot,
    pub matched_pattern_id: Option<String>,
}

impl Signal {
    pub fn hold(reason: impl Into<String>, indicator_snapshot: IndicatorSnapshot) -> Self {
        Self {
            action: SignalAction::Hold,
            confidence: 0.0,
            reason: reason.into(),
            timestamp: Utc::now(),
            indicator_snapshot,
            matched_pattern_id: None,
        }
    }

    /// An "actionable" signal per the glossary: Buy/Sell with confidence at
    /// or above `threshold`.
    pub fn is_actionable(&self, threshold: f64) -> bool {
        matches!(self.action, SignalAction::Buy | SignalAction::Sell) && self.confidence >= threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Manual,
    Signal,
    Orphaned,
    Error,
}

/// A live or closed position owned exclusively by the position manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub trader_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub trailing_active: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub status: PositionStatus,
}

impl Position {
    pub fn unrealized_pnl_at(&self, price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - price) * self.quantity,
        }
    }

    /// Invariant check used by tests and the recovery path: Open positions
    /// carry no close metadata, Closed positions carry all of it.
    pub fn has_consistent_lifecycle(&self) -> bool {
        match self.status {
            PositionStatus::Open => {
                self.closed_at.is_none() && self.exit_reason.is_none()
            }
            PositionStatus::Closed => {
                self.closed_at.is_some() && self.exit_reason.is_some()
            }
        }
    }
}
