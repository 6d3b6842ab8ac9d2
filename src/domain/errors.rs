//! Stable, renderable error taxonomy (spec §7). Each variant carries enough
//! context to be shown to an operator without re-deriving state elsewhere.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::types::TraderState;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid config field `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("illegal state transition from {from} to {to}")]
    IllegalStateTransition { from: TraderState, to: TraderState },

    #[error("maximum of 3 active traders already reached")]
    MaxTradersExceeded,

    #[error("trader not found: {0}")]
    TraderNotFound(String),

    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error(transparent)]
    Risk(#[from] RiskViolation),

    #[error("emergency stop active for {0:?}")]
    EmergencyStopActive(Option<String>),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("operation cancelled")]
    OperationCancelled,
}

/// Connector-side failures the core expects an exchange implementation to
/// raise (spec §6).
#[derive(Debug, Error, Clone)]
pub enum ConnectorError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("authentication error: {0}")]
    AuthenticationError(String),

    #[error("rate limit exceeded, retry after {retry_after_secs:?}s")]
    RateLimitExceeded { retry_after_secs: Option<u64> },

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("invalid symbol")]
    InvalidSymbol,

    #[error("exchange error: {0}")]
    ExchangeError(String),
}

/// Tagged variant describing the specific bound a requested operation would
/// exceed, with enough detail to render (spec §3, §8).
#[derive(Debug, Error, Clone)]
pub enum RiskViolation {
    #[error("budget exceeded: required {required}, available {available}")]
    BudgetExceeded { required: Decimal, available: Decimal },

    #[error("leverage exceeded: requested {requested}, max {max}")]
    LeverageExceeded { requested: Decimal, max: Decimal },

    #[error("exposure exceeded for {scope}: requested {requested}, max {max}")]
    ExposureExceeded {
        scope: String,
        requested: Decimal,
        max: Decimal,
    },

    #[error("daily loss exceeded: {loss}, max {max}")]
    DailyLossExceeded { loss: Decimal, max: Decimal },

    #[error("emergency stop active for {trader_id:?}")]
    EmergencyStopActive { trader_id: Option<String> },
}

/// Position-lifecycle and order-placement failures in `PositionManager`.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("signal is not actionable")]
    NotActionable,

    #[error("computed size {size} is below the exchange minimum {minimum}")]
    BelowMinimumSize { size: Decimal, minimum: Decimal },

    #[error(transparent)]
    Risk(#[from] RiskViolation),

    #[error("order filled below minimum ratio: filled {filled}, requested {requested}")]
    PartialFillRejected { filled: Decimal, requested: Decimal },

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("position not found: {0}")]
    NotFound(String),
}
