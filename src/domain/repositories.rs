//! Persistence Gateway (spec §6): the repository operations the core
//! consumes. Implementations are external collaborators; the core only
//! depends on these traits. Every method is transactional per-call — the
//! core never issues multi-call transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::errors::CoreError;
use crate::domain::pattern::{PatternQuery, PruneCriteria, TradeOutcome, TradingPattern};
use crate::domain::types::{ExitReason, Position, TraderConfig, TraderState};

#[derive(Debug, Clone)]
pub struct TraderRow {
    pub config: TraderConfig,
    pub status: TraderState,
    pub balance: Decimal,
}

#[async_trait]
pub trait TraderRepository: Send + Sync {
    async fn create(&self, row: &TraderRow) -> Result<(), CoreError>;
    async fn find_all(&self) -> Result<Vec<TraderRow>, CoreError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<TraderRow>, CoreError>;
    async fn update_status(&self, id: &str, status: TraderState) -> Result<(), CoreError>;
    /// Persists a full config replacement (spec §4.9 `updateTrader`) so a
    /// restart's `recoverTraders()` rebuilds traders from their latest
    /// config, not the one they were created with.
    async fn update_config(&self, id: &str, config: &TraderConfig) -> Result<(), CoreError>;
    async fn update_balance(&self, id: &str, balance: Decimal) -> Result<(), CoreError>;
    async fn delete(&self, id: &str) -> Result<(), CoreError>;
    /// Count of persisted trader rows, enforced as a defense-in-depth ceiling
    /// alongside the in-memory check in `TraderManager`.
    async fn count(&self) -> Result<usize, CoreError>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn create(&self, position: &Position) -> Result<(), CoreError>;
    async fn update(&self, position: &Position) -> Result<(), CoreError>;
    async fn close(
        &self,
        id: &str,
        closed_at: DateTime<Utc>,
        realized_pnl: Decimal,
        exit_reason: ExitReason,
    ) -> Result<(), CoreError>;
    async fn find_open(&self) -> Result<Vec<Position>, CoreError>;
    async fn find_by_trader(&self, trader_id: &str) -> Result<Vec<Position>, CoreError>;
    async fn find_by_symbol(&self, symbol: &str) -> Result<Vec<Position>, CoreError>;
    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Position>, CoreError>;
    async fn update_stop_loss(&self, id: &str, price: Decimal) -> Result<(), CoreError>;
    async fn update_take_profit(&self, id: &str, price: Decimal) -> Result<(), CoreError>;
}

#[async_trait]
pub trait PatternRepository: Send + Sync {
    async fn store(&self, pattern: &TradingPattern) -> Result<String, CoreError>;
    async fn query(&self, criteria: &PatternQuery) -> Result<Vec<TradingPattern>, CoreError>;
    async fn update_performance(
        &self,
        pattern_id: &str,
        outcome: TradeOutcome,
    ) -> Result<TradingPattern, CoreError>;
    async fn prune(&self, criteria: &PruneCriteria) -> Result<usize, CoreError>;
    async fn get_by_id(&self, id: &str) -> Result<Option<TradingPattern>, CoreError>;
}
