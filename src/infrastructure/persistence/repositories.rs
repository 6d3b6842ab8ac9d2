//! SQLite-backed `TraderRepository`/`TradeRepository`/`PatternRepository`
//! implementations against the schema in `database.rs`. Grounded on the
//! teacher's `SqliteOrderRepository`: a thin `pool: SqlitePool` wrapper with
//! one `sqlx::query(...).bind(...).execute/fetch_*(&self.pool)` call per
//! method. `Decimal`/enum/`DateTime<Utc>` columns are stored as `TEXT`,
//! matching the column types declared in `database.rs`.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::CoreError;
use crate::domain::pattern::{PatternQuery, PruneCriteria, TradeOutcome, TradingPattern};
use crate::domain::repositories::{PatternRepository, TraderRepository, TraderRow, TradeRepository};
use crate::domain::types::{
    CandlestickInterval, Exchange, ExitReason, Position, PositionSide, PositionStatus,
    SignalAction, StrategyKind, TraderConfig, TraderState,
};

fn persistence_err(context: &str, err: sqlx::Error) -> CoreError {
    CoreError::Persistence(format!("{context}: {err}"))
}

fn parse_field<T, E: std::fmt::Display>(field: &str, value: &str, parsed: Result<T, E>) -> Result<T, CoreError> {
    parsed.map_err(|e| CoreError::Persistence(format!("corrupt `{field}` value {value:?}: {e}")))
}

fn strategy_kind_from_str(s: &str) -> Result<StrategyKind, String> {
    match s {
        "TrendFollowing" => Ok(StrategyKind::TrendFollowing),
        "MeanReversion" => Ok(StrategyKind::MeanReversion),
        "Breakout" => Ok(StrategyKind::Breakout),
        other => Err(format!("unknown strategy kind {other:?}")),
    }
}

fn trader_state_from_str(s: &str) -> Result<TraderState, String> {
    match s {
        "Idle" => Ok(TraderState::Idle),
        "Starting" => Ok(TraderState::Starting),
        "Running" => Ok(TraderState::Running),
        "Paused" => Ok(TraderState::Paused),
        "Stopping" => Ok(TraderState::Stopping),
        "Stopped" => Ok(TraderState::Stopped),
        "Error" => Ok(TraderState::Error),
        other => Err(format!("unknown trader state {other:?}")),
    }
}

fn position_side_from_str(s: &str) -> Result<PositionSide, String> {
    match s {
        "Long" => Ok(PositionSide::Long),
        "Short" => Ok(PositionSide::Short),
        other => Err(format!("unknown position side {other:?}")),
    }
}

fn position_status_from_str(s: &str) -> Result<PositionStatus, String> {
    match s {
        "Open" => Ok(PositionStatus::Open),
        "Closed" => Ok(PositionStatus::Closed),
        other => Err(format!("unknown position status {other:?}")),
    }
}

fn exit_reason_from_str(s: &str) -> Result<ExitReason, String> {
    match s {
        "StopLoss" => Ok(ExitReason::StopLoss),
        "TakeProfit" => Ok(ExitReason::TakeProfit),
        "Manual" => Ok(ExitReason::Manual),
        "Signal" => Ok(ExitReason::Signal),
        "Orphaned" => Ok(ExitReason::Orphaned),
        "Error" => Ok(ExitReason::Error),
        other => Err(format!("unknown exit reason {other:?}")),
    }
}

fn signal_action_from_str(s: &str) -> Result<SignalAction, String> {
    match s {
        "Buy" => Ok(SignalAction::Buy),
        "Sell" => Ok(SignalAction::Sell),
        "Hold" => Ok(SignalAction::Hold),
        "Close" => Ok(SignalAction::Close),
        other => Err(format!("unknown signal action {other:?}")),
    }
}

// ---------------------------------------------------------------- traders

pub struct SqliteTraderRepository {
    pool: SqlitePool,
}

impl SqliteTraderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_trader(row: &sqlx::sqlite::SqliteRow) -> Result<TraderRow, CoreError> {
        let exchange_raw: String = row.try_get("exchange").map_err(|e| persistence_err("read exchange", e))?;
        let strategy_raw: String = row.try_get("strategy").map_err(|e| persistence_err("read strategy", e))?;
        let interval_raw: String =
            row.try_get("candlestick_interval").map_err(|e| persistence_err("read candlestick_interval", e))?;
        let status_raw: String = row.try_get("status").map_err(|e| persistence_err("read status", e))?;
        let max_stake_raw: String =
            row.try_get("max_stake_amount").map_err(|e| persistence_err("read max_stake_amount", e))?;
        let min_return_raw: String =
            row.try_get("min_return_percent").map_err(|e| persistence_err("read min_return_percent", e))?;
        let balance_raw: String = row.try_get("balance").map_err(|e| persistence_err("read balance", e))?;

        let config = TraderConfig {
            id: row.try_get("id").map_err(|e| persistence_err("read id", e))?,
            name: row.try_get("name").map_err(|e| persistence_err("read name", e))?,
            exchange: parse_field("exchange", &exchange_raw, Exchange::from_str(&exchange_raw))?,
            symbol: row.try_get("symbol").map_err(|e| persistence_err("read symbol", e))?,
            virtual_money: row.try_get("virtual_money").map_err(|e| persistence_err("read virtual_money", e))?,
            max_stake_amount: parse_field("max_stake_amount", &max_stake_raw, Decimal::from_str(&max_stake_raw))?,
            max_risk_level: row.try_get::<i64, _>("max_risk_level").map_err(|e| persistence_err("read max_risk_level", e))? as u8,
            max_trading_duration_secs: row
                .try_get::<i64, _>("max_trading_duration_secs")
                .map_err(|e| persistence_err("read max_trading_duration_secs", e))? as u64,
            min_return_percent: parse_field("min_return_percent", &min_return_raw, Decimal::from_str(&min_return_raw))?,
            strategy: parse_field("strategy", &strategy_raw, strategy_kind_from_str(&strategy_raw))?,
            candlestick_interval: parse_field(
                "candlestick_interval",
                &interval_raw,
                CandlestickInterval::from_str(&interval_raw),
            )?,
            min_confidence_threshold: row
                .try_get("min_confidence_threshold")
                .map_err(|e| persistence_err("read min_confidence_threshold", e))?,
        };

        Ok(TraderRow {
            config,
            status: parse_field("status", &status_raw, trader_state_from_str(&status_raw))?,
            balance: parse_field("balance", &balance_raw, Decimal::from_str(&balance_raw))?,
        })
    }
}

#[async_trait]
impl TraderRepository for SqliteTraderRepository {
    async fn create(&self, row: &TraderRow) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO traders (
                id, name, exchange, symbol, virtual_money, max_stake_amount,
                max_risk_level, max_trading_duration_secs, min_return_percent,
                strategy, candlestick_interval, min_confidence_threshold, status, balance
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.config.id)
        .bind(&row.config.name)
        .bind(row.config.exchange.to_string())
        .bind(&row.config.symbol)
        .bind(row.config.virtual_money)
        .bind(row.config.max_stake_amount.to_string())
        .bind(row.config.max_risk_level as i64)
        .bind(row.config.max_trading_duration_secs as i64)
        .bind(row.config.min_return_percent.to_string())
        .bind(row.config.strategy.to_string())
        .bind(row.config.candlestick_interval.to_binance_str())
        .bind(row.config.min_confidence_threshold)
        .bind(format!("{:?}", row.status))
        .bind(row.balance.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_err("insert trader", e))?;
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<TraderRow>, CoreError> {
        let rows = sqlx::query("SELECT * FROM traders")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| persistence_err("list traders", e))?;
        rows.iter().map(Self::row_to_trader).collect()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TraderRow>, CoreError> {
        let row = sqlx::query("SELECT * FROM traders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| persistence_err("find trader", e))?;
        row.as_ref().map(Self::row_to_trader).transpose()
    }

    async fn update_status(&self, id: &str, status: TraderState) -> Result<(), CoreError> {
        sqlx::query("UPDATE traders SET status = ? WHERE id = ?")
            .bind(format!("{status:?}"))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_err("update trader status", e))?;
        Ok(())
    }

    async fn update_config(&self, id: &str, config: &TraderConfig) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE traders SET
                name = ?, exchange = ?, symbol = ?, virtual_money = ?, max_stake_amount = ?,
                max_risk_level = ?, max_trading_duration_secs = ?, min_return_percent = ?,
                strategy = ?, candlestick_interval = ?, min_confidence_threshold = ?
            WHERE id = ?
            "#,
        )
        .bind(&config.name)
        .bind(config.exchange.to_string())
        .bind(&config.symbol)
        .bind(config.virtual_money)
        .bind(config.max_stake_amount.to_string())
        .bind(config.max_risk_level as i64)
        .bind(config.max_trading_duration_secs as i64)
        .bind(config.min_return_percent.to_string())
        .bind(config.strategy.to_string())
        .bind(config.candlestick_interval.to_binance_str())
        .bind(config.min_confidence_threshold)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_err("update trader config", e))?;
        Ok(())
    }

    async fn update_balance(&self, id: &str, balance: Decimal) -> Result<(), CoreError> {
        sqlx::query("UPDATE traders SET balance = ? WHERE id = ?")
            .bind(balance.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_err("update trader balance", e))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM traders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_err("delete trader", e))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, CoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM traders")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| persistence_err("count traders", e))?;
        let n: i64 = row.try_get("n").map_err(|e| persistence_err("read count", e))?;
        Ok(n as usize)
    }
}

// ----------------------------------------------------------------- trades

pub struct SqliteTradeRepository {
    pool: SqlitePool,
}

impl SqliteTradeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position, CoreError> {
        let side_raw: String = row.try_get("side").map_err(|e| persistence_err("read side", e))?;
        let status_raw: String = row.try_get("status").map_err(|e| persistence_err("read status", e))?;
        let entry_price_raw: String = row.try_get("entry_price").map_err(|e| persistence_err("read entry_price", e))?;
        let quantity_raw: String = row.try_get("quantity").map_err(|e| persistence_err("read quantity", e))?;
        let current_price_raw: String =
            row.try_get("current_price").map_err(|e| persistence_err("read current_price", e))?;
        let unrealized_raw: String =
            row.try_get("unrealized_pnl").map_err(|e| persistence_err("read unrealized_pnl", e))?;
        let realized_raw: String = row.try_get("realized_pnl").map_err(|e| persistence_err("read realized_pnl", e))?;
        let stop_loss_raw: Option<String> =
            row.try_get("stop_loss_price").map_err(|e| persistence_err("read stop_loss_price", e))?;
        let take_profit_raw: Option<String> =
            row.try_get("take_profit_price").map_err(|e| persistence_err("read take_profit_price", e))?;
        let exit_reason_raw: Option<String> =
            row.try_get("exit_reason").map_err(|e| persistence_err("read exit_reason", e))?;

        Ok(Position {
            id: row.try_get("id").map_err(|e| persistence_err("read id", e))?,
            trader_id: row.try_get("trader_id").map_err(|e| persistence_err("read trader_id", e))?,
            symbol: row.try_get("symbol").map_err(|e| persistence_err("read symbol", e))?,
            side: parse_field("side", &side_raw, position_side_from_str(&side_raw))?,
            entry_price: parse_field("entry_price", &entry_price_raw, Decimal::from_str(&entry_price_raw))?,
            quantity: parse_field("quantity", &quantity_raw, Decimal::from_str(&quantity_raw))?,
            current_price: parse_field("current_price", &current_price_raw, Decimal::from_str(&current_price_raw))?,
            unrealized_pnl: parse_field("unrealized_pnl", &unrealized_raw, Decimal::from_str(&unrealized_raw))?,
            realized_pnl: parse_field("realized_pnl", &realized_raw, Decimal::from_str(&realized_raw))?,
            stop_loss_price: stop_loss_raw.as_deref().map(Decimal::from_str).transpose().map_err(|e| {
                CoreError::Persistence(format!("corrupt `stop_loss_price`: {e}"))
            })?,
            take_profit_price: take_profit_raw.as_deref().map(Decimal::from_str).transpose().map_err(|e| {
                CoreError::Persistence(format!("corrupt `take_profit_price`: {e}"))
            })?,
            trailing_active: row.try_get("trailing_active").map_err(|e| persistence_err("read trailing_active", e))?,
            opened_at: row.try_get("opened_at").map_err(|e| persistence_err("read opened_at", e))?,
            closed_at: row.try_get("closed_at").map_err(|e| persistence_err("read closed_at", e))?,
            exit_reason: exit_reason_raw
                .as_deref()
                .map(exit_reason_from_str)
                .transpose()
                .map_err(|e| CoreError::Persistence(format!("corrupt `exit_reason`: {e}")))?,
            status: parse_field("status", &status_raw, position_status_from_str(&status_raw))?,
        })
    }
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn create(&self, position: &Position) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, trader_id, symbol, side, entry_price, quantity, current_price,
                unrealized_pnl, realized_pnl, stop_loss_price, take_profit_price,
                trailing_active, opened_at, closed_at, exit_reason, status, pattern_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.id)
        .bind(&position.trader_id)
        .bind(&position.symbol)
        .bind(format!("{:?}", position.side))
        .bind(position.entry_price.to_string())
        .bind(position.quantity.to_string())
        .bind(position.current_price.to_string())
        .bind(position.unrealized_pnl.to_string())
        .bind(position.realized_pnl.to_string())
        .bind(position.stop_loss_price.map(|d| d.to_string()))
        .bind(position.take_profit_price.map(|d| d.to_string()))
        .bind(position.trailing_active)
        .bind(position.opened_at)
        .bind(position.closed_at)
        .bind(position.exit_reason.map(|r| format!("{r:?}")))
        .bind(format!("{:?}", position.status))
        .bind(Option::<String>::None)
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_err("insert trade", e))?;
        Ok(())
    }

    async fn update(&self, position: &Position) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE trades SET
                current_price = ?, unrealized_pnl = ?, realized_pnl = ?,
                stop_loss_price = ?, take_profit_price = ?, trailing_active = ?,
                closed_at = ?, exit_reason = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(position.current_price.to_string())
        .bind(position.unrealized_pnl.to_string())
        .bind(position.realized_pnl.to_string())
        .bind(position.stop_loss_price.map(|d| d.to_string()))
        .bind(position.take_profit_price.map(|d| d.to_string()))
        .bind(position.trailing_active)
        .bind(position.closed_at)
        .bind(position.exit_reason.map(|r| format!("{r:?}")))
        .bind(format!("{:?}", position.status))
        .bind(&position.id)
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_err("update trade", e))?;
        Ok(())
    }

    async fn close(
        &self,
        id: &str,
        closed_at: DateTime<Utc>,
        realized_pnl: Decimal,
        exit_reason: ExitReason,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE trades SET status = 'Closed', closed_at = ?, realized_pnl = ?, exit_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(closed_at)
        .bind(realized_pnl.to_string())
        .bind(format!("{exit_reason:?}"))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_err("close trade", e))?;
        Ok(())
    }

    async fn find_open(&self) -> Result<Vec<Position>, CoreError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE status = 'Open'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| persistence_err("list open trades", e))?;
        rows.iter().map(Self::row_to_position).collect()
    }

    async fn find_by_trader(&self, trader_id: &str) -> Result<Vec<Position>, CoreError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE trader_id = ? ORDER BY opened_at")
            .bind(trader_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| persistence_err("list trades for trader", e))?;
        rows.iter().map(Self::row_to_position).collect()
    }

    async fn find_by_symbol(&self, symbol: &str) -> Result<Vec<Position>, CoreError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE symbol = ? ORDER BY opened_at")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| persistence_err("list trades for symbol", e))?;
        rows.iter().map(Self::row_to_position).collect()
    }

    async fn find_by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Position>, CoreError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE opened_at >= ? AND opened_at <= ? ORDER BY opened_at")
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| persistence_err("list trades in range", e))?;
        rows.iter().map(Self::row_to_position).collect()
    }

    async fn update_stop_loss(&self, id: &str, price: Decimal) -> Result<(), CoreError> {
        sqlx::query("UPDATE trades SET stop_loss_price = ? WHERE id = ?")
            .bind(price.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_err("update stop loss", e))?;
        Ok(())
    }

    async fn update_take_profit(&self, id: &str, price: Decimal) -> Result<(), CoreError> {
        sqlx::query("UPDATE trades SET take_profit_price = ? WHERE id = ?")
            .bind(price.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_err("update take profit", e))?;
        Ok(())
    }

}

// --------------------------------------------------------------- patterns

pub struct SqlitePatternRepository {
    pool: SqlitePool,
}

impl SqlitePatternRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_pattern(row: &sqlx::sqlite::SqliteRow) -> Result<TradingPattern, CoreError> {
        let exchange_raw: String = row.try_get("exchange").map_err(|e| persistence_err("read exchange", e))?;
        let timeframe_raw: String = row.try_get("timeframe").map_err(|e| persistence_err("read timeframe", e))?;
        let action_raw: String = row.try_get("action").map_err(|e| persistence_err("read action", e))?;
        let conditions_raw: String =
            row.try_get("conditions_json").map_err(|e| persistence_err("read conditions_json", e))?;
        let tags_raw: String = row.try_get("tags_json").map_err(|e| persistence_err("read tags_json", e))?;
        let average_return_raw: String =
            row.try_get("average_return").map_err(|e| persistence_err("read average_return", e))?;
        let entry_price_raw: Option<String> =
            row.try_get("entry_price").map_err(|e| persistence_err("read entry_price", e))?;

        Ok(TradingPattern {
            id: row.try_get("id").map_err(|e| persistence_err("read id", e))?,
            exchange: parse_field("exchange", &exchange_raw, Exchange::from_str(&exchange_raw))?,
            symbol: row.try_get("symbol").map_err(|e| persistence_err("read symbol", e))?,
            timeframe: parse_field("timeframe", &timeframe_raw, CandlestickInterval::from_str(&timeframe_raw))?,
            action: parse_field("action", &action_raw, signal_action_from_str(&action_raw))?,
            conditions: serde_json::from_str(&conditions_raw)
                .map_err(|e| CoreError::Persistence(format!("corrupt `conditions_json`: {e}")))?,
            confidence: row.try_get("confidence").map_err(|e| persistence_err("read confidence", e))?,
            created_at: row.try_get("created_at").map_err(|e| persistence_err("read created_at", e))?,
            last_used_at: row.try_get("last_used_at").map_err(|e| persistence_err("read last_used_at", e))?,
            usage_count: row.try_get::<i64, _>("usage_count").map_err(|e| persistence_err("read usage_count", e))? as u64,
            success_count: row
                .try_get::<i64, _>("success_count")
                .map_err(|e| persistence_err("read success_count", e))? as u64,
            average_return: parse_field("average_return", &average_return_raw, Decimal::from_str(&average_return_raw))?,
            tags: serde_json::from_str(&tags_raw)
                .map_err(|e| CoreError::Persistence(format!("corrupt `tags_json`: {e}")))?,
            entry_price: entry_price_raw
                .as_deref()
                .map(Decimal::from_str)
                .transpose()
                .map_err(|e| CoreError::Persistence(format!("corrupt `entry_price`: {e}")))?,
        })
    }
}

#[async_trait]
impl PatternRepository for SqlitePatternRepository {
    async fn store(&self, pattern: &TradingPattern) -> Result<String, CoreError> {
        let conditions_json = serde_json::to_string(&pattern.conditions)
            .map_err(|e| CoreError::Persistence(format!("failed to serialize conditions: {e}")))?;
        let tags_json = serde_json::to_string(&pattern.tags)
            .map_err(|e| CoreError::Persistence(format!("failed to serialize tags: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO patterns (
                id, exchange, symbol, timeframe, action, conditions_json, confidence,
                created_at, last_used_at, usage_count, success_count, average_return,
                tags_json, entry_price
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                confidence = excluded.confidence,
                last_used_at = excluded.last_used_at,
                usage_count = excluded.usage_count,
                success_count = excluded.success_count,
                average_return = excluded.average_return,
                tags_json = excluded.tags_json,
                entry_price = excluded.entry_price
            "#,
        )
        .bind(&pattern.id)
        .bind(pattern.exchange.to_string())
        .bind(&pattern.symbol)
        .bind(pattern.timeframe.to_binance_str())
        .bind(format!("{:?}", pattern.action))
        .bind(&conditions_json)
        .bind(pattern.confidence)
        .bind(pattern.created_at)
        .bind(pattern.last_used_at)
        .bind(pattern.usage_count as i64)
        .bind(pattern.success_count as i64)
        .bind(pattern.average_return.to_string())
        .bind(&tags_json)
        .bind(pattern.entry_price.map(|d| d.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_err("store pattern", e))?;
        Ok(pattern.id.clone())
    }

    async fn query(&self, criteria: &PatternQuery) -> Result<Vec<TradingPattern>, CoreError> {
        // Conditions are filtered in SQL where indexed/cheap, the rest
        // (tag membership, derived success rate, age) in memory, mirroring
        // the teacher's fetch-then-filter style for composite criteria.
        let mut sql = String::from("SELECT * FROM patterns WHERE 1 = 1");
        if criteria.exchange.is_some() {
            sql.push_str(" AND exchange = ?");
        }
        if criteria.symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        if criteria.timeframe.is_some() {
            sql.push_str(" AND timeframe = ?");
        }
        if criteria.action.is_some() {
            sql.push_str(" AND action = ?");
        }
        if criteria.min_usage_count.is_some() {
            sql.push_str(" AND usage_count >= ?");
        }
        if criteria.min_confidence.is_some() {
            sql.push_str(" AND confidence >= ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(exchange) = criteria.exchange {
            query = query.bind(exchange.to_string());
        }
        if let Some(symbol) = &criteria.symbol {
            query = query.bind(symbol.clone());
        }
        if let Some(timeframe) = criteria.timeframe {
            query = query.bind(timeframe.to_binance_str());
        }
        if let Some(action) = criteria.action {
            query = query.bind(format!("{action:?}"));
        }
        if let Some(min_usage) = criteria.min_usage_count {
            query = query.bind(min_usage as i64);
        }
        if let Some(min_confidence) = criteria.min_confidence {
            query = query.bind(min_confidence);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| persistence_err("query patterns", e))?;
        let mut patterns = rows.iter().map(Self::row_to_pattern).collect::<Result<Vec<_>, _>>()?;

        if let Some(min_success_rate) = criteria.min_success_rate {
            patterns.retain(|p| p.success_rate().is_some_and(|rate| rate >= min_success_rate));
        }
        if let Some(max_age) = criteria.max_age {
            let cutoff = Utc::now() - max_age;
            patterns.retain(|p| p.created_at >= cutoff);
        }
        if !criteria.any_of_tags.is_empty() {
            patterns.retain(|p| p.tags.iter().any(|t| criteria.any_of_tags.contains(t)));
        }

        Ok(patterns)
    }

    async fn update_performance(&self, pattern_id: &str, outcome: TradeOutcome) -> Result<TradingPattern, CoreError> {
        let row = sqlx::query("SELECT * FROM patterns WHERE id = ?")
            .bind(pattern_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| persistence_err("find pattern", e))?
            .ok_or_else(|| CoreError::Persistence(format!("pattern not found: {pattern_id}")))?;
        let mut pattern = Self::row_to_pattern(&row)?;

        let new_usage = pattern.usage_count + 1;
        let new_success = pattern.success_count + if outcome.success { 1 } else { 0 };
        // Running average over the new usage count, matching the incremental
        // mean update the pattern store keeps in memory.
        let new_average = (pattern.average_return * Decimal::from(pattern.usage_count) + outcome.return_pct)
            / Decimal::from(new_usage);

        pattern.usage_count = new_usage;
        pattern.success_count = new_success;
        pattern.average_return = new_average;
        pattern.last_used_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE patterns SET usage_count = ?, success_count = ?, average_return = ?, last_used_at = ?
            WHERE id = ?
            "#,
        )
        .bind(pattern.usage_count as i64)
        .bind(pattern.success_count as i64)
        .bind(pattern.average_return.to_string())
        .bind(pattern.last_used_at)
        .bind(pattern_id)
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_err("update pattern performance", e))?;

        Ok(pattern)
    }

    async fn prune(&self, criteria: &PruneCriteria) -> Result<usize, CoreError> {
        let rows = sqlx::query("SELECT * FROM patterns")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| persistence_err("list patterns for prune", e))?;
        let mut patterns = rows.iter().map(Self::row_to_pattern).collect::<Result<Vec<_>, CoreError>>()?;

        let now = Utc::now();
        let mut to_delete: Vec<String> = Vec::new();

        patterns.retain(|p| {
            let too_old = criteria.max_age.is_some_and(|max_age| now - p.created_at > max_age);
            let has_enough_samples = p.usage_count >= criteria.min_sample_for_success_rate;
            let low_success_rate = criteria
                .min_success_rate
                .zip(p.success_rate())
                .is_some_and(|(min_rate, rate)| has_enough_samples && rate < min_rate);
            let low_usage = criteria.min_usage_count.is_some_and(|min_usage| p.usage_count < min_usage);

            if too_old || low_success_rate || low_usage {
                to_delete.push(p.id.clone());
                false
            } else {
                true
            }
        });

        if let Some(max_keep) = criteria.max_patterns_to_keep {
            if patterns.len() > max_keep {
                // Mirrors `application::pattern_store::retention_rank`: higher
                // successRate * ln(1 + usageCount) is kept preferentially,
                // ties broken by more-recent `last_used_at`. Duplicated as a
                // literal rather than imported — infrastructure does not
                // depend on the application layer.
                patterns.sort_by(|a, b| {
                    let rank = |p: &TradingPattern| (p.success_rate().unwrap_or(0.0) * (1.0 + p.usage_count as f64).ln(), p.last_used_at);
                    rank(b).partial_cmp(&rank(a)).unwrap_or(std::cmp::Ordering::Equal)
                });
                for stale in patterns.split_off(max_keep) {
                    to_delete.push(stale.id);
                }
            }
        }

        let deleted = to_delete.len();
        for id in to_delete {
            sqlx::query("DELETE FROM patterns WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| persistence_err("delete pruned pattern", e))?;
        }
        Ok(deleted)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<TradingPattern>, CoreError> {
        let row = sqlx::query("SELECT * FROM patterns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| persistence_err("find pattern", e))?;
        row.as_ref().map(Self::row_to_pattern).transpose()
    }
}
