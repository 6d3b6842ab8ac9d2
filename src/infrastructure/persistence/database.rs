//! SQLite connection pool and schema (spec §6 "Persisted state layout").
//! Grounded on the teacher's `Database::new`/`init` shape (WAL-mode
//! `SqlitePool`, directory creation, one big idempotent `CREATE TABLE IF NOT
//! EXISTS` migration run at startup) with the schema itself replaced.

use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Mirrors `TraderManager::MAX_ACTIVE_TRADERS`; kept as a literal here so the
/// persistence layer doesn't depend on the application layer for one
/// constant. Keep the two in sync if the ceiling ever changes.
const MAX_ACTIVE_TRADERS: usize = 3;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent).await.context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite database")?;

        info!(db_url, "connected to database");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS traders (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                exchange TEXT NOT NULL,
                symbol TEXT NOT NULL,
                virtual_money BOOLEAN NOT NULL,
                max_stake_amount TEXT NOT NULL,
                max_risk_level INTEGER NOT NULL,
                max_trading_duration_secs INTEGER NOT NULL,
                min_return_percent TEXT NOT NULL,
                strategy TEXT NOT NULL,
                candlestick_interval TEXT NOT NULL,
                min_confidence_threshold REAL NOT NULL,
                status TEXT NOT NULL,
                balance TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create traders table")?;

        // Defense-in-depth ceiling alongside the in-memory check in
        // `TraderManager::create_trader` (spec §4.9).
        sqlx::query(&format!(
            r#"
            CREATE TRIGGER IF NOT EXISTS trg_trader_ceiling
            BEFORE INSERT ON traders
            WHEN (SELECT COUNT(*) FROM traders) >= {MAX_ACTIVE_TRADERS}
            BEGIN
                SELECT RAISE(ABORT, 'trader ceiling reached');
            END;
            "#
        ))
        .execute(&mut *conn)
        .await
        .context("failed to create trader ceiling trigger")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                trader_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                current_price TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                stop_loss_price TEXT,
                take_profit_price TEXT,
                trailing_active BOOLEAN NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                exit_reason TEXT,
                status TEXT NOT NULL,
                pattern_id TEXT,
                CHECK ((status = 'Closed') = (closed_at IS NOT NULL AND exit_reason IS NOT NULL))
            );
            CREATE INDEX IF NOT EXISTS idx_trades_trader ON trades (trader_id);
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades (symbol);
            CREATE INDEX IF NOT EXISTS idx_trades_status ON trades (trader_id, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trades table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patterns (
                id TEXT PRIMARY KEY,
                exchange TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                action TEXT NOT NULL,
                conditions_json TEXT NOT NULL,
                confidence REAL NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT NOT NULL,
                usage_count INTEGER NOT NULL CHECK (usage_count >= 0),
                success_count INTEGER NOT NULL CHECK (success_count >= 0 AND success_count <= usage_count),
                average_return TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                entry_price TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_patterns_lookup ON patterns (exchange, symbol, timeframe);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create patterns table")?;

        info!("database schema initialized");
        Ok(())
    }
}
