//! End-to-end scenarios over the real application services, wired with the
//! in-memory connector and a throwaway SQLite database. Mirrors the shape of
//! the concrete scenarios this system is expected to satisfy: a signal opens
//! a position, a stop-loss closes one, an emergency stop cascades, and a
//! restart recovers persisted state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;

use triad_trader::application::pattern_store::{PatternStore, PatternStoreConfig};
use triad_trader::application::position_manager::{PositionManager, PositionManagerConfig};
use triad_trader::application::risk_manager::RiskManager;
use triad_trader::domain::errors::RiskViolation;
use triad_trader::domain::pattern::TradeOutcome;
use triad_trader::domain::repositories::{PatternRepository, TradeRepository};
use triad_trader::domain::risk::RiskConfig;
use triad_trader::domain::types::{ExitReason, IndicatorValue, PositionStatus, Signal, SignalAction};
use triad_trader::infrastructure::exchange::MockConnector;
use triad_trader::infrastructure::persistence::{Database, SqlitePatternRepository, SqliteTradeRepository};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn risk_config() -> RiskConfig {
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

async fn in_memory_trade_repo() -> Arc<dyn TradeRepository> {
    let db = Database::new("sqlite::memory:").await.expect("in-memory database");
    Arc::new(SqliteTradeRepository::new(db.pool))
}

fn buy_signal(confidence: f64) -> Signal {
    Signal {
        action: SignalAction::Buy,
        confidence,
        reason: "golden cross".into(),
        timestamp: Utc::now(),
        indicator_snapshot: HashMap::from([
            ("RSI".to_string(), IndicatorValue::Scalar(45.0)),
            (
                "MACD".to_string(),
                IndicatorValue::Macd { line: 150.5, signal: 140.2, histogram: 10.3 },
            ),
        ]),
        matched_pattern_id: None,
    }
}

/// Scenario 1: trend golden cross opens a Long whose size and unrealized
/// P&L match the confidence-scaled sizing formula exactly.
#[tokio::test]
async fn golden_cross_signal_opens_a_sized_long_position() {
    init_tracing();

    let connector = Arc::new(MockConnector::new());
    connector.set_price("BTCUSDT", dec!(50000));
    let repo = in_memory_trade_repo().await;
    let risk_manager = RiskManager::new(risk_config());
    let config = PositionManagerConfig {
        max_stake: dec!(100),
        ..PositionManagerConfig::default()
    };
    let position_manager = PositionManager::new(connector.clone(), repo, risk_manager.clone(), config);
    risk_manager.wire_position_manager(&position_manager);

    let signal = buy_signal(0.8);
    let position = position_manager
        .open_position(&signal, "trader-1", "BTCUSDT", None, None, None)
        .await
        .expect("position should open");

    assert_eq!(position.entry_price, dec!(50000));
    assert_eq!(position.quantity, dec!(0.0016));

    connector.set_price("BTCUSDT", dec!(50500));
    position_manager.update_position(&position.id, None).await.unwrap();
    let refreshed = &position_manager.open_positions_for_trader("trader-1")[0];
    assert_eq!(refreshed.unrealized_pnl, dec!(0.80));
}

/// Scenario 2: a signal pointing the other way while a position is already
/// open never stacks — it never reaches the connector at all.
#[tokio::test]
async fn opposing_signal_never_stacks_onto_an_open_position() {
    init_tracing();

    let connector = Arc::new(MockConnector::new());
    connector.set_price("BTCUSDT", dec!(49800));
    let repo = in_memory_trade_repo().await;
    let risk_manager = RiskManager::new(risk_config());
    let config = PositionManagerConfig {
        max_stake: dec!(100),
        ..PositionManagerConfig::default()
    };
    let position_manager = PositionManager::new(connector.clone(), repo, risk_manager.clone(), config);
    risk_manager.wire_position_manager(&position_manager);

    let opened = position_manager
        .open_position(&buy_signal(0.75), "trader-1", "BTCUSDT", None, None, None)
        .await
        .expect("first entry should open");

    let pattern_store = Arc::new(PatternStore::new(
        Arc::new(SqlitePatternRepository::new(
            Database::new("sqlite::memory:").await.unwrap().pool,
        )),
        PatternStoreConfig::default(),
    ));
    let signal_generator = triad_trader::application::signal_generator::SignalGenerator::new(
        pattern_store,
        triad_trader::application::signal_generator::SignalGeneratorConfig::default(),
    );

    let mut reversal = buy_signal(0.9);
    reversal.action = SignalAction::Sell;
    let conditions = triad_trader::domain::pattern::MarketConditions {
        exchange: triad_trader::domain::types::Exchange::Binance,
        symbol: "BTCUSDT".into(),
        timeframe: triad_trader::domain::types::CandlestickInterval::OneHour,
        indicators: reversal.indicator_snapshot.clone(),
        current_price: dec!(50300),
        as_of: Utc::now(),
    };
    let open_positions = position_manager.open_positions_for_trader("trader-1");
    let composed = signal_generator.compose(reversal, &conditions, &open_positions).await.unwrap();

    assert_eq!(composed.action, SignalAction::Hold);
    assert_eq!(position_manager.open_positions_for_trader("trader-1").len(), 1);
    assert_eq!(position_manager.open_positions_for_trader("trader-1")[0].id, opened.id);
}

/// Scenario 3: the monitoring loop's stop-loss check closes a Long whose
/// price crosses below its stop and realizes the expected loss.
#[tokio::test]
async fn stop_loss_breach_closes_position_with_expected_realized_pnl() {
    init_tracing();

    let connector = Arc::new(MockConnector::new());
    connector.set_price("BTCUSDT", dec!(50000));
    let repo = in_memory_trade_repo().await;
    let risk_manager = RiskManager::new(risk_config());
    let position_manager = PositionManager::new(
        connector.clone(),
        repo,
        risk_manager.clone(),
        PositionManagerConfig { max_stake: dec!(100), ..PositionManagerConfig::default() },
    );
    risk_manager.wire_position_manager(&position_manager);

    let position = position_manager
        .open_position(&buy_signal(0.8), "trader-1", "BTCUSDT", Some(dec!(49500)), None, None)
        .await
        .unwrap();
    let quantity = position.quantity;

    connector.set_price("BTCUSDT", dec!(49400));
    position_manager.update_position(&position.id, None).await.unwrap();
    let stale = position_manager.open_positions_for_trader("trader-1")[0].clone();
    assert!(stale.current_price <= stale.stop_loss_price.unwrap());

    let closed = position_manager.close_position(&position.id, ExitReason::StopLoss).await.unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
    assert_eq!(closed.realized_pnl, (dec!(49400) - dec!(50000)) * quantity);
    assert!(position_manager.open_positions_for_trader("trader-1").is_empty());
}

/// Scenario 4: an emergency stop on a trader closes every one of its open
/// positions and latches so the next open attempt is rejected outright.
#[tokio::test]
async fn emergency_stop_closes_all_positions_and_blocks_further_opens() {
    init_tracing();

    let connector = Arc::new(MockConnector::new());
    connector.set_price("BTCUSDT", dec!(50000));
    connector.set_price("ETHUSDT", dec!(2000));
    let repo = in_memory_trade_repo().await;
    let risk_manager = RiskManager::new(risk_config());
    let position_manager = PositionManager::new(
        connector.clone(),
        repo,
        risk_manager.clone(),
        PositionManagerConfig { max_stake: dec!(100), ..PositionManagerConfig::default() },
    );
    risk_manager.wire_position_manager(&position_manager);

    position_manager
        .open_position(&buy_signal(0.8), "trader-1", "BTCUSDT", None, None, None)
        .await
        .unwrap();
    position_manager
        .open_position(&buy_signal(0.8), "trader-1", "ETHUSDT", None, None, None)
        .await
        .unwrap();
    assert_eq!(position_manager.open_positions_for_trader("trader-1").len(), 2);

    risk_manager.emergency_stop(Some("trader-1")).await;

    assert!(position_manager.open_positions_for_trader("trader-1").is_empty());
    let result = risk_manager.can_open_position("trader-1", dec!(1), dec!(1));
    assert!(matches!(result, Err(RiskViolation::EmergencyStopActive { .. })));
}

/// Scenario 5: after a simulated restart, a persisted Open position that no
/// longer exists on the exchange is reconciled to Closed/Orphaned.
#[tokio::test]
async fn recovery_orphans_positions_missing_from_the_exchange() {
    init_tracing();

    let db = Database::new("sqlite::memory:").await.unwrap();
    let repo: Arc<dyn TradeRepository> = Arc::new(SqliteTradeRepository::new(db.pool));

    let stranded = triad_trader::domain::types::Position {
        id: "pos-stranded".into(),
        trader_id: "trader-1".into(),
        symbol: "BTCUSDT".into(),
        side: triad_trader::domain::types::PositionSide::Long,
        entry_price: dec!(50000),
        quantity: dec!(0.01),
        current_price: dec!(50100),
        unrealized_pnl: dec!(1),
        realized_pnl: dec!(0),
        stop_loss_price: None,
        take_profit_price: None,
        trailing_active: false,
        opened_at: Utc::now(),
        closed_at: None,
        exit_reason: None,
        status: PositionStatus::Open,
    };
    repo.create(&stranded).await.unwrap();

    // The exchange (a fresh connector, as after a restart) reports no
    // positions at all, so the stranded row cannot be matched back.
    let connector = Arc::new(MockConnector::new());
    let risk_manager = RiskManager::new(risk_config());
    let position_manager = PositionManager::new(connector, repo.clone(), risk_manager, PositionManagerConfig::default());

    position_manager.recover_positions().await.unwrap();

    assert!(position_manager.open_positions_for_trader("trader-1").is_empty());
    let remaining_open = repo.find_open().await.unwrap();
    assert!(remaining_open.iter().all(|p| p.id != "pos-stranded"));

    let trades = repo.find_by_trader("trader-1").await.unwrap();
    let closed = trades.iter().find(|p| p.id == "pos-stranded").unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::Orphaned));
    assert_eq!(closed.realized_pnl, dec!(1));
}

/// Scenario 6: a pattern's running average return updates exactly per the
/// weighted-average formula after a winning trade.
#[tokio::test]
async fn pattern_performance_update_matches_weighted_average() {
    init_tracing();

    let db = Database::new("sqlite::memory:").await.unwrap();
    let pattern_repo: Arc<dyn PatternRepository> = Arc::new(SqlitePatternRepository::new(db.pool));

    let pattern = triad_trader::domain::pattern::TradingPattern {
        id: "pattern-1".into(),
        exchange: triad_trader::domain::types::Exchange::Binance,
        symbol: "BTCUSDT".into(),
        timeframe: triad_trader::domain::types::CandlestickInterval::OneHour,
        action: SignalAction::Buy,
        conditions: HashMap::from([("RSI".to_string(), IndicatorValue::Scalar(45.0))]),
        confidence: 0.8,
        created_at: Utc::now(),
        last_used_at: Utc::now(),
        usage_count: 4,
        success_count: 3,
        average_return: dec!(10.00),
        tags: vec![],
        entry_price: None,
    };
    pattern_repo.store(&pattern).await.unwrap();

    let updated = pattern_repo
        .update_performance("pattern-1", TradeOutcome { success: true, return_pct: dec!(20.00) })
        .await
        .unwrap();

    assert_eq!(updated.usage_count, 5);
    assert_eq!(updated.success_count, 4);
    assert_eq!(updated.success_rate(), Some(0.8));
    assert_eq!(updated.average_return, dec!(12.00));
}
