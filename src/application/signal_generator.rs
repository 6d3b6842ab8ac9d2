//! Signal Generator (spec §4.4): blends a strategy's raw signal with
//! historical pattern performance and current position exposure before it
//! reaches the trader loop.

use std::sync::Arc;

use crate::application::pattern_store::PatternStore;
use crate::domain::errors::CoreError;
use crate::domain::pattern::MarketConditions;
use crate::domain::types::{Position, PositionSide, PositionStatus, Signal, SignalAction};

#[derive(Debug, Clone)]
pub struct SignalGeneratorConfig {
    pub pattern_disagreement_penalty: f64,
    pub pattern_weight: f64,
    pub min_confidence: f64,
    pub min_relevance: f64,
    pub max_pattern_results: usize,
}

impl Default for SignalGeneratorConfig {
    fn default() -> Self {
        Self {
            pattern_disagreement_penalty: 0.2,
            pattern_weight: 0.3,
            min_confidence: 0.5,
            min_relevance: 0.5,
            max_pattern_results: 5,
        }
    }
}

pub struct SignalGenerator {
    pattern_store: Arc<PatternStore>,
    config: SignalGeneratorConfig,
}

impl SignalGenerator {
    pub fn new(pattern_store: Arc<PatternStore>, config: SignalGeneratorConfig) -> Self {
        Self {
            pattern_store,
            config,
        }
    }

    pub async fn compose(
        &self,
        strategy_signal: Signal,
        conditions: &MarketConditions,
        open_positions: &[Position],
    ) -> Result<Signal, CoreError> {
        if matches!(strategy_signal.action, SignalAction::Hold | SignalAction::Close) {
            return Ok(strategy_signal);
        }

        let mut signal = strategy_signal;

        let matches = self
            .pattern_store
            .match_patterns(conditions, self.config.min_relevance, self.config.max_pattern_results)
            .await?;

        if let Some(best) = matches.first() {
            if best.pattern.action == signal.action {
                signal.confidence = signal.confidence * (1.0 - self.config.pattern_weight)
                    + best.final_confidence * self.config.pattern_weight;
            } else {
                signal.confidence = (signal.confidence - self.config.pattern_disagreement_penalty).max(0.0);
            }
            signal.matched_pattern_id = Some(best.pattern.id.clone());
        }

        // v1.0 never stacks: a trader with any open position on its symbol
        // holds that one position until the monitoring loop closes it, even
        // when a fresh signal points the other way.
        let already_has_open_position = open_positions.iter().any(|p| p.status == PositionStatus::Open);
        if already_has_open_position {
            return Ok(Signal::hold(
                "position already open, no stacking",
                signal.indicator_snapshot,
            ));
        }

        if !signal.is_actionable(self.config.min_confidence) {
            return Ok(Signal::hold("confidence below threshold", signal.indicator_snapshot));
        }

        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CandlestickInterval, Exchange, IndicatorValue};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn pattern_store() -> Arc<PatternStore> {
        struct NoPatterns;
        #[async_trait::async_trait]
        impl crate::domain::repositories::PatternRepository for NoPatterns {
            async fn store(&self, _: &crate::domain::pattern::TradingPattern) -> Result<String, CoreError> {
                unimplemented!()
            }
            async fn query(&self, _: &crate::domain::pattern::PatternQuery) -> Result<Vec<crate::domain::pattern::TradingPattern>, CoreError> {
                Ok(vec![])
            }
            async fn update_performance(
                &self,
                _: &str,
                _: crate::domain::pattern::TradeOutcome,
            ) -> Result<crate::domain::pattern::TradingPattern, CoreError> {
                unimplemented!()
            }
            async fn prune(&self, _: &crate::domain::pattern::PruneCriteria) -> Result<usize, CoreError> {
                Ok(0)
            }
            async fn get_by_id(&self, _: &str) -> Result<Option<crate::domain::pattern::TradingPattern>, CoreError> {
                Ok(None)
            }
        }
        Arc::new(PatternStore::new(Arc::new(NoPatterns), crate::application::pattern_store::PatternStoreConfig::default()))
    }

    fn conditions() -> MarketConditions {
        MarketConditions {
            exchange: Exchange::Binance,
            symbol: "BTCUSDT".into(),
            timeframe: CandlestickInterval::OneHour,
            indicators: HashMap::from([("RSI".to_string(), IndicatorValue::Scalar(45.0))]),
            current_price: dec!(50000),
            as_of: Utc::now(),
        }
    }

    fn buy_signal(confidence: f64) -> Signal {
        Signal {
            action: SignalAction::Buy,
            confidence,
            reason: "test".into(),
            timestamp: Utc::now(),
            indicator_snapshot: HashMap::new(),
            matched_pattern_id: None,
        }
    }

    fn open_long(symbol: &str) -> Position {
        Position {
            id: "p1".into(),
            trader_id: "t1".into(),
            symbol: symbol.into(),
            side: PositionSide::Long,
            entry_price: dec!(50000),
            quantity: dec!(0.0016),
            current_price: dec!(50000),
            unrealized_pnl: dec!(0),
            realized_pnl: dec!(0),
            stop_loss_price: None,
            take_profit_price: None,
            trailing_active: false,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
            status: PositionStatus::Open,
        }
    }

    #[tokio::test]
    async fn opposite_side_signal_downgrades_to_hold_while_a_position_is_open() {
        let generator = SignalGenerator::new(pattern_store(), SignalGeneratorConfig::default());
        let mut sell = buy_signal(0.9);
        sell.action = SignalAction::Sell;
        let composed = generator.compose(sell, &conditions(), &[open_long("BTCUSDT")]).await.unwrap();
        assert_eq!(composed.action, SignalAction::Hold);
    }

    #[tokio::test]
    async fn actionable_signal_passes_through_with_no_open_positions() {
        let generator = SignalGenerator::new(pattern_store(), SignalGeneratorConfig::default());
        let composed = generator.compose(buy_signal(0.8), &conditions(), &[]).await.unwrap();
        assert_eq!(composed.action, SignalAction::Buy);
    }
}
