//! Pattern Store (spec §4.3): persists successful entry setups and matches
//! live market conditions against them. Grounded on the teacher's
//! repository-wrapping service pattern in `application/risk_management/` —
//! a thin application service over a `domain::repositories` trait, with the
//! scoring math factored out into `relevance`.

pub mod relevance;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::errors::CoreError;
use crate::domain::pattern::{
    MarketConditions, MatchedPattern, PatternQuery, PruneCriteria, TradeOutcome, TradingPattern,
};
use crate::domain::repositories::PatternRepository;

/// Tuning knobs for matching, kept separate from `RiskConfig`/`TraderConfig`
/// since they govern the pattern subsystem specifically.
#[derive(Debug, Clone)]
pub struct PatternStoreConfig {
    pub recency_half_life_days: f64,
}

impl Default for PatternStoreConfig {
    fn default() -> Self {
        Self {
            recency_half_life_days: 30.0,
        }
    }
}

pub struct PatternStore {
    repo: Arc<dyn PatternRepository>,
    config: PatternStoreConfig,
    /// `updatePerformance` is a SELECT-then-UPDATE against the repository, so
    /// two concurrent resolutions for the same pattern must not interleave
    /// (spec §4.3 "serialized per patternId"). One lock per pattern id, held
    /// only for the duration of the repository call, mirrors the teacher's
    /// per-entity locking in `risk_state_manager.rs`.
    update_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PatternStore {
    pub fn new(repo: Arc<dyn PatternRepository>, config: PatternStoreConfig) -> Self {
        Self {
            repo,
            config,
            update_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, pattern_id: &str) -> Arc<Mutex<()>> {
        self.update_locks
            .lock()
            .await
            .entry(pattern_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn store(&self, mut pattern: TradingPattern) -> Result<String, CoreError> {
        if pattern.id.trim().is_empty() {
            pattern.id = uuid::Uuid::new_v4().to_string();
        }
        pattern.validate().map_err(|reason| CoreError::InvalidConfig {
            field: "pattern".to_string(),
            reason,
        })?;
        self.repo.store(&pattern).await
    }

    pub async fn query(&self, criteria: &PatternQuery) -> Result<Vec<TradingPattern>, CoreError> {
        self.repo.query(criteria).await
    }

    /// Scores every pattern sharing `(exchange, symbol, timeframe)` with
    /// `conditions` against it and returns up to `max_results` above
    /// `min_relevance`, highest relevance first.
    pub async fn match_patterns(
        &self,
        conditions: &MarketConditions,
        min_relevance: f64,
        max_results: usize,
    ) -> Result<Vec<MatchedPattern>, CoreError> {
        let candidates = self
            .repo
            .query(&PatternQuery {
                exchange: Some(conditions.exchange),
                symbol: Some(conditions.symbol.clone()),
                timeframe: Some(conditions.timeframe),
                ..Default::default()
            })
            .await?;

        let mut matched: Vec<MatchedPattern> = candidates
            .into_iter()
            .filter_map(|pattern| {
                let score = relevance::relevance(&pattern, conditions, self.config.recency_half_life_days);
                if score < min_relevance {
                    return None;
                }
                let final_confidence = relevance::final_confidence(score, &pattern);
                Some(MatchedPattern {
                    pattern,
                    relevance: score,
                    final_confidence,
                })
            })
            .collect();

        matched.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        matched.truncate(max_results);
        Ok(matched)
    }

    pub async fn update_performance(
        &self,
        pattern_id: &str,
        outcome: TradeOutcome,
    ) -> Result<TradingPattern, CoreError> {
        let lock = self.lock_for(pattern_id).await;
        let _guard = lock.lock().await;
        self.repo.update_performance(pattern_id, outcome).await
    }

    pub async fn prune(&self, criteria: &PruneCriteria) -> Result<usize, CoreError> {
        self.repo.prune(criteria).await
    }
}

/// Ranking key for `prune`'s `max_patterns_to_keep` retention rule: higher is
/// kept preferentially, ties broken by more-recent `last_used_at`.
pub fn retention_rank(pattern: &TradingPattern) -> (f64, chrono::DateTime<Utc>) {
    let success_rate = pattern.success_rate().unwrap_or(0.0);
    let score = success_rate * (1.0 + pattern.usage_count as f64).ln();
    (score, pattern.last_used_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_rank_breaks_ties_on_recency() {
        let older = crate::domain::pattern::TradingPattern {
            last_used_at: Utc::now() - chrono::Duration::days(5),
            ..sample_pattern()
        };
        let newer = crate::domain::pattern::TradingPattern {
            last_used_at: Utc::now(),
            ..sample_pattern()
        };
        assert!(retention_rank(&newer).1 > retention_rank(&older).1);
    }

    #[tokio::test]
    async fn concurrent_resolutions_for_the_same_pattern_never_overlap() {
        use rust_decimal_macros::dec;
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        struct SlowRepo {
            in_flight: AtomicBool,
            overlapped: AtomicBool,
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl PatternRepository for SlowRepo {
            async fn store(&self, _: &TradingPattern) -> Result<String, CoreError> {
                unimplemented!()
            }
            async fn query(&self, _: &PatternQuery) -> Result<Vec<TradingPattern>, CoreError> {
                Ok(vec![])
            }
            async fn update_performance(&self, _: &str, _: TradeOutcome) -> Result<TradingPattern, CoreError> {
                if self.in_flight.swap(true, Ordering::SeqCst) {
                    self.overlapped.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.in_flight.store(false, Ordering::SeqCst);
                Ok(sample_pattern())
            }
            async fn prune(&self, _: &PruneCriteria) -> Result<usize, CoreError> {
                Ok(0)
            }
            async fn get_by_id(&self, _: &str) -> Result<Option<TradingPattern>, CoreError> {
                Ok(None)
            }
        }

        let repo = Arc::new(SlowRepo {
            in_flight: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(PatternStore::new(repo.clone(), PatternStoreConfig::default()));

        let outcome = TradeOutcome {
            success: true,
            return_pct: dec!(0.01),
        };
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let outcome = outcome.clone();
            handles.push(tokio::spawn(async move { store.update_performance("p", outcome).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(repo.calls.load(Ordering::SeqCst), 8);
        assert!(!repo.overlapped.load(Ordering::SeqCst), "concurrent updates to the same pattern overlapped");
    }

    fn sample_pattern() -> TradingPattern {
        use crate::domain::types::{CandlestickInterval, Exchange, SignalAction};
        use rust_decimal_macros::dec;
        TradingPattern {
            id: "p".into(),
            exchange: Exchange::Binance,
            symbol: "BTCUSDT".into(),
            timeframe: CandlestickInterval::OneHour,
            action: SignalAction::Buy,
            conditions: std::collections::HashMap::from([(
                "RSI".to_string(),
                crate::domain::types::IndicatorValue::Scalar(30.0),
            )]),
            confidence: 0.6,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
            usage_count: 8,
            success_count: 6,
            average_return: dec!(0.02),
            tags: vec![],
            entry_price: None,
        }
    }
}
