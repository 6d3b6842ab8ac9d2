//! The pattern-learning data model (spec §3, §4.3). A `TradingPattern` is a
//! stored indicator snapshot representing a historically successful entry
//! setup for a specific (exchange, symbol, timeframe, action).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::types::{CandlestickInterval, Exchange, IndicatorSnapshot, SignalAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPattern {
    pub id: String,
    pub exchange: Exchange,
    pub symbol: String,
    pub timeframe: CandlestickInterval,
    pub action: SignalAction,
    pub conditions: IndicatorSnapshot,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub usage_count: u64,
    pub success_count: u64,
    pub average_return: Decimal,
    pub tags: Vec<String>,
    /// Price at pattern entry, used for `priceProximity` scoring. `None`
    /// when the pattern predates price tracking.
    pub entry_price: Option<Decimal>,
}

impl TradingPattern {
    /// Derived success rate; `None` when `usage_count == 0` so it is never
    /// stored independently of the counts it is derived from (spec
    /// invariant: "never stored independently... to avoid drift").
    pub fn success_rate(&self) -> Option<f64> {
        if self.usage_count == 0 {
            None
        } else {
            Some(self.success_count as f64 / self.usage_count as f64)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("pattern id must not be blank".into());
        }
        if self.symbol.trim().is_empty() {
            return Err("pattern symbol must not be blank".into());
        }
        if self.success_count > self.usage_count {
            return Err("successCount must be <= usageCount".into());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err("confidence must be in [0, 1]".into());
        }
        if self.conditions.is_empty() {
            return Err("conditions must contain at least one indicator".into());
        }
        Ok(())
    }
}

/// Outcome of a closed trade, fed back into `PatternStore::update_performance`.
#[derive(Debug, Clone, Copy)]
pub struct TradeOutcome {
    pub success: bool,
    pub return_pct: Decimal,
}

/// Filter used by `PatternStore::query`.
#[derive(Debug, Clone, Default)]
pub struct PatternQuery {
    pub exchange: Option<Exchange>,
    pub symbol: Option<String>,
    pub timeframe: Option<CandlestickInterval>,
    pub action: Option<SignalAction>,
    pub min_success_rate: Option<f64>,
    pub min_usage_count: Option<u64>,
    pub min_confidence: Option<f64>,
    pub max_age: Option<chrono::Duration>,
    pub any_of_tags: Vec<String>,
}

/// Criteria used by `PatternStore::prune`.
#[derive(Debug, Clone, Default)]
pub struct PruneCriteria {
    pub max_age: Option<chrono::Duration>,
    pub min_success_rate: Option<f64>,
    pub min_sample_for_success_rate: u64,
    pub min_usage_count: Option<u64>,
    pub max_patterns_to_keep: Option<usize>,
}

/// Live market context presented to `PatternStore::match_patterns`.
#[derive(Debug, Clone)]
pub struct MarketConditions {
    pub exchange: Exchange,
    pub symbol: String,
    pub timeframe: CandlestickInterval,
    pub indicators: IndicatorSnapshot,
    pub current_price: Decimal,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MatchedPattern {
    pub pattern: TradingPattern,
    pub relevance: f64,
    pub final_confidence: f64,
}
