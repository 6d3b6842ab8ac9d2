//! Deterministic relevance scoring (spec §4.3). Every component is a pure
//! function so the weighted sum is reproducible and testable in isolation.

use crate::domain::pattern::{MarketConditions, TradingPattern};
use rust_decimal::prelude::ToPrimitive;

const W_INDICATOR: f64 = 0.4;
const W_PERFORMANCE: f64 = 0.3;
const W_RECENCY: f64 = 0.2;
const W_PRICE: f64 = 0.1;

const MIN_SAMPLE_FOR_PERFORMANCE: u64 = 5;

/// Per-indicator tolerance scale for `indicator_similarity`. Indicators not
/// named here fall back to a neutral default rather than panicking —
/// the pattern corpus may carry indicator names this engine doesn't.
fn tolerance_for(indicator: &str) -> f64 {
    if indicator == "RSI" {
        10.0
    } else if indicator.starts_with("MACD") {
        0.5
    } else if indicator.starts_with("BB") || indicator.starts_with("SMA") {
        // Price-scale indicators: a fixed absolute tolerance keeps the
        // formula simple at the cost of sensitivity to the traded pair's
        // price magnitude (documented as an open question resolution).
        50.0
    } else {
        5.0
    }
}

pub fn indicator_similarity(pattern: &TradingPattern, current: &crate::domain::types::IndicatorSnapshot) -> f64 {
    let shared: Vec<&String> = pattern.conditions.keys().filter(|k| current.contains_key(*k)).collect();
    if pattern.conditions.is_empty() {
        return 0.0;
    }
    let total = pattern.conditions.len() as f64;
    let sum: f64 = pattern
        .conditions
        .iter()
        .map(|(name, reference)| {
            let (Some(r), Some(c)) = (reference.as_scalar(), current.get(name).and_then(|v| v.as_scalar())) else {
                return 0.0;
            };
            if !shared.contains(&name) {
                return 0.0;
            }
            (1.0 - (c - r).abs() / tolerance_for(name)).max(0.0)
        })
        .sum();
    sum / total
}

pub fn performance_score(pattern: &TradingPattern) -> f64 {
    match pattern.success_rate() {
        Some(rate) if pattern.usage_count >= MIN_SAMPLE_FOR_PERFORMANCE => rate.clamp(0.0, 1.0),
        _ => 0.5,
    }
}

pub fn recency_score(pattern: &TradingPattern, as_of: chrono::DateTime<chrono::Utc>, half_life_days: f64) -> f64 {
    let age_days = (as_of - pattern.last_used_at).num_seconds() as f64 / 86_400.0;
    (-age_days.max(0.0) / half_life_days).exp()
}

pub fn price_proximity(pattern: &TradingPattern, current_price: rust_decimal::Decimal) -> f64 {
    match pattern.entry_price {
        Some(entry) if entry != rust_decimal::Decimal::ZERO => {
            let entry_f = entry.to_f64().unwrap_or(0.0);
            let current_f = current_price.to_f64().unwrap_or(0.0);
            (1.0 - (current_f - entry_f).abs() / entry_f).max(0.0)
        }
        _ => 0.5,
    }
}

/// The weighted relevance sum, unclamped (each component is already in
/// `[0, 1]` so the sum naturally stays bounded).
pub fn relevance(
    pattern: &TradingPattern,
    conditions: &MarketConditions,
    half_life_days: f64,
) -> f64 {
    W_INDICATOR * indicator_similarity(pattern, &conditions.indicators)
        + W_PERFORMANCE * performance_score(pattern)
        + W_RECENCY * recency_score(pattern, conditions.as_of, half_life_days)
        + W_PRICE * price_proximity(pattern, conditions.current_price)
}

pub fn final_confidence(relevance: f64, pattern: &TradingPattern) -> f64 {
    let success_rate = pattern.success_rate().unwrap_or(0.5);
    (0.6 * relevance + 0.3 * success_rate + 0.1 * pattern.confidence).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CandlestickInterval, Exchange, IndicatorValue, SignalAction};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn pattern_with(usage_count: u64, success_count: u64) -> TradingPattern {
        TradingPattern {
            id: "p1".into(),
            exchange: Exchange::Binance,
            symbol: "BTCUSDT".into(),
            timeframe: CandlestickInterval::OneHour,
            action: SignalAction::Buy,
            conditions: HashMap::from([("RSI".to_string(), IndicatorValue::Scalar(28.0))]),
            confidence: 0.7,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
            usage_count,
            success_count,
            average_return: dec!(0.01),
            tags: vec![],
            entry_price: Some(dec!(100)),
        }
    }

    #[test]
    fn performance_score_is_neutral_below_sample_threshold() {
        let pattern = pattern_with(3, 3);
        assert_eq!(performance_score(&pattern), 0.5);
    }

    #[test]
    fn performance_score_uses_success_rate_at_threshold() {
        let pattern = pattern_with(5, 4);
        assert_eq!(performance_score(&pattern), 0.8);
    }

    #[test]
    fn recency_score_decays_with_age() {
        let pattern = pattern_with(10, 8);
        let now = pattern.last_used_at + chrono::Duration::days(30);
        let fresh = recency_score(&pattern, pattern.last_used_at, 30.0);
        let aged = recency_score(&pattern, now, 30.0);
        assert!(fresh > aged);
    }

    #[test]
    fn missing_indicator_contributes_zero_similarity() {
        let pattern = pattern_with(10, 8);
        let current = HashMap::new();
        assert_eq!(indicator_similarity(&pattern, &current), 0.0);
    }
}
