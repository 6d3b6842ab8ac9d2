//! Indicator Pipeline (spec §4.1). Indicators are pure functions over an
//! ordered candle slice, wrapped here for caching and "not computable"
//! handling. The math itself is delegated to the `ta` crate, mirroring
//! `application/analyst.rs`'s use of `ta::indicators` in the teacher repo.

use std::collections::HashMap;
use std::sync::RwLock;

use ta::indicators::{
    BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::Next;

use crate::domain::types::{Candlestick, CandlestickInterval, IndicatorSnapshot, IndicatorValue};

/// One of the named indicators a strategy can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorRequest {
    Sma(usize),
    Rsi(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    BollingerBands(usize),
}

impl IndicatorRequest {
    /// The key this indicator is stored under in an `IndicatorSnapshot`,
    /// matching the names spec §3 enumerates.
    pub fn snapshot_key(&self) -> String {
        match self {
            IndicatorRequest::Sma(period) => format!("SMA_{period}"),
            IndicatorRequest::Rsi(_) => "RSI".to_string(),
            IndicatorRequest::Macd { .. } => "MACD".to_string(),
            IndicatorRequest::BollingerBands(_) => "BB".to_string(),
        }
    }

    /// Minimum candle count below which the pipeline returns "not
    /// computable" instead of attempting the calculation.
    pub fn required_window(&self) -> usize {
        match self {
            IndicatorRequest::Sma(period) => *period,
            IndicatorRequest::Rsi(period) => period + 1,
            IndicatorRequest::Macd { slow, signal, .. } => slow + signal,
            IndicatorRequest::BollingerBands(period) => *period,
        }
    }
}

/// The current indicator snapshot plus the snapshot one candle earlier,
/// needed to detect crossovers (e.g. `TrendFollowing`'s SMA cross).
#[derive(Debug, Clone, Default)]
pub struct IndicatorContext {
    pub current: IndicatorSnapshot,
    pub previous: Option<IndicatorSnapshot>,
}

#[derive(Clone)]
struct CacheEntry {
    last_close_time: i64,
    value: IndicatorValue,
}

/// Memoizes indicator results keyed by `(symbol, interval, indicator)`.
/// Invalidated whenever the candle set's `last_candle_close_time` advances,
/// which also bounds the cache to one entry per key (resolving the source's
/// unbounded-cache defect, spec §9).
pub struct IndicatorPipeline {
    cache: RwLock<HashMap<(String, CandlestickInterval, String), CacheEntry>>,
}

impl Default for IndicatorPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorPipeline {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Computes every indicator in `requests` over `candles`, inserting
    /// "not computable" indicators by simply omitting their key.
    pub fn compute_all(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        candles: &[Candlestick],
        requests: &[IndicatorRequest],
    ) -> IndicatorSnapshot {
        let mut snapshot = IndicatorSnapshot::new();
        let Some(last_close_time) = candles.last().map(|c| c.close_time) else {
            return snapshot;
        };

        for request in requests {
            if let Some(value) = self.compute_one(symbol, interval, candles, last_close_time, *request) {
                snapshot.insert(request.snapshot_key(), value);
                if let IndicatorValue::Macd { line, signal, histogram } = value {
                    // Expose MACD's sub-components under their own keys too,
                    // since strategies compare `MACD.line` to `MACD.signal`.
                    snapshot.insert("MACD_line".to_string(), IndicatorValue::Scalar(line));
                    snapshot.insert("MACD_signal".to_string(), IndicatorValue::Scalar(signal));
                    snapshot.insert("MACD_histogram".to_string(), IndicatorValue::Scalar(histogram));
                }
                if matches!(request, IndicatorRequest::BollingerBands(_)) {
                    // upper/lower are stashed directly into the cache by
                    // compute_one; surface them in this snapshot too.
                    for sub in ["BB_upper", "BB_middle", "BB_lower"] {
                        if let Some(entry) = self
                            .cache
                            .read()
                            .unwrap()
                            .get(&(symbol.to_string(), interval, sub.to_string()))
                        {
                            snapshot.insert(sub.to_string(), entry.value);
                        }
                    }
                }
            }
        }
        snapshot
    }

    /// Computes both the current snapshot and, when at least two candles are
    /// available, the snapshot as of the previous candle close — the pair a
    /// crossover-sensitive strategy like `TrendFollowing` needs.
    pub fn compute_context(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        candles: &[Candlestick],
        requests: &[IndicatorRequest],
    ) -> IndicatorContext {
        let current = self.compute_all(symbol, interval, candles, requests);
        let previous = if candles.len() > 1 {
            Some(self.compute_all(symbol, interval, &candles[..candles.len() - 1], requests))
        } else {
            None
        };
        IndicatorContext { current, previous }
    }

    fn compute_one(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        candles: &[Candlestick],
        last_close_time: i64,
        request: IndicatorRequest,
    ) -> Option<IndicatorValue> {
        let key = (symbol.to_string(), interval, request.snapshot_key());

        if let Some(entry) = self.cache.read().unwrap().get(&key) {
            if entry.last_close_time == last_close_time {
                return Some(entry.value);
            }
        }

        if candles.len() < request.required_window() {
            return None;
        }

        let value = match request {
            IndicatorRequest::Sma(period) => {
                let mut sma = SimpleMovingAverage::new(period).ok()?;
                let mut last = 0.0;
                for c in candles {
                    last = sma.next(to_f64(c.close));
                }
                IndicatorValue::Scalar(last)
            }
            IndicatorRequest::Rsi(period) => {
                let mut rsi = RelativeStrengthIndex::new(period).ok()?;
                let mut last = 0.0;
                for c in candles {
                    last = rsi.next(to_f64(c.close));
                }
                IndicatorValue::Scalar(last)
            }
            IndicatorRequest::Macd { fast, slow, signal } => {
                let mut macd = MovingAverageConvergenceDivergence::new(fast, slow, signal).ok()?;
                let mut last = (0.0, 0.0, 0.0);
                for c in candles {
                    let out = macd.next(to_f64(c.close));
                    last = (out.macd, out.signal, out.histogram);
                }
                IndicatorValue::Macd {
                    line: last.0,
                    signal: last.1,
                    histogram: last.2,
                }
            }
            IndicatorRequest::BollingerBands(period) => {
                let mut bb = BollingerBands::new(period, 2.0).ok()?;
                let mut last = (0.0, 0.0, 0.0);
                for c in candles {
                    let out = bb.next(to_f64(c.close));
                    last = (out.upper, out.average, out.lower);
                }
                // BollingerBands is represented as three scalars under
                // distinct snapshot keys; stash them directly here.
                self.cache.write().unwrap().insert(
                    (symbol.to_string(), interval, "BB_upper".to_string()),
                    CacheEntry { last_close_time, value: IndicatorValue::Scalar(last.0) },
                );
                self.cache.write().unwrap().insert(
                    (symbol.to_string(), interval, "BB_middle".to_string()),
                    CacheEntry { last_close_time, value: IndicatorValue::Scalar(last.1) },
                );
                self.cache.write().unwrap().insert(
                    (symbol.to_string(), interval, "BB_lower".to_string()),
                    CacheEntry { last_close_time, value: IndicatorValue::Scalar(last.2) },
                );
                IndicatorValue::Scalar(last.1)
            }
        };

        self.cache
            .write()
            .unwrap()
            .insert(key, CacheEntry { last_close_time, value });
        Some(value)
    }
}

fn to_f64(d: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(i: i64, close: rust_decimal::Decimal) -> Candlestick {
        Candlestick {
            open_time: i * 60_000,
            close_time: i * 60_000 + 60_000,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn rsi_on_constant_prices_is_100() {
        let pipeline = IndicatorPipeline::new();
        let candles: Vec<_> = (0..20).map(|i| candle(i, dec!(100))).collect();
        let snapshot = pipeline.compute_all(
            "BTCUSDT",
            CandlestickInterval::OneMinute,
            &candles,
            &[IndicatorRequest::Rsi(14)],
        );
        let rsi = snapshot.get("RSI").and_then(|v| v.as_scalar()).unwrap();
        assert_eq!(rsi, 100.0);
    }

    #[test]
    fn insufficient_candles_is_not_computable() {
        let pipeline = IndicatorPipeline::new();
        let candles: Vec<_> = (0..3).map(|i| candle(i, dec!(100))).collect();
        let snapshot = pipeline.compute_all(
            "BTCUSDT",
            CandlestickInterval::OneMinute,
            &candles,
            &[IndicatorRequest::Rsi(14)],
        );
        assert!(snapshot.get("RSI").is_none());
    }

    #[test]
    fn cache_hits_when_last_close_time_unchanged() {
        let pipeline = IndicatorPipeline::new();
        let candles: Vec<_> = (0..20).map(|i| candle(i, dec!(100) + rust_decimal::Decimal::from(i))).collect();
        let first = pipeline.compute_all(
            "BTCUSDT",
            CandlestickInterval::OneMinute,
            &candles,
            &[IndicatorRequest::Sma(10)],
        );
        let second = pipeline.compute_all(
            "BTCUSDT",
            CandlestickInterval::OneMinute,
            &candles,
            &[IndicatorRequest::Sma(10)],
        );
        assert_eq!(
            first.get("SMA_10").unwrap().as_scalar(),
            second.get("SMA_10").unwrap().as_scalar()
        );
    }
}
