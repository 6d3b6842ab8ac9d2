use super::Strategy;
use crate::application::indicators::{IndicatorContext, IndicatorRequest};
use crate::domain::types::{Candlestick, Signal, SignalAction};

/// Dual-SMA crossover confirmed by RSI and MACD. Grounded on the teacher's
/// `dual_sma.rs`, generalized to also gate on RSI/MACD confirmation per
/// the named tie-break rule.
#[derive(Debug, Clone)]
pub struct TrendFollowing {
    pub sma_short: usize,
    pub sma_long: usize,
    pub rsi_period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl Default for TrendFollowing {
    fn default() -> Self {
        Self {
            sma_short: 9,
            sma_long: 21,
            rsi_period: 14,
            overbought: 70.0,
            oversold: 30.0,
        }
    }
}

impl Strategy for TrendFollowing {
    fn name(&self) -> &str {
        "TrendFollowing"
    }

    fn required_indicators(&self) -> Vec<IndicatorRequest> {
        vec![
            IndicatorRequest::Sma(self.sma_short),
            IndicatorRequest::Sma(self.sma_long),
            IndicatorRequest::Rsi(self.rsi_period),
            IndicatorRequest::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
            },
        ]
    }

    fn generate_signal(&self, _candles: &[Candlestick], ctx: &IndicatorContext) -> Signal {
        let hold = || Signal::hold("trend following: indicators not computable", ctx.current.clone());

        let short_key = format!("SMA_{}", self.sma_short);
        let long_key = format!("SMA_{}", self.sma_long);

        let (Some(prev), Some(cur_short), Some(cur_long), Some(rsi), Some(macd_line), Some(macd_signal)) = (
            ctx.previous.as_ref(),
            ctx.current.get(&short_key).and_then(|v| v.as_scalar()),
            ctx.current.get(&long_key).and_then(|v| v.as_scalar()),
            ctx.current.get("RSI").and_then(|v| v.as_scalar()),
            ctx.current.get("MACD_line").and_then(|v| v.as_scalar()),
            ctx.current.get("MACD_signal").and_then(|v| v.as_scalar()),
        ) else {
            return hold();
        };

        let (Some(prev_short), Some(prev_long)) = (
            prev.get(&short_key).and_then(|v| v.as_scalar()),
            prev.get(&long_key).and_then(|v| v.as_scalar()),
        ) else {
            return hold();
        };

        let crossed_above = prev_short <= prev_long && cur_short > cur_long;
        let crossed_below = prev_short >= prev_long && cur_short < cur_long;

        let confidence = (0.6_f64 + 0.1 + 0.1).min(0.85);

        if crossed_above && rsi < self.overbought && macd_line > macd_signal {
            return Signal {
                action: SignalAction::Buy,
                confidence,
                reason: format!(
                    "SMA_{} crossed above SMA_{}, RSI {rsi:.1} < overbought, MACD confirms",
                    self.sma_short, self.sma_long
                ),
                timestamp: chrono::Utc::now(),
                indicator_snapshot: ctx.current.clone(),
                matched_pattern_id: None,
            };
        }

        if crossed_below && rsi > self.oversold && macd_line < macd_signal {
            return Signal {
                action: SignalAction::Sell,
                confidence,
                reason: format!(
                    "SMA_{} crossed below SMA_{}, RSI {rsi:.1} > oversold, MACD confirms",
                    self.sma_short, self.sma_long
                ),
                timestamp: chrono::Utc::now(),
                indicator_snapshot: ctx.current.clone(),
                matched_pattern_id: None,
            };
        }

        Signal::hold("no confirmed crossover", ctx.current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::IndicatorValue;
    use std::collections::HashMap;

    fn snapshot(short: f64, long: f64, rsi: f64, macd_line: f64, macd_signal: f64) -> HashMap<String, IndicatorValue> {
        let mut m = HashMap::new();
        m.insert("SMA_9".to_string(), IndicatorValue::Scalar(short));
        m.insert("SMA_21".to_string(), IndicatorValue::Scalar(long));
        m.insert("RSI".to_string(), IndicatorValue::Scalar(rsi));
        m.insert("MACD_line".to_string(), IndicatorValue::Scalar(macd_line));
        m.insert("MACD_signal".to_string(), IndicatorValue::Scalar(macd_signal));
        m
    }

    #[test]
    fn golden_cross_with_confirmation_buys() {
        let strategy = TrendFollowing::default();
        let ctx = IndicatorContext {
            current: snapshot(101.0, 100.0, 55.0, 1.0, 0.5),
            previous: Some(snapshot(99.0, 100.0, 50.0, 0.5, 0.6)),
        };
        let signal = strategy.generate_signal(&[], &ctx);
        assert_eq!(signal.action, SignalAction::Buy);
        assert!((signal.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn cross_without_macd_confirmation_holds() {
        let strategy = TrendFollowing::default();
        let ctx = IndicatorContext {
            current: snapshot(101.0, 100.0, 55.0, 0.3, 0.5),
            previous: Some(snapshot(99.0, 100.0, 50.0, 0.5, 0.6)),
        };
        let signal = strategy.generate_signal(&[], &ctx);
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn missing_previous_snapshot_holds() {
        let strategy = TrendFollowing::default();
        let ctx = IndicatorContext {
            current: snapshot(101.0, 100.0, 55.0, 1.0, 0.5),
            previous: None,
        };
        let signal = strategy.generate_signal(&[], &ctx);
        assert_eq!(signal.action, SignalAction::Hold);
    }
}
