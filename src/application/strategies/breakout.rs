use super::{bollinger_bandwidth, Strategy};
use crate::application::indicators::{IndicatorContext, IndicatorRequest};
use crate::domain::types::{Candlestick, Signal, SignalAction};
use rust_decimal::prelude::ToPrimitive;

/// Volatility breakout beyond the Bollinger envelope, confirmed by MACD.
/// Grounded on the teacher's `legacy/breakout.rs` band-distance check,
/// restated against the named breakout-percentage and squeeze rules.
#[derive(Debug, Clone)]
pub struct Breakout {
    pub bb_period: usize,
    pub breakout_pct: f64,
    pub squeeze_threshold: f64,
}

impl Default for Breakout {
    fn default() -> Self {
        Self {
            bb_period: 20,
            breakout_pct: 0.01,
            squeeze_threshold: 0.02,
        }
    }
}

impl Strategy for Breakout {
    fn name(&self) -> &str {
        "Breakout"
    }

    fn required_indicators(&self) -> Vec<IndicatorRequest> {
        vec![
            IndicatorRequest::BollingerBands(self.bb_period),
            IndicatorRequest::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
            },
        ]
    }

    fn generate_signal(&self, candles: &[Candlestick], ctx: &IndicatorContext) -> Signal {
        let Some(close) = candles.last().and_then(|c| c.close.to_f64()) else {
            return Signal::hold("no candle to evaluate", ctx.current.clone());
        };

        let (Some(bb_lower), Some(bb_upper), Some(macd_line), Some(macd_signal)) = (
            ctx.current.get("BB_lower").and_then(|v| v.as_scalar()),
            ctx.current.get("BB_upper").and_then(|v| v.as_scalar()),
            ctx.current.get("MACD_line").and_then(|v| v.as_scalar()),
            ctx.current.get("MACD_signal").and_then(|v| v.as_scalar()),
        ) else {
            return Signal::hold("breakout: indicators not computable", ctx.current.clone());
        };

        if let Some(bandwidth) = bollinger_bandwidth(&ctx.current) {
            if bandwidth < self.squeeze_threshold {
                return Signal::hold("bollinger band squeeze suppresses breakout", ctx.current.clone());
            }
        }

        let upper_threshold = bb_upper * (1.0 + self.breakout_pct);
        let lower_threshold = bb_lower * (1.0 - self.breakout_pct);

        if close > upper_threshold && macd_line > macd_signal {
            return Signal {
                action: SignalAction::Buy,
                confidence: 0.75,
                reason: format!("close {close:.2} broke above {upper_threshold:.2}, MACD confirms"),
                timestamp: chrono::Utc::now(),
                indicator_snapshot: ctx.current.clone(),
                matched_pattern_id: None,
            };
        }

        if close < lower_threshold && macd_line < macd_signal {
            return Signal {
                action: SignalAction::Sell,
                confidence: 0.75,
                reason: format!("close {close:.2} broke below {lower_threshold:.2}, MACD confirms"),
                timestamp: chrono::Utc::now(),
                indicator_snapshot: ctx.current.clone(),
                matched_pattern_id: None,
            };
        }

        Signal::hold("no confirmed breakout", ctx.current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::IndicatorValue;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn candle(close: rust_decimal::Decimal) -> Candlestick {
        Candlestick {
            open_time: 0,
            close_time: 60_000,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    fn snapshot(lower: f64, middle: f64, upper: f64, macd_line: f64, macd_signal: f64) -> HashMap<String, IndicatorValue> {
        let mut m = HashMap::new();
        m.insert("BB_lower".to_string(), IndicatorValue::Scalar(lower));
        m.insert("BB_middle".to_string(), IndicatorValue::Scalar(middle));
        m.insert("BB_upper".to_string(), IndicatorValue::Scalar(upper));
        m.insert("MACD_line".to_string(), IndicatorValue::Scalar(macd_line));
        m.insert("MACD_signal".to_string(), IndicatorValue::Scalar(macd_signal));
        m
    }

    #[test]
    fn breakout_above_upper_band_buys() {
        let strategy = Breakout::default();
        let ctx = IndicatorContext {
            current: snapshot(95.0, 100.0, 105.0, 1.0, 0.5),
            previous: None,
        };
        let signal = strategy.generate_signal(&[candle(dec!(107))], &ctx);
        assert_eq!(signal.action, SignalAction::Buy);
    }

    #[test]
    fn squeeze_suppresses_breakout() {
        let strategy = Breakout::default();
        let ctx = IndicatorContext {
            current: snapshot(99.9, 100.0, 100.1, 1.0, 0.5),
            previous: None,
        };
        let signal = strategy.generate_signal(&[candle(dec!(101))], &ctx);
        assert_eq!(signal.action, SignalAction::Hold);
    }
}
