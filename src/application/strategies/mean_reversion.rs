use super::{bollinger_bandwidth, Strategy};
use crate::application::indicators::{IndicatorContext, IndicatorRequest};
use crate::domain::types::{Candlestick, Signal, SignalAction};
use rust_decimal::prelude::ToPrimitive;

/// Bollinger Band + RSI mean reversion. Grounded on the teacher's
/// `legacy/mean_reversion.rs`, with the squeeze-suppression rule added.
#[derive(Debug, Clone)]
pub struct MeanReversion {
    pub bb_period: usize,
    pub rsi_period: usize,
    pub overbought: f64,
    pub oversold: f64,
    pub squeeze_threshold: f64,
}

impl Default for MeanReversion {
    fn default() -> Self {
        Self {
            bb_period: 20,
            rsi_period: 14,
            overbought: 70.0,
            oversold: 30.0,
            squeeze_threshold: 0.02,
        }
    }
}

impl Strategy for MeanReversion {
    fn name(&self) -> &str {
        "MeanReversion"
    }

    fn required_indicators(&self) -> Vec<IndicatorRequest> {
        vec![
            IndicatorRequest::BollingerBands(self.bb_period),
            IndicatorRequest::Rsi(self.rsi_period),
        ]
    }

    fn generate_signal(&self, candles: &[Candlestick], ctx: &IndicatorContext) -> Signal {
        let Some(close) = candles.last().and_then(|c| c.close.to_f64()) else {
            return Signal::hold("no candle to evaluate", ctx.current.clone());
        };

        let (Some(bb_lower), Some(bb_upper), Some(rsi)) = (
            ctx.current.get("BB_lower").and_then(|v| v.as_scalar()),
            ctx.current.get("BB_upper").and_then(|v| v.as_scalar()),
            ctx.current.get("RSI").and_then(|v| v.as_scalar()),
        ) else {
            return Signal::hold("mean reversion: indicators not computable", ctx.current.clone());
        };

        if let Some(bandwidth) = bollinger_bandwidth(&ctx.current) {
            if bandwidth < self.squeeze_threshold {
                return Signal::hold("bollinger band squeeze", ctx.current.clone());
            }
        }

        if close <= bb_lower && rsi < self.oversold {
            return Signal {
                action: SignalAction::Buy,
                confidence: 0.7,
                reason: format!("close {close:.2} <= BB_lower {bb_lower:.2}, RSI {rsi:.1} oversold"),
                timestamp: chrono::Utc::now(),
                indicator_snapshot: ctx.current.clone(),
                matched_pattern_id: None,
            };
        }

        if close >= bb_upper && rsi > self.overbought {
            return Signal {
                action: SignalAction::Sell,
                confidence: 0.7,
                reason: format!("close {close:.2} >= BB_upper {bb_upper:.2}, RSI {rsi:.1} overbought"),
                timestamp: chrono::Utc::now(),
                indicator_snapshot: ctx.current.clone(),
                matched_pattern_id: None,
            };
        }

        Signal::hold("price within bands", ctx.current.clone())
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

    fn snapshot(lower: f64, middle: f64, upper: f64, rsi: f64) -> HashMap<String, IndicatorValue> {
        let mut m = HashMap::new();
        m.insert("BB_lower".to_string(), IndicatorValue::Scalar(lower));
        m.insert("BB_middle".to_string(), IndicatorValue::Scalar(middle));
        m.insert("BB_upper".to_string(), IndicatorValue::Scalar(upper));
        m.insert("RSI".to_string(), IndicatorValue::Scalar(rsi));
        m
    }

    #[test]
    fn oversold_bounce_at_lower_band_buys() {
        let strategy = MeanReversion::default();
        let ctx = IndicatorContext {
            current: snapshot(95.0, 100.0, 105.0, 25.0),
            previous: None,
        };
        let signal = strategy.generate_signal(&[candle(dec!(94))], &ctx);
        assert_eq!(signal.action, SignalAction::Buy);
    }

    #[test]
    fn squeeze_forces_hold_even_when_oversold() {
        let strategy = MeanReversion::default();
        let ctx = IndicatorContext {
            current: snapshot(99.9, 100.0, 100.1, 25.0),
            previous: None,
        };
        let signal = strategy.generate_signal(&[candle(dec!(99))], &ctx);
        assert_eq!(signal.action, SignalAction::Hold);
    }
}
