//! Trading strategies (spec §4.2). Each strategy declares the indicators it
//! needs and turns an indicator context into a `Signal`. Grounded on the
//! `TradingStrategy`-per-file shape of `application/strategies/legacy/` in
//! the teacher repo, generalized from single-purpose SMA-cross/mean-reversion/
//! breakout files into the three variants this system names.

mod breakout;
mod mean_reversion;
mod strategy_factory;
mod trend_following;

pub use breakout::Breakout;
pub use mean_reversion::MeanReversion;
pub use strategy_factory::build_strategy;
pub use trend_following::TrendFollowing;

use crate::application::indicators::{IndicatorContext, IndicatorRequest};
use crate::domain::types::Candlestick;
use crate::domain::types::Signal;

/// A strategy is a pure function from market state to a trading signal. It
/// never mutates anything and must never fail — indicators it cannot
/// compute degrade to `Hold`, per spec §4.2.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn required_indicators(&self) -> Vec<IndicatorRequest>;
    fn generate_signal(&self, candles: &[Candlestick], indicators: &IndicatorContext) -> Signal;
}

/// Bollinger Band bandwidth, used by `MeanReversion` and `Breakout` to
/// detect a squeeze. `None` when the bands aren't computable.
pub(crate) fn bollinger_bandwidth(indicators: &crate::domain::types::IndicatorSnapshot) -> Option<f64> {
    let upper = indicators.get("BB_upper")?.as_scalar()?;
    let lower = indicators.get("BB_lower")?.as_scalar()?;
    let middle = indicators.get("BB_middle")?.as_scalar()?;
    if middle == 0.0 {
        return None;
    }
    Some((upper - lower) / middle)
}
