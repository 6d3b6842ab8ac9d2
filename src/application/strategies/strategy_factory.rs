use super::{Breakout, MeanReversion, Strategy, TrendFollowing};
use crate::domain::types::StrategyKind;

/// Builds the strategy a trader's `StrategyKind` selects, using each
/// strategy's tuned defaults. Mirrors the teacher's factory-function
/// approach to strategy selection rather than a registry.
pub fn build_strategy(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::TrendFollowing => Box::new(TrendFollowing::default()),
        StrategyKind::MeanReversion => Box::new(MeanReversion::default()),
        StrategyKind::Breakout => Box::new(Breakout::default()),
    }
}
