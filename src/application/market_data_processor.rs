//! Market Data Processor (spec §4.5): turns raw connector candles into a
//! validated, indicator-annotated snapshot, skipping ticks that carry no new
//! candle close.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::application::indicators::{IndicatorContext, IndicatorPipeline, IndicatorRequest};
use crate::domain::errors::CoreError;
use crate::domain::ports::ExchangeConnector;
use crate::domain::types::{validate_candle_sequence, Candlestick, CandlestickInterval};

#[derive(Debug, Clone)]
pub struct ProcessedMarketData {
    pub candles: Vec<Candlestick>,
    pub indicators: IndicatorContext,
    pub latest_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

pub struct MarketDataProcessor {
    connector: Arc<dyn ExchangeConnector>,
    pipeline: Arc<IndicatorPipeline>,
    last_close_time: RwLock<HashMap<(String, CandlestickInterval), i64>>,
}

impl MarketDataProcessor {
    pub fn new(connector: Arc<dyn ExchangeConnector>, pipeline: Arc<IndicatorPipeline>) -> Self {
        Self {
            connector,
            pipeline,
            last_close_time: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `Ok(None)` when the latest candle hasn't advanced since the
    /// previous tick — "no new data" is not an error, per spec §4.5.
    pub async fn process_tick(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        requests: &[IndicatorRequest],
    ) -> Result<Option<ProcessedMarketData>, CoreError> {
        let required_window = requests.iter().map(|r| r.required_window()).max().unwrap_or(1);
        let limit = required_window.max(1) + 1;

        let candles = self
            .connector
            .get_candles(symbol, interval, None, None, limit)
            .await?;

        let Some(latest) = candles.last() else {
            return Ok(None);
        };

        if !validate_candle_sequence(&candles) {
            return Err(CoreError::Persistence(format!(
                "candle sequence for {symbol} is not monotonic or contains an invalid candle"
            )));
        }

        let key = (symbol.to_string(), interval);
        {
            let guard = self.last_close_time.read().unwrap();
            if let Some(&prev) = guard.get(&key) {
                if latest.close_time <= prev {
                    return Ok(None);
                }
            }
        }
        self.last_close_time.write().unwrap().insert(key, latest.close_time);

        let indicators = self.pipeline.compute_context(symbol, interval, &candles, requests);

        Ok(Some(ProcessedMarketData {
            latest_price: latest.close,
            timestamp: Utc::now(),
            candles,
            indicators,
        }))
    }
}
