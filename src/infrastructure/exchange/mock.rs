//! Deterministic in-memory connector used for `virtualMoney` traders and
//! integration tests. Orders fill instantly and completely at the last
//! pushed price; no network calls are made.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::errors::ConnectorError;
use crate::domain::ports::{ExchangeConnector, ExchangeOrder, ExchangePosition, OrderStatus, OrderSide, OrderType, StreamEvent, Ticker};
use crate::domain::types::{Candlestick, CandlestickInterval};

pub struct MockConnector {
    connected: AtomicBool,
    prices: RwLock<HashMap<String, Decimal>>,
    candles: RwLock<HashMap<String, Vec<Candlestick>>>,
    fills: RwLock<HashMap<String, Decimal>>,
    order_seq: AtomicI64,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            prices: RwLock::new(HashMap::new()),
            candles: RwLock::new(HashMap::new()),
            fills: RwLock::new(HashMap::new()),
            order_seq: AtomicI64::new(1),
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().unwrap().insert(symbol.to_string(), price);
    }

    pub fn push_candle(&self, symbol: &str, candle: Candlestick) {
        self.prices.write().unwrap().insert(symbol.to_string(), candle.close);
        self.candles.write().unwrap().entry(symbol.to_string()).or_default().push(candle);
    }

    /// Fill ratio forced on the next `place_order` call for `symbol`,
    /// defaulting to 1.0 (complete fill) when unset.
    pub fn set_next_fill_ratio(&self, symbol: &str, ratio: Decimal) {
        self.fills.write().unwrap().insert(symbol.to_string(), ratio);
    }
}

#[async_trait]
impl ExchangeConnector for MockConnector {
    async fn connect(&self) -> Result<(), ConnectorError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_candles(
        &self,
        symbol: &str,
        _interval: CandlestickInterval,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candlestick>, ConnectorError> {
        let candles = self.candles.read().unwrap();
        let Some(all) = candles.get(symbol) else {
            return Ok(vec![]);
        };
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ConnectorError> {
        let price = self.prices.read().unwrap().get(symbol).copied().ok_or(ConnectorError::InvalidSymbol)?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            timestamp: Utc::now(),
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, Decimal>, ConnectorError> {
        Ok(HashMap::from([("USDT".to_string(), Decimal::from(1_000_000))]))
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ConnectorError> {
        Ok(vec![])
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<ExchangeOrder, ConnectorError> {
        let market_price = self.prices.read().unwrap().get(symbol).copied().unwrap_or(Decimal::ZERO);
        let fill_price = price.unwrap_or(market_price);
        let ratio = self.fills.write().unwrap().remove(symbol).unwrap_or(Decimal::ONE);
        let filled_quantity = quantity * ratio;
        let id = self.order_seq.fetch_add(1, Ordering::SeqCst).to_string();
        Ok(ExchangeOrder {
            id,
            symbol: symbol.to_string(),
            side,
            order_type,
            requested_quantity: quantity,
            filled_quantity,
            average_fill_price: fill_price,
            status: if ratio >= Decimal::ONE { OrderStatus::Filled } else { OrderStatus::PartiallyFilled },
            timestamp: Utc::now(),
        })
    }

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<ExchangeOrder, ConnectorError> {
        self.get_order(id, symbol).await
    }

    async fn get_order(&self, id: &str, symbol: &str) -> Result<ExchangeOrder, ConnectorError> {
        Ok(ExchangeOrder {
            id: id.to_string(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            requested_quantity: Decimal::ZERO,
            filled_quantity: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            status: OrderStatus::Filled,
            timestamp: Utc::now(),
        })
    }

    async fn step_size(&self, _symbol: &str) -> Result<Decimal, ConnectorError> {
        Ok(Decimal::new(1, 4))
    }

    async fn minimum_order_size(&self, _symbol: &str) -> Result<Decimal, ConnectorError> {
        Ok(Decimal::new(1, 4))
    }

    async fn subscribe_candlesticks(&self, _symbol: &str, _interval: CandlestickInterval) -> Result<mpsc::Receiver<StreamEvent>, ConnectorError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn subscribe_ticker(&self, _symbol: &str) -> Result<mpsc::Receiver<StreamEvent>, ConnectorError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn subscribe_order_updates(&self) -> Result<mpsc::Receiver<StreamEvent>, ConnectorError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn market_order_fills_completely_by_default() {
        let connector = MockConnector::new();
        connector.set_price("BTCUSDT", dec!(50000));
        let order = connector
            .place_order("BTCUSDT", OrderSide::Buy, OrderType::Market, dec!(1), None)
            .await
            .unwrap();
        assert_eq!(order.filled_quantity, dec!(1));
        assert_eq!(order.average_fill_price, dec!(50000));
    }

    #[tokio::test]
    async fn forced_partial_fill_ratio_is_honored() {
        let connector = MockConnector::new();
        connector.set_price("ETHUSDT", dec!(2000));
        connector.set_next_fill_ratio("ETHUSDT", dec!(0.5));
        let order = connector
            .place_order("ETHUSDT", OrderSide::Buy, OrderType::Market, dec!(2), None)
            .await
            .unwrap();
        assert_eq!(order.filled_quantity, dec!(1));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
    }
}
