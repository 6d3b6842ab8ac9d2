//! The exchange connector capability set the core consumes (spec §6). The
//! connectors themselves (REST/WebSocket plumbing, auth, rate limiting) are
//! external collaborators — this module only pins down the interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::errors::ConnectorError;
use crate::domain::types::{Candlestick, CandlestickInterval};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ExchangeOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub requested_quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_fill_price: Decimal,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

/// Market events pushed through a candlestick/ticker/order-update
/// subscription.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Candle(Candlestick),
    Ticker(Ticker),
    OrderUpdate(ExchangeOrder),
}

/// The capability set an exchange connector must expose (spec §6). Core
/// components hold `Arc<dyn ExchangeConnector>` and never depend on a
/// concrete exchange.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    async fn connect(&self) -> Result<(), ConnectorError>;
    async fn disconnect(&self) -> Result<(), ConnectorError>;
    async fn is_connected(&self) -> bool;

    async fn get_candles(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candlestick>, ConnectorError>;

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ConnectorError>;

    async fn get_balance(&self) -> Result<HashMap<String, Decimal>, ConnectorError>;

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ConnectorError>;

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<ExchangeOrder, ConnectorError>;

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<ExchangeOrder, ConnectorError>;

    async fn get_order(&self, id: &str, symbol: &str) -> Result<ExchangeOrder, ConnectorError>;

    /// Minimum tradable quantity increment for `symbol`, used by the
    /// position manager's size rounding.
    async fn step_size(&self, symbol: &str) -> Result<Decimal, ConnectorError>;

    /// Minimum tradable notional/quantity below which an order is rejected.
    async fn minimum_order_size(&self, symbol: &str) -> Result<Decimal, ConnectorError>;

    async fn subscribe_candlesticks(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamEvent>, ConnectorError>;

    async fn subscribe_ticker(
        &self,
        symbol: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamEvent>, ConnectorError>;

    async fn subscribe_order_updates(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamEvent>, ConnectorError>;
}
