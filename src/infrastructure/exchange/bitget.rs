//! Bitget spot connector. No file in the training corpus targets Bitget
//! specifically; this follows the same shape as `BinanceConnector`
//! (`CircuitBreaker`-wrapped REST calls over `HttpClientFactory`'s client)
//! but with Bitget's own request-signing scheme: `base64(hmac_sha256(secret,
//! timestamp + method + requestPath + body))`, passed via the
//! `ACCESS-SIGN`/`ACCESS-TIMESTAMP`/`ACCESS-PASSPHRASE` headers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::errors::ConnectorError;
use crate::domain::ports::{ExchangeConnector, ExchangeOrder, ExchangePosition, OrderSide, OrderStatus, OrderType, StreamEvent, Ticker};
use crate::domain::types::{Candlestick, CandlestickInterval};
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::{build_url_with_query, HttpClientFactory};

type HmacSha256 = Hmac<Sha256>;

pub struct BitgetConnector {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    passphrase: String,
    base_url: String,
    connected: AtomicBool,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BitgetConnector {
    pub fn new(api_key: String, api_secret: String, passphrase: String, base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key,
            api_secret,
            passphrase,
            base_url,
            connected: AtomicBool::new(false),
            circuit_breaker: Arc::new(CircuitBreaker::new("BitgetConnector", 5, 3, Duration::from_secs(60))),
        }
    }

    fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(format!("{timestamp}{method}{request_path}{body}").as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, method: &str, request_path: &str, body: &str) -> Vec<(&'static str, String)> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, method, request_path, body);
        vec![
            ("ACCESS-KEY", self.api_key.clone()),
            ("ACCESS-SIGN", signature),
            ("ACCESS-TIMESTAMP", timestamp),
            ("ACCESS-PASSPHRASE", self.passphrase.clone()),
        ]
    }

    async fn call<T, F>(&self, f: F) -> Result<T, ConnectorError>
    where
        F: std::future::Future<Output = Result<T, ConnectorError>>,
    {
        self.circuit_breaker.call(f).await.map_err(|e| {
            let msg = e.to_string();
            match e {
                CircuitBreakerError::Open { .. } => ConnectorError::ConnectionError(msg),
                CircuitBreakerError::Inner(inner) => inner,
            }
        })
    }
}

#[async_trait]
impl ExchangeConnector for BitgetConnector {
    async fn connect(&self) -> Result<(), ConnectorError> {
        let url = format!("{}/api/v2/public/time", self.base_url);
        self.client.get(&url).send().await.map_err(|e| ConnectorError::ConnectionError(e.to_string()))?;
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
        interval: CandlestickInterval,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candlestick>, ConnectorError> {
        self.call(async {
            let path = "/api/v2/spot/market/candles";
            let limit_str = limit.min(1000).to_string();
            let url = build_url_with_query(
                &format!("{}{path}", self.base_url),
                &[("symbol", symbol), ("granularity", interval.to_bitget_str()), ("limit", &limit_str)],
            );
            let response = self.client.get(&url).send().await.map_err(|e| ConnectorError::ConnectionError(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ConnectorError::ExchangeError(response.text().await.unwrap_or_default()));
            }
            #[derive(Deserialize)]
            struct Envelope {
                data: Vec<Vec<String>>,
            }
            let envelope: Envelope = response.json().await.map_err(|e| ConnectorError::ExchangeError(e.to_string()))?;
            let candles = envelope
                .data
                .into_iter()
                .filter_map(|row| {
                    if row.len() < 6 {
                        return None;
                    }
                    let open_time: i64 = row[0].parse().ok()?;
                    Some(Candlestick {
                        open_time,
                        open: row[1].parse().ok()?,
                        high: row[2].parse().ok()?,
                        low: row[3].parse().ok()?,
                        close: row[4].parse().ok()?,
                        volume: row[5].parse().ok()?,
                        close_time: open_time + interval.to_seconds() * 1000,
                    })
                })
                .collect();
            Ok(candles)
        })
        .await
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ConnectorError> {
        self.call(async {
            let url = build_url_with_query(&format!("{}/api/v2/spot/market/tickers", self.base_url), &[("symbol", symbol)]);
            let response = self.client.get(&url).send().await.map_err(|e| ConnectorError::ConnectionError(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ConnectorError::InvalidSymbol);
            }
            #[derive(Deserialize)]
            struct Row {
                #[serde(rename = "lastPr")]
                last_pr: String,
            }
            #[derive(Deserialize)]
            struct Envelope {
                data: Vec<Row>,
            }
            let envelope: Envelope = response.json().await.map_err(|e| ConnectorError::ExchangeError(e.to_string()))?;
            let row = envelope.data.into_iter().next().ok_or(ConnectorError::InvalidSymbol)?;
            Ok(Ticker {
                symbol: symbol.to_string(),
                last_price: row.last_pr.parse().unwrap_or(Decimal::ZERO),
                timestamp: Utc::now(),
            })
        })
        .await
    }

    async fn get_balance(&self) -> Result<HashMap<String, Decimal>, ConnectorError> {
        self.call(async {
            let path = "/api/v2/spot/account/assets";
            let headers = self.auth_headers("GET", path, "");
            let url = format!("{}{path}", self.base_url);
            let mut request = self.client.get(&url);
            for (k, v) in headers {
                request = request.header(k, v);
            }
            let response = request.send().await.map_err(|e| ConnectorError::ConnectionError(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ConnectorError::AuthenticationError(response.text().await.unwrap_or_default()));
            }
            #[derive(Deserialize)]
            struct Row {
                coin: String,
                available: String,
                frozen: String,
            }
            #[derive(Deserialize)]
            struct Envelope {
                data: Vec<Row>,
            }
            let envelope: Envelope = response.json().await.map_err(|e| ConnectorError::ExchangeError(e.to_string()))?;
            let mut balances = HashMap::new();
            for row in envelope.data {
                let available: Decimal = row.available.parse().unwrap_or(Decimal::ZERO);
                let frozen: Decimal = row.frozen.parse().unwrap_or(Decimal::ZERO);
                let total = available + frozen;
                if total > Decimal::ZERO {
                    balances.insert(row.coin, total);
                }
            }
            Ok(balances)
        })
        .await
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ConnectorError> {
        let balances = self.get_balance().await?;
        Ok(balances
            .into_iter()
            .filter(|(coin, _)| coin != "USDT")
            .map(|(coin, quantity)| ExchangePosition {
                symbol: format!("{coin}USDT"),
                side: OrderSide::Buy,
                quantity,
                entry_price: Decimal::ZERO,
            })
            .collect())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<ExchangeOrder, ConnectorError> {
        self.call(async {
            let path = "/api/v2/spot/trade/place-order";
            let mut body = serde_json::json!({
                "symbol": symbol,
                "side": match side { OrderSide::Buy => "buy", OrderSide::Sell => "sell" },
                "orderType": match order_type { OrderType::Market => "market", OrderType::Limit => "limit" },
                "force": "gtc",
                "size": quantity.to_string(),
            });
            if let (OrderType::Limit, Some(p)) = (order_type, price) {
                body["price"] = serde_json::Value::String(p.to_string());
            }
            let body_str = body.to_string();
            let headers = self.auth_headers("POST", path, &body_str);
            let url = format!("{}{path}", self.base_url);
            let mut request = self.client.post(&url).body(body_str);
            for (k, v) in headers {
                request = request.header(k, v);
            }
            request = request.header("Content-Type", "application/json");
            let response = request.send().await.map_err(|e| ConnectorError::ConnectionError(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ConnectorError::OrderRejected(response.text().await.unwrap_or_default()));
            }
            #[derive(Deserialize)]
            struct Data {
                #[serde(rename = "orderId")]
                order_id: String,
            }
            #[derive(Deserialize)]
            struct Envelope {
                data: Data,
            }
            let envelope: Envelope = response.json().await.map_err(|e| ConnectorError::ExchangeError(e.to_string()))?;
            // Bitget's place-order response carries no fill detail; a
            // follow-up getOrder call resolves the actual fill.
            self.get_order(&envelope.data.order_id, symbol).await
        })
        .await
    }

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<ExchangeOrder, ConnectorError> {
        self.call(async {
            let path = "/api/v2/spot/trade/cancel-order";
            let body = serde_json::json!({ "symbol": symbol, "orderId": id }).to_string();
            let headers = self.auth_headers("POST", path, &body);
            let url = format!("{}{path}", self.base_url);
            let mut request = self.client.post(&url).body(body);
            for (k, v) in headers {
                request = request.header(k, v);
            }
            request = request.header("Content-Type", "application/json");
            let response = request.send().await.map_err(|e| ConnectorError::ConnectionError(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ConnectorError::ExchangeError(response.text().await.unwrap_or_default()));
            }
            Ok(())
        })
        .await?;
        self.get_order(id, symbol).await
    }

    async fn get_order(&self, id: &str, symbol: &str) -> Result<ExchangeOrder, ConnectorError> {
        self.call(async {
            let path = "/api/v2/spot/trade/orderInfo";
            let query = build_url_with_query("", &[("orderId", id)]);
            let headers = self.auth_headers("GET", &format!("{path}{query}"), "");
            let url = format!("{}{path}{query}", self.base_url);
            let mut request = self.client.get(&url);
            for (k, v) in headers {
                request = request.header(k, v);
            }
            let response = request.send().await.map_err(|e| ConnectorError::ConnectionError(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ConnectorError::ExchangeError(response.text().await.unwrap_or_default()));
            }
            #[derive(Deserialize)]
            struct Row {
                side: String,
                #[serde(rename = "orderType")]
                order_type: String,
                size: String,
                #[serde(rename = "baseVolume", default)]
                filled_size: String,
                #[serde(rename = "priceAvg", default)]
                price_avg: String,
                status: String,
            }
            #[derive(Deserialize)]
            struct Envelope {
                data: Vec<Row>,
            }
            let envelope: Envelope = response.json().await.map_err(|e| ConnectorError::ExchangeError(e.to_string()))?;
            let row = envelope.data.into_iter().next().ok_or_else(|| ConnectorError::ExchangeError("order not found".to_string()))?;
            Ok(ExchangeOrder {
                id: id.to_string(),
                symbol: symbol.to_string(),
                side: if row.side == "buy" { OrderSide::Buy } else { OrderSide::Sell },
                order_type: if row.order_type == "limit" { OrderType::Limit } else { OrderType::Market },
                requested_quantity: row.size.parse().unwrap_or(Decimal::ZERO),
                filled_quantity: row.filled_size.parse().unwrap_or(Decimal::ZERO),
                average_fill_price: row.price_avg.parse().unwrap_or(Decimal::ZERO),
                status: match row.status.as_str() {
                    "filled" => OrderStatus::Filled,
                    "partially_filled" => OrderStatus::PartiallyFilled,
                    "cancelled" => OrderStatus::Cancelled,
                    _ => OrderStatus::New,
                },
                timestamp: Utc::now(),
            })
        })
        .await
    }

    async fn step_size(&self, _symbol: &str) -> Result<Decimal, ConnectorError> {
        // Bitget spot trims to a fixed precision per symbol via
        // `/spot/public/symbols`; a conservative fixed step avoids an extra
        // round trip on every order until per-symbol caching is added.
        Ok(Decimal::new(1, 6))
    }

    async fn minimum_order_size(&self, _symbol: &str) -> Result<Decimal, ConnectorError> {
        Ok(Decimal::new(1, 4))
    }

    async fn subscribe_candlesticks(&self, symbol: &str, interval: CandlestickInterval) -> Result<mpsc::Receiver<StreamEvent>, ConnectorError> {
        let (tx, rx) = mpsc::channel(32);
        let url = self.base_url.clone();
        let client = self.client.clone();
        let symbol = symbol.to_string();
        let poll_secs = interval.loop_cadence_seconds();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(poll_secs));
            loop {
                ticker.tick().await;
                let query_url = build_url_with_query(
                    &format!("{url}/api/v2/spot/market/candles"),
                    &[("symbol", symbol.as_str()), ("granularity", interval.to_bitget_str()), ("limit", "1")],
                );
                let Ok(response) = client.get(&query_url).send().await else { continue };
                #[derive(Deserialize)]
                struct Envelope {
                    data: Vec<Vec<String>>,
                }
                let Ok(envelope) = response.json::<Envelope>().await else { continue };
                let Some(row) = envelope.data.into_iter().next() else { continue };
                if row.len() < 6 {
                    continue;
                }
                let candle = (|| -> Option<Candlestick> {
                    let open_time: i64 = row[0].parse().ok()?;
                    Some(Candlestick {
                        open_time,
                        open: row[1].parse().ok()?,
                        high: row[2].parse().ok()?,
                        low: row[3].parse().ok()?,
                        close: row[4].parse().ok()?,
                        volume: row[5].parse().ok()?,
                        close_time: open_time + interval.to_seconds() * 1000,
                    })
                })();
                if let Some(candle) = candle {
                    if tx.send(StreamEvent::Candle(candle)).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn subscribe_ticker(&self, symbol: &str) -> Result<mpsc::Receiver<StreamEvent>, ConnectorError> {
        let (tx, rx) = mpsc::channel(32);
        let url = self.base_url.clone();
        let client = self.client.clone();
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                let query_url = build_url_with_query(&format!("{url}/api/v2/spot/market/tickers"), &[("symbol", symbol.as_str())]);
                let Ok(response) = client.get(&query_url).send().await else { continue };
                #[derive(Deserialize)]
                struct Row {
                    #[serde(rename = "lastPr")]
                    last_pr: String,
                }
                #[derive(Deserialize)]
                struct Envelope {
                    data: Vec<Row>,
                }
                let Ok(envelope) = response.json::<Envelope>().await else { continue };
                let Some(row) = envelope.data.into_iter().next() else { continue };
                let event = StreamEvent::Ticker(Ticker {
                    symbol: symbol.clone(),
                    last_price: row.last_pr.parse().unwrap_or(Decimal::ZERO),
                    timestamp: Utc::now(),
                });
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn subscribe_order_updates(&self) -> Result<mpsc::Receiver<StreamEvent>, ConnectorError> {
        let (_tx, rx) = mpsc::channel(1);
        warn!("Bitget order-update stream not implemented; relying on polling");
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_base64() {
        let connector = BitgetConnector::new("key".into(), "secret".into(), "pass".into(), "https://api.bitget.com".into());
        let sig = connector.sign("1700000000000", "GET", "/api/v2/spot/account/assets", "");
        assert!(STANDARD.decode(&sig).is_ok());
    }
}
