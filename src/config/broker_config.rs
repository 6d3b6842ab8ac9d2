//! Broker (exchange) configuration parsing from environment variables.

use std::env;

#[derive(Debug, Clone, Default)]
pub struct BinanceEnvConfig {
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub ws_url: String,
}

impl BinanceEnvConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("BINANCE_API_KEY").unwrap_or_default(),
            secret_key: env::var("BINANCE_SECRET_KEY").unwrap_or_default(),
            base_url: env::var("BINANCE_BASE_URL")
                .unwrap_or_else(|_| "https://api.binance.com".to_string()),
            ws_url: env::var("BINANCE_WS_URL")
                .unwrap_or_else(|_| "wss://stream.binance.com:9443".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BitgetEnvConfig {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
    pub base_url: String,
    pub ws_url: String,
}

impl BitgetEnvConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("BITGET_API_KEY").unwrap_or_default(),
            secret_key: env::var("BITGET_SECRET_KEY").unwrap_or_default(),
            passphrase: env::var("BITGET_PASSPHRASE").unwrap_or_default(),
            base_url: env::var("BITGET_BASE_URL")
                .unwrap_or_else(|_| "https://api.bitget.com".to_string()),
            ws_url: env::var("BITGET_WS_URL")
                .unwrap_or_else(|_| "wss://ws.bitget.com/v2/ws/public".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BrokerEnvConfig {
    pub binance: BinanceEnvConfig,
    pub bitget: BitgetEnvConfig,
}

impl BrokerEnvConfig {
    pub fn from_env() -> Self {
        Self {
            binance: BinanceEnvConfig::from_env(),
            bitget: BitgetEnvConfig::from_env(),
        }
    }
}
