//! Exchange connector implementations: the external collaborators spec §6
//! names, each behind the single `ExchangeConnector` trait the core
//! consumes.

pub mod binance;
pub mod bitget;
pub mod mock;

pub use binance::BinanceConnector;
pub use bitget::BitgetConnector;
pub use mock::MockConnector;
