pub mod indicators;
pub mod market_data_processor;
pub mod pattern_store;
pub mod position_manager;
pub mod risk_manager;
pub mod signal_generator;
pub mod strategies;
pub mod trader;
