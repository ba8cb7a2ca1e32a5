//! Core data types shared by the exchange adapters and the trading engine.

pub mod asset;
pub mod market_data;
pub mod trading;

pub use asset::*;
pub use market_data::*;
pub use trading::*;
