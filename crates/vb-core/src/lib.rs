//! # vb-core
//!
//! Core crate for the volatility-breakout trading system, providing:
//!
//! - **Types** (`types`) — assets, daily candles, balances, orders, credentials
//! - **Configuration** (`config`) — JSON config deserialization and validation
//! - **Error types** (`error`) — `ExchangeError` / `TradingError` via thiserror
//! - **Time utilities** (`time_util`) — epoch timestamps and daily fire times
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
