//! # vb-engine
//!
//! Multi-user volatility-breakout trading engine.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler ──► PriceRefreshJob ───► MarketRefresher ──► PriceCache
//!          ──► TargetRefreshJob ──► (RefreshGuard) ─┘        │
//!          ──► PollJob ─────────► TradingControlLoop ◄───────┘
//!          ──► ForcedSellJob ───┐        │ reads PositionStateStore + RunningUserRegistry
//!          ──► StatusReportJob  │        ▼
//!                               └──► OrderExecutor (worker pool) ──► ExchangeGateway
//!                                          │ apply ──► PositionStateStore, TradeJournal
//!                                          └──► ExecutionEvent channel
//! ```
//!
//! [`engine::Engine`] wires everything from an [`AppConfig`](vb_core::config::AppConfig);
//! [`api::TradingApi`] is the start/stop/status surface for an outer HTTP layer.

pub mod api;
pub mod clock;
pub mod control_loop;
pub mod coordinator;
pub mod engine;
pub mod executor;
pub mod jobs;
pub mod journal;
pub mod position;
pub mod price_cache;
pub mod refresh;
pub mod registry;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod testkit;

/// Identifier of a user of the trading service.
pub type UserId = String;
