//! # vb-exchange
//!
//! Exchange collaborators for the trading engine.
//!
//! The engine only sees two traits: [`MarketDataSource`] for public prices
//! and candles, and [`ExchangeGateway`] for per-user account and order
//! operations. Implementations:
//!
//! | Implementation  | Module   | Market data | Orders                    |
//! |-----------------|----------|-------------|---------------------------|
//! | `UpbitClient`   | `upbit`  | REST        | REST, JWT-signed          |
//! | `PaperExchange` | `paper`  | delegated   | simulated fills at ticker |

pub mod paper;
pub mod upbit;

use async_trait::async_trait;
use vb_core::Asset;
use vb_core::error::ExchangeError;
use vb_core::trading::*;
use vb_core::DailyCandle;

/// Result alias for collaborator calls.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Public market data for one exchange.
///
/// Called from timer tasks; implementations must be cheap to share.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// The most recently completed daily candle.
    async fn daily_candle(&self, asset: Asset) -> ExchangeResult<DailyCandle>;

    /// Last traded price.
    async fn ticker_price(&self, asset: Asset) -> ExchangeResult<f64>;
}

/// Authenticated account and order operations.
///
/// All methods take `&self` so they can be called concurrently from the
/// order worker pool; the credential identifies the account.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Every currency line of the account.
    ///
    /// Fails with [`ExchangeError::Auth`] on bad or expired credentials.
    async fn balances(&self, credential: &Credential) -> ExchangeResult<Vec<Balance>>;

    /// Place a market order.
    async fn place_order(
        &self,
        credential: &Credential,
        market: &str,
        side: Side,
        size: OrderSize,
    ) -> ExchangeResult<OrderFill>;

    /// Most recent orders for `market` in any of `states`, newest first.
    async fn recent_orders(
        &self,
        credential: &Credential,
        market: &str,
        count: u32,
        states: &[OrderState],
    ) -> ExchangeResult<Vec<OrderRecord>>;
}
