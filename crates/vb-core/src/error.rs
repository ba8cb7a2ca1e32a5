//! Typed error definitions for the trading system.
//!
//! [`ExchangeError`] covers everything that can go wrong while talking to the
//! exchange (market data, account, orders). [`TradingError`] covers the
//! user-facing lifecycle API and configuration validation. Both implement
//! `std::error::Error` via `thiserror`, so they integrate with `anyhow::Result`.

use thiserror::Error;

/// Failures reported by an exchange collaborator.
///
/// Variants carry a human-readable description only; they are cloned into
/// execution events, so no transport-specific error types are kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// Price or candle fetch failed, or the response held no usable data.
    #[error("market data unavailable: {0}")]
    MarketDataUnavailable(String),

    /// Credential rejected (bad or expired key, IP not whitelisted).
    #[error("auth error: {0}")]
    Auth(String),

    /// The exchange refused the order, or it could not be sized.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Transport failure (connect, timeout, 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Whether a later attempt could reasonably succeed.
    ///
    /// Auth failures and exchange-side rejections are final for the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::MarketDataUnavailable(_) | Self::Network(_) | Self::Parse(_))
    }
}

/// Lifecycle and configuration errors returned synchronously to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradingError {
    /// `start` was called for a user that is already trading.
    #[error("user {0} is already running")]
    AlreadyRunning(String),

    /// `stop` was called for a user that is not trading.
    #[error("user {0} is not running")]
    NotRunning(String),

    /// Asset code not in the catalogue.
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),
}
