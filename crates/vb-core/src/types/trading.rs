//! Trading-related data structures — credentials, balances, orders.
//!
//! These types flow between the trading engine and the exchange gateway.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Exchange API key pair for one user.
///
/// Opaque to the engine: it is only handed back to the gateway. `Debug`
/// never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_key: String,
    pub secret_key: String,
}

impl Credential {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.access_key.chars().take(6).collect();
        f.debug_struct("Credential")
            .field("access_key", &format_args!("{shown}…"))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order side in exchange terms (`bid` = buy, `ask` = sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a market order is sized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderSize {
    /// Market buy spending this much quote currency.
    Funds(f64),
    /// Market sell of this much base currency.
    Volume(f64),
}

impl OrderSize {
    /// Upbit `ord_type` for this sizing.
    pub fn ord_type(&self) -> &'static str {
        match self {
            Self::Funds(_) => "price",
            Self::Volume(_) => "market",
        }
    }
}

/// Lifecycle state of an exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Wait,
    Watch,
    Done,
    Cancel,
}

impl OrderState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::Watch => "watch",
            Self::Done => "done",
            Self::Cancel => "cancel",
        }
    }
}

/// Immediate response to a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    /// Exchange-assigned order id.
    pub uuid: String,
    pub market: String,
    pub side: Side,
    /// Funds reserved by the order (quote currency for bids).
    pub locked_funds: f64,
    /// Base volume executed at response time.
    pub executed_volume: f64,
}

/// A historical order as returned by the closed-orders query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub uuid: String,
    pub market: String,
    pub side: Side,
    pub state: OrderState,
    /// Quote funds exchanged by the fills.
    pub executed_funds: f64,
    pub paid_fee: f64,
    pub executed_volume: f64,
}

impl OrderRecord {
    /// Proceeds of a sell (or cost of a buy) after fees.
    pub fn net_funds(&self) -> f64 {
        match self.side {
            Side::Ask => self.executed_funds - self.paid_fee,
            Side::Bid => self.executed_funds + self.paid_fee,
        }
    }
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

/// One currency line of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    /// Freely available amount.
    pub balance: f64,
    /// Amount tied up in open orders.
    pub locked: f64,
}

/// Available amount of `currency`, or zero when the account has no line.
pub fn available(balances: &[Balance], currency: &str) -> f64 {
    balances
        .iter()
        .find(|b| b.currency == currency)
        .map(|b| b.balance)
        .unwrap_or(0.0)
}
