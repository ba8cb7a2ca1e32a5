//! Tradable asset catalogue.
//!
//! All assets are quoted in KRW. The market code (`KRW-BTC`) is what the
//! exchange expects in order and ticker requests; the currency code (`BTC`)
//! is what appears in account balances.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TradingError;

/// Quote currency for every market.
pub const QUOTE_CURRENCY: &str = "KRW";

/// Assets the strategy can trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Btc,
    Eth,
    Xrp,
}

impl Asset {
    /// Every asset in the catalogue, in display order.
    pub const ALL: [Asset; 3] = [Asset::Btc, Asset::Eth, Asset::Xrp];

    /// Balance currency code (e.g. `"BTC"`).
    pub fn currency(self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Eth => "ETH",
            Self::Xrp => "XRP",
        }
    }

    /// Exchange market code (e.g. `"KRW-BTC"`).
    pub fn market_code(self) -> &'static str {
        match self {
            Self::Btc => "KRW-BTC",
            Self::Eth => "KRW-ETH",
            Self::Xrp => "KRW-XRP",
        }
    }

    /// Human-readable name for logs.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Btc => "Bitcoin",
            Self::Eth => "Ethereum",
            Self::Xrp => "Ripple",
        }
    }

    /// Resolve a market code back to an asset.
    pub fn from_market(market: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.market_code().eq_ignore_ascii_case(market))
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.currency())
    }
}

impl FromStr for Asset {
    type Err = TradingError;

    /// Accepts the currency code (`"btc"`) or the market code (`"KRW-BTC"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|a| a.currency().eq_ignore_ascii_case(trimmed))
            .or_else(|| Self::from_market(trimmed))
            .ok_or_else(|| TradingError::UnknownAsset(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_currency_and_market_codes() {
        assert_eq!("BTC".parse::<Asset>().unwrap(), Asset::Btc);
        assert_eq!(" eth ".parse::<Asset>().unwrap(), Asset::Eth);
        assert_eq!("krw-xrp".parse::<Asset>().unwrap(), Asset::Xrp);
        assert!(matches!("DOGE".parse::<Asset>(), Err(TradingError::UnknownAsset(_))));
    }

    #[test]
    fn codes() {
        assert_eq!(Asset::Eth.market_code(), "KRW-ETH");
        assert_eq!(Asset::Eth.to_string(), "ETH");
        assert_eq!(Asset::from_market("KRW-BTC"), Some(Asset::Btc));
        assert_eq!(Asset::from_market("USDT-BTC"), None);
    }

    #[test]
    fn serde_uses_currency_code() {
        let json = serde_json::to_string(&Asset::Xrp).unwrap();
        assert_eq!(json, "\"XRP\"");
        let back: Asset = serde_json::from_str("\"BTC\"").unwrap();
        assert_eq!(back, Asset::Btc);
    }
}
