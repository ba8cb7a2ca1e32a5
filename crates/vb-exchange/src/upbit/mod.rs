//! Upbit REST adapter.
//!
//! Implements both [`MarketDataSource`] (public quotation endpoints) and
//! [`ExchangeGateway`] (JWT-signed exchange endpoints) over one shared
//! `reqwest::Client`.
//!
//! # REST endpoints
//!
//! | Operation      | Method | Path                  | Auth |
//! |----------------|--------|-----------------------|------|
//! | Daily candles  | GET    | `/v1/candles/days`    | no   |
//! | Ticker         | GET    | `/v1/ticker`          | no   |
//! | Accounts       | GET    | `/v1/accounts`        | yes  |
//! | Place order    | POST   | `/v1/orders`          | yes  |
//! | Closed orders  | GET    | `/v1/orders/closed`   | yes  |

pub mod auth;
pub mod parse;

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info};
use vb_core::config::ExchangeConfig;
use vb_core::error::ExchangeError;
use vb_core::trading::*;
use vb_core::{Asset, DailyCandle};

use crate::{ExchangeGateway, ExchangeResult, MarketDataSource};

/// Upbit client for quotation and exchange APIs.
pub struct UpbitClient {
    /// Shared HTTP client (connection pooling, timeout).
    http: reqwest::Client,
    /// REST base URL (e.g. `https://api.upbit.com`).
    base_url: String,
}

impl UpbitClient {
    /// Create a client; no request is sent until the first call.
    pub fn new(config: &ExchangeConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        info!("[upbit] client ready — {}", config.rest_url);
        Ok(Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
        })
    }

    /// Unauthenticated GET returning parsed JSON.
    async fn public_get(&self, path: &str, query: &str) -> ExchangeResult<Value> {
        let url = format!("{}{path}?{query}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp, Failure::MarketData).await
    }

    /// Signed GET; `query` is both hashed into the JWT and sent verbatim.
    async fn private_get(&self, credential: &Credential, path: &str, query: Option<&str>) -> ExchangeResult<Value> {
        let url = match query {
            Some(q) if !q.is_empty() => format!("{}{path}?{q}", self.base_url),
            _ => format!("{}{path}", self.base_url),
        };
        let resp = self
            .http
            .get(&url)
            .header("Authorization", auth::bearer(credential, query))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp, Failure::Account).await
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Which kind of call failed, to pick the error variant for 4xx responses.
#[derive(Clone, Copy)]
enum Failure {
    MarketData,
    Account,
    Order,
}

fn transport_error(e: reqwest::Error) -> ExchangeError {
    ExchangeError::Network(e.to_string())
}

/// Turn a response into JSON, mapping HTTP failures onto [`ExchangeError`].
async fn read_json(resp: reqwest::Response, failure: Failure) -> ExchangeResult<Value> {
    let status = resp.status();
    let body = resp.text().await.map_err(transport_error)?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()));
    }

    let (name, message) = parse::error_name(&body).unwrap_or_else(|| (String::new(), body.clone()));
    let detail = if name.is_empty() {
        format!("HTTP {status}: {message}")
    } else {
        format!("{name}: {message}")
    };
    debug!("[upbit] request failed — {detail}");

    Err(match status {
        StatusCode::UNAUTHORIZED => ExchangeError::Auth(detail),
        // Upbit answers non-whitelisted IPs with 401 `no_authorization_ip`
        // and 403 on some gateways.
        StatusCode::FORBIDDEN if name.contains("authorization") => ExchangeError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => ExchangeError::Network(detail),
        s if s.is_server_error() => ExchangeError::Network(detail),
        _ => match failure {
            Failure::MarketData => ExchangeError::MarketDataUnavailable(detail),
            Failure::Account => ExchangeError::Network(detail),
            Failure::Order => ExchangeError::OrderRejected(detail),
        },
    })
}

/// Upbit accepts KRW prices as integers.
fn format_funds(funds: f64) -> String {
    format!("{}", funds.floor() as u64)
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDataSource for UpbitClient {
    async fn daily_candle(&self, asset: Asset) -> ExchangeResult<DailyCandle> {
        let query = format!("market={}&count=2", asset.market_code());
        let body = self
            .public_get("/v1/candles/days", &query)
            .await
            .map_err(as_market_data)?;
        parse::previous_day_candle(&body)
    }

    async fn ticker_price(&self, asset: Asset) -> ExchangeResult<f64> {
        let query = format!("markets={}", asset.market_code());
        let body = self.public_get("/v1/ticker", &query).await.map_err(as_market_data)?;
        parse::ticker_price(&body)
    }
}

/// Every public-endpoint failure surfaces to the engine as unavailable data.
fn as_market_data(e: ExchangeError) -> ExchangeError {
    match e {
        ExchangeError::MarketDataUnavailable(_) => e,
        other => ExchangeError::MarketDataUnavailable(other.to_string()),
    }
}

#[async_trait]
impl ExchangeGateway for UpbitClient {
    async fn balances(&self, credential: &Credential) -> ExchangeResult<Vec<Balance>> {
        let body = self.private_get(credential, "/v1/accounts", None).await?;
        parse::balances(&body)
    }

    async fn place_order(
        &self,
        credential: &Credential,
        market: &str,
        side: Side,
        size: OrderSize,
    ) -> ExchangeResult<OrderFill> {
        let amount = match size {
            OrderSize::Funds(funds) => format_funds(funds),
            OrderSize::Volume(volume) => volume.to_string(),
        };
        let amount_key = match size {
            OrderSize::Funds(_) => "price",
            OrderSize::Volume(_) => "volume",
        };
        let params = [
            ("market", market),
            ("side", side.as_str()),
            ("ord_type", size.ord_type()),
            (amount_key, amount.as_str()),
        ];
        let query = auth::build_query(&params);
        let body: serde_json::Map<String, Value> = params
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();

        let url = format!("{}/v1/orders", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", auth::bearer(credential, Some(&query)))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let json = read_json(resp, Failure::Order).await?;
        let fill = parse::order_fill(&json)?;

        info!(
            "[upbit] order placed: {market} {side} {amount_key}={amount} → uuid={}",
            fill.uuid
        );
        Ok(fill)
    }

    async fn recent_orders(
        &self,
        credential: &Credential,
        market: &str,
        count: u32,
        states: &[OrderState],
    ) -> ExchangeResult<Vec<OrderRecord>> {
        let limit = count.to_string();
        let mut params: Vec<(&str, &str)> = vec![("market", market)];
        params.extend(states.iter().map(|s| ("states[]", s.as_str())));
        params.push(("limit", limit.as_str()));
        let query = auth::build_query(&params);

        let body = self
            .private_get(credential, "/v1/orders/closed", Some(&query))
            .await?;
        parse::order_records(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funds_are_floored_integers() {
        assert_eq!(format_funds(149_925.75), "149925");
        assert_eq!(format_funds(5_000.0), "5000");
    }

    #[test]
    fn market_data_errors_are_normalized() {
        let e = as_market_data(ExchangeError::Network("timeout".into()));
        assert!(matches!(e, ExchangeError::MarketDataUnavailable(ref m) if m.contains("timeout")));
    }

    #[test]
    fn client_trims_trailing_slash() {
        let cfg = ExchangeConfig {
            rest_url: "https://api.upbit.com/".into(),
            ..ExchangeConfig::default()
        };
        let client = UpbitClient::new(&cfg).unwrap();
        assert_eq!(client.base_url, "https://api.upbit.com");
    }
}
