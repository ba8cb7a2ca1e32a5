//! Request/response surface for an outer HTTP layer.
//!
//! Everything here is serde-serialisable and, apart from the account view,
//! synchronous; transport and caller authentication belong to the HTTP
//! layer.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use vb_core::Asset;
use vb_core::error::{ExchangeError, TradingError};
use vb_core::trading::{Balance, Credential};
use vb_exchange::ExchangeGateway;

use crate::journal::TradeRecord;
use crate::service::TradingService;

/// Stable machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AlreadyRunning,
    NotRunning,
    UnknownAsset,
    InvalidRequest,
    AuthFailed,
    ExchangeError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::NotRunning => "NOT_RUNNING",
            Self::UnknownAsset => "UNKNOWN_ASSET",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::AuthFailed => "AUTH_FAILED",
            Self::ExchangeError => "EXCHANGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<TradingError> for ApiError {
    fn from(e: TradingError) -> Self {
        let code = match e {
            TradingError::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
            TradingError::NotRunning(_) => ErrorCode::NotRunning,
            TradingError::UnknownAsset(_) => ErrorCode::UnknownAsset,
            TradingError::Config(_) => ErrorCode::InvalidRequest,
        };
        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        let code = match e {
            ExchangeError::Auth(_) => ErrorCode::AuthFailed,
            _ => ErrorCode::ExchangeError,
        };
        Self {
            code,
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub asset: Option<Asset>,
    pub op_mode: bool,
    pub holding: bool,
}

#[derive(Clone)]
pub struct TradingApi {
    service: Arc<TradingService>,
    gateway: Arc<dyn ExchangeGateway>,
}

impl TradingApi {
    pub fn new(service: Arc<TradingService>, gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { service, gateway }
    }

    /// `asset` is a currency or market code (`BTC`, `KRW-BTC`).
    pub fn start(&self, user_id: &str, asset: &str, credential: Credential) -> Result<(), ApiError> {
        let asset: Asset = asset.parse()?;
        self.service.start_trading(user_id, asset, credential)?;
        Ok(())
    }

    pub fn stop(&self, user_id: &str) -> Result<(), ApiError> {
        if !self.service.stop_trading(user_id) {
            return Err(TradingError::NotRunning(user_id.to_string()).into());
        }
        Ok(())
    }

    pub fn status(&self, user_id: &str) -> StatusResponse {
        match self.service.status(user_id) {
            Some(s) => StatusResponse {
                running: true,
                asset: Some(s.asset),
                op_mode: s.op_mode,
                holding: s.holding,
            },
            None => StatusResponse {
                running: false,
                asset: None,
                op_mode: false,
                holding: false,
            },
        }
    }

    pub fn history(&self, user_id: &str) -> Vec<TradeRecord> {
        self.service.history(user_id)
    }

    /// Balances of a running user's account, fetched with their own
    /// credential.
    pub async fn accounts(&self, user_id: &str) -> Result<Vec<Balance>, ApiError> {
        let credential = self
            .service
            .credential(user_id)
            .ok_or_else(|| TradingError::NotRunning(user_id.to_string()))?;
        Ok(self.gateway.balances(&credential).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::TradeJournal;
    use crate::position::PositionStateStore;
    use crate::registry::RunningUserRegistry;
    use crate::testkit::RecordingGateway;

    fn api_with(gateway: Arc<RecordingGateway>) -> TradingApi {
        let service = Arc::new(TradingService::new(
            Asset::ALL.to_vec(),
            Arc::new(RunningUserRegistry::new()),
            Arc::new(PositionStateStore::new()),
            Arc::new(TradeJournal::new()),
        ));
        TradingApi::new(service, gateway)
    }

    fn api() -> TradingApi {
        api_with(Arc::new(RecordingGateway::new(0.0, 0.0)))
    }

    #[test]
    fn start_stop_codes() {
        let api = api();
        api.start("alice", "KRW-BTC", Credential::new("k", "s")).unwrap();
        let err = api.start("alice", "BTC", Credential::new("k", "s")).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyRunning);

        api.stop("alice").unwrap();
        let err = api.stop("alice").unwrap_err();
        assert_eq!(err.code, ErrorCode::NotRunning);
    }

    #[test]
    fn unknown_asset_code() {
        let err = api().start("bob", "DOGE", Credential::new("k", "s")).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownAsset);
    }

    #[test]
    fn status_serialises() {
        let api = api();
        api.start("carol", "eth", Credential::new("k", "s")).unwrap();
        let json = serde_json::to_value(api.status("carol")).unwrap();
        assert_eq!(json["running"], true);
        assert_eq!(json["asset"], "ETH");
        assert_eq!(json["op_mode"], true);
        assert_eq!(json["holding"], false);

        let json = serde_json::to_value(api.status("nobody")).unwrap();
        assert_eq!(json["running"], false);
        assert!(json["asset"].is_null());
    }

    #[test]
    fn error_code_wire_form() {
        let err: ApiError = TradingError::AlreadyRunning("x".into()).into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "ALREADY_RUNNING");
        assert_eq!(err.to_string(), "ALREADY_RUNNING: user x is already running");
    }

    #[tokio::test]
    async fn accounts_of_running_user() {
        let api = api_with(Arc::new(RecordingGateway::new(250_000.0, 0.5)));
        let err = api.accounts("dora").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotRunning);

        api.start("dora", "XRP", Credential::new("k", "s")).unwrap();
        let balances = api.accounts("dora").await.unwrap();
        assert_eq!(balances[0].currency, "KRW");
        assert_eq!(balances[0].balance, 250_000.0);
        assert!(balances.iter().any(|b| b.currency == "XRP" && b.balance == 0.5));
    }

    #[test]
    fn exchange_error_codes() {
        let err: ApiError = ExchangeError::Auth("expired".into()).into();
        assert_eq!(err.code, ErrorCode::AuthFailed);
        let err: ApiError = ExchangeError::Network("timeout".into()).into();
        assert_eq!(serde_json::to_value(&err).unwrap()["code"], "EXCHANGE_ERROR");
    }
}
