//! Configuration parsing for the trading system.
//!
//! Everything is read from a single JSON config file. Every section and field
//! has a default, so a minimal file only needs the `users` list.
//!
//! # Example config
//!
//! ```json
//! {
//!   "app": { "module_name": "vb-runner", "log_path": "/tmp/log" },
//!   "strategy": { "assets": ["BTC", "ETH"], "k": 0.5, "stop_loss_ratio": 0.95 },
//!   "schedule": { "target_refresh_at": "09:00:20", "forced_sell_at": "08:59:50" },
//!   "users": [
//!     { "user_id": "alice", "access_key": "...", "secret_key": "...", "asset": "BTC" }
//!   ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveTime;
use serde::Deserialize;

use crate::error::TradingError;
use crate::types::{Asset, Credential};

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    pub app: ModuleMeta,
    pub exchange: ExchangeConfig,
    pub strategy: StrategyConfig,
    pub schedule: ScheduleConfig,
    pub cache: CacheConfig,
    pub refresh: RefreshConfig,
    pub executor: ExecutorConfig,
    pub journal: JournalConfig,
    pub paper: PaperConfig,
    /// Users to start trading automatically (or merely known to the runner).
    pub users: Vec<UserConfig>,
}

/// Module metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// Exchange endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// REST base URL.
    pub rest_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Smallest order the exchange accepts, in quote currency.
    pub min_order_funds: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.upbit.com".into(),
            request_timeout_ms: 5_000,
            min_order_funds: 5_000.0,
        }
    }
}

/// Strategy parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Assets whose prices are tracked and traded.
    pub assets: Vec<Asset>,
    /// Fraction of yesterday's range added to the close for the target.
    pub k: f64,
    /// Stop-loss fires at `target * stop_loss_ratio`.
    pub stop_loss_ratio: f64,
    /// Share of the quote balance committed to a buy (rest covers fees).
    pub fee_ratio: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            assets: Asset::ALL.to_vec(),
            k: 0.5,
            stop_loss_ratio: 0.95,
            fee_ratio: 0.9995,
        }
    }
}

/// Timer settings. Daily times are exchange-local (`utc_offset_hours`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Control-loop tick interval.
    pub poll_interval_ms: u64,
    /// Live price refresh interval.
    pub price_refresh_ms: u64,
    /// Daily target-price refresh time.
    pub target_refresh_at: NaiveTime,
    /// Daily forced liquidation time.
    pub forced_sell_at: NaiveTime,
    /// Status report interval.
    pub report_interval_secs: u64,
    /// Exchange-local offset from UTC in hours (Upbit: +9).
    pub utc_offset_hours: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            price_refresh_ms: 1_000,
            target_refresh_at: NaiveTime::from_hms_opt(9, 0, 20).unwrap_or_default(),
            forced_sell_at: NaiveTime::from_hms_opt(8, 59, 50).unwrap_or_default(),
            report_interval_secs: 3_600,
            utc_offset_hours: 9,
        }
    }
}

impl ScheduleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn price_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.price_refresh_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

/// Price cache time-to-live settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub current_price_ttl_ms: u64,
    pub target_price_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            current_price_ttl_ms: 3_000,
            target_price_ttl_secs: 2 * 24 * 3_600,
        }
    }
}

impl CacheConfig {
    pub fn current_price_ttl(&self) -> Duration {
        Duration::from_millis(self.current_price_ttl_ms)
    }

    pub fn target_price_ttl(&self) -> Duration {
        Duration::from_secs(self.target_price_ttl_secs)
    }
}

/// Retry policy for the daily target refresh.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub max_attempts: u32,
    /// Delay before attempt `n` is `backoff_ms * n`.
    pub backoff_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RefreshConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Order worker pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub workers: usize,
    /// Bounded job queue depth.
    pub queue_depth: usize,
    /// Wait between placing a sell and reading back its settled record.
    pub sell_settle_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_depth: 1_024,
            sell_settle_ms: 10_000,
        }
    }
}

impl ExecutorConfig {
    pub fn sell_settle_delay(&self) -> Duration {
        Duration::from_millis(self.sell_settle_ms)
    }
}

/// In-memory trade history.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Oldest records beyond this count are dropped, per user.
    pub max_records_per_user: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            max_records_per_user: 365,
        }
    }
}

/// Simulated exchange settings (`--paper` mode).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Starting quote balance of every simulated account.
    pub starting_funds: f64,
    /// Fee charged on executed funds.
    pub fee_rate: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_funds: 1_000_000.0,
            fee_rate: 0.0005,
        }
    }
}

/// A configured user and the credential handed to the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub user_id: String,
    pub access_key: String,
    pub secret_key: String,
    pub asset: Asset,
    /// Start trading as soon as the engine is up.
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

fn default_autostart() -> bool {
    true
}

impl UserConfig {
    pub fn credential(&self) -> Credential {
        Credential::new(self.access_key.clone(), self.secret_key.clone())
    }
}

impl AppConfig {
    /// Module name from the metadata block, or `default`.
    pub fn module_name(&self, default: &str) -> String {
        self.app.module_name.clone().unwrap_or_else(|| default.to_string())
    }

    /// Log directory: an explicit override wins over `app.log_path`.
    pub fn log_dir(&self, override_dir: Option<&str>) -> Option<String> {
        override_dir.map(str::to_string).or_else(|| self.app.log_path.clone())
    }

    /// Check value ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), TradingError> {
        let s = &self.strategy;
        if s.assets.is_empty() {
            return Err(TradingError::Config("strategy.assets is empty".into()));
        }
        if !(s.k > 0.0 && s.k.is_finite()) {
            return Err(TradingError::Config(format!("strategy.k must be positive, got {}", s.k)));
        }
        if !(s.stop_loss_ratio > 0.0 && s.stop_loss_ratio < 1.0) {
            return Err(TradingError::Config(format!(
                "strategy.stop_loss_ratio must be in (0, 1), got {}",
                s.stop_loss_ratio
            )));
        }
        if !(s.fee_ratio > 0.0 && s.fee_ratio <= 1.0) {
            return Err(TradingError::Config(format!(
                "strategy.fee_ratio must be in (0, 1], got {}",
                s.fee_ratio
            )));
        }
        if self.schedule.poll_interval_ms == 0 || self.schedule.price_refresh_ms == 0 {
            return Err(TradingError::Config("schedule intervals must be non-zero".into()));
        }
        if self.schedule.report_interval_secs == 0 {
            return Err(TradingError::Config("schedule.report_interval_secs must be non-zero".into()));
        }
        if self.schedule.forced_sell_at == self.schedule.target_refresh_at {
            return Err(TradingError::Config(
                "forced_sell_at and target_refresh_at must differ".into(),
            ));
        }
        if self.refresh.max_attempts == 0 {
            return Err(TradingError::Config("refresh.max_attempts must be at least 1".into()));
        }
        if self.executor.workers == 0 || self.executor.queue_depth == 0 {
            return Err(TradingError::Config("executor.workers and queue_depth must be non-zero".into()));
        }
        if self.journal.max_records_per_user == 0 {
            return Err(TradingError::Config("journal.max_records_per_user must be non-zero".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for user in &self.users {
            if user.user_id.trim().is_empty() {
                return Err(TradingError::Config("user_id must not be empty".into()));
            }
            if !seen.insert(user.user_id.as_str()) {
                return Err(TradingError::Config(format!("duplicate user_id: {}", user.user_id)));
            }
            if !s.assets.contains(&user.asset) {
                return Err(TradingError::Config(format!(
                    "user {} trades {} which is not in strategy.assets",
                    user.user_id, user.asset
                )));
            }
        }
        Ok(())
    }
}

/// Load, parse and validate a JSON config file.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
