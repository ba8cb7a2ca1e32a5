//! Timer bodies that feed the [`PriceCache`] from market data.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{error, info, warn};
use vb_core::Asset;
use vb_core::config::RefreshConfig;
use vb_core::error::ExchangeError;
use vb_exchange::MarketDataSource;

use crate::position::PositionStateStore;
use crate::price_cache::PriceCache;

/// Outcome of a full daily target refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshSummary {
    pub refreshed: Vec<(Asset, f64)>,
    pub failed: Vec<Asset>,
}

pub struct MarketRefresher {
    market: Arc<dyn MarketDataSource>,
    cache: Arc<PriceCache>,
    positions: Arc<PositionStateStore>,
    k: f64,
    retry: RefreshConfig,
}

impl MarketRefresher {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        cache: Arc<PriceCache>,
        positions: Arc<PositionStateStore>,
        k: f64,
        retry: RefreshConfig,
    ) -> Self {
        Self {
            market,
            cache,
            positions,
            k,
            retry,
        }
    }

    /// Poll the ticker once. On failure the previous value is left to expire.
    pub async fn refresh_current_price(&self, asset: Asset) -> bool {
        match self.market.ticker_price(asset).await {
            Ok(price) if price.is_finite() && price > 0.0 => {
                self.cache.set_current_price(asset, price);
                true
            }
            Ok(price) => {
                warn!("[refresh] {asset}: ignoring ticker price {price}");
                false
            }
            Err(e) => {
                warn!("[refresh] {asset}: ticker fetch failed: {e}");
                false
            }
        }
    }

    /// Poll every asset concurrently. Returns how many succeeded.
    pub async fn refresh_current_prices(&self, assets: &[Asset]) -> usize {
        join_all(assets.iter().map(|&a| self.refresh_current_price(a)))
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count()
    }

    /// Recompute today's target from yesterday's candle, with bounded
    /// retries. On success the target is installed, the asset's daily flags
    /// are reset and its disarmed users re-armed. On failure nothing changes.
    pub async fn refresh_target_price(&self, asset: Asset) -> Result<f64, ExchangeError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_err = ExchangeError::MarketDataUnavailable(format!("{asset}: no attempt made"));

        for attempt in 1..=attempts {
            match self.market.daily_candle(asset).await {
                Ok(candle) if candle.is_valid() => {
                    let target = candle.breakout_target(self.k);
                    self.cache.apply_daily_target(asset, target);
                    let rearmed = self.positions.rearm(asset);
                    info!(
                        "[refresh] {asset}: target {target:.0} (close {:.0}, range {:.0}), {rearmed} user(s) re-armed",
                        candle.close,
                        candle.range()
                    );
                    return Ok(target);
                }
                Ok(candle) => {
                    last_err = ExchangeError::MarketDataUnavailable(format!("{asset}: invalid candle {candle:?}"));
                }
                Err(e) if !e.is_transient() => {
                    error!("[refresh] {asset}: target refresh abandoned on attempt {attempt}: {e}");
                    return Err(e);
                }
                Err(e) => last_err = e,
            }
            if attempt < attempts {
                warn!("[refresh] {asset}: attempt {attempt}/{attempts} failed: {last_err}");
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }

        error!("[refresh] {asset}: target refresh abandoned after {attempts} attempt(s): {last_err}");
        Err(last_err)
    }

    /// Refresh every asset concurrently; one asset failing does not affect
    /// the others.
    pub async fn refresh_all_targets(&self, assets: &[Asset]) -> RefreshSummary {
        let results = join_all(assets.iter().map(|&a| async move { (a, self.refresh_target_price(a).await) })).await;
        let mut summary = RefreshSummary::default();
        for (asset, result) in results {
            match result {
                Ok(target) => summary.refreshed.push((asset, target)),
                Err(_) => summary.failed.push(asset),
            }
        }
        self.cache.log_targets(assets);
        summary
    }
}
