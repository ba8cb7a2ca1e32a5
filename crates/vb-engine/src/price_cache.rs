//! Process-wide per-asset price cache.
//!
//! Each entry holds the last polled live price, the daily breakout target,
//! and the two one-shot daily flags. Values carry an expiry instead of being
//! deleted, and an expired value reads as absent: the control loop must treat
//! a missing price as "unavailable", never as zero.
//!
//! The daily flags are only ever reset by [`PriceCache::apply_daily_target`],
//! inside the same write lock that installs the new target.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, FixedOffset};
use tracing::info;
use vb_core::Asset;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy)]
struct Expiring {
    value: f64,
    expires_at: DateTime<FixedOffset>,
}

impl Expiring {
    fn live(&self, now: DateTime<FixedOffset>) -> Option<f64> {
        (now < self.expires_at).then_some(self.value)
    }
}

#[derive(Debug, Default)]
struct CacheEntry {
    current: Option<Expiring>,
    target: Option<Expiring>,
    trade_triggered_today: bool,
    stop_loss_triggered_today: bool,
}

/// Consistent read of one asset's entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceView {
    pub current_price: f64,
    pub target_price: f64,
    pub trade_triggered_today: bool,
    pub stop_loss_triggered_today: bool,
}

/// Shared price store. One writer (refresh timers) and one reader (the
/// control loop) per asset.
pub struct PriceCache {
    entries: RwLock<AHashMap<Asset, CacheEntry>>,
    clock: Arc<dyn Clock>,
    current_ttl: chrono::Duration,
    target_ttl: chrono::Duration,
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}

impl PriceCache {
    pub fn new(clock: Arc<dyn Clock>, current_ttl: Duration, target_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            clock,
            current_ttl: to_chrono(current_ttl),
            target_ttl: to_chrono(target_ttl),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AHashMap<Asset, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AHashMap<Asset, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a freshly polled live price.
    pub fn set_current_price(&self, asset: Asset, price: f64) {
        let expires_at = self.clock.now() + self.current_ttl;
        self.write().entry(asset).or_default().current = Some(Expiring { value: price, expires_at });
    }

    /// Install a new daily target and reset both daily flags together.
    pub fn apply_daily_target(&self, asset: Asset, target: f64) {
        let expires_at = self.clock.now() + self.target_ttl;
        let mut entries = self.write();
        let entry = entries.entry(asset).or_default();
        entry.target = Some(Expiring { value: target, expires_at });
        entry.trade_triggered_today = false;
        entry.stop_loss_triggered_today = false;
    }

    /// Live price, if one was polled within the TTL.
    pub fn current_price(&self, asset: Asset) -> Option<f64> {
        let now = self.clock.now();
        self.read().get(&asset)?.current?.live(now)
    }

    /// Today's target, if one is cached and not expired.
    pub fn target_price(&self, asset: Asset) -> Option<f64> {
        let now = self.clock.now();
        self.read().get(&asset)?.target?.live(now)
    }

    /// Everything the control loop needs for one asset, or `None` when either
    /// price is missing or expired.
    pub fn snapshot(&self, asset: Asset) -> Option<PriceView> {
        let now = self.clock.now();
        let entries = self.read();
        let entry = entries.get(&asset)?;
        Some(PriceView {
            current_price: entry.current?.live(now)?,
            target_price: entry.target?.live(now)?,
            trade_triggered_today: entry.trade_triggered_today,
            stop_loss_triggered_today: entry.stop_loss_triggered_today,
        })
    }

    pub fn trade_triggered_today(&self, asset: Asset) -> bool {
        self.read().get(&asset).is_some_and(|e| e.trade_triggered_today)
    }

    pub fn stop_loss_triggered_today(&self, asset: Asset) -> bool {
        self.read().get(&asset).is_some_and(|e| e.stop_loss_triggered_today)
    }

    /// Close today's buy window for `asset`.
    pub fn mark_trade_triggered(&self, asset: Asset) {
        self.write().entry(asset).or_default().trade_triggered_today = true;
    }

    pub fn mark_stop_loss_triggered(&self, asset: Asset) {
        self.write().entry(asset).or_default().stop_loss_triggered_today = true;
    }

    /// Log every cached target price as one block.
    pub fn log_targets(&self, assets: &[Asset]) {
        info!("[price-cache] ----- target prices -----");
        for &asset in assets {
            match self.target_price(asset) {
                Some(t) => info!("[price-cache] {} ({asset}): {t:.0}", asset.display_name()),
                None => info!("[price-cache] {} ({asset}): unavailable", asset.display_name()),
            }
        }
        info!("[price-cache] -------------------------");
    }
}
