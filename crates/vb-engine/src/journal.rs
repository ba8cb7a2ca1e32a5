//! In-memory journal of completed round trips.
//!
//! Records are kept per user in a ring: once a user has `max_per_user`
//! entries the oldest one is dropped for each new one.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use ahash::AHashMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;
use vb_core::Asset;
use vb_core::config::JournalConfig;

use crate::UserId;
use crate::executor::SellReason;

/// One closed position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub user_id: UserId,
    pub trading_day: NaiveDate,
    pub asset: Asset,
    pub reason: SellReason,
    /// Quote funds locked by the buy.
    pub buy_funds: f64,
    /// Net proceeds of the sell, when the exchange reported them.
    pub sell_funds: Option<f64>,
    /// `sell / buy - 1`, when both sides are known.
    pub return_rate: Option<f64>,
}

impl TradeRecord {
    pub fn new(
        user_id: impl Into<UserId>,
        trading_day: NaiveDate,
        asset: Asset,
        reason: SellReason,
        buy_funds: f64,
        sell_funds: Option<f64>,
    ) -> Self {
        let return_rate = sell_funds.filter(|_| buy_funds > 0.0).map(|s| s / buy_funds - 1.0);
        Self {
            user_id: user_id.into(),
            trading_day,
            asset,
            reason,
            buy_funds,
            sell_funds,
            return_rate,
        }
    }
}

/// Bounded per-user history of [`TradeRecord`]s.
#[derive(Debug)]
pub struct TradeJournal {
    max_per_user: usize,
    records: Mutex<AHashMap<UserId, VecDeque<TradeRecord>>>,
}

impl Default for TradeJournal {
    fn default() -> Self {
        Self::with_limit(JournalConfig::default().max_records_per_user)
    }
}

impl TradeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_per_user` records per user (at least one).
    pub fn with_limit(max_per_user: usize) -> Self {
        Self {
            max_per_user: max_per_user.max(1),
            records: Mutex::new(AHashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AHashMap<UserId, VecDeque<TradeRecord>>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, record: TradeRecord) {
        match record.return_rate {
            Some(r) => info!(
                "[journal] {} {} {:?}: buy={:.0} sell={:.0} return={:+.2}%",
                record.user_id,
                record.asset,
                record.reason,
                record.buy_funds,
                record.sell_funds.unwrap_or_default(),
                r * 100.0
            ),
            None => info!(
                "[journal] {} {} {:?}: buy={:.0} sell=unknown",
                record.user_id, record.asset, record.reason, record.buy_funds
            ),
        }
        let mut records = self.lock();
        let history = records.entry(record.user_id.clone()).or_default();
        if history.len() == self.max_per_user {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Records of `user_id`, oldest first.
    pub fn history(&self, user_id: &str) -> Vec<TradeRecord> {
        self.lock()
            .get(user_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
