//! Per-user trading state.
//!
//! One [`TradingStatus`] exists per running user. Each flag is an atomic of
//! its own; there are no multi-field transactions. Two write orders keep the
//! `stop_loss_fired ⇒ !op_mode` invariant visible to concurrent readers:
//! `op_mode` is cleared before `stop_loss_fired` is set, and
//! `stop_loss_fired` is cleared before `op_mode` is set again.
//!
//! Closing a position starts with a compare-and-swap of `op_mode` from
//! `true` to `false`, so a stop-loss and the forced sell can never both
//! dispatch a sell for the same holding.
//!
//! `holding` can only be written from inside this crate by the order
//! executor's completion step.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use ahash::AHashMap;
use serde::Serialize;
use vb_core::Asset;

use crate::UserId;

/// `f64` stored as raw bits.
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
}

/// Trading state of one user on their selected asset.
#[derive(Debug)]
pub struct TradingStatus {
    asset: Asset,
    op_mode: AtomicBool,
    holding: AtomicBool,
    stop_loss_fired: AtomicBool,
    last_buy_funds: AtomicF64,
    last_sell_funds: AtomicF64,
}

/// Point-in-time copy of a [`TradingStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub asset: Asset,
    pub op_mode: bool,
    pub holding: bool,
    pub stop_loss_fired: bool,
    pub last_buy_funds: f64,
    pub last_sell_funds: f64,
}

impl TradingStatus {
    /// Fresh state: armed, flat, no stop-loss.
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            op_mode: AtomicBool::new(true),
            holding: AtomicBool::new(false),
            stop_loss_fired: AtomicBool::new(false),
            last_buy_funds: AtomicF64::default(),
            last_sell_funds: AtomicF64::default(),
        }
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn op_mode(&self) -> bool {
        self.op_mode.load(Ordering::Acquire)
    }

    pub fn holding(&self) -> bool {
        self.holding.load(Ordering::Acquire)
    }

    pub fn stop_loss_fired(&self) -> bool {
        self.stop_loss_fired.load(Ordering::Acquire)
    }

    pub fn last_buy_funds(&self) -> f64 {
        self.last_buy_funds.load()
    }

    pub fn last_sell_funds(&self) -> f64 {
        self.last_sell_funds.load()
    }

    /// Eligible for the breakout buy.
    pub fn can_buy(&self) -> bool {
        self.op_mode() && !self.stop_loss_fired() && !self.holding()
    }

    /// Holding a position that a stop-loss or forced sell may close.
    pub fn can_exit(&self) -> bool {
        self.op_mode() && !self.stop_loss_fired() && self.holding()
    }

    /// Claim the position for a stop-loss sell: disarms the user and marks
    /// today's stop-loss. Only one dispatcher can win the claim on `op_mode`;
    /// returns `false` if the user was not eligible or someone else won.
    pub fn fire_stop_loss(&self) -> bool {
        if !self.can_exit() {
            return false;
        }
        if self
            .op_mode
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.stop_loss_fired.store(true, Ordering::Release);
        true
    }

    /// Undo [`fire_stop_loss`](Self::fire_stop_loss) after a failed sell.
    pub fn rollback_stop_loss(&self) {
        self.stop_loss_fired.store(false, Ordering::Release);
        self.op_mode.store(true, Ordering::Release);
    }

    /// Claim the position for the end-of-day sell by disarming the user.
    /// Same single-winner rule as [`fire_stop_loss`](Self::fire_stop_loss).
    pub fn claim_exit(&self) -> bool {
        if !self.can_exit() {
            return false;
        }
        self.op_mode
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Undo [`claim_exit`](Self::claim_exit) after a failed sell. A
    /// stop-loss fired in between keeps the user disarmed.
    pub fn release_exit(&self) {
        if self.stop_loss_fired() {
            return;
        }
        let _ = self
            .op_mode
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Daily re-arm: a disarmed user becomes eligible again and its
    /// stop-loss mark is cleared. Returns whether anything changed.
    pub fn rearm(&self) -> bool {
        if self.op_mode() {
            return false;
        }
        self.stop_loss_fired.store(false, Ordering::Release);
        self.op_mode.store(true, Ordering::Release);
        true
    }

    #[cfg(test)]
    pub(crate) fn disarm(&self) {
        self.op_mode.store(false, Ordering::Release);
    }

    pub(crate) fn record_buy(&self, locked_funds: f64) {
        self.last_buy_funds.store(locked_funds);
        self.holding.store(true, Ordering::Release);
    }

    pub(crate) fn record_sell(&self, net_funds: Option<f64>) {
        if let Some(funds) = net_funds {
            self.last_sell_funds.store(funds);
        }
        self.holding.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            asset: self.asset,
            op_mode: self.op_mode(),
            holding: self.holding(),
            stop_loss_fired: self.stop_loss_fired(),
            last_buy_funds: self.last_buy_funds(),
            last_sell_funds: self.last_sell_funds(),
        }
    }
}

/// All running users' [`TradingStatus`] entries.
///
/// Entries are handed out as `Arc`s; callers mutate flags through the status
/// itself and never hold the map lock while doing so.
#[derive(Debug, Default)]
pub struct PositionStateStore {
    entries: RwLock<AHashMap<UserId, Arc<TradingStatus>>>,
}

impl PositionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AHashMap<UserId, Arc<TradingStatus>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AHashMap<UserId, Arc<TradingStatus>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Create the user's status if absent; otherwise return the existing one.
    pub fn ensure(&self, user_id: &str, asset: Asset) -> Arc<TradingStatus> {
        Arc::clone(
            self.write()
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(TradingStatus::new(asset))),
        )
    }

    /// Drop the user's state. Returns whether an entry existed.
    pub fn remove(&self, user_id: &str) -> bool {
        self.write().remove(user_id).is_some()
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<TradingStatus>> {
        self.read().get(user_id).cloned()
    }

    /// Whether `status` is still the live entry for `user_id`.
    pub fn is_current(&self, user_id: &str, status: &Arc<TradingStatus>) -> bool {
        self.read().get(user_id).is_some_and(|s| Arc::ptr_eq(s, status))
    }

    /// Users trading `asset`, cloned out of the lock.
    pub fn for_asset(&self, asset: Asset) -> Vec<(UserId, Arc<TradingStatus>)> {
        self.read()
            .iter()
            .filter(|(_, s)| s.asset() == asset)
            .map(|(u, s)| (u.clone(), Arc::clone(s)))
            .collect()
    }

    /// Every entry, cloned out of the lock.
    pub fn all(&self) -> Vec<(UserId, Arc<TradingStatus>)> {
        self.read().iter().map(|(u, s)| (u.clone(), Arc::clone(s))).collect()
    }

    /// Point-in-time copy of every entry, sorted by user id.
    pub fn snapshot(&self) -> Vec<(UserId, StatusSnapshot)> {
        let mut out: Vec<_> = self.read().iter().map(|(u, s)| (u.clone(), s.snapshot())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Re-arm every disarmed user of `asset`. Returns how many changed.
    pub fn rearm(&self, asset: Asset) -> usize {
        self.for_asset(asset).iter().filter(|(_, s)| s.rearm()).count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent() {
        let store = PositionStateStore::new();
        let a = store.ensure("alice", Asset::Btc);
        a.disarm();
        let b = store.ensure("alice", Asset::Eth);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.asset(), Asset::Btc);
        assert!(!b.op_mode());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn new_status_is_armed_and_flat() {
        let s = TradingStatus::new(Asset::Xrp);
        assert!(s.op_mode());
        assert!(!s.holding());
        assert!(!s.stop_loss_fired());
        assert!(s.can_buy());
        assert!(!s.can_exit());
    }

    #[test]
    fn remove_twice_is_harmless() {
        let store = PositionStateStore::new();
        store.ensure("bob", Asset::Eth);
        assert!(store.remove("bob"));
        assert!(!store.remove("bob"));
        assert!(store.get("bob").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn stop_loss_keeps_invariant() {
        let s = TradingStatus::new(Asset::Btc);
        s.record_buy(100_000.0);
        assert!(s.can_exit());

        assert!(s.fire_stop_loss());
        assert!(s.stop_loss_fired());
        assert!(!s.op_mode());
        assert!(!s.can_exit());

        s.rollback_stop_loss();
        assert!(s.can_exit());
    }

    #[test]
    fn flat_user_cannot_be_claimed() {
        let s = TradingStatus::new(Asset::Btc);
        assert!(!s.fire_stop_loss());
        assert!(!s.claim_exit());
        assert!(s.op_mode());
        assert!(!s.stop_loss_fired());
    }

    #[test]
    fn exit_claims_are_exclusive() {
        let s = TradingStatus::new(Asset::Eth);
        s.record_buy(1.0);
        assert!(s.claim_exit());
        assert!(!s.fire_stop_loss());
        assert!(!s.claim_exit());
        assert!(!s.stop_loss_fired());

        let t = TradingStatus::new(Asset::Eth);
        t.record_buy(1.0);
        assert!(t.fire_stop_loss());
        assert!(!t.claim_exit());
        assert!(t.stop_loss_fired() && !t.op_mode());
    }

    #[test]
    fn release_exit_respects_fired_stop_loss() {
        let s = TradingStatus::new(Asset::Btc);
        s.record_buy(1.0);
        assert!(s.claim_exit());
        s.release_exit();
        assert!(s.can_exit());

        // Re-armed mid-flight, then stopped out before the forced sell failed.
        assert!(s.claim_exit());
        assert!(s.rearm());
        assert!(s.fire_stop_loss());
        s.release_exit();
        assert!(s.stop_loss_fired());
        assert!(!s.op_mode());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        for _ in 0..200 {
            let s = Arc::new(TradingStatus::new(Asset::Xrp));
            s.record_buy(1.0);
            let wins: usize = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..4)
                    .map(|i| {
                        let s = &s;
                        scope.spawn(move || if i % 2 == 0 { s.fire_stop_loss() } else { s.claim_exit() })
                    })
                    .collect();
                handles.into_iter().map(|h| usize::from(h.join().unwrap())).sum()
            });
            assert_eq!(wins, 1);
            assert!(!s.op_mode());
            assert!(!(s.stop_loss_fired() && s.op_mode()));
        }
    }

    #[test]
    fn rearm_only_touches_disarmed_users_of_asset() {
        let store = PositionStateStore::new();
        let a = store.ensure("a", Asset::Btc);
        let b = store.ensure("b", Asset::Btc);
        let c = store.ensure("c", Asset::Eth);
        a.record_buy(1.0);
        assert!(a.fire_stop_loss());
        c.disarm();

        assert_eq!(store.rearm(Asset::Btc), 1);
        assert!(a.op_mode() && !a.stop_loss_fired());
        assert!(b.op_mode());
        assert!(!c.op_mode());
    }

    #[test]
    fn snapshot_is_sorted() {
        let store = PositionStateStore::new();
        store.ensure("zed", Asset::Xrp);
        store.ensure("amy", Asset::Btc).record_buy(10.0);
        let snap = store.snapshot();
        assert_eq!(snap[0].0, "amy");
        assert!(snap[0].1.holding);
        assert_eq!(snap[1].1.asset, Asset::Xrp);
    }

    #[test]
    fn identity_check_detects_replacement() {
        let store = PositionStateStore::new();
        let old = store.ensure("u", Asset::Btc);
        assert!(store.is_current("u", &old));
        store.remove("u");
        let new = store.ensure("u", Asset::Btc);
        assert!(!store.is_current("u", &old));
        assert!(store.is_current("u", &new));
    }

    #[test]
    fn buy_and_sell_records() {
        let s = TradingStatus::new(Asset::Btc);
        s.record_buy(500_250.0);
        assert!(s.holding());
        s.record_sell(Some(510_000.0));
        let snap = s.snapshot();
        assert!(!snap.holding);
        assert_eq!(snap.last_buy_funds, 500_250.0);
        assert_eq!(snap.last_sell_funds, 510_000.0);
    }
}
