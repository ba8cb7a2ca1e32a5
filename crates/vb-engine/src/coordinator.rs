//! Mutual exclusion between the daily target refresh and control-loop ticks.
//!
//! A tick holds a [`TickPermit`] for its whole scan; the refresh holds a
//! [`RefreshGuard`]. While the guard lives no new permit is issued, and the
//! guard is only handed out after any in-flight tick has finished, so a tick
//! never observes a half-applied daily reset.
//!
//! The end-of-day liquidation scans under the same lock as a tick, so it
//! never runs concurrently with one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

/// Shared between the scheduler's jobs.
#[derive(Debug, Default)]
pub struct SchedulerCoordinator {
    refresh_in_progress: AtomicBool,
    scan: Mutex<()>,
}

/// Held by a control-loop tick while it scans.
#[derive(Debug)]
pub struct TickPermit<'a> {
    _scan: MutexGuard<'a, ()>,
}

/// Held by the target refresh; clears the in-progress flag on drop, also
/// when the refresh panics or returns early.
#[derive(Debug)]
pub struct RefreshGuard<'a> {
    coordinator: &'a SchedulerCoordinator,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.refresh_in_progress.store(false, Ordering::Release);
        debug!("[coordinator] refresh finished, ticks resume");
    }
}

impl SchedulerCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_in_progress.load(Ordering::Acquire)
    }

    /// Permit for one tick, or `None` while a refresh is running.
    pub fn try_begin_tick(&self) -> Option<TickPermit<'_>> {
        if self.is_refreshing() {
            return None;
        }
        let scan = self.scan.lock().unwrap_or_else(|e| e.into_inner());
        // A refresh may have started while we waited for the lock.
        if self.is_refreshing() {
            return None;
        }
        Some(TickPermit { _scan: scan })
    }

    /// Exclusive scan for the end-of-day liquidation. Waits for an in-flight
    /// tick; unlike [`try_begin_tick`](Self::try_begin_tick) it is not
    /// refused while a refresh runs.
    pub fn begin_liquidation(&self) -> TickPermit<'_> {
        TickPermit {
            _scan: self.scan.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Enter the refresh section. Returns `None` if another refresh already
    /// holds it. Blocks until the in-flight tick, if any, has finished.
    pub fn try_begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        self.refresh_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let guard = RefreshGuard { coordinator: self };
        drop(self.scan.lock().unwrap_or_else(|e| e.into_inner()));
        debug!("[coordinator] refresh started, ticks suspended");
        Some(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn ticks_are_refused_during_refresh() {
        let c = SchedulerCoordinator::new();
        {
            let _g = c.try_begin_refresh().unwrap();
            assert!(c.is_refreshing());
            assert!(c.try_begin_tick().is_none());
            assert!(c.try_begin_refresh().is_none());
        }
        assert!(!c.is_refreshing());
        assert!(c.try_begin_tick().is_some());
    }

    #[test]
    fn liquidation_excludes_ticks() {
        let c = Arc::new(SchedulerCoordinator::new());
        let permit = c.try_begin_tick().unwrap();

        let c2 = Arc::clone(&c);
        let handle = std::thread::spawn(move || {
            let _scan = c2.begin_liquidation();
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        drop(permit);
        handle.join().unwrap();

        // Not blocked by a running refresh.
        let _g = c.try_begin_refresh().unwrap();
        let _scan = c.begin_liquidation();
    }

    #[test]
    fn guard_clears_flag_on_panic() {
        let c = Arc::new(SchedulerCoordinator::new());
        let c2 = Arc::clone(&c);
        let res = std::thread::spawn(move || {
            let _g = c2.try_begin_refresh().unwrap();
            panic!("refresh blew up");
        })
        .join();
        assert!(res.is_err());
        assert!(!c.is_refreshing());
    }

    #[test]
    fn refresh_waits_for_in_flight_tick() {
        let c = Arc::new(SchedulerCoordinator::new());
        let permit = c.try_begin_tick().unwrap();

        let c2 = Arc::clone(&c);
        let handle = std::thread::spawn(move || {
            let _g = c2.try_begin_refresh().unwrap();
            // Must only get here once the tick released its permit.
            true
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        drop(permit);
        assert!(handle.join().unwrap());
    }
}
