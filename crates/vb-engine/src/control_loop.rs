//! The per-second trading decision loop.
//!
//! A tick reads the price cache and the users' flags and decides which
//! orders to dispatch. It performs no I/O: dispatch is a non-blocking
//! enqueue onto the [`OrderExecutor`].

use std::sync::Arc;

use tracing::{debug, info, warn};
use vb_core::Asset;

use crate::coordinator::SchedulerCoordinator;
use crate::executor::{OrderExecutor, SellReason};
use crate::position::PositionStateStore;
use crate::price_cache::{PriceCache, PriceView};
use crate::registry::RunningUserRegistry;

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A daily refresh was running; nothing was evaluated.
    Suspended,
    Completed(TickReport),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Buy jobs enqueued.
    pub buys: usize,
    /// Stop-loss sell jobs enqueued.
    pub stop_losses: usize,
    /// Assets without a usable current or target price.
    pub skipped_assets: usize,
}

pub struct TradingControlLoop {
    assets: Vec<Asset>,
    stop_loss_ratio: f64,
    cache: Arc<PriceCache>,
    positions: Arc<PositionStateStore>,
    registry: Arc<RunningUserRegistry>,
    coordinator: Arc<SchedulerCoordinator>,
    executor: OrderExecutor,
}

impl TradingControlLoop {
    pub fn new(
        assets: Vec<Asset>,
        stop_loss_ratio: f64,
        cache: Arc<PriceCache>,
        positions: Arc<PositionStateStore>,
        registry: Arc<RunningUserRegistry>,
        coordinator: Arc<SchedulerCoordinator>,
        executor: OrderExecutor,
    ) -> Self {
        Self {
            assets,
            stop_loss_ratio,
            cache,
            positions,
            registry,
            coordinator,
            executor,
        }
    }

    /// Evaluate every tracked asset once.
    pub fn tick(&self) -> TickOutcome {
        let Some(_permit) = self.coordinator.try_begin_tick() else {
            debug!("[control-loop] target refresh in progress, tick skipped");
            return TickOutcome::Suspended;
        };

        let mut report = TickReport::default();
        for &asset in &self.assets {
            match self.cache.snapshot(asset) {
                Some(view) => self.evaluate(asset, view, &mut report),
                None => report.skipped_assets += 1,
            }
        }
        TickOutcome::Completed(report)
    }

    fn evaluate(&self, asset: Asset, view: PriceView, report: &mut TickReport) {
        let mut trade_triggered = view.trade_triggered_today;

        // Buy runs first; the stop-loss check reads the flag as updated here.
        if !trade_triggered && view.current_price >= view.target_price {
            let mut dispatched = 0;
            for (user_id, status) in self.positions.for_asset(asset) {
                if !self.registry.contains(&user_id) || !status.can_buy() {
                    continue;
                }
                if self.executor.submit_buy(&user_id, &status) {
                    dispatched += 1;
                }
            }
            self.cache.mark_trade_triggered(asset);
            trade_triggered = true;
            report.buys += dispatched;
            info!(
                "[control-loop] {} breakout: {:.0} >= target {:.0}, {dispatched} buy(s) dispatched",
                asset.display_name(),
                view.current_price,
                view.target_price
            );
        }

        let stop_price = view.target_price * self.stop_loss_ratio;
        if trade_triggered && view.current_price <= stop_price {
            let mut dispatched = 0;
            for (user_id, status) in self.positions.for_asset(asset) {
                if !self.registry.contains(&user_id) || !status.fire_stop_loss() {
                    continue;
                }
                if self.executor.submit_sell(&user_id, &status, SellReason::StopLoss) {
                    dispatched += 1;
                } else {
                    status.rollback_stop_loss();
                }
            }
            if dispatched > 0 {
                self.cache.mark_stop_loss_triggered(asset);
                warn!(
                    "[control-loop] {} stop-loss: {:.0} <= {stop_price:.0}, {dispatched} sell(s) dispatched",
                    asset.display_name(),
                    view.current_price
                );
            }
            report.stop_losses += dispatched;
        }
    }
}
