//! Bodies of the scheduled tasks.
//!
//! Every job swallows its own failures (logging them), so a bad run never
//! takes its timer down.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use vb_core::Asset;

use crate::control_loop::{TickOutcome, TradingControlLoop};
use crate::coordinator::SchedulerCoordinator;
use crate::executor::{OrderExecutor, SellReason};
use crate::position::PositionStateStore;
use crate::price_cache::PriceCache;
use crate::refresh::MarketRefresher;
use crate::registry::RunningUserRegistry;

/// A unit of work fired by the [`Scheduler`](crate::scheduler::Scheduler).
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self);
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

/// One control-loop tick.
pub struct PollJob {
    control: Arc<TradingControlLoop>,
}

impl PollJob {
    pub fn new(control: Arc<TradingControlLoop>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl Job for PollJob {
    fn name(&self) -> &str {
        "poll"
    }

    async fn run(&self) {
        if let TickOutcome::Completed(report) = self.control.tick() {
            if report.buys + report.stop_losses > 0 {
                info!(
                    "[poll] tick dispatched {} buy(s), {} stop-loss(es)",
                    report.buys, report.stop_losses
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Price refresh
// ---------------------------------------------------------------------------

/// Live price poll for every tracked asset.
pub struct PriceRefreshJob {
    refresher: Arc<MarketRefresher>,
    assets: Vec<Asset>,
}

impl PriceRefreshJob {
    pub fn new(refresher: Arc<MarketRefresher>, assets: Vec<Asset>) -> Self {
        Self { refresher, assets }
    }
}

#[async_trait]
impl Job for PriceRefreshJob {
    fn name(&self) -> &str {
        "price-refresh"
    }

    async fn run(&self) {
        self.refresher.refresh_current_prices(&self.assets).await;
    }
}

// ---------------------------------------------------------------------------
// Daily target refresh
// ---------------------------------------------------------------------------

/// Recompute every target price with control-loop ticks suspended.
pub struct TargetRefreshJob {
    refresher: Arc<MarketRefresher>,
    coordinator: Arc<SchedulerCoordinator>,
    assets: Vec<Asset>,
}

impl TargetRefreshJob {
    pub fn new(refresher: Arc<MarketRefresher>, coordinator: Arc<SchedulerCoordinator>, assets: Vec<Asset>) -> Self {
        Self {
            refresher,
            coordinator,
            assets,
        }
    }
}

#[async_trait]
impl Job for TargetRefreshJob {
    fn name(&self) -> &str {
        "target-refresh"
    }

    async fn run(&self) {
        let Some(_guard) = self.coordinator.try_begin_refresh() else {
            warn!("[target-refresh] previous refresh still running, skipped");
            return;
        };
        let summary = self.refresher.refresh_all_targets(&self.assets).await;
        info!(
            "[target-refresh] done: {} refreshed, {} failed",
            summary.refreshed.len(),
            summary.failed.len()
        );
    }
}

// ---------------------------------------------------------------------------
// Forced end-of-day sell
// ---------------------------------------------------------------------------

/// Liquidate every open position ahead of the next target refresh.
pub struct ForcedSellJob {
    positions: Arc<PositionStateStore>,
    registry: Arc<RunningUserRegistry>,
    coordinator: Arc<SchedulerCoordinator>,
    executor: OrderExecutor,
}

impl ForcedSellJob {
    pub fn new(
        positions: Arc<PositionStateStore>,
        registry: Arc<RunningUserRegistry>,
        coordinator: Arc<SchedulerCoordinator>,
        executor: OrderExecutor,
    ) -> Self {
        Self {
            positions,
            registry,
            coordinator,
            executor,
        }
    }

    /// Dispatch an end-of-day sell for every eligible holder. `holding` is
    /// cleared later by the sell completion. Returns how many were queued.
    ///
    /// Runs under the coordinator's scan lock, so no tick interleaves.
    pub fn liquidate(&self) -> usize {
        let _scan = self.coordinator.begin_liquidation();
        let mut dispatched = 0;
        for (user_id, status) in self.positions.all() {
            if !self.registry.contains(&user_id) || !status.claim_exit() {
                continue;
            }
            if self.executor.submit_sell(&user_id, &status, SellReason::EndOfDay) {
                dispatched += 1;
            } else {
                status.release_exit();
            }
        }
        dispatched
    }
}

#[async_trait]
impl Job for ForcedSellJob {
    fn name(&self) -> &str {
        "forced-sell"
    }

    async fn run(&self) {
        let n = self.liquidate();
        info!("[forced-sell] {n} end-of-day sell(s) dispatched");
    }
}

// ---------------------------------------------------------------------------
// Status report
// ---------------------------------------------------------------------------

/// Periodic read-only dump of user states and target prices.
pub struct StatusReportJob {
    positions: Arc<PositionStateStore>,
    registry: Arc<RunningUserRegistry>,
    cache: Arc<PriceCache>,
    assets: Vec<Asset>,
}

impl StatusReportJob {
    pub fn new(
        positions: Arc<PositionStateStore>,
        registry: Arc<RunningUserRegistry>,
        cache: Arc<PriceCache>,
        assets: Vec<Asset>,
    ) -> Self {
        Self {
            positions,
            registry,
            cache,
            assets,
        }
    }
}

#[async_trait]
impl Job for StatusReportJob {
    fn name(&self) -> &str {
        "status-report"
    }

    async fn run(&self) {
        info!("[status] {} running user(s)", self.registry.len());
        for (user_id, s) in self.positions.snapshot() {
            info!(
                "[status] {user_id}: {} op_mode={} holding={} stop_loss_fired={}",
                s.asset, s.op_mode, s.holding, s.stop_loss_fired
            );
        }
        self.cache.log_targets(&self.assets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use vb_core::config::RefreshConfig;
    use vb_core::trading::{Credential, Side};

    use crate::clock::ManualClock;
    use crate::executor::{ExecutionEvent, ExecutorSettings};
    use crate::journal::TradeJournal;
    use crate::testkit::{RecordingGateway, ScriptedMarket, kst};

    fn executor(
        gateway: Arc<RecordingGateway>,
        positions: Arc<PositionStateStore>,
        registry: Arc<RunningUserRegistry>,
    ) -> (OrderExecutor, crate::executor::ExecutionEventReceiver) {
        let settings = ExecutorSettings {
            workers: 1,
            queue_depth: 8,
            fee_ratio: 0.9995,
            min_order_funds: 5_000.0,
            sell_settle_delay: Duration::ZERO,
        };
        OrderExecutor::start(
            settings,
            gateway,
            positions,
            registry,
            Arc::new(TradeJournal::new()),
            Arc::new(ManualClock::new(kst(8, 59, 50))),
        )
    }

    #[tokio::test]
    async fn forced_sell_closes_holders_only() {
        let gateway = Arc::new(RecordingGateway::new(0.0, 2.0));
        gateway.set_sell_proceeds(100_000.0);
        let positions = Arc::new(PositionStateStore::new());
        let registry = Arc::new(RunningUserRegistry::new());
        let (exec, mut events) = executor(gateway.clone(), positions.clone(), registry.clone());

        for id in ["holder", "flat", "stopped"] {
            registry.register(id, Credential::new(id, "s")).unwrap();
        }
        let holder = positions.ensure("holder", Asset::Btc);
        holder.record_buy(90_000.0);
        let flat = positions.ensure("flat", Asset::Btc);
        let stopped = positions.ensure("stopped", Asset::Btc);
        stopped.record_buy(90_000.0);
        assert!(stopped.fire_stop_loss());

        let coordinator = Arc::new(SchedulerCoordinator::new());
        let job = ForcedSellJob::new(positions.clone(), registry.clone(), coordinator, exec);
        assert_eq!(job.liquidate(), 1);
        assert!(!holder.op_mode());

        match events.recv().await.unwrap() {
            ExecutionEvent::Sold { user_id, reason, .. } => {
                assert_eq!(user_id, "holder");
                assert_eq!(reason, SellReason::EndOfDay);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!holder.holding());
        assert!(!holder.op_mode());
        assert!(flat.op_mode() && !flat.holding());
        assert!(stopped.holding());
        assert_eq!(gateway.calls_by_side(Side::Ask), 1);
    }

    #[tokio::test]
    async fn liquidation_waits_for_running_tick() {
        let gateway = Arc::new(RecordingGateway::new(0.0, 1.0));
        let positions = Arc::new(PositionStateStore::new());
        let registry = Arc::new(RunningUserRegistry::new());
        let coordinator = Arc::new(SchedulerCoordinator::new());
        let (exec, _events) = executor(gateway, positions.clone(), registry.clone());
        registry.register("holder", Credential::new("holder", "s")).unwrap();
        positions.ensure("holder", Asset::Eth).record_buy(1.0);
        let job = Arc::new(ForcedSellJob::new(positions, registry, coordinator.clone(), exec));

        let permit = coordinator.try_begin_tick().unwrap();
        let job2 = Arc::clone(&job);
        let handle = std::thread::spawn(move || job2.liquidate());
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        drop(permit);
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[tokio::test]
    async fn target_refresh_skips_when_already_refreshing() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_candle(Asset::Btc, 2.0, 1.0, 1.0);
        let cache = Arc::new(PriceCache::new(
            Arc::new(ManualClock::new(kst(9, 0, 20))),
            Duration::from_secs(3),
            Duration::from_secs(86_400),
        ));
        let positions = Arc::new(PositionStateStore::new());
        let refresher = Arc::new(MarketRefresher::new(
            market.clone(),
            cache.clone(),
            positions,
            0.5,
            RefreshConfig::default(),
        ));
        let coordinator = Arc::new(SchedulerCoordinator::new());
        let job = TargetRefreshJob::new(refresher, coordinator.clone(), vec![Asset::Btc]);

        {
            let _held = coordinator.try_begin_refresh().unwrap();
            job.run().await;
            assert_eq!(market.candle_calls(), 0);
        }

        job.run().await;
        assert_eq!(cache.target_price(Asset::Btc), Some(1.5));
        assert!(!coordinator.is_refreshing());
    }
}
