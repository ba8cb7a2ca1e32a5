//! Wiring of all engine components.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vb_core::Asset;
use vb_core::config::AppConfig;
use vb_exchange::{ExchangeGateway, MarketDataSource};

use crate::api::TradingApi;
use crate::clock::Clock;
use crate::control_loop::TradingControlLoop;
use crate::coordinator::SchedulerCoordinator;
use crate::executor::{ExecutionEvent, ExecutionEventReceiver, ExecutorSettings, OrderExecutor};
use crate::jobs::{ForcedSellJob, Job, PollJob, PriceRefreshJob, StatusReportJob, TargetRefreshJob};
use crate::journal::TradeJournal;
use crate::position::PositionStateStore;
use crate::price_cache::PriceCache;
use crate::refresh::{MarketRefresher, RefreshSummary};
use crate::registry::RunningUserRegistry;
use crate::scheduler::{Schedule, ScheduledTask, Scheduler};
use crate::service::TradingService;

/// The whole trading engine.
///
/// # Lifecycle
///
/// 1. [`Engine::new`] inside a tokio runtime (spawns the order workers).
/// 2. Optionally [`take_events`](Engine::take_events) to observe executions.
/// 3. [`prime`](Engine::prime) to load prices before the first tick.
/// 4. [`start`](Engine::start) the timers.
/// 5. [`stop`](Engine::stop); safe to call more than once.
pub struct Engine {
    config: AppConfig,
    assets: Vec<Asset>,
    cache: Arc<PriceCache>,
    positions: Arc<PositionStateStore>,
    registry: Arc<RunningUserRegistry>,
    coordinator: Arc<SchedulerCoordinator>,
    refresher: Arc<MarketRefresher>,
    executor: OrderExecutor,
    control: Arc<TradingControlLoop>,
    service: Arc<TradingService>,
    gateway: Arc<dyn ExchangeGateway>,
    scheduler: Scheduler,
    events: Option<ExecutionEventReceiver>,
    event_drain: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        config: &AppConfig,
        market: Arc<dyn MarketDataSource>,
        gateway: Arc<dyn ExchangeGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let assets = config.strategy.assets.clone();

        let cache = Arc::new(PriceCache::new(
            Arc::clone(&clock),
            config.cache.current_price_ttl(),
            config.cache.target_price_ttl(),
        ));
        let positions = Arc::new(PositionStateStore::new());
        let registry = Arc::new(RunningUserRegistry::new());
        let coordinator = Arc::new(SchedulerCoordinator::new());
        let journal = Arc::new(TradeJournal::with_limit(config.journal.max_records_per_user));

        let refresher = Arc::new(MarketRefresher::new(
            market,
            Arc::clone(&cache),
            Arc::clone(&positions),
            config.strategy.k,
            config.refresh.clone(),
        ));
        let (executor, events) = OrderExecutor::start(
            ExecutorSettings::from_config(config),
            Arc::clone(&gateway),
            Arc::clone(&positions),
            Arc::clone(&registry),
            Arc::clone(&journal),
            Arc::clone(&clock),
        );
        let control = Arc::new(TradingControlLoop::new(
            assets.clone(),
            config.strategy.stop_loss_ratio,
            Arc::clone(&cache),
            Arc::clone(&positions),
            Arc::clone(&registry),
            Arc::clone(&coordinator),
            executor.clone(),
        ));
        let service = Arc::new(TradingService::new(
            assets.clone(),
            Arc::clone(&registry),
            Arc::clone(&positions),
            journal,
        ));

        info!(
            "[engine] tracking {} asset(s), k={}, stop-loss at {:.0}% of target",
            assets.len(),
            config.strategy.k,
            config.strategy.stop_loss_ratio * 100.0
        );

        Ok(Self {
            config: config.clone(),
            assets,
            cache,
            positions,
            registry,
            coordinator,
            refresher,
            executor,
            control,
            service,
            gateway,
            scheduler: Scheduler::new(clock),
            events: Some(events),
            event_drain: None,
        })
    }

    /// Execution events. If nobody takes them before [`start`](Self::start),
    /// the engine drains them into the log.
    pub fn take_events(&mut self) -> Option<ExecutionEventReceiver> {
        self.events.take()
    }

    /// Load current and target prices once so the first tick has data.
    pub async fn prime(&self) -> RefreshSummary {
        let prices = self.refresher.refresh_current_prices(&self.assets).await;
        let summary = self.refresher.refresh_all_targets(&self.assets).await;
        info!(
            "[engine] primed: {prices}/{} live price(s), {} target(s), {} failed",
            self.assets.len(),
            summary.refreshed.len(),
            summary.failed.len()
        );
        summary
    }

    /// The timer tasks the engine runs, in start order.
    pub fn tasks(&self) -> Vec<ScheduledTask> {
        let schedule = &self.config.schedule;
        let jobs: Vec<(Schedule, Arc<dyn Job>)> = vec![
            (
                Schedule::Every(schedule.price_refresh_interval()),
                Arc::new(PriceRefreshJob::new(Arc::clone(&self.refresher), self.assets.clone())),
            ),
            (
                Schedule::Every(schedule.poll_interval()),
                Arc::new(PollJob::new(Arc::clone(&self.control))),
            ),
            (
                Schedule::DailyAt(schedule.target_refresh_at),
                Arc::new(TargetRefreshJob::new(
                    Arc::clone(&self.refresher),
                    Arc::clone(&self.coordinator),
                    self.assets.clone(),
                )),
            ),
            (
                Schedule::DailyAt(schedule.forced_sell_at),
                Arc::new(ForcedSellJob::new(
                    Arc::clone(&self.positions),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.coordinator),
                    self.executor.clone(),
                )),
            ),
            (
                Schedule::Every(schedule.report_interval()),
                Arc::new(StatusReportJob::new(
                    Arc::clone(&self.positions),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.cache),
                    self.assets.clone(),
                )),
            ),
        ];
        jobs.into_iter().map(|(s, job)| ScheduledTask::new(s, job)).collect()
    }

    /// Start every timer. Calling it again while running is a no-op.
    pub fn start(&mut self) {
        if !self.scheduler.is_empty() {
            warn!("[engine] already started");
            return;
        }
        if let Some(mut events) = self.events.take() {
            self.event_drain = Some(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    log_event(&event);
                }
            }));
        }
        for task in self.tasks() {
            self.scheduler.spawn(task);
        }
        info!("[engine] started {} timer task(s)", self.scheduler.len());
    }

    /// Stop timers and order workers. Idempotent.
    pub fn stop(&mut self) {
        self.scheduler.stop();
        self.executor.stop();
        if let Some(drain) = self.event_drain.take() {
            drain.abort();
        }
        info!("[engine] stopped");
    }

    pub fn api(&self) -> TradingApi {
        TradingApi::new(Arc::clone(&self.service), Arc::clone(&self.gateway))
    }

    pub fn service(&self) -> Arc<TradingService> {
        Arc::clone(&self.service)
    }

    pub fn control_loop(&self) -> Arc<TradingControlLoop> {
        Arc::clone(&self.control)
    }

    pub fn cache(&self) -> Arc<PriceCache> {
        Arc::clone(&self.cache)
    }

    pub fn coordinator(&self) -> Arc<SchedulerCoordinator> {
        Arc::clone(&self.coordinator)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.executor.stop();
        if let Some(drain) = self.event_drain.take() {
            drain.abort();
        }
    }
}

fn log_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::Failed { user_id, intent, error, .. } => {
            warn!("[engine] {user_id}: {intent:?} failed: {error}")
        }
        other => debug!("[engine] {other:?}"),
    }
}
