//! Asynchronous order execution.
//!
//! The control loop and the forced-sell job never talk to the exchange
//! themselves. They enqueue an [`OrderJob`] with
//! [`OrderExecutor::submit_buy`] / [`OrderExecutor::submit_sell`], which only
//! does a non-blocking `try_send`. A fixed pool of workers drains the bounded
//! queue and runs each job through three stages:
//!
//! 1. **place**: read balances, size the order, call the gateway.
//! 2. **settle**: turn the fill into a [`Settlement`] (for sells, wait for
//!    the closed order and read its net proceeds).
//! 3. **apply**: write `holding` and the funds back into the user's
//!    [`TradingStatus`], unless the user stopped or restarted meanwhile.
//!
//! Every outcome is published as an [`ExecutionEvent`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vb_core::config::AppConfig;
use vb_core::error::ExchangeError;
use vb_core::trading::*;
use vb_core::{Asset, QUOTE_CURRENCY};
use vb_exchange::{ExchangeGateway, ExchangeResult};

use crate::UserId;
use crate::clock::Clock;
use crate::journal::{TradeJournal, TradeRecord};
use crate::position::{PositionStateStore, TradingStatus};
use crate::registry::RunningUserRegistry;

/// How many closed orders to scan for the sell just placed.
const SETTLE_LOOKBACK: u32 = 5;

// ---------------------------------------------------------------------------
// Jobs and outcomes
// ---------------------------------------------------------------------------

/// Why a position is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SellReason {
    StopLoss,
    EndOfDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderIntent {
    Buy,
    Sell(SellReason),
}

/// Work item for the pool. Carries the status entry that was live at
/// dispatch time so completion can detect a stop/restart in between.
#[derive(Debug)]
struct OrderJob {
    user_id: UserId,
    asset: Asset,
    intent: OrderIntent,
    status: Arc<TradingStatus>,
    credential: Credential,
}

/// Output of the place stage.
#[derive(Debug)]
struct PlacedOrder {
    fill: OrderFill,
}

/// Output of the settle stage.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Settlement {
    Bought { locked_funds: f64 },
    /// `net_funds` is `None` when the closed order could not be read back.
    Sold { reason: SellReason, net_funds: Option<f64> },
}

/// Published once per processed job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Bought {
        user_id: UserId,
        asset: Asset,
        locked_funds: f64,
    },
    Sold {
        user_id: UserId,
        asset: Asset,
        reason: SellReason,
        net_funds: Option<f64>,
        return_rate: Option<f64>,
    },
    Failed {
        user_id: UserId,
        asset: Asset,
        intent: OrderIntent,
        error: ExchangeError,
    },
    /// The order went through but the user stopped (or restarted) before it
    /// completed, so no state was written.
    Discarded {
        user_id: UserId,
        asset: Asset,
        intent: OrderIntent,
    },
}

pub type ExecutionEventReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub queue_depth: usize,
    /// Share of the quote balance spent on a buy.
    pub fee_ratio: f64,
    pub min_order_funds: f64,
    pub sell_settle_delay: Duration,
}

impl ExecutorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.executor.workers,
            queue_depth: config.executor.queue_depth,
            fee_ratio: config.strategy.fee_ratio,
            min_order_funds: config.exchange.min_order_funds,
            sell_settle_delay: config.executor.sell_settle_delay(),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

struct Worker {
    gateway: Arc<dyn ExchangeGateway>,
    positions: Arc<PositionStateStore>,
    registry: Arc<RunningUserRegistry>,
    journal: Arc<TradeJournal>,
    clock: Arc<dyn Clock>,
    settings: ExecutorSettings,
    events: mpsc::UnboundedSender<ExecutionEvent>,
}

/// Handle to the order worker pool. Cheap to clone.
#[derive(Clone)]
pub struct OrderExecutor {
    jobs: mpsc::Sender<OrderJob>,
    registry: Arc<RunningUserRegistry>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl OrderExecutor {
    /// Spawn the worker pool on the current tokio runtime.
    pub fn start(
        settings: ExecutorSettings,
        gateway: Arc<dyn ExchangeGateway>,
        positions: Arc<PositionStateStore>,
        registry: Arc<RunningUserRegistry>,
        journal: Arc<TradeJournal>,
        clock: Arc<dyn Clock>,
    ) -> (Self, ExecutionEventReceiver) {
        let (job_tx, job_rx) = mpsc::channel::<OrderJob>(settings.queue_depth.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let workers = settings.workers.max(1);
        let worker = Arc::new(Worker {
            gateway,
            positions,
            registry: Arc::clone(&registry),
            journal,
            clock,
            settings,
            events: event_tx,
        });

        let mut tasks = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = Arc::clone(&worker);
            let rx = Arc::clone(&job_rx);
            tasks.push(tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some(job) = job else { break };
                    // Each job runs in its own task so a panic ends only that job.
                    let (user_id, intent) = (job.user_id.clone(), job.intent);
                    let w = Arc::clone(&worker);
                    if let Err(e) = tokio::spawn(async move { w.run(job).await }).await {
                        if e.is_panic() {
                            error!("[executor] worker {id}: {intent:?} for {user_id} panicked");
                        }
                    }
                }
                debug!("[executor] worker {id} exiting");
            }));
        }
        info!("[executor] started {workers} order worker(s)");

        (
            Self {
                jobs: job_tx,
                registry,
                tasks: Arc::new(Mutex::new(tasks)),
            },
            event_rx,
        )
    }

    /// Queue a buy for `user_id`. Returns `false` if the user is not
    /// registered or the queue is full.
    pub fn submit_buy(&self, user_id: &str, status: &Arc<TradingStatus>) -> bool {
        self.submit(user_id, status, OrderIntent::Buy)
    }

    /// Queue a full-position sell. The caller has already written whatever
    /// flags the dispatch implies and rolls them back when this returns
    /// `false`.
    pub fn submit_sell(&self, user_id: &str, status: &Arc<TradingStatus>, reason: SellReason) -> bool {
        self.submit(user_id, status, OrderIntent::Sell(reason))
    }

    fn submit(&self, user_id: &str, status: &Arc<TradingStatus>, intent: OrderIntent) -> bool {
        let Some(credential) = self.registry.credential(user_id) else {
            debug!("[executor] {user_id} not registered, {intent:?} dropped");
            return false;
        };
        let job = OrderJob {
            user_id: user_id.to_string(),
            asset: status.asset(),
            intent,
            status: Arc::clone(status),
            credential,
        };
        match self.jobs.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                error!("[executor] queue full, {:?} for {} dropped", job.intent, job.user_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!("[executor] stopped, {:?} for {} dropped", job.intent, job.user_id);
                false
            }
        }
    }

    /// Abort all workers. Jobs still queued are dropped; a job already being
    /// processed runs to completion and its outcome goes through the usual
    /// stale-user check.
    pub fn stop(&self) {
        let tasks: Vec<_> = self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            task.abort();
        }
        info!("[executor] stopped {} worker(s)", tasks.len());
    }
}

impl Worker {
    async fn run(&self, job: OrderJob) {
        let result = match self.place(&job).await {
            Ok(placed) => Ok(self.settle(&job, placed).await),
            Err(e) => Err(e),
        };
        let event = match result {
            Ok(settlement) => self.apply(&job, settlement),
            Err(e) => self.fail(&job, e),
        };
        let _ = self.events.send(event);
    }

    // -- stage 1 -----------------------------------------------------------

    async fn place(&self, job: &OrderJob) -> ExchangeResult<PlacedOrder> {
        let balances = self.gateway.balances(&job.credential).await?;
        let (side, size) = match job.intent {
            OrderIntent::Buy => {
                let quote = available(&balances, QUOTE_CURRENCY);
                let funds = (quote * self.settings.fee_ratio).floor();
                if funds < self.settings.min_order_funds {
                    return Err(ExchangeError::OrderRejected(format!(
                        "buy size {funds:.0} {QUOTE_CURRENCY} below minimum {:.0}",
                        self.settings.min_order_funds
                    )));
                }
                (Side::Bid, OrderSize::Funds(funds))
            }
            OrderIntent::Sell(_) => {
                let volume = available(&balances, job.asset.currency());
                if volume <= 0.0 {
                    return Err(ExchangeError::OrderRejected(format!(
                        "no {} balance to sell",
                        job.asset.currency()
                    )));
                }
                (Side::Ask, OrderSize::Volume(volume))
            }
        };
        debug!("[executor] {} {} {side} {size:?}", job.user_id, job.asset.market_code());
        let fill = self
            .gateway
            .place_order(&job.credential, job.asset.market_code(), side, size)
            .await?;
        Ok(PlacedOrder { fill })
    }

    // -- stage 2 -----------------------------------------------------------

    async fn settle(&self, job: &OrderJob, placed: PlacedOrder) -> Settlement {
        let reason = match job.intent {
            OrderIntent::Buy => {
                return Settlement::Bought {
                    locked_funds: placed.fill.locked_funds,
                };
            }
            OrderIntent::Sell(reason) => reason,
        };

        if !self.settings.sell_settle_delay.is_zero() {
            tokio::time::sleep(self.settings.sell_settle_delay).await;
        }
        let net_funds = match self
            .gateway
            .recent_orders(
                &job.credential,
                job.asset.market_code(),
                SETTLE_LOOKBACK,
                &[OrderState::Done, OrderState::Cancel],
            )
            .await
        {
            Ok(orders) => {
                let found = orders.iter().find(|o| o.uuid == placed.fill.uuid).map(|o| o.net_funds());
                if found.is_none() {
                    warn!(
                        "[executor] {}: sell {} not among closed orders yet",
                        job.user_id, placed.fill.uuid
                    );
                }
                found
            }
            Err(e) => {
                warn!("[executor] {}: closed-order lookup failed: {e}", job.user_id);
                None
            }
        };
        Settlement::Sold { reason, net_funds }
    }

    // -- stage 3 -----------------------------------------------------------

    fn is_live(&self, job: &OrderJob) -> bool {
        self.registry.contains(&job.user_id) && self.positions.is_current(&job.user_id, &job.status)
    }

    fn apply(&self, job: &OrderJob, settlement: Settlement) -> ExecutionEvent {
        let status = &job.status;

        if let Settlement::Sold { reason, net_funds } = settlement {
            let day = self.clock.now().date_naive();
            self.journal.record(TradeRecord::new(
                job.user_id.clone(),
                day,
                job.asset,
                reason,
                status.last_buy_funds(),
                net_funds,
            ));
        }

        if !self.is_live(job) {
            info!(
                "[executor] {} no longer running, {:?} outcome discarded",
                job.user_id, job.intent
            );
            return ExecutionEvent::Discarded {
                user_id: job.user_id.clone(),
                asset: job.asset,
                intent: job.intent,
            };
        }

        match settlement {
            Settlement::Bought { locked_funds } => {
                status.record_buy(locked_funds);
                info!(
                    "[executor] {} bought {} for {locked_funds:.0} {QUOTE_CURRENCY}",
                    job.user_id,
                    job.asset.display_name()
                );
                ExecutionEvent::Bought {
                    user_id: job.user_id.clone(),
                    asset: job.asset,
                    locked_funds,
                }
            }
            Settlement::Sold { reason, net_funds } => {
                let buy = status.last_buy_funds();
                status.record_sell(net_funds);
                let return_rate = net_funds.filter(|_| buy > 0.0).map(|s| (s - buy) / buy);
                match return_rate {
                    Some(r) => info!(
                        "[executor] {} sold {} ({reason:?}): {:.0} -> {:.0} {QUOTE_CURRENCY}, return {:+.2}%",
                        job.user_id,
                        job.asset.display_name(),
                        buy,
                        net_funds.unwrap_or_default(),
                        r * 100.0
                    ),
                    None => info!(
                        "[executor] {} sold {} ({reason:?}), proceeds unknown",
                        job.user_id,
                        job.asset.display_name()
                    ),
                }
                ExecutionEvent::Sold {
                    user_id: job.user_id.clone(),
                    asset: job.asset,
                    reason,
                    net_funds,
                    return_rate,
                }
            }
        }
    }

    fn fail(&self, job: &OrderJob, e: ExchangeError) -> ExecutionEvent {
        error!("[executor] {} {:?} on {} failed: {e}", job.user_id, job.intent, job.asset);

        // Auth failures would fail again on every retry; leave the user
        // disarmed until the next daily re-arm.
        let rollback = !matches!(e, ExchangeError::Auth(_)) && self.is_live(job);
        if rollback {
            match job.intent {
                OrderIntent::Buy => {}
                OrderIntent::Sell(SellReason::StopLoss) => job.status.rollback_stop_loss(),
                OrderIntent::Sell(SellReason::EndOfDay) => job.status.release_exit(),
            }
        }

        ExecutionEvent::Failed {
            user_id: job.user_id.clone(),
            asset: job.asset,
            intent: job.intent,
            error: e,
        }
    }
}
