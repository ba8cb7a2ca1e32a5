//! Named timer tasks.
//!
//! Each [`ScheduledTask`] gets its own tokio task. Fires of the same task
//! never overlap; every fire runs in a child task so a panicking job is
//! logged and the timer keeps going.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use vb_core::time_util::next_daily_fire;

use crate::clock::Clock;
use crate::jobs::Job;

/// When a task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed rate, first fire one period after start.
    Every(Duration),
    /// Once per day at this exchange-local wall-clock time.
    DailyAt(NaiveTime),
}

impl Schedule {
    /// The first fire strictly after `now`.
    pub fn next_fire(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match *self {
            Self::Every(period) => {
                now + chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::days(1))
            }
            Self::DailyAt(at) => next_daily_fire(now, at),
        }
    }
}

pub struct ScheduledTask {
    pub name: String,
    pub schedule: Schedule,
    pub job: Arc<dyn Job>,
}

impl ScheduledTask {
    pub fn new(schedule: Schedule, job: Arc<dyn Job>) -> Self {
        Self {
            name: job.name().to_string(),
            schedule,
            job,
        }
    }
}

/// Owns the timer tasks.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

async fn fire(name: &str, job: &Arc<dyn Job>) {
    let job = Arc::clone(job);
    if let Err(e) = tokio::spawn(async move { job.run().await }).await {
        if e.is_panic() {
            error!("[scheduler] task '{name}' panicked; timer continues");
        }
    }
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, tasks: Vec::new() }
    }

    /// Start firing `task` on the current tokio runtime.
    pub fn spawn(&mut self, task: ScheduledTask) {
        let ScheduledTask { name, schedule, job } = task;
        let label = name.clone();
        let handle = match schedule {
            Schedule::Every(period) => {
                info!("[scheduler] '{name}' every {period:?}");
                tokio::spawn(async move {
                    let start = tokio::time::Instant::now() + period;
                    let mut ticker = tokio::time::interval_at(start, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        fire(&name, &job).await;
                    }
                })
            }
            Schedule::DailyAt(at) => {
                let clock = Arc::clone(&self.clock);
                info!(
                    "[scheduler] '{name}' daily at {at}, next {}",
                    schedule.next_fire(clock.now())
                );
                tokio::spawn(async move {
                    let mut last_fire: Option<DateTime<FixedOffset>> = None;
                    loop {
                        let now = clock.now();
                        // Never fire the same day twice if the clock lags the timer.
                        let base = last_fire.map_or(now, |l| now.max(l));
                        let next = schedule.next_fire(base);
                        let wait = (next - now).to_std().unwrap_or_default();
                        debug!("[scheduler] '{name}' sleeping {wait:?} until {next}");
                        tokio::time::sleep(wait).await;
                        last_fire = Some(next);
                        fire(&name, &job).await;
                    }
                })
            }
        };
        self.tasks.push((label, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort every timer. A job already running finishes on its own.
    pub fn stop(&mut self) {
        for (name, handle) in self.tasks.drain(..) {
            handle.abort();
            debug!("[scheduler] '{name}' stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
