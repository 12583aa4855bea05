// Supervised periodic jobs (snapshot collector, retention pruner).
// Each job runs on its own timer; a failed tick is logged and the job stays scheduled,
// with exponential backoff after repeated failures. Only a fatal storage error halts it.
// Stop is observed between ticks: an in-flight tick is drained, never interrupted.
// A panicking tick counts as a failed tick; the loop and its state report survive it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;

use crate::error::MetricsError;
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Interval, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// Fallback sleep when a cron schedule has no upcoming fire time.
const CRON_IDLE_SLEEP: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting on its timer or running a tick.
    Scheduled,
    /// Exited after a non-recoverable error.
    Halted,
    /// Exited on an explicit stop signal.
    Stopped,
}

/// One unit of periodic work.
#[async_trait]
pub trait PeriodicJob: Send + 'static {
    fn name(&self) -> &'static str;
    async fn run_tick(&mut self) -> Result<(), MetricsError>;
}

/// When a job fires: a fixed interval (first tick immediately) or a cron expression in local time.
#[derive(Debug, Clone)]
pub enum Schedule {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    pub fn every(period: Duration) -> Self {
        Schedule::Every(period)
    }

    /// Parse a cron expression (seconds field included, e.g. "0 0 * * * *").
    pub fn cron(expr: &str) -> anyhow::Result<Self> {
        let schedule = cron::Schedule::from_str(expr)
            .map_err(|e| anyhow::anyhow!("invalid cron expression {:?}: {}", expr, e))?;
        Ok(Schedule::Cron(Box::new(schedule)))
    }
}

/// Exponential backoff applied after two or more consecutive failed ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Extra wait before the next tick: 0 for the first failure, then initial * 2^(n-2), capped at max.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures < 2 {
            return Duration::ZERO;
        }
        let exp = (consecutive_failures - 2).min(31);
        self.initial.saturating_mul(1u32 << exp).min(self.max)
    }
}

enum Ticker {
    Interval(Interval),
    Cron(Box<cron::Schedule>),
}

impl Ticker {
    fn new(schedule: Schedule) -> Self {
        match schedule {
            Schedule::Every(period) => {
                let mut tick = interval(period);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Ticker::Interval(tick)
            }
            Schedule::Cron(schedule) => Ticker::Cron(schedule),
        }
    }

    async fn tick(&mut self) {
        match self {
            Ticker::Interval(tick) => {
                tick.tick().await;
            }
            Ticker::Cron(schedule) => loop {
                let now = chrono::Local::now();
                if let Some(next) = schedule.after(&now).next() {
                    let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                    tokio::time::sleep(delay).await;
                    return;
                }
                tokio::time::sleep(CRON_IDLE_SLEEP).await;
            },
        }
    }

    fn reset(&mut self) {
        if let Ticker::Interval(tick) = self {
            tick.reset();
        }
    }
}

/// Handle to a running periodic job. Dropping it also stops the job.
pub struct PeriodicTask {
    name: &'static str,
    stop_tx: oneshot::Sender<()>,
    state_rx: watch::Receiver<TaskState>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> TaskState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions (Scheduled -> Halted | Stopped).
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal stop, wait for the in-flight tick (if any) to finish, and return the final state.
    pub async fn stop(self) -> TaskState {
        let PeriodicTask {
            name,
            stop_tx,
            state_rx,
            handle,
        } = self;
        let _ = stop_tx.send(());
        if let Err(e) = handle.await {
            warn!(job = name, error = %e, "periodic task join failed");
        }
        *state_rx.borrow()
    }
}

/// Spawn `job` on `schedule`. The returned handle is the job's only stop signal.
pub fn spawn<J: PeriodicJob>(job: J, schedule: Schedule, backoff: Backoff) -> PeriodicTask {
    let name = job.name();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let (state_tx, state_rx) = watch::channel(TaskState::Scheduled);

    let handle = tokio::spawn(async move {
        let final_state = AssertUnwindSafe(run(job, schedule, backoff, stop_rx))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                error!(job = name, error = %panic_message(&*payload), "periodic task panicked, halting");
                TaskState::Halted
            });
        debug!(job = name, state = ?final_state, "periodic task exiting");
        let _ = state_tx.send(final_state);
    });

    PeriodicTask {
        name,
        stop_tx,
        state_rx,
        handle,
    }
}

async fn run<J: PeriodicJob>(
    mut job: J,
    schedule: Schedule,
    backoff: Backoff,
    mut stop_rx: oneshot::Receiver<()>,
) -> TaskState {
    let name = job.name();
    let mut ticker = Ticker::new(schedule);
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                return TaskState::Stopped;
            }
            _ = ticker.tick() => {}
        }

        let tick_at = chrono::Utc::now();
        let outcome = AssertUnwindSafe(job.run_tick())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(MetricsError::TickPanicked(panic_message(&*payload)))
            });
        match outcome {
            Ok(()) => {
                if consecutive_failures > 0 {
                    info!(job = name, consecutive_failures, "tick succeeded after failures");
                }
                consecutive_failures = 0;
            }
            Err(e) if e.is_fatal() => {
                error!(
                    job = name,
                    tick_at = %tick_at.to_rfc3339(),
                    error = %e,
                    "non-recoverable error, halting"
                );
                return TaskState::Halted;
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                warn!(
                    job = name,
                    tick_at = %tick_at.to_rfc3339(),
                    error = %e,
                    consecutive_failures,
                    "tick failed"
                );
                let delay = backoff.delay(consecutive_failures);
                if !delay.is_zero() {
                    debug!(job = name, delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::select! {
                        _ = &mut stop_rx => {
                            return TaskState::Stopped;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    ticker.reset();
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
