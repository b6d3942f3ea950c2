//! Periodic task scheduler.
//!
//! Each registered [`PeriodicTask`] gets its own tokio task driving a
//! `tokio::time::interval` with [`MissedTickBehavior::Skip`]: a handler that
//! overruns its period loses the missed ticks instead of firing back to back.
//! Handlers run to completion; shutdown is observed between runs.
//!
//! ```text
//!  register(sync)   ──┐
//!  register(health) ──┼─► start() ─► spawn per task: loop { select! { shutdown | tick → run } }
//!  register(hourly) ──┘                                         ▲
//!                                  shutdown() ── watch(true) ───┘ then join all
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    fn period(&self) -> Duration;

    /// Fire once at start instead of waiting a full period.
    fn run_immediately(&self) -> bool {
        false
    }

    async fn run(&self);
}

type TaskFn = dyn Fn() -> BoxFuture<'static, ()> + Send + Sync;

/// A [`PeriodicTask`] built from a closure returning a boxed future.
pub struct FnTask {
    name: String,
    period: Duration,
    run_immediately: bool,
    func: Box<TaskFn>,
}

impl FnTask {
    pub fn new<F>(name: impl Into<String>, period: Duration, func: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            period,
            run_immediately: false,
            func: Box::new(func),
        }
    }

    #[must_use]
    pub fn immediately(mut self, yes: bool) -> Self {
        self.run_immediately = yes;
        self
    }
}

#[async_trait]
impl PeriodicTask for FnTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn run_immediately(&self) -> bool {
        self.run_immediately
    }

    async fn run(&self) {
        (self.func)().await;
    }
}

pub struct Scheduler {
    tasks: Mutex<Vec<Arc<dyn PeriodicTask>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Add a task. Tasks registered after [`start`](Self::start) start on the
    /// next call to `start`.
    pub fn register(&self, task: Arc<dyn PeriodicTask>) {
        self.tasks.lock().push(task);
    }

    #[must_use]
    pub fn pending_tasks(&self) -> Vec<String> {
        self.tasks.lock().iter().map(|t| t.name().to_string()).collect()
    }

    /// Spawn a driver for every registered task not yet running.
    pub fn start(&self) {
        let pending: Vec<Arc<dyn PeriodicTask>> = std::mem::take(&mut *self.tasks.lock());
        let mut handles = self.handles.lock();

        for task in pending {
            let shutdown_rx = self.shutdown_tx.subscribe();
            info!(task = task.name(), period_secs = task.period().as_secs(), "Scheduling task");
            handles.push(tokio::spawn(drive(task, shutdown_rx)));
        }
    }

    /// Signal every driver and wait for in-flight runs to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduled task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive(task: Arc<dyn PeriodicTask>, mut shutdown_rx: watch::Receiver<bool>) {
    let period = task.period().max(Duration::from_millis(1));
    let first = if task.run_immediately() {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!(task = task.name(), "Task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                crate::metrics::record_task_tick(task.name());
                task.run().await;
            }
        }
    }
}
