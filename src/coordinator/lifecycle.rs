//! Engine lifecycle management: start, shutdown, config updates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::cleanup::CleanupKind;
use crate::config::ScheduleConfig;
use crate::error::SyncError;
use crate::health::types::HealthDepth;
use crate::scheduler::FnTask;

use super::{EngineState, SyncEngine};

impl SyncEngine {
    /// Schedule every periodic task and enter `Running`.
    ///
    /// Tasks:
    /// 1. `sync` every `sync_interval_secs` (first run at start when `sync_on_start`)
    /// 2. `health` full probe every `health_interval_secs`
    /// 3. `cleanup_hourly`, `cleanup_daily`, `weekly_archive`
    ///
    /// An unreachable cache store is logged, not fatal: reads fall back to
    /// direct compute and the health monitor reports the outage.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SyncError> {
        match self.state() {
            EngineState::Created => {}
            EngineState::Running => {
                warn!("Sync engine already running");
                return Ok(());
            }
            EngineState::ShuttingDown => {
                return Err(SyncError::Config("cannot start an engine that has been shut down".into()));
            }
        }

        let startup_start = Instant::now();
        info!("Starting sync engine...");

        let store = self.cache.store();
        match store.ping().await {
            Ok(()) => info!(backend = store.backend_name(), "Cache store reachable"),
            Err(e) => warn!(backend = store.backend_name(), error = %e, "Cache store unreachable at startup"),
        }

        let schedule = self.config.read().schedule.clone();
        self.register_tasks(&schedule);
        self.scheduler.start();
        self.spawn_config_watcher();

        let _ = self.state.send(EngineState::Running);
        info!(
            elapsed_ms = startup_start.elapsed().as_millis() as u64,
            sync_interval_secs = schedule.sync_interval_secs,
            "Sync engine running"
        );
        Ok(())
    }

    fn register_tasks(&self, schedule: &ScheduleConfig) {
        let orchestrator = self.orchestrator.clone();
        let sync = FnTask::new("sync", schedule.sync_interval(), move || {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                orchestrator.run_cycle().await;
            })
        })
        .immediately(schedule.sync_on_start);
        self.scheduler.register(Arc::new(sync));

        let monitor = self.monitor.clone();
        let health = FnTask::new("health", Duration::from_secs(schedule.health_interval_secs), move || {
            let monitor = monitor.clone();
            Box::pin(async move {
                monitor.check(HealthDepth::Full).await;
            })
        });
        self.scheduler.register(Arc::new(health));

        let jobs = [
            ("cleanup_hourly", CleanupKind::Hourly, schedule.hourly_cleanup_secs),
            ("cleanup_daily", CleanupKind::Daily, schedule.daily_cleanup_secs),
            ("weekly_archive", CleanupKind::Weekly, schedule.weekly_archive_secs),
        ];
        for (name, kind, secs) in jobs {
            let cleanup = self.cleanup.clone();
            let task = FnTask::new(name, Duration::from_secs(secs), move || {
                let cleanup = cleanup.clone();
                Box::pin(async move {
                    // Outcome is logged and counted by `run`
                    let _ = cleanup.run(kind).await;
                })
            });
            self.scheduler.register(Arc::new(task));
        }
    }

    /// Apply config updates as they arrive. Health thresholds take effect on
    /// the next probe; schedule changes need a restart.
    fn spawn_config_watcher(&self) {
        let Some(mut config_rx) = self.config_rx.lock().take() else {
            return;
        };
        let config = self.config.clone();
        let monitor = self.monitor.clone();

        let handle = tokio::spawn(async move {
            while config_rx.changed().await.is_ok() {
                let new_config = config_rx.borrow_and_update().clone();
                if let Err(e) = new_config.validate() {
                    warn!(error = %e, "Rejected config update");
                    continue;
                }

                let schedule_changed = {
                    let current = config.read();
                    current.schedule.sync_interval_secs != new_config.schedule.sync_interval_secs
                        || current.schedule.health_interval_secs != new_config.schedule.health_interval_secs
                };
                if schedule_changed {
                    warn!("Schedule changes take effect after restart");
                }

                monitor.update_thresholds(new_config.health.clone());
                info!(
                    memory_fail_ratio = new_config.health.memory_fail_ratio,
                    failures_critical = new_config.health.failures_critical,
                    "Config updated"
                );
                *config.write() = new_config;
            }
        });
        *self.config_task.lock() = Some(handle);
    }

    /// Initiate graceful shutdown.
    ///
    /// Stops scheduling new runs and waits for in-flight ones (including a
    /// running sync cycle) to finish.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shutdown_start = Instant::now();
        info!("Initiating sync engine shutdown...");
        let _ = self.state.send(EngineState::ShuttingDown);

        self.scheduler.shutdown().await;
        if let Some(handle) = self.config_task.lock().take() {
            handle.abort();
        }

        info!(
            elapsed_ms = shutdown_start.elapsed().as_millis() as u64,
            cycles = self.orchestrator.status().cycle_count,
            "Sync engine shutdown complete"
        );
    }
}
