// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] ties the components together:
//! - Paginated fetch client over the upstream query API
//! - Sync orchestrator (single-flight fetch → aggregate → cache cycles)
//! - Cache store (Redis or in-process) behind the cache-aside facade
//! - Health monitor with emergency eviction
//! - Cleanup manager and alert log
//! - Scheduler driving every periodic task
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use commerce_sync::{SyncEngine, SyncEngineConfig, EngineState, RecordCounts};
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), commerce_sync::SyncError> {
//! let config = SyncEngineConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     ..Default::default()
//! };
//! let (_tx, rx) = watch::channel(config.clone());
//!
//! let engine = SyncEngine::builder(config)
//!     .config_updates(rx)
//!     .aggregator(Arc::new(RecordCounts))
//!     .build()
//!     .await?;
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.start().await?;
//! // ...
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod types;
mod api;
mod lifecycle;

pub use types::{ClearScope, EngineState};

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregation::Aggregator;
use crate::alerts::AlertLog;
use crate::cache::client::CacheClient;
use crate::cleanup::CleanupManager;
use crate::config::SyncEngineConfig;
use crate::error::SyncError;
use crate::health::memory::{MemoryProbe, SystemMemoryProbe};
use crate::health::monitor::HealthMonitor;
use crate::scheduler::Scheduler;
use crate::storage::memory::InMemoryStore;
use crate::storage::redis::RedisStore;
use crate::storage::traits::CacheStore;
use crate::sync::orchestrator::SyncOrchestrator;
use crate::upstream::client::{FetchClient, UpstreamApi};
use crate::upstream::http::HttpUpstream;
use crate::upstream::types::QueryFilter;

/// Main sync engine coordinator.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; every administrative operation takes `&self`.
/// Components shared with scheduled tasks live behind `Arc`.
pub struct SyncEngine {
    /// Configuration (updated at runtime via the watch channel)
    pub(super) config: Arc<RwLock<SyncEngineConfig>>,

    /// Runtime config updates, taken by `start()`
    pub(super) config_rx: Mutex<Option<watch::Receiver<SyncEngineConfig>>>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) cache: CacheClient,
    pub(super) orchestrator: Arc<SyncOrchestrator>,
    pub(super) monitor: Arc<HealthMonitor>,
    pub(super) cleanup: Arc<CleanupManager>,
    pub(super) alerts: Arc<AlertLog>,
    pub(super) scheduler: Scheduler,

    /// Config watcher spawned by `start()`
    pub(super) config_task: Mutex<Option<JoinHandle<()>>>,
}

/// Assembles a [`SyncEngine`].
///
/// Anything not supplied is derived from the config: the cache store from
/// `redis_url` (in-process when unset), the upstream from `upstream.base_url`,
/// the memory probe from `health.memory_limit_mb`.
pub struct SyncEngineBuilder {
    config: SyncEngineConfig,
    config_rx: Option<watch::Receiver<SyncEngineConfig>>,
    store: Option<Arc<dyn CacheStore>>,
    upstream: Option<Arc<dyn UpstreamApi>>,
    aggregators: Vec<Arc<dyn Aggregator>>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    filter: QueryFilter,
}

impl SyncEngineBuilder {
    /// Receive runtime config updates (health thresholds apply live).
    #[must_use]
    pub fn config_updates(mut self, rx: watch::Receiver<SyncEngineConfig>) -> Self {
        self.config_rx = Some(rx);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn upstream(mut self, upstream: Arc<dyn UpstreamApi>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    #[must_use]
    pub fn aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregators.push(aggregator);
        self
    }

    #[must_use]
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    /// Filter applied to every entity fetch.
    #[must_use]
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Validate the config, connect the cache store and wire the components.
    #[tracing::instrument(skip(self), fields(backend))]
    pub async fn build(self) -> Result<SyncEngine, SyncError> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn CacheStore> = match (self.store, &config.redis_url) {
            (Some(store), _) => store,
            (None, Some(url)) => {
                info!("Connecting to Redis cache...");
                Arc::new(RedisStore::with_prefix(url, config.key_prefix.as_deref()).await?)
            }
            (None, None) => {
                warn!("No Redis URL configured - using the in-process cache store");
                Arc::new(InMemoryStore::new())
            }
        };
        tracing::Span::current().record("backend", store.backend_name());

        let upstream: Arc<dyn UpstreamApi> = match self.upstream {
            Some(upstream) => upstream,
            None => Arc::new(HttpUpstream::new(&config.upstream)?),
        };
        let memory_probe = self
            .memory_probe
            .unwrap_or_else(|| Arc::new(SystemMemoryProbe::new(config.health.memory_limit_bytes())));

        if self.aggregators.is_empty() {
            warn!("No aggregators registered - cycles will only refresh entity snapshots");
        }

        let sync_interval = config.schedule.sync_interval();
        let cache = CacheClient::new(store);
        let fetcher = Arc::new(FetchClient::new(upstream, config.fetch.clone()));
        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                fetcher.clone(),
                cache.clone(),
                self.aggregators,
                config.orchestrator.clone(),
                sync_interval,
                &config.health,
            )
            .with_filter(self.filter),
        );
        let alerts = Arc::new(AlertLog::new(cache.clone(), config.retention.clone()));
        let cleanup = Arc::new(CleanupManager::new(
            cache.clone(),
            alerts.clone(),
            orchestrator.clone(),
            config.retention.clone(),
            sync_interval,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            cache.clone(),
            fetcher,
            memory_probe,
            orchestrator.clone(),
            cleanup.clone(),
            config.health.clone(),
        ));

        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        Ok(SyncEngine {
            config: Arc::new(RwLock::new(config)),
            config_rx: Mutex::new(self.config_rx),
            state: state_tx,
            state_rx,
            cache,
            orchestrator,
            monitor,
            cleanup,
            alerts,
            scheduler: Scheduler::new(),
            config_task: Mutex::new(None),
        })
    }
}

impl SyncEngine {
    /// Start assembling an engine from `config`.
    #[must_use]
    pub fn builder(config: SyncEngineConfig) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config,
            config_rx: None,
            store: None,
            upstream: None,
            aggregators: Vec::new(),
            memory_probe: None,
            filter: QueryFilter::default(),
        }
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if periodic tasks are scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Snapshot of the active configuration.
    #[must_use]
    pub fn config(&self) -> SyncEngineConfig {
        self.config.read().clone()
    }

    /// Cache facade for readers (`get_or_compute` over the engine's keys).
    #[must_use]
    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }

    /// Alert log for domain producers.
    #[must_use]
    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }
}
