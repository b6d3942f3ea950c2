//! # Commerce Sync Engine
//!
//! Keeps a read-optimized cache of commerce reporting data (orders, products,
//! customers) fresh by periodically pulling from a rate-limited, paginated
//! upstream API, aggregating, and writing the results under tiered TTLs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Scheduler                           │
//! │  • sync / health / hourly / daily / weekly periodic tasks   │
//! │  • interval ticks, missed ticks skipped                     │
//! └─────────────────────────────────────────────────────────────┘
//!          │ sync tick                              │ health tick
//!          ▼                                        ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │       Sync Orchestrator      │   │        Health Monitor        │
//! │  • single-flight guard       │   │  • cache / upstream / memory │
//! │  • fetch → aggregate → write │   │  • reads sync state only     │
//! │  • failure streak, history   │   │  • emergency eviction        │
//! └──────────────────────────────┘   └──────────────────────────────┘
//!          │ fetch_all                              │ emergency
//!          ▼                                        ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │     Paginated Fetch Client   │   │       Cleanup Manager        │
//! │  • page cap 50, cursors      │   │  • alert / scratch pruning   │
//! │  • bounded per-page retries  │   │  • hot-key TTL refresh       │
//! │  • truncated partial results │   │  • metrics archive           │
//! └──────────────────────────────┘   └──────────────────────────────┘
//!          │                                        │
//!          ▼                                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Cache Store (Redis / in-process)            │
//! │  • every key carries a TTL from its tier                    │
//! │  • cache-aside reads fall back to direct compute            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use commerce_sync::{HealthDepth, RecordCounts, SyncEngine, SyncEngineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), commerce_sync::SyncError> {
//!     let config = SyncEngineConfig::from_env();
//!     commerce_sync::logging::init_tracing(&config.logging);
//!
//!     let engine = SyncEngine::builder(config)
//!         .aggregator(Arc::new(RecordCounts))
//!         .build()
//!         .await?;
//!     engine.start().await?;
//!
//!     // Readers go through the cache-aside facade
//!     let summary: serde_json::Value = engine
//!         .cache()
//!         .get_or_compute("dashboard:summary", std::time::Duration::from_secs(60), || async {
//!             Ok::<_, commerce_sync::SyncError>(serde_json::json!({}))
//!         })
//!         .await?;
//!     println!("{summary}");
//!
//!     println!("{:?}", engine.health(HealthDepth::Quick).await.overall_status);
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The main [`SyncEngine`] and its administrative operations
//! - [`upstream`]: Upstream query contract, HTTP client, paginated fetch
//! - [`sync`]: Cycle state machine and orchestrator
//! - [`aggregation`]: Aggregator boundary between raw records and cache values
//! - [`cache`]: Cache-aside facade, key namespace and TTL tiers
//! - [`storage`]: Cache store backends (Redis, in-process)
//! - [`health`]: Probes, reports, memory sources
//! - [`cleanup`], [`alerts`]: Retention jobs and alert lists
//! - [`scheduler`]: Periodic task driver
//! - [`resilience`]: Backoff and retry

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod resilience;
pub mod storage;
pub mod cache;
pub mod upstream;
pub mod aggregation;
pub mod sync;
pub mod pressure;
pub mod health;
pub mod alerts;
pub mod cleanup;
pub mod scheduler;
pub mod coordinator;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::SyncEngineConfig;
pub use coordinator::{ClearScope, EngineState, SyncEngine, SyncEngineBuilder};
pub use error::{Result, SyncError};
pub use aggregation::{Aggregate, AggregationError, Aggregator, FnAggregator, RawSnapshot, RecordCounts};
pub use alerts::{Alert, AlertLog, Severity};
pub use cache::{CacheClient, DashboardDomain, KeyClass};
pub use cleanup::{CleanupKind, CleanupReport, EmergencyReport};
pub use health::{CheckResult, CheckStatus, HealthDepth, HealthReport, MemoryProbe, OverallStatus};
pub use pressure::MemoryPressure;
pub use storage::{CacheStore, InMemoryStore, RedisStore, StorageError};
pub use sync::{CycleMetrics, SyncCycle, SyncStatus, TriggerOutcome};
pub use upstream::{EntityKind, FetchClient, FetchOutcome, HttpUpstream, QueryFilter, UpstreamApi, UpstreamError};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
