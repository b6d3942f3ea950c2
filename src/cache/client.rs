// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed cache facade with cache-aside reads.
//!
//! The cache is an optimization, never a dependency: [`CacheClient::get_or_compute`]
//! returns the factory's value whenever the backend fails, and backend errors
//! never reach its caller.
//!
//! ```text
//! get(key) ──► Ok(Some(v)) ─────────────────────────────► v
//!          ├─► Ok(None)  ──► factory() ──► set(key) ──┬─► v
//!          └─► Err(e)    ──► factory() ──► set(key) ──┘   (set errors logged)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::metrics::{self, LatencyTimer};
use crate::storage::traits::{CacheStore, StorageError};

#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Underlying store, for administrative operations (`clear_all`, patterns).
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let _timer = LatencyTimer::new("get");
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                metrics::record_cache_operation("get", "error");
                return Err(e);
            }
        };

        match raw {
            Some(value) => {
                metrics::record_cache_operation("get", "hit");
                serde_json::from_value(value)
                    .map(Some)
                    .map_err(|e| StorageError::Serialization {
                        key: key.to_string(),
                        message: e.to_string(),
                    })
            }
            None => {
                metrics::record_cache_operation("get", "miss");
                Ok(None)
            }
        }
    }

    /// Write `value` under `key`. A zero TTL is rejected; nothing is cached forever.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StorageError> {
        if ttl.as_secs() == 0 {
            return Err(StorageError::MissingTtl(key.to_string()));
        }
        let value = serde_json::to_value(value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let _timer = LatencyTimer::new("set");
        let result = self.store.set(key, &value, ttl).await;
        metrics::record_cache_operation("set", if result.is_ok() { "success" } else { "error" });
        result
    }

    pub async fn del(&self, key: &str) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("delete");
        let result = self.store.delete(key).await;
        metrics::record_cache_operation("delete", if result.is_ok() { "success" } else { "error" });
        result
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("exists");
        let result = self.store.exists(key).await;
        metrics::record_cache_operation("exists", if result.is_ok() { "success" } else { "error" });
        result
    }

    /// Cache-aside read.
    ///
    /// On a hit the cached value is returned and `factory` is not called.
    /// Otherwise `factory` runs exactly once and its value is stored with
    /// `ttl`. Cache failures (read, decode, or write) are logged and counted
    /// but never returned; only the factory's own error can fail this call.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                debug!(key, "Cache miss, computing");
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, computing directly");
                metrics::record_cache_fallback("read");
            }
        }

        let value = factory().await?;

        if let Err(e) = self.set(key, &value, ttl).await {
            warn!(key, error = %e, "Cache write failed, returning computed value");
            metrics::record_cache_fallback("write");
        }

        Ok(value)
    }
}
