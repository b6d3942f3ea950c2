use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::traits::{glob_match, CacheEntry, CacheStore, StorageError};

/// In-process cache store.
///
/// Expired entries are dropped lazily on read and in bulk by
/// [`purge_expired`](Self::purge_expired).
pub struct InMemoryStore {
    data: DashMap<String, CacheEntry>,
    /// Milliseconds added to the wall clock (simulated time)
    clock_offset_ms: AtomicI64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            clock_offset_ms: AtomicI64::new(0),
        }
    }

    /// Number of stored entries, including ones that expired but were not purged yet
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Full entry including TTL metadata.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let now = self.now();
        self.data
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value().clone())
    }

    /// Move the store's clock forward, expiring entries as if time had passed.
    pub fn advance_clock(&self, by: Duration) {
        self.clock_offset_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.data.len());
        if purged > 0 {
            debug!(purged, "Purged expired in-memory entries");
        }
        purged
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(self.clock_offset_ms.load(Ordering::SeqCst))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let now = self.now();
        let expired = match self.data.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.data.remove_if(key, |_, e| e.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StorageError> {
        if ttl.as_secs() == 0 {
            return Err(StorageError::MissingTtl(key.to_string()));
        }
        let mut entry = CacheEntry::new(key, value.clone(), ttl);
        entry.written_at = self.now();
        self.data.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = self.now();
        Ok(self
            .data
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entry(key).is_some())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        let now = self.now();
        Ok(self.data.get(key).and_then(|e| e.remaining(now)))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let now = self.now();
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|e| !e.value().is_expired(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StorageError> {
        let now = self.now();
        let mut removed = 0u64;
        self.data.retain(|key, entry| {
            if glob_match(pattern, key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<u64, StorageError> {
        let count = self.data.len() as u64;
        self.data.clear();
        Ok(count)
    }

    async fn compact(&self) -> Result<(), StorageError> {
        self.purge_expired();
        self.data.shrink_to_fit();
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryStore::new();
        store.set("dashboard:summary", &json!({"revenue": 10}), MINUTE).await.unwrap();

        let value = store.get("dashboard:summary").await.unwrap();
        assert_eq!(value, Some(json!({"revenue": 10})));
        assert!(store.exists("dashboard:summary").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_none() {
        let store = InMemoryStore::new();
        assert!(store.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let store = InMemoryStore::new();
        let result = store.set("forever", &json!(1), Duration::ZERO).await;
        assert!(matches!(result, Err(StorageError::MissingTtl(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = InMemoryStore::new();
        store.set("k", &json!("v"), MINUTE).await.unwrap();

        store.advance_clock(Duration::from_secs(59));
        assert!(store.get("k").await.unwrap().is_some());

        store.advance_clock(Duration::from_secs(2));
        assert!(store.get("k").await.unwrap().is_none());
        // Lazy removal on read
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_remaining() {
        let store = InMemoryStore::new();
        store.set("k", &json!("v"), Duration::from_secs(300)).await.unwrap();
        store.advance_clock(Duration::from_secs(100));

        let remaining = store.ttl_remaining("k").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(200));
        assert!(remaining > Duration::from_secs(198));
        assert!(store.ttl_remaining("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryStore::new();
        store.set("to-delete", &json!(1), MINUTE).await.unwrap();

        assert!(store.delete("to-delete").await.unwrap());
        assert!(!store.delete("to-delete").await.unwrap());
        assert!(store.get("to-delete").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = InMemoryStore::new();
        store.set("same", &json!({"version": 1}), MINUTE).await.unwrap();
        store.set("same", &json!({"version": 2}), MINUTE).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("same").await.unwrap().unwrap()["version"], 2);
    }

    #[tokio::test]
    async fn test_keys_and_delete_pattern() {
        let store = InMemoryStore::new();
        for key in ["dashboard:summary", "dashboard:sales", "orders:latest"] {
            store.set(key, &json!(1), MINUTE).await.unwrap();
        }

        let keys = store.keys("dashboard:*").await.unwrap();
        assert_eq!(keys, vec!["dashboard:sales".to_string(), "dashboard:summary".to_string()]);

        let removed = store.delete_pattern("dashboard:*").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.keys("*").await.unwrap(), vec!["orders:latest".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_all_and_compact() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            store.set(&format!("item-{}", i), &json!(i), MINUTE).await.unwrap();
        }

        assert_eq!(store.clear_all().await.unwrap(), 10);
        store.compact().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryStore::new();
        store.set("short", &json!(1), MINUTE).await.unwrap();
        store.set("long", &json!(2), Duration::from_secs(900)).await.unwrap();

        store.advance_clock(Duration::from_secs(120));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.entry("long").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store_clone = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let key = format!("batch-{}-item-{}", batch, i);
                    store_clone.set(&key, &json!(i), MINUTE).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
