// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Paginated fetch client.
//!
//! Walks an upstream collection page by page, following opaque cursors.
//! Each page is retried on its own with linear backoff; the cursor never
//! advances past a page that has not been received.
//!
//! # Termination
//!
//! ```text
//! ┌──────────┐  ok, has_more      ┌──────────────┐
//! │ request  │ ─────────────────► │ inter-page   │ ──► next cursor
//! │ page(c)  │                    │ delay        │
//! └──────────┘                    └──────────────┘
//!    │  │ retryable (attempt n)
//!    │  └──► sleep(base × n) ──► same cursor
//!    │       n == max_retries ──► stop, RetriesExhausted
//!    │ fatal ──► Err (whole call aborted)
//!    └ ok, last page / record cap / page limit ──► stop
//! ```
//!
//! Transient errors never escape [`FetchClient::fetch_all`]; they surface as
//! a [`Truncation`] on a partial result that callers must treat as valid but
//! incomplete.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::types::{EntityKind, FetchPage, PageRequest, PageResponse, QueryFilter, UpstreamError, UPSTREAM_PAGE_LIMIT};
use crate::config::FetchConfig;
use crate::resilience::retry::RetryConfig;

/// Transport to the upstream query API.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn query_page(&self, request: PageRequest) -> Result<PageResponse, UpstreamError>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), UpstreamError>;
}

/// Why a `fetch_all` call stopped before the collection was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    RecordCap,
    PageLimit,
    RetriesExhausted,
}

impl Truncation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordCap => "record_cap",
            Self::PageLimit => "page_limit",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Result of a full pagination walk.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<T> {
    pub records: Vec<T>,
    /// Pages successfully received
    pub pages: usize,
    /// Upstream calls made, including failed attempts
    pub page_calls: usize,
    /// Failed attempts that were followed by another try
    pub retries: usize,
    pub truncated: Option<Truncation>,
}

impl<T> FetchOutcome<T> {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.truncated.is_none()
    }
}

pub struct FetchClient {
    api: Arc<dyn UpstreamApi>,
    config: FetchConfig,
}

impl FetchClient {
    pub fn new(api: Arc<dyn UpstreamApi>, config: FetchConfig) -> Self {
        Self { api, config }
    }

    #[must_use]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub async fn ping(&self) -> Result<(), UpstreamError> {
        self.api.ping().await
    }

    /// Fetch a single page at `cursor` using the configured page size.
    ///
    /// No retry happens here; one call, one result.
    pub async fn fetch_page<T: DeserializeOwned>(
        &self,
        entity: EntityKind,
        filter: &QueryFilter,
        cursor: Option<String>,
    ) -> Result<FetchPage<T>, UpstreamError> {
        self.request_page(entity, filter, cursor, self.config.page_size_max).await
    }

    /// Walk the collection with the configured page size and record cap.
    pub async fn fetch_entity<T: DeserializeOwned>(
        &self,
        entity: EntityKind,
        filter: &QueryFilter,
    ) -> Result<FetchOutcome<T>, UpstreamError> {
        self.fetch_all(entity, filter, self.config.page_size_max, self.config.record_cap)
            .await
    }

    /// Fetch up to `record_cap` records, `page_size_max` (at most 50) per call.
    ///
    /// Only fatal errors are returned as `Err`. Retryable errors are retried
    /// on the same cursor; after `max_retries` consecutive failures the walk
    /// stops and the records gathered so far are returned.
    #[instrument(skip(self, filter), fields(entity = %entity))]
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        entity: EntityKind,
        filter: &QueryFilter,
        page_size_max: usize,
        record_cap: usize,
    ) -> Result<FetchOutcome<T>, UpstreamError> {
        let backoff = RetryConfig::upstream_page(self.config.base_delay(), self.config.max_retries);
        let mut outcome = FetchOutcome {
            records: Vec::new(),
            pages: 0,
            page_calls: 0,
            retries: 0,
            truncated: None,
        };
        let mut cursor: Option<String> = None;

        if record_cap == 0 {
            outcome.truncated = Some(Truncation::RecordCap);
            return Ok(outcome);
        }

        loop {
            if outcome.pages >= self.config.max_pages {
                outcome.truncated = Some(Truncation::PageLimit);
                break;
            }

            let Some(page) = self
                .fetch_page_with_retry::<T>(entity, filter, &cursor, page_size_max, &backoff, &mut outcome)
                .await?
            else {
                outcome.truncated = Some(Truncation::RetriesExhausted);
                break;
            };
            outcome.pages += 1;

            let can_continue = page.can_continue();
            let room = record_cap - outcome.records.len();
            if page.records.len() >= room {
                let overflow = page.records.len() > room;
                outcome.records.extend(page.records.into_iter().take(room));
                if overflow || can_continue {
                    outcome.truncated = Some(Truncation::RecordCap);
                }
                break;
            }
            outcome.records.extend(page.records);

            if !can_continue {
                break;
            }
            cursor = page.next_cursor;

            let pause = self.inter_page_delay(page.rate_limit_remaining);
            if !pause.is_zero() {
                sleep(pause).await;
            }
        }

        crate::metrics::record_records_fetched(entity.as_str(), outcome.records.len());
        match outcome.truncated {
            Some(reason) => {
                crate::metrics::record_truncated_fetch(entity.as_str(), reason.as_str());
                warn!(
                    records = outcome.records.len(),
                    pages = outcome.pages,
                    reason = reason.as_str(),
                    "Fetch truncated, returning partial result"
                );
            }
            None => {
                info!(
                    records = outcome.records.len(),
                    pages = outcome.pages,
                    retries = outcome.retries,
                    "Fetch complete"
                );
            }
        }

        Ok(outcome)
    }

    /// One page boundary: retry on the same cursor until success, a fatal
    /// error, or the retry budget runs out (`Ok(None)`).
    async fn fetch_page_with_retry<T: DeserializeOwned>(
        &self,
        entity: EntityKind,
        filter: &QueryFilter,
        cursor: &Option<String>,
        page_size: usize,
        backoff: &RetryConfig,
        outcome: &mut FetchOutcome<T>,
    ) -> Result<Option<FetchPage<T>>, UpstreamError> {
        let mut failures = 0u32;

        loop {
            outcome.page_calls += 1;
            match self.request_page::<T>(entity, filter, cursor.clone(), page_size).await {
                Ok(page) => return Ok(Some(page)),
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if failures >= self.config.max_retries {
                        warn!(
                            cursor = ?cursor,
                            failures,
                            error = %e,
                            "Page retries exhausted"
                        );
                        return Ok(None);
                    }

                    outcome.retries += 1;
                    crate::metrics::record_page_retry(entity.as_str());
                    let delay = backoff
                        .delay_for_attempt(failures)
                        .max(e.retry_after().unwrap_or_default());
                    debug!(
                        cursor = ?cursor,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying page"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    warn!(cursor = ?cursor, error = %e, "Fatal upstream error, aborting fetch");
                    return Err(e);
                }
            }
        }
    }

    async fn request_page<T: DeserializeOwned>(
        &self,
        entity: EntityKind,
        filter: &QueryFilter,
        cursor: Option<String>,
        page_size: usize,
    ) -> Result<FetchPage<T>, UpstreamError> {
        let request = PageRequest {
            entity,
            page_size: page_size.clamp(1, UPSTREAM_PAGE_LIMIT),
            cursor,
            filter: filter.clone(),
        };

        let start = Instant::now();
        let result = self.api.query_page(request).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        crate::metrics::record_page_call(entity.as_str(), outcome, start.elapsed());

        let response = result?;
        if let Some(remaining) = response.rate_limit_remaining {
            crate::metrics::set_rate_limit_remaining(remaining);
        }

        let records = response
            .records
            .into_iter()
            .map(serde_json::from_value::<T>)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|e| UpstreamError::Decode(format!("{} record: {}", entity, e)))?;

        Ok(FetchPage {
            records,
            next_cursor: response.next_cursor,
            has_more: response.has_more,
            rate_limit_remaining: response.rate_limit_remaining,
        })
    }

    fn inter_page_delay(&self, rate_limit_remaining: Option<u32>) -> Duration {
        let base = self.config.inter_page_delay();
        match (rate_limit_remaining, self.config.rate_limit_floor) {
            (Some(remaining), Some(floor)) if remaining < floor => base.saturating_mul(2),
            _ => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;

    /// Serves `total` numbered records in pages; scripted errors are
    /// returned (in order) before the page at the matching index.
    struct PagedUpstream {
        total: usize,
        errors: Mutex<VecDeque<(usize, UpstreamError)>>,
        calls: Mutex<Vec<PageRequest>>,
    }

    impl PagedUpstream {
        fn new(total: usize) -> Self {
            Self {
                total,
                errors: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn fail_page(self, page: usize, error: UpstreamError, times: usize) -> Self {
            {
                let mut errors = self.errors.lock();
                for _ in 0..times {
                    errors.push_back((page, error.clone()));
                }
            }
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl UpstreamApi for PagedUpstream {
        async fn query_page(&self, request: PageRequest) -> Result<PageResponse, UpstreamError> {
            self.calls.lock().push(request.clone());
            let offset: usize = request.cursor.as_deref().map_or(0, |c| c.parse().unwrap());
            let page_index = offset / request.page_size;

            {
                let mut errors = self.errors.lock();
                if errors.front().is_some_and(|(p, _)| *p == page_index) {
                    let (_, err) = errors.pop_front().unwrap();
                    return Err(err);
                }
            }

            let end = (offset + request.page_size).min(self.total);
            let records: Vec<Value> = (offset..end).map(|i| json!({ "id": i })).collect();
            let has_more = end < self.total;
            Ok(PageResponse {
                records,
                next_cursor: has_more.then(|| end.to_string()),
                has_more,
                rate_limit_remaining: Some(100),
            })
        }

        async fn ping(&self) -> Result<(), UpstreamError> {
            Ok(())
        }
    }

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Row {
        id: usize,
    }

    fn client(upstream: Arc<PagedUpstream>) -> FetchClient {
        FetchClient::new(upstream, FetchConfig::test())
    }

    #[tokio::test]
    async fn test_three_pages_fifty_fifty_twenty() {
        let upstream = Arc::new(PagedUpstream::new(120));
        let client = client(upstream.clone());

        let outcome = client
            .fetch_all::<Row>(EntityKind::Orders, &QueryFilter::default(), 50, 10_000)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 120);
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.page_calls, 3);
        assert_eq!(upstream.call_count(), 3);
        assert!(outcome.is_complete());
        assert_eq!(outcome.records[119], Row { id: 119 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_retried_on_same_cursor() {
        let upstream = Arc::new(
            PagedUpstream::new(120).fail_page(1, UpstreamError::RateLimited { retry_after: None }, 2),
        );
        let client = client(upstream.clone());

        let outcome = client
            .fetch_all::<Row>(EntityKind::Orders, &QueryFilter::default(), 50, 10_000)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 120);
        assert_eq!(outcome.page_calls, 5);
        assert_eq!(outcome.retries, 2);
        assert!(outcome.is_complete());

        let cursors: Vec<Option<String>> = upstream.calls.lock().iter().map(|r| r.cursor.clone()).collect();
        assert_eq!(cursors[1], Some("50".to_string()));
        assert_eq!(cursors[2], Some("50".to_string()));
        assert_eq!(cursors[3], Some("50".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_returns_partial() {
        let upstream = Arc::new(
            PagedUpstream::new(120).fail_page(1, UpstreamError::Timeout(Duration::from_secs(1)), 3),
        );
        let client = client(upstream.clone());

        let outcome = client
            .fetch_all::<Row>(EntityKind::Products, &QueryFilter::default(), 50, 10_000)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 50);
        assert_eq!(outcome.truncated, Some(Truncation::RetriesExhausted));
        assert_eq!(outcome.page_calls, 4);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts() {
        let upstream = Arc::new(PagedUpstream::new(120).fail_page(1, UpstreamError::Auth("expired".into()), 1));
        let client = client(upstream.clone());

        let result = client
            .fetch_all::<Row>(EntityKind::Customers, &QueryFilter::default(), 50, 10_000)
            .await;

        assert_eq!(result.unwrap_err(), UpstreamError::Auth("expired".into()));
        assert_eq!(upstream.call_count(), 2);
    }

    #[tokio::test]
    async fn test_page_size_clamped_to_upstream_limit() {
        let upstream = Arc::new(PagedUpstream::new(60));
        let client = client(upstream.clone());

        let outcome = client
            .fetch_all::<Row>(EntityKind::Orders, &QueryFilter::default(), 500, 10_000)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 60);
        assert!(upstream.calls.lock().iter().all(|r| r.page_size == UPSTREAM_PAGE_LIMIT));
    }

    #[tokio::test]
    async fn test_record_cap_truncates() {
        let upstream = Arc::new(PagedUpstream::new(200));
        let client = client(upstream.clone());

        let outcome = client
            .fetch_all::<Row>(EntityKind::Orders, &QueryFilter::default(), 50, 75)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 75);
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.truncated, Some(Truncation::RecordCap));
    }

    #[tokio::test]
    async fn test_cap_equal_to_dataset_is_complete() {
        let upstream = Arc::new(PagedUpstream::new(100));
        let client = client(upstream);

        let outcome = client
            .fetch_all::<Row>(EntityKind::Orders, &QueryFilter::default(), 50, 100)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 100);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_page_limit_truncates() {
        let upstream = Arc::new(PagedUpstream::new(1_000));
        let config = FetchConfig { max_pages: 2, ..FetchConfig::test() };
        let client = FetchClient::new(upstream, config);

        let outcome = client
            .fetch_all::<Row>(EntityKind::Orders, &QueryFilter::default(), 50, 10_000)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 100);
        assert_eq!(outcome.truncated, Some(Truncation::PageLimit));
    }

    #[tokio::test]
    async fn test_undecodable_record_is_fatal() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Strict {
            sku: String,
        }

        let upstream = Arc::new(PagedUpstream::new(10));
        let client = client(upstream);

        let result = client
            .fetch_all::<Strict>(EntityKind::Products, &QueryFilter::default(), 50, 100)
            .await;
        assert!(matches!(result, Err(UpstreamError::Decode(_))));
    }

    #[test]
    fn test_inter_page_delay_doubles_below_floor() {
        let config = FetchConfig {
            inter_page_delay_ms: 100,
            rate_limit_floor: Some(10),
            ..FetchConfig::test()
        };
        let client = FetchClient::new(Arc::new(PagedUpstream::new(0)), config);

        assert_eq!(client.inter_page_delay(Some(50)), Duration::from_millis(100));
        assert_eq!(client.inter_page_delay(Some(3)), Duration::from_millis(200));
        assert_eq!(client.inter_page_delay(None), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_extends_backoff() {
        let upstream = Arc::new(PagedUpstream::new(10).fail_page(
            0,
            UpstreamError::RateLimited { retry_after: Some(Duration::from_secs(30)) },
            1,
        ));
        let client = client(upstream);

        let start = tokio::time::Instant::now();
        let outcome = client
            .fetch_all::<Row>(EntityKind::Orders, &QueryFilter::default(), 50, 100)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 10);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
