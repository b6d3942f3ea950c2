//! Property-based tests for pagination and the sync failure counter.
//!
//! Run with: `cargo test --test proptest_fetch`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};

use commerce_sync::cache::keys::{self, DashboardDomain};
use commerce_sync::config::FetchConfig;
use commerce_sync::sync::{CycleOutcome, SyncState};
use commerce_sync::upstream::{PageRequest, PageResponse, Truncation, UPSTREAM_PAGE_LIMIT};
use commerce_sync::{Aggregate, EntityKind, FetchClient, KeyClass, QueryFilter, UpstreamApi, UpstreamError};

// =============================================================================
// Fake upstream
// =============================================================================

/// `total` records behind offset cursors; page `i` fails `plan[i]` times first.
struct PlannedUpstream {
    total: usize,
    plan: Mutex<Vec<usize>>,
    calls: AtomicUsize,
}

impl PlannedUpstream {
    fn new(total: usize, plan: Vec<usize>) -> Self {
        Self {
            total,
            plan: Mutex::new(plan),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UpstreamApi for PlannedUpstream {
    async fn query_page(&self, request: PageRequest) -> Result<PageResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let offset: usize = request.cursor.as_deref().and_then(|c| c.parse().ok()).unwrap_or(0);
        let page = offset / request.page_size;

        {
            let mut plan = self.plan.lock();
            if let Some(left) = plan.get_mut(page) {
                if *left > 0 {
                    *left -= 1;
                    return Err(UpstreamError::Timeout(std::time::Duration::from_secs(1)));
                }
            }
        }

        let end = (offset + request.page_size).min(self.total);
        let has_more = end < self.total;
        Ok(PageResponse {
            records: (offset..end).map(|i| json!({ "id": i })).collect(),
            next_cursor: has_more.then(|| end.to_string()),
            has_more,
            rate_limit_remaining: None,
        })
    }

    async fn ping(&self) -> Result<(), UpstreamError> {
        Ok(())
    }
}

fn fetch_config(max_retries: u32) -> FetchConfig {
    FetchConfig {
        max_retries,
        base_delay_ms: 5,
        inter_page_delay_ms: 1,
        max_pages: 1_000,
        record_cap: 100_000,
        ..FetchConfig::default()
    }
}

/// Paused clock so backoff sleeps cost nothing.
fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

fn ids(records: &[Value]) -> Vec<u64> {
    records.iter().filter_map(|r| r["id"].as_u64()).collect()
}

// =============================================================================
// Pagination termination
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// With every page failing at most `max_retries - 1` times, the walk
    /// completes and uses exactly ⌈M/P⌉ + retries calls.
    #[test]
    fn fetch_all_completes_under_tolerable_failures(
        total in 0usize..400,
        page_size in 1usize..80,
        max_retries in 1u32..5,
        raw_plan in prop::collection::vec(0usize..10, 0..20),
    ) {
        let plan: Vec<usize> = raw_plan.iter().map(|f| f % max_retries as usize).collect();
        let upstream = Arc::new(PlannedUpstream::new(total, plan.clone()));
        let client = FetchClient::new(upstream.clone(), fetch_config(max_retries));

        let outcome = runtime()
            .block_on(client.fetch_all::<Value>(EntityKind::Orders, &QueryFilter::default(), page_size, usize::MAX))
            .unwrap();

        let effective = page_size.min(UPSTREAM_PAGE_LIMIT);
        let pages = total.div_ceil(effective).max(1);
        let injected: usize = plan.iter().take(pages).sum();

        prop_assert!(outcome.truncated.is_none());
        prop_assert_eq!(ids(&outcome.records), (0..total as u64).collect::<Vec<_>>());
        prop_assert_eq!(outcome.pages, pages);
        prop_assert_eq!(outcome.retries, injected);
        prop_assert_eq!(outcome.page_calls, pages + injected);
        prop_assert_eq!(upstream.calls.load(Ordering::SeqCst), pages + injected);
    }

    /// With arbitrary failure counts the walk still terminates, returns a
    /// prefix of the dataset, and never exceeds ⌈M/P⌉ + retries calls.
    #[test]
    fn fetch_all_terminates_with_a_prefix(
        total in 0usize..300,
        page_size in 1usize..60,
        max_retries in 1u32..4,
        plan in prop::collection::vec(0usize..6, 0..15),
    ) {
        let upstream = Arc::new(PlannedUpstream::new(total, plan));
        let client = FetchClient::new(upstream.clone(), fetch_config(max_retries));

        let outcome = runtime()
            .block_on(client.fetch_all::<Value>(EntityKind::Products, &QueryFilter::default(), page_size, usize::MAX))
            .unwrap();

        let got = ids(&outcome.records);
        prop_assert!(got.len() <= total);
        prop_assert_eq!(got, (0..outcome.records.len() as u64).collect::<Vec<_>>());

        let effective = page_size.min(UPSTREAM_PAGE_LIMIT);
        prop_assert!(outcome.page_calls <= total.div_ceil(effective).max(1) + outcome.retries);
        match outcome.truncated {
            None => prop_assert_eq!(outcome.records.len(), total),
            Some(reason) => prop_assert_eq!(reason, Truncation::RetriesExhausted),
        }
    }

    /// Result length never exceeds the record cap.
    #[test]
    fn fetch_all_respects_record_cap(
        total in 0usize..300,
        page_size in 1usize..60,
        cap in 1usize..200,
    ) {
        let upstream = Arc::new(PlannedUpstream::new(total, vec![]));
        let client = FetchClient::new(upstream, fetch_config(3));

        let outcome = runtime()
            .block_on(client.fetch_all::<Value>(EntityKind::Customers, &QueryFilter::default(), page_size, cap))
            .unwrap();

        prop_assert_eq!(outcome.records.len(), total.min(cap));
        if total > cap {
            prop_assert_eq!(outcome.truncated, Some(Truncation::RecordCap));
        } else {
            prop_assert!(outcome.truncated.is_none());
        }
    }
}

// =============================================================================
// Failure-counter law
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Step {
    Success,
    Failure,
    Reset,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Success),
        4 => Just(Step::Failure),
        1 => Just(Step::Reset),
    ]
}

proptest! {
    /// Success zeroes the streak, failure adds exactly one, reset zeroes it,
    /// and the cycle counter only moves on cycles.
    #[test]
    fn failure_counter_law(steps in prop::collection::vec(step_strategy(), 0..60)) {
        let mut state = SyncState::new(10);
        let mut expected_failures = 0u32;
        let mut expected_cycles = 0u64;

        for step in steps {
            match step {
                Step::Reset => {
                    state.reset_failures();
                    expected_failures = 0;
                }
                Step::Success | Step::Failure => {
                    let start = state.begin();
                    prop_assert!(state.running());
                    expected_cycles += 1;
                    prop_assert_eq!(start.cycle_id, expected_cycles);

                    let (outcome, error) = match step {
                        Step::Success => (CycleOutcome::Success, None),
                        _ => (CycleOutcome::Failure, Some("boom".to_string())),
                    };
                    state.finish(start.close(outcome, error, vec![], 0));
                    prop_assert!(!state.running());

                    expected_failures = match outcome {
                        CycleOutcome::Success => 0,
                        CycleOutcome::Failure => expected_failures + 1,
                    };
                }
            }
            prop_assert_eq!(state.consecutive_failures(), expected_failures);
            prop_assert_eq!(state.cycle_count(), expected_cycles);
        }
        prop_assert!(state.history().len() <= 10);
    }
}

// =============================================================================
// Aggregate tier check
// =============================================================================

fn class_strategy() -> impl Strategy<Value = KeyClass> {
    prop_oneof![
        Just(KeyClass::PrimaryAggregate),
        Just(KeyClass::SecondaryAggregate),
        Just(KeyClass::EntitySnapshot),
        Just(KeyClass::SyncMarker),
        Just(KeyClass::Alerts),
        Just(KeyClass::Internal),
    ]
}

fn key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(keys::DASHBOARD_SUMMARY.to_string()),
        Just(keys::dashboard(DashboardDomain::Sales)),
        Just(keys::dashboard(DashboardDomain::Inventory)),
        Just(keys::SYNC_LAST_SUCCESS.to_string()),
        Just(keys::SYNC_LAST_FAILURE.to_string()),
        Just(keys::SYNC_METRICS_HISTORY.to_string()),
        Just("orders:latest".to_string()),
        Just("alerts:memory".to_string()),
        "[a-z]{1,8}(:[a-z]{1,8}){0,2}",
    ]
}

proptest! {
    /// An aggregate passes only when its key is a dashboard key and the
    /// declared class is the one the key resolves to.
    #[test]
    fn aggregate_tier_matches_key(key in key_strategy(), class in class_strategy()) {
        let resolved = KeyClass::of(&key);
        let aggregate = Aggregate { key, class, value: json!({}) };

        let dashboard = matches!(resolved, KeyClass::PrimaryAggregate | KeyClass::SecondaryAggregate);
        prop_assert_eq!(aggregate.check_tier().is_ok(), dashboard && resolved == class);
    }
}
