//! Sync cycle records and the process-wide sync state.
//!
//! [`SyncState`] is owned by exactly one [`SyncOrchestrator`](super::SyncOrchestrator)
//! and only mutated while its single-flight guard is held. Everyone else
//! reads snapshots ([`SyncStatus`], [`CycleMetrics`]).

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::upstream::types::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Success,
    Failure,
}

impl CycleOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// A closed sync cycle. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCycle {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: CycleOutcome,
    pub error_message: Option<String>,
    /// Entities whose fetch returned a partial result
    #[serde(default)]
    pub truncated_entities: Vec<EntityKind>,
    #[serde(default)]
    pub aggregates_written: usize,
}

impl SyncCycle {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == CycleOutcome::Success
    }
}

/// An open cycle; consumed by [`close`](Self::close).
#[derive(Debug)]
pub struct CycleStart {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    instant: Instant,
}

impl CycleStart {
    #[must_use]
    pub fn close(
        self,
        outcome: CycleOutcome,
        error_message: Option<String>,
        truncated_entities: Vec<EntityKind>,
        aggregates_written: usize,
    ) -> SyncCycle {
        let duration = self.instant.elapsed();
        // Wall clock may step backwards; never close before we opened
        let finished_at = Utc::now().max(self.started_at);
        SyncCycle {
            cycle_id: self.cycle_id,
            started_at: self.started_at,
            finished_at,
            duration_ms: duration.as_millis() as u64,
            outcome,
            error_message,
            truncated_entities,
            aggregates_written,
        }
    }
}

/// Bounded ring buffer of closed cycles, oldest first.
#[derive(Debug, Clone)]
pub struct CycleHistory {
    cycles: VecDeque<SyncCycle>,
    capacity: usize,
}

impl CycleHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            cycles: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, cycle: SyncCycle) {
        if self.cycles.len() == self.capacity {
            self.cycles.pop_front();
        }
        self.cycles.push_back(cycle);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncCycle> {
        self.cycles.iter()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<SyncCycle> {
        self.cycles.iter().cloned().collect()
    }

    /// Drop cycles that finished at or before `cutoff`, returning how many went.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.cycles.len();
        self.cycles.retain(|c| c.finished_at > cutoff);
        before - self.cycles.len()
    }

    #[must_use]
    pub fn metrics(&self) -> CycleMetrics {
        let total = self.cycles.len();
        let successes = self.cycles.iter().filter(|c| c.is_success()).count();
        let durations = self.cycles.iter().map(|c| c.duration_ms);
        let sum: u64 = durations.clone().sum();

        CycleMetrics {
            total,
            successes,
            failures: total - successes,
            success_rate: if total == 0 { 0.0 } else { successes as f64 / total as f64 },
            avg_duration_ms: if total == 0 { 0 } else { sum / total as u64 },
            max_duration_ms: durations.max().unwrap_or(0),
            last_success_at: self.cycles.iter().rev().find(|c| c.is_success()).map(|c| c.finished_at),
            last_failure_at: self.cycles.iter().rev().find(|c| !c.is_success()).map(|c| c.finished_at),
        }
    }
}

/// Aggregated view over the recent cycle history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Answer to the status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub running: bool,
    pub last_cycle: Option<SyncCycle>,
    pub cycle_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// How worried an operator should be about the failure streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    Healthy,
    Degraded,
    /// Page an operator
    Critical,
}

impl FailureSeverity {
    #[must_use]
    pub fn classify(consecutive_failures: u32, warn_at: u32, critical_at: u32) -> Self {
        if consecutive_failures >= critical_at {
            Self::Critical
        } else if consecutive_failures >= warn_at && consecutive_failures > 0 {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncState {
    running: bool,
    last_cycle: Option<SyncCycle>,
    cycle_count: u64,
    consecutive_failures: u32,
    /// Error of the most recent failed cycle; cleared by a success
    last_error: Option<String>,
    history: CycleHistory,
}

impl SyncState {
    #[must_use]
    pub fn new(history_size: usize) -> Self {
        Self {
            running: false,
            last_cycle: None,
            cycle_count: 0,
            consecutive_failures: 0,
            last_error: None,
            history: CycleHistory::new(history_size),
        }
    }

    /// Enter `Running`: bump the counter and open a cycle.
    pub fn begin(&mut self) -> CycleStart {
        self.running = true;
        self.cycle_count += 1;
        CycleStart {
            cycle_id: self.cycle_count,
            started_at: Utc::now(),
            instant: Instant::now(),
        }
    }

    /// Return to `Idle` with the closed cycle.
    pub fn finish(&mut self, cycle: SyncCycle) {
        self.running = false;
        match cycle.outcome {
            CycleOutcome::Success => {
                self.consecutive_failures = 0;
                self.last_error = None;
            }
            CycleOutcome::Failure => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_error = cycle.error_message.clone();
            }
        }
        self.history.push(cycle.clone());
        self.last_cycle = Some(cycle);
    }

    /// Clear the failure streak; `running` and `last_cycle` are untouched.
    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    #[must_use]
    pub fn running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[must_use]
    pub fn last_cycle(&self) -> Option<&SyncCycle> {
        self.last_cycle.as_ref()
    }

    #[must_use]
    pub fn history(&self) -> &CycleHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut CycleHistory {
        &mut self.history
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            running: self.running,
            last_cycle: self.last_cycle.clone(),
            cycle_count: self.cycle_count,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
        }
    }
}
