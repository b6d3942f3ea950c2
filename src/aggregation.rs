//! Aggregation adapter boundary.
//!
//! Business formulas (revenue, churn, turnover, ...) live outside the
//! engine. The orchestrator hands each registered [`Aggregator`] the raw
//! records fetched during a cycle and writes whatever [`Aggregate`]s come
//! back under the TTL of their key class.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::cache::keys::{self, DashboardDomain, KeyClass};
use crate::upstream::types::EntityKind;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct AggregationError {
    pub message: String,
}

impl AggregationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Raw records fetched in one cycle, keyed by entity.
#[derive(Debug, Clone, Default)]
pub struct RawSnapshot {
    records: HashMap<EntityKind, Arc<Vec<Value>>>,
    truncated: BTreeSet<EntityKind>,
}

impl RawSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: EntityKind, records: Vec<Value>, truncated: bool) {
        self.records.insert(entity, Arc::new(records));
        if truncated {
            self.truncated.insert(entity);
        }
    }

    /// Records for `entity`; empty if it was not fetched this cycle.
    #[must_use]
    pub fn records(&self, entity: EntityKind) -> &[Value] {
        self.records.get(&entity).map(|r| r.as_slice()).unwrap_or(&[])
    }

    #[must_use]
    pub fn contains(&self, entity: EntityKind) -> bool {
        self.records.contains_key(&entity)
    }

    /// Whether the records for `entity` are a partial result.
    #[must_use]
    pub fn is_truncated(&self, entity: EntityKind) -> bool {
        self.truncated.contains(&entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.records.keys().copied()
    }
}

/// One value to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub key: String,
    pub class: KeyClass,
    pub value: Value,
}

impl Aggregate {
    /// `dashboard:summary`, 60s tier.
    pub fn primary(value: Value) -> Self {
        Self {
            key: keys::DASHBOARD_SUMMARY.to_string(),
            class: KeyClass::PrimaryAggregate,
            value,
        }
    }

    /// `dashboard:<domain>`, 300s tier.
    pub fn secondary(domain: DashboardDomain, value: Value) -> Self {
        Self {
            key: keys::dashboard(domain),
            class: KeyClass::SecondaryAggregate,
            value,
        }
    }

    /// Aggregators may only publish dashboard keys, and the declared class
    /// must be the one the key itself resolves to.
    pub fn check_tier(&self) -> Result<(), AggregationError> {
        let actual = KeyClass::of(&self.key);
        if !matches!(actual, KeyClass::PrimaryAggregate | KeyClass::SecondaryAggregate) {
            return Err(AggregationError::new(format!(
                "'{}' is a {} key, not a dashboard aggregate",
                self.key,
                actual.as_str()
            )));
        }
        if actual != self.class {
            return Err(AggregationError::new(format!(
                "'{}' declared as {} but belongs to {}",
                self.key,
                self.class.as_str(),
                actual.as_str()
            )));
        }
        Ok(())
    }
}

/// A pluggable report function.
///
/// Implementations must be pure with respect to the snapshot: the engine may
/// call them from any task and will not retry them on failure.
pub trait Aggregator: Send + Sync {
    fn name(&self) -> &str;

    /// Entities this aggregator reads; the union across aggregators decides
    /// what a cycle fetches.
    fn required_entities(&self) -> &[EntityKind];

    fn aggregate(&self, snapshot: &RawSnapshot) -> Result<Vec<Aggregate>, AggregationError>;
}

type AggregateFn = dyn Fn(&RawSnapshot) -> Result<Vec<Aggregate>, AggregationError> + Send + Sync;

/// Closure-backed aggregator.
pub struct FnAggregator {
    name: String,
    entities: Vec<EntityKind>,
    func: Box<AggregateFn>,
}

impl FnAggregator {
    pub fn new<F>(name: impl Into<String>, entities: &[EntityKind], func: F) -> Self
    where
        F: Fn(&RawSnapshot) -> Result<Vec<Aggregate>, AggregationError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            entities: entities.to_vec(),
            func: Box::new(func),
        }
    }
}

impl Aggregator for FnAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_entities(&self) -> &[EntityKind] {
        &self.entities
    }

    fn aggregate(&self, snapshot: &RawSnapshot) -> Result<Vec<Aggregate>, AggregationError> {
        (self.func)(snapshot)
    }
}

/// Publishes per-entity record counts as the primary dashboard summary.
#[derive(Debug, Default)]
pub struct RecordCounts;

impl Aggregator for RecordCounts {
    fn name(&self) -> &str {
        "record_counts"
    }

    fn required_entities(&self) -> &[EntityKind] {
        &EntityKind::ALL
    }

    fn aggregate(&self, snapshot: &RawSnapshot) -> Result<Vec<Aggregate>, AggregationError> {
        let mut counts = serde_json::Map::new();
        for entity in EntityKind::ALL {
            counts.insert(
                entity.as_str().to_string(),
                json!({
                    "count": snapshot.records(entity).len(),
                    "partial": snapshot.is_truncated(entity),
                }),
            );
        }
        Ok(vec![Aggregate::primary(Value::Object(counts))])
    }
}

/// Union of every aggregator's required entities, in a stable order.
#[must_use]
pub fn required_entities(aggregators: &[Arc<dyn Aggregator>]) -> Vec<EntityKind> {
    aggregators
        .iter()
        .flat_map(|a| a.required_entities().iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
