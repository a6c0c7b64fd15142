//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement, plus the [`Batch`] handle used
//! for multi-record updates and the [`Snapshot`] export format.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::error::StorageResult;
use crate::metric::{MetricKind, MetricRecord, MetricUpdate};

/// Full-state export of a backend
///
/// This is also the on-disk format of the snapshot file:
///
/// ```json
/// {"counters": {"PollCount": 42}, "gauges": {"Alloc": 1024.0}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,

    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.gauges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counters.len() + self.gauges.len()
    }
}

/// Trait for storage backends
///
/// Every backend stores one value per `(id, kind)`: the accumulated delta
/// for counters and the last written value for gauges.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` and must make `save_counter` an
/// atomic read-modify-write: concurrent increments of the same id never
/// lose an update.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Replace the stored value of a gauge
    async fn save_gauge(&self, id: &str, value: f64) -> StorageResult<()>;

    /// Add `delta` to a counter (absent counters start at 0)
    ///
    /// Returns the new cumulative value.
    async fn save_counter(&self, id: &str, delta: i64) -> StorageResult<i64>;

    /// Point lookup; `None` when the metric was never written
    async fn get(&self, id: &str, kind: MetricKind) -> StorageResult<Option<MetricRecord>>;

    /// All metrics of one kind
    async fn list(&self, kind: MetricKind) -> StorageResult<Vec<MetricRecord>>;

    /// Probe the external dependency behind the backend
    ///
    /// Backends without one report `false`.
    async fn ping(&self) -> bool;

    /// Export the complete state
    async fn snapshot(&self) -> StorageResult<Snapshot>;

    /// Overwrite stored values with the contents of a snapshot
    async fn restore(&self, snapshot: Snapshot) -> StorageResult<()>;

    /// Open a batch; writes through it become visible on [`Batch::commit`]
    /// for transactional backends, immediately otherwise
    async fn begin_batch<'a>(&'a self) -> StorageResult<Box<dyn Batch + 'a>>;

    /// Release resources and stop background tasks
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Handle for a group of updates applied together
///
/// Dropping a batch without committing abandons it. For transactional
/// backends this rolls every write back.
#[async_trait]
pub trait Batch: Send {
    async fn save_gauge(&mut self, id: &str, value: f64) -> StorageResult<()>;

    async fn save_counter(&mut self, id: &str, delta: i64) -> StorageResult<i64>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// `true` when nothing written through the batch is kept unless it commits
    fn is_transactional(&self) -> bool {
        false
    }
}

/// Apply one validated update through a backend, returning the stored record
pub async fn apply(backend: &dyn StorageBackend, update: &MetricUpdate) -> StorageResult<MetricRecord> {
    match update {
        MetricUpdate::Counter { id, delta } => {
            let total = backend.save_counter(id, *delta).await?;
            Ok(MetricRecord::counter(id.clone(), total))
        }
        MetricUpdate::Gauge { id, value } => {
            backend.save_gauge(id, *value).await?;
            Ok(MetricRecord::gauge(id.clone(), *value))
        }
    }
}

/// Apply one validated update inside a batch
pub async fn apply_in_batch(batch: &mut (dyn Batch + '_), update: &MetricUpdate) -> StorageResult<()> {
    trace!("batch write: {} {}", update.kind(), update.id());
    match update {
        MetricUpdate::Counter { id, delta } => {
            batch.save_counter(id, *delta).await?;
        }
        MetricUpdate::Gauge { id, value } => {
            batch.save_gauge(id, *value).await?;
        }
    }
    Ok(())
}
