//! In-memory storage backend (no persistence)
//!
//! This backend keeps counters and gauges in two ordered maps behind a
//! single mutex. It's useful for:
//! - Testing without database dependencies
//! - The default server mode, optionally wrapped by the snapshot backend
//!
//! ## Concurrency
//!
//! Every operation takes the same lock, so a counter's read-modify-write
//! can never interleave with another writer. A [`Batch`] holds the lock
//! until it is committed or dropped, which makes its writes appear together.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::backend::{Batch, Snapshot, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::metric::{MetricKind, MetricRecord};

#[derive(Debug, Default)]
struct MemoryState {
    counters: BTreeMap<String, i64>,
    gauges: BTreeMap<String, f64>,
}

impl MemoryState {
    fn save_gauge(&mut self, id: &str, value: f64) {
        self.gauges.insert(id.to_string(), value);
    }

    fn save_counter(&mut self, id: &str, delta: i64) -> StorageResult<i64> {
        let total = self.counters.entry(id.to_string()).or_insert(0);
        *total = total
            .checked_add(delta)
            .ok_or_else(|| StorageError::CounterOverflow(id.to_string()))?;
        Ok(*total)
    }
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save_gauge(&self, id: &str, value: f64) -> StorageResult<()> {
        trace!("gauge {id} = {value}");
        self.state.lock().await.save_gauge(id, value);
        Ok(())
    }

    async fn save_counter(&self, id: &str, delta: i64) -> StorageResult<i64> {
        let total = self.state.lock().await.save_counter(id, delta)?;
        trace!("counter {id} += {delta} -> {total}");
        Ok(total)
    }

    async fn get(&self, id: &str, kind: MetricKind) -> StorageResult<Option<MetricRecord>> {
        let state = self.state.lock().await;
        let record = match kind {
            MetricKind::Counter => state
                .counters
                .get(id)
                .map(|delta| MetricRecord::counter(id, *delta)),
            MetricKind::Gauge => state
                .gauges
                .get(id)
                .map(|value| MetricRecord::gauge(id, *value)),
        };
        Ok(record)
    }

    async fn list(&self, kind: MetricKind) -> StorageResult<Vec<MetricRecord>> {
        let state = self.state.lock().await;
        let records = match kind {
            MetricKind::Counter => state
                .counters
                .iter()
                .map(|(id, delta)| MetricRecord::counter(id.clone(), *delta))
                .collect(),
            MetricKind::Gauge => state
                .gauges
                .iter()
                .map(|(id, value)| MetricRecord::gauge(id.clone(), *value))
                .collect(),
        };
        Ok(records)
    }

    async fn ping(&self) -> bool {
        false
    }

    async fn snapshot(&self) -> StorageResult<Snapshot> {
        let state = self.state.lock().await;
        Ok(Snapshot {
            counters: state.counters.clone(),
            gauges: state.gauges.clone(),
        })
    }

    async fn restore(&self, snapshot: Snapshot) -> StorageResult<()> {
        debug!("restoring {} metrics into memory", snapshot.len());
        let mut state = self.state.lock().await;
        state.counters.extend(snapshot.counters);
        state.gauges.extend(snapshot.gauges);
        Ok(())
    }

    async fn begin_batch<'a>(&'a self) -> StorageResult<Box<dyn Batch + 'a>> {
        Ok(Box::new(MemoryBatch {
            state: self.state.lock().await,
        }))
    }
}

/// Batch that holds the state lock for its whole lifetime
struct MemoryBatch<'a> {
    state: MutexGuard<'a, MemoryState>,
}

#[async_trait]
impl<'a> Batch for MemoryBatch<'a> {
    async fn save_gauge(&mut self, id: &str, value: f64) -> StorageResult<()> {
        self.state.save_gauge(id, value);
        Ok(())
    }

    async fn save_counter(&mut self, id: &str, delta: i64) -> StorageResult<i64> {
        self.state.save_counter(id, delta)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
