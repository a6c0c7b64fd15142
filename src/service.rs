//! Aggregation service
//!
//! The single entry point for ingesting and reading metrics. It validates
//! incoming records, turns them into backend writes and maps the results
//! back into records. The service owns its backend; the HTTP layer and tests
//! drive it through a shared reference.
//!
//! Single updates are strict: an invalid record is rejected. Batch updates
//! favor availability: invalid records are skipped and the remaining ones
//! are applied inside one backend batch, which is all-or-nothing on
//! transactional backends.

use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use crate::metric::{MetricKind, MetricRecord, MetricUpdate, ValidationError, validate};
use crate::retry::{RetryPolicy, Retryable};
use crate::storage::backend::{apply, apply_in_batch};
use crate::storage::{StorageBackend, StorageError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} metric {id:?} not found")]
    NotFound { id: String, kind: MetricKind },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A failed batch attempt
///
/// Re-running is only safe when the failed attempt left nothing behind,
/// otherwise counters already applied would be counted twice.
#[derive(Debug)]
struct BatchError {
    source: StorageError,
    rerunnable: bool,
}

impl BatchError {
    fn new(source: StorageError, rerunnable: bool) -> Self {
        Self { source, rerunnable }
    }
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.source.fmt(f)
    }
}

impl Retryable for BatchError {
    fn is_transient(&self) -> bool {
        self.rerunnable && self.source.is_transient()
    }
}

pub struct AggregationService {
    backend: Box<dyn StorageBackend>,
    retry: RetryPolicy,
}

impl AggregationService {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self::with_retry(backend, RetryPolicy::default())
    }

    /// Use `retry` for whole-batch retries
    pub fn with_retry(backend: Box<dyn StorageBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Validate and apply one record
    ///
    /// Counters come back with their new cumulative delta, gauges with the
    /// stored value.
    #[instrument(skip(self), fields(id = %record.id, kind = %record.kind))]
    pub async fn update_one(&self, record: MetricRecord) -> Result<MetricRecord, ServiceError> {
        let update = validate(&record).inspect_err(|e| debug!("rejected record: {e}"))?;
        let stored = apply(self.backend.as_ref(), &update).await?;
        trace!("stored {} = {}", stored.id, stored.display_value());
        Ok(stored)
    }

    /// Apply every valid record of `records` in one backend batch
    ///
    /// Returns the number of records applied. Invalid records are skipped.
    /// On transactional backends the whole batch is re-run after a transient
    /// failure and a fatal failure leaves nothing applied. Other backends get
    /// a single attempt.
    #[instrument(skip_all, fields(count = records.len()))]
    pub async fn update_batch(&self, records: Vec<MetricRecord>) -> Result<usize, ServiceError> {
        let updates: Vec<MetricUpdate> = records
            .iter()
            .filter_map(|record| match validate(record) {
                Ok(update) => Some(update),
                Err(e) => {
                    warn!("skipping invalid record {:?}: {e}", record.id);
                    None
                }
            })
            .collect();

        if updates.is_empty() {
            debug!("no valid records in batch");
            return Ok(0);
        }

        self.retry
            .run(|| async {
                // nothing has been written before the batch exists
                let mut batch = self
                    .backend
                    .begin_batch()
                    .await
                    .map_err(|e| BatchError::new(e, true))?;
                let rerunnable = batch.is_transactional();

                for update in &updates {
                    apply_in_batch(batch.as_mut(), update)
                        .await
                        .map_err(|e| BatchError::new(e, rerunnable))?;
                }
                batch
                    .commit()
                    .await
                    .map_err(|e| BatchError::new(e, rerunnable))
            })
            .await
            .map_err(|e| e.source)?;

        debug!("applied {} of {} records", updates.len(), records.len());
        Ok(updates.len())
    }

    /// Point lookup
    #[instrument(skip(self))]
    pub async fn query(&self, id: &str, kind: MetricKind) -> Result<MetricRecord, ServiceError> {
        match self.backend.get(id, kind).await? {
            Some(record) => Ok(record),
            None => {
                trace!("{kind} metric {id:?} not found");
                Err(ServiceError::NotFound {
                    id: id.to_string(),
                    kind,
                })
            }
        }
    }

    /// Every stored metric, counters first
    pub async fn list_all(&self) -> Result<Vec<MetricRecord>, ServiceError> {
        let mut records = self.backend.list(MetricKind::Counter).await?;
        records.extend(self.backend.list(MetricKind::Gauge).await?);
        Ok(records)
    }

    pub async fn health_check(&self) -> bool {
        self.backend.ping().await
    }

    /// Stop background work and release the backend
    pub async fn close(&self) -> Result<(), ServiceError> {
        info!("closing aggregation service");
        self.backend.close().await?;
        Ok(())
    }
}
