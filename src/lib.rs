pub mod agent;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod integrity;
pub mod metric;
pub mod retry;
pub mod service;
pub mod storage;
pub mod util;

pub use metric::{MetricKind, MetricRecord, MetricUpdate, ValidationError, validate};
pub use retry::{RetryPolicy, Retryable};
pub use service::{AggregationService, ServiceError};
