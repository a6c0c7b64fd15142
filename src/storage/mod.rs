//! Storage backends for metric persistence
//!
//! This module provides a trait-based abstraction for storing counters and
//! gauges in various backends.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio tasks
//! - **Composable**: the snapshot backend decorates any other backend
//!
//! ## Backends
//!
//! - **In-Memory**: mutex-guarded maps, no persistence
//! - **Snapshot**: wraps a backend and exports it to a JSON file, either
//!   after every write or on an interval
//! - **SQLite**: upserts in a single table with transactional batches
//!
//! ## Usage
//!
//! ```no_run
//! use tally::config::StorageConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = tally::storage::open(&StorageConfig::default()).await?;
//!     backend.save_counter("PollCount", 1).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod snapshot;

#[cfg(feature = "storage-sqlite")]
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{Batch, Snapshot, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use snapshot::{SnapshotBackend, SnapshotMode};

use tracing::info;

use crate::config::StorageConfig;
#[cfg(feature = "storage-sqlite")]
use crate::retry::RetryPolicy;

/// Build the backend selected by `config`
///
/// This is the only place that decides which implementation is used.
pub async fn open(config: &StorageConfig) -> StorageResult<Box<dyn StorageBackend>> {
    match config {
        StorageConfig::Memory => {
            info!("using in-memory storage (no persistence)");
            Ok(Box::new(MemoryBackend::new()))
        }
        StorageConfig::File {
            path,
            store_interval,
            restore,
        } => {
            info!("using file snapshot storage at {}", path.display());
            let backend = SnapshotBackend::open(
                Box::new(MemoryBackend::new()),
                path,
                SnapshotMode::from_interval_secs(*store_interval),
                *restore,
            )
            .await?;
            Ok(Box::new(backend))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            info!("using SQLite storage at {}", path.display());
            let backend = sqlite::SqliteBackend::new(path, RetryPolicy::default()).await?;
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "SQLite storage requires the `storage-sqlite` feature".to_string(),
        )),
    }
}
