//! SQLite persistence tests
//!
//! These tests verify that:
//! - Counters and gauges survive a restart
//! - A DSN override selects the database backend
//! - Snapshots move state between backends

use tally::{
    AggregationService, MetricKind, MetricRecord, RetryPolicy,
    config::{ServerConfig, ServerOverrides, StorageConfig},
    storage::{self, MemoryBackend, StorageBackend, sqlite::SqliteBackend},
};
use tempfile::tempdir;

#[tokio::test]
async fn test_sqlite_survives_restart() {
    let dir = tempdir().unwrap();
    let config = StorageConfig::Sqlite {
        path: dir.path().join("metrics.db"),
    };

    {
        let service = AggregationService::new(storage::open(&config).await.unwrap());
        service
            .update_batch(vec![
                MetricRecord::counter("PollCount", 4),
                MetricRecord::gauge("Alloc", 99.5),
            ])
            .await
            .unwrap();
        service.close().await.unwrap();
    }

    let service = AggregationService::new(storage::open(&config).await.unwrap());
    assert!(service.health_check().await);

    let total = service
        .update_one(MetricRecord::counter("PollCount", 1))
        .await
        .unwrap();
    assert_eq!(total, MetricRecord::counter("PollCount", 5));
    assert_eq!(
        service.query("Alloc", MetricKind::Gauge).await.unwrap(),
        MetricRecord::gauge("Alloc", 99.5)
    );
}

#[tokio::test]
async fn test_dsn_override_opens_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("from-dsn.db");

    let mut config = ServerConfig::default();
    config.apply(ServerOverrides {
        database_dsn: Some(format!("sqlite://{}", db_path.display())),
        ..Default::default()
    });

    assert_eq!(
        config.storage,
        StorageConfig::Sqlite {
            path: db_path.clone()
        }
    );

    let backend = storage::open(&config.storage).await.unwrap();
    backend.save_gauge("Alloc", 1.0).await.unwrap();
    backend.close().await.unwrap();

    assert!(db_path.exists());
}

#[tokio::test]
async fn test_snapshot_moves_state_between_backends() {
    let dir = tempdir().unwrap();

    let memory = MemoryBackend::new();
    memory.save_counter("PollCount", 12).await.unwrap();
    memory.save_gauge("Alloc", 3.5).await.unwrap();

    let sqlite = SqliteBackend::new(dir.path().join("metrics.db"), RetryPolicy::none())
        .await
        .unwrap();
    sqlite.save_counter("PollCount", 100).await.unwrap();

    // restore overwrites rather than adds
    sqlite.restore(memory.snapshot().await.unwrap()).await.unwrap();

    assert_eq!(sqlite.snapshot().await.unwrap(), memory.snapshot().await.unwrap());
}

#[tokio::test]
async fn test_failed_batch_leaves_nothing_visible() {
    use tally::ServiceError;

    let dir = tempdir().unwrap();
    let backend = SqliteBackend::new(dir.path().join("metrics.db"), RetryPolicy::none())
        .await
        .unwrap();
    let service = AggregationService::with_retry(Box::new(backend), RetryPolicy::none());

    service.update_one(MetricRecord::counter("hits", 10)).await.unwrap();

    // the second i64::MAX overflows inside the transaction
    let result = service
        .update_batch(vec![
            MetricRecord::gauge("before", 1.0),
            MetricRecord::counter("hits", 5),
            MetricRecord::counter("big", i64::MAX),
            MetricRecord::counter("big", i64::MAX),
            MetricRecord::gauge("after", 2.0),
        ])
        .await;
    assert!(matches!(result, Err(ServiceError::Storage(_))), "{result:?}");

    assert_eq!(
        service.query("hits", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("hits", 10)
    );
    for (id, kind) in [
        ("before", MetricKind::Gauge),
        ("big", MetricKind::Counter),
        ("after", MetricKind::Gauge),
    ] {
        assert!(
            matches!(service.query(id, kind).await, Err(ServiceError::NotFound { .. })),
            "{id} should not be visible"
        );
    }
}
