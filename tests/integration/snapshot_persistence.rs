//! Snapshot persistence across restarts
//!
//! These tests open the file-backed storage the way the server does,
//! write through the service, close it and open it again.

use tally::{
    AggregationService, MetricKind, MetricRecord,
    config::StorageConfig,
    storage::{self, Snapshot},
};
use tempfile::tempdir;

fn file_config(path: std::path::PathBuf, store_interval: u64, restore: bool) -> StorageConfig {
    StorageConfig::File {
        path,
        store_interval,
        restore,
    }
}

async fn open_service(config: &StorageConfig) -> AggregationService {
    AggregationService::new(storage::open(config).await.unwrap())
}

#[tokio::test]
async fn test_write_through_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    let config = file_config(path.clone(), 0, true);

    let service = open_service(&config).await;
    service.update_one(MetricRecord::counter("PollCount", 5)).await.unwrap();
    service.update_one(MetricRecord::gauge("Alloc", 2.5)).await.unwrap();
    service.close().await.unwrap();

    let service = open_service(&config).await;
    let total = service
        .update_one(MetricRecord::counter("PollCount", 1))
        .await
        .unwrap();
    assert_eq!(total.delta, Some(6));
    assert_eq!(
        service.query("Alloc", MetricKind::Gauge).await.unwrap(),
        MetricRecord::gauge("Alloc", 2.5)
    );
}

#[tokio::test]
async fn test_restore_disabled_starts_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let service = open_service(&file_config(path.clone(), 0, true)).await;
    service.update_one(MetricRecord::counter("PollCount", 5)).await.unwrap();
    service.close().await.unwrap();

    let service = open_service(&file_config(path, 0, false)).await;
    assert!(service.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_interval_mode_exports_on_close() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    let config = file_config(path.clone(), 3600, true);

    let service = open_service(&config).await;
    service
        .update_batch(vec![
            MetricRecord::counter("PollCount", 2),
            MetricRecord::gauge("HeapInuse", 7.0),
        ])
        .await
        .unwrap();

    // nothing is written before the first tick
    assert!(!path.exists());

    service.close().await.unwrap();

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    let snapshot: Snapshot = serde_json::from_str(&contents).unwrap();
    assert_eq!(snapshot.counters.get("PollCount"), Some(&2));
    assert_eq!(snapshot.gauges.get("HeapInuse"), Some(&7.0));
}

#[tokio::test]
async fn test_malformed_file_is_ignored_on_restore() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    tokio::fs::write(&path, b"{not json").await.unwrap();

    let service = open_service(&file_config(path.clone(), 0, true)).await;
    assert!(service.list_all().await.unwrap().is_empty());

    // the next write replaces the broken file
    service.update_one(MetricRecord::gauge("Alloc", 1.0)).await.unwrap();
    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(serde_json::from_str::<Snapshot>(&contents).is_ok());
}

#[tokio::test]
async fn test_memory_backend_forgets_on_restart() {
    let service = open_service(&StorageConfig::Memory).await;
    service.update_one(MetricRecord::counter("PollCount", 1)).await.unwrap();
    service.close().await.unwrap();

    let service = open_service(&StorageConfig::Memory).await;
    assert!(service.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_finite_gauge_cannot_corrupt_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    let config = file_config(path.clone(), 0, true);

    let service = open_service(&config).await;
    service.update_one(MetricRecord::counter("hits", 42)).await.unwrap();
    assert!(service.update_one(MetricRecord::gauge("bad", f64::NAN)).await.is_err());

    // skipped inside a batch as well
    let applied = service
        .update_batch(vec![
            MetricRecord::gauge("worse", f64::INFINITY),
            MetricRecord::gauge("fine", 1.0),
        ])
        .await
        .unwrap();
    assert_eq!(applied, 1);
    service.close().await.unwrap();

    let service = open_service(&config).await;
    assert_eq!(
        service.query("hits", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("hits", 42)
    );
    assert_eq!(
        service.query("fine", MetricKind::Gauge).await.unwrap(),
        MetricRecord::gauge("fine", 1.0)
    );
}
