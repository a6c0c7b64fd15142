//! Failure scenario tests
//!
//! These tests verify the system keeps running when:
//! - The server is unreachable
//! - The server rejects a batch
//! - A batch mixes valid and invalid records

use std::time::Duration;

use tally::{
    MetricKind, MetricRecord, RetryPolicy, ServiceError,
    agent::{AgentHandle, FlushOutcome},
    config::AgentConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{memory_service, sample_batch};

fn agent_config(address: String) -> AgentConfig {
    AgentConfig {
        address,
        poll_interval: 3600,
        report_interval: 3600,
        rate_limit: 1,
        key: None,
    }
}

fn empty_sampler() -> Vec<MetricRecord> {
    Vec::new()
}

#[tokio::test]
async fn test_agent_survives_unreachable_server() {
    // reserve a port and release it so nothing listens there
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let retry = RetryPolicy::new(vec![Duration::from_millis(10), Duration::from_millis(10)]);
    let handle =
        AgentHandle::spawn_with_retry(&agent_config(addr.to_string()), empty_sampler, retry)
            .unwrap();

    handle.capture_now().await.unwrap();
    assert_eq!(handle.flush_now().await.unwrap(), FlushOutcome::Queued(2));

    // the agent keeps capturing after the batch was given up
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.capture_now().await.unwrap(), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_batch_is_not_redelivered() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let handle = AgentHandle::spawn_with_retry(
        &agent_config(server.uri()),
        empty_sampler,
        RetryPolicy::none(),
    )
    .unwrap();

    handle.capture_now().await.unwrap();
    handle.flush_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    handle.capture_now().await.unwrap();
    handle.capture_now().await.unwrap();
    handle.shutdown().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let sizes: Vec<usize> = requests
        .iter()
        .map(|r| serde_json::from_slice::<Vec<MetricRecord>>(&r.body).unwrap().len())
        .collect();

    // the rejected batch of 2 is gone; only the next 4 records arrive again
    assert_eq!(sizes, vec![2, 4]);
}

#[tokio::test]
async fn test_batch_with_invalid_records_applies_the_rest() {
    let service = memory_service();

    let mut batch = sample_batch();
    batch.push(MetricRecord::counter("", 10));
    batch.push(MetricRecord {
        id: "Broken".to_string(),
        kind: "gauge".to_string(),
        delta: Some(1),
        value: None,
    });

    let applied = service.update_batch(batch).await.unwrap();
    assert_eq!(applied, 4);

    assert_eq!(
        service.query("PollCount", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("PollCount", 3)
    );
    assert!(matches!(
        service.query("Broken", MetricKind::Gauge).await,
        Err(ServiceError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_batch_of_only_invalid_records_applies_nothing() {
    let service = memory_service();

    let applied = service
        .update_batch(vec![MetricRecord::counter(" ", 1)])
        .await
        .unwrap();

    assert_eq!(applied, 0);
    assert!(service.list_all().await.unwrap().is_empty());
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_closed_database_reports_storage_error() {
    use tally::{AggregationService, storage::sqlite::SqliteBackend};

    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::new(dir.path().join("metrics.db"), RetryPolicy::none())
        .await
        .unwrap();
    let service = AggregationService::with_retry(Box::new(backend), RetryPolicy::none());

    service.close().await.unwrap();

    assert!(!service.health_check().await);
    assert!(matches!(
        service.update_one(MetricRecord::counter("PollCount", 1)).await,
        Err(ServiceError::Storage(_))
    ));
}
