//! Concurrency tests
//!
//! These tests verify that concurrent writers never lose a counter
//! increment and that agent handles can be shared across tasks.

use std::sync::Arc;

use tally::{
    MetricKind, MetricRecord,
    agent::{AgentHandle, FlushOutcome},
    config::AgentConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::memory_service;

#[tokio::test]
async fn test_concurrent_counter_updates_no_lost_increments() {
    let service = memory_service();
    let mut tasks = vec![];

    for _ in 0..20 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                service
                    .update_one(MetricRecord::counter("hits", 1))
                    .await
                    .unwrap();
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(
        service.query("hits", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("hits", 1000)
    );
}

#[tokio::test]
async fn test_concurrent_batches_sum_counters() {
    let service = memory_service();
    let mut tasks = vec![];

    for i in 0..10 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            service
                .update_batch(vec![
                    MetricRecord::counter("PollCount", 3),
                    MetricRecord::gauge("Last", i as f64),
                ])
                .await
                .unwrap()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), 2);
    }

    assert_eq!(
        service.query("PollCount", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("PollCount", 30)
    );

    // some writer won; the gauge holds one of the written values
    let last = service.query("Last", MetricKind::Gauge).await.unwrap();
    let value = last.value.unwrap();
    assert!((0.0..10.0).contains(&value) && value.fract() == 0.0);
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_concurrent_sqlite_updates_no_lost_increments() {
    use tally::{AggregationService, RetryPolicy, storage::sqlite::SqliteBackend};

    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::new(dir.path().join("metrics.db"), RetryPolicy::default())
        .await
        .unwrap();
    let service = Arc::new(AggregationService::new(Box::new(backend)));

    let mut tasks = vec![];
    for _ in 0..10 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                service
                    .update_batch(vec![MetricRecord::counter("hits", 1)])
                    .await
                    .unwrap();
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(
        service.query("hits", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("hits", 100)
    );
}

#[tokio::test]
async fn test_shared_agent_handle_captures_from_many_tasks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = AgentConfig {
        address: server.uri(),
        poll_interval: 3600,
        report_interval: 3600,
        rate_limit: 2,
        key: None,
    };
    let handle = AgentHandle::spawn(&config, Vec::<MetricRecord>::new).unwrap();

    let mut tasks = vec![];
    for _ in 0..8 {
        let h = handle.clone();
        tasks.push(tokio::spawn(async move { h.capture_now().await }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // 8 captures of PollCount and RandomValue each
    assert_eq!(handle.flush_now().await.unwrap(), FlushOutcome::Queued(16));
    handle.shutdown().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let batch: Vec<MetricRecord> = serde_json::from_slice(&requests[0].body).unwrap();
    let polls: i64 = batch
        .iter()
        .filter(|r| r.id == "PollCount")
        .filter_map(|r| r.delta)
        .sum();
    assert_eq!(polls, 8);
}
