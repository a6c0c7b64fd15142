//! End-to-end delivery from the agent to a running server

use std::time::Duration;

use tally::{
    MetricKind, MetricRecord,
    agent::{AgentHandle, FlushOutcome},
    config::AgentConfig,
};

use crate::helpers::{memory_service, spawn_server};

fn fixed_sampler() -> Vec<MetricRecord> {
    vec![
        MetricRecord::gauge("Alloc", 2048.0),
        MetricRecord::gauge("NumGC", 3.0),
    ]
}

fn agent_config(address: String, key: Option<&str>) -> AgentConfig {
    AgentConfig {
        address,
        poll_interval: 3600,
        report_interval: 3600,
        rate_limit: 2,
        key: key.map(str::to_string),
    }
}

#[tokio::test]
async fn test_agent_batches_accumulate_on_server() {
    let service = memory_service();
    let addr = spawn_server(service.clone(), None).await;

    let handle = AgentHandle::spawn(&agent_config(addr.to_string(), None), fixed_sampler).unwrap();

    for _ in 0..3 {
        handle.capture_now().await.unwrap();
    }
    assert_eq!(handle.flush_now().await.unwrap(), FlushOutcome::Queued(12));

    handle.capture_now().await.unwrap();
    handle.shutdown().await.unwrap();

    assert_eq!(
        service.query("PollCount", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("PollCount", 4)
    );
    assert_eq!(
        service.query("Alloc", MetricKind::Gauge).await.unwrap(),
        MetricRecord::gauge("Alloc", 2048.0)
    );
    assert!(service.query("RandomValue", MetricKind::Gauge).await.is_ok());
}

#[tokio::test]
async fn test_signed_agent_and_server_agree() {
    let service = memory_service();
    let addr = spawn_server(service.clone(), Some("shared-key")).await;

    let handle = AgentHandle::spawn(
        &agent_config(addr.to_string(), Some("shared-key")),
        fixed_sampler,
    )
    .unwrap();

    handle.capture_now().await.unwrap();
    handle.shutdown().await.unwrap();

    assert_eq!(
        service.query("PollCount", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("PollCount", 1)
    );
}

#[tokio::test]
async fn test_mismatched_keys_are_rejected() {
    let service = memory_service();
    let addr = spawn_server(service.clone(), Some("server-key")).await;

    let handle = AgentHandle::spawn(
        &agent_config(addr.to_string(), Some("agent-key")),
        fixed_sampler,
    )
    .unwrap();

    handle.capture_now().await.unwrap();
    handle.shutdown().await.unwrap();

    assert!(service.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_timed_agent_reports_without_commands() {
    let service = memory_service();
    let addr = spawn_server(service.clone(), None).await;

    let config = AgentConfig {
        poll_interval: 1,
        report_interval: 2,
        ..agent_config(addr.to_string(), None)
    };
    let handle = AgentHandle::spawn(&config, fixed_sampler).unwrap();

    // captures at 1s and 2s, flush at 2s
    tokio::time::sleep(Duration::from_millis(2600)).await;

    assert_eq!(
        service.query("PollCount", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("PollCount", 2)
    );

    handle.shutdown().await.unwrap();
}
