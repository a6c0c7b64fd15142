//! Integration tests for API endpoints
//!
//! These tests run the real server on a random port and talk to it over
//! HTTP, verifying that:
//! - Update and lookup endpoints return the stored values
//! - Errors map to the documented status codes
//! - Signed servers verify requests and sign responses

use reqwest::StatusCode;
use tally::{MetricRecord, api::BatchResponse, integrity::Signer};

use crate::helpers::{base_url, memory_service, sample_batch, spawn_server};

#[tokio::test]
async fn test_update_then_value_round_trip() {
    let addr = spawn_server(memory_service(), None).await;
    let client = reqwest::Client::new();
    let base = base_url(addr);

    let response = client
        .post(format!("{base}/update/counter/PollCount/7"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .post(format!("{base}/update/"))
        .json(&MetricRecord::counter("PollCount", 3))
        .send()
        .await
        .unwrap();
    let record: MetricRecord = response.json().await.unwrap();
    assert_eq!(record, MetricRecord::counter("PollCount", 10));

    let text = client
        .get(format!("{base}/value/counter/PollCount"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "10");
}

#[tokio::test]
async fn test_batch_endpoint_and_listing() {
    let addr = spawn_server(memory_service(), None).await;
    let client = reqwest::Client::new();
    let base = base_url(addr);

    let response = client
        .post(format!("{base}/updates/"))
        .json(&sample_batch())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let batch: BatchResponse = response.json().await.unwrap();
    assert_eq!(batch.applied, 4);

    let page = client
        .get(format!("{base}/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.contains("PollCount (counter): 3"));
    assert!(page.contains("Alloc (gauge): 1024"));
    assert!(page.contains("HeapInuse (gauge): 512.5"));
}

#[tokio::test]
async fn test_error_status_codes() {
    let addr = spawn_server(memory_service(), None).await;
    let client = reqwest::Client::new();
    let base = base_url(addr);

    let cases = [
        (format!("{base}/update/counter/PollCount/1.5"), StatusCode::BAD_REQUEST),
        (format!("{base}/update/histogram/x/1"), StatusCode::BAD_REQUEST),
        (format!("{base}/update/gauge/"), StatusCode::NOT_FOUND),
    ];
    for (url, expected) in cases {
        let response = client.post(&url).send().await.unwrap();
        assert_eq!(response.status(), expected, "url: {url}");
    }

    let response = client
        .get(format!("{base}/value/gauge/Unknown"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(format!("{base}/value/"))
        .body(r#"{"id":"x","type":"summary"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signed_server() {
    let addr = spawn_server(memory_service(), Some("secret")).await;
    let client = reqwest::Client::new();
    let base = base_url(addr);
    let signer = Signer::new("secret");

    let body = serde_json::to_vec(&sample_batch()).unwrap();

    let response = client
        .post(format!("{base}/updates/"))
        .header("HashSHA256", signer.sign(&body).unwrap())
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let signature = response
        .headers()
        .get("HashSHA256")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let response_body = response.bytes().await.unwrap();
    assert!(signer.verify(&response_body, &signature).is_ok());

    let response = client
        .post(format!("{base}/updates/"))
        .header("HashSHA256", Signer::new("other").sign(&body).unwrap())
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
