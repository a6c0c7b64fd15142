//! HTTP delivery of captured batches
//!
//! A batch is sent as one JSON array to `POST /updates/`. Connection-level
//! failures are retried on the [`RetryPolicy`] schedule; any response from
//! the server, including an error status, ends the attempt.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::integrity::{HASH_HEADER, IntegrityError, Signer};
use crate::metric::MetricRecord;
use crate::retry::{RetryPolicy, Retryable};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to sign batch: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server rejected batch with status {0}")]
    Rejected(StatusCode),
}

impl Retryable for DeliveryError {
    fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Transport(err) => err.is_connect() || err.is_timeout(),
            _ => false,
        }
    }
}

/// Sends batches to the aggregation server
#[derive(Debug)]
pub struct Deliverer {
    client: reqwest::Client,
    url: String,
    signer: Option<Signer>,
    retry: RetryPolicy,
}

impl Deliverer {
    /// `address` is `host:port`, optionally with an `http(s)://` scheme
    pub fn new(
        address: &str,
        signer: Option<Signer>,
        retry: RetryPolicy,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        Ok(Self {
            client,
            url: format!("{base}/updates/"),
            signer,
            retry,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    /// Deliver one batch, retrying connection failures
    #[instrument(skip_all, fields(count = batch.len()))]
    pub async fn deliver(&self, batch: &[MetricRecord]) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            trace!("nothing to deliver");
            return Ok(());
        }

        let body = serde_json::to_vec(batch)?;
        let signature = self
            .signer
            .as_ref()
            .map(|signer| signer.sign(&body))
            .transpose()?;

        self.retry
            .run(|| self.send(&body, signature.as_deref()))
            .await?;

        debug!("delivered {} metrics to {}", batch.len(), self.url);
        Ok(())
    }

    async fn send(&self, body: &[u8], signature: Option<&str>) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());

        if let Some(signature) = signature {
            request = request.header(HASH_HEADER, signature);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Rejected(response.status()));
        }

        Ok(())
    }
}
