//! Fixed-schedule retry for transient failures
//!
//! The same discipline is used for outbound delivery and for backend calls:
//! run the operation, and if it fails with an error classified as transient,
//! sleep for the next delay of the schedule and try again. Fatal errors are
//! returned immediately. Delays are consumed in order and never restarted.
//!
//! The policy itself is immutable; each call to [`RetryPolicy::run`] keeps
//! its own cursor into the schedule, so one policy can be shared freely
//! between concurrent callers.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Default delays between attempts: 1s, 3s, 5s
pub const DEFAULT_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Classification of an error for retry purposes
pub trait Retryable {
    /// `true` if running the same operation again may succeed
    fn is_transient(&self) -> bool;
}

/// Retry decorator with a fixed backoff schedule
///
/// At most `schedule.len()` attempts are made (at least one), with
/// `schedule[i]` slept between attempt `i` and attempt `i + 1`. A caller that
/// wants a hard deadline should race [`RetryPolicy::run`] against its own
/// timeout; there is no cancellation inside the policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    /// A policy that runs the operation exactly once
    pub fn none() -> Self {
        Self {
            schedule: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.schedule.len().max(1)
    }

    /// Run `operation` until it succeeds, fails fatally or the schedule runs out
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let max_attempts = self.max_attempts();
        let mut delays = self.schedule.iter();
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => {
                    debug!("attempt {attempt} failed with a fatal error: {err}");
                    return Err(err);
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        warn!("giving up after {attempt} attempts: {err}");
                        return Err(err);
                    }

                    let Some(delay) = delays.next() else {
                        return Err(err);
                    };

                    debug!(
                        "attempt {attempt}/{max_attempts} failed transiently ({err}), retrying in {delay:?}"
                    );
                    tokio::time::sleep(*delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEDULE.to_vec())
    }
}
