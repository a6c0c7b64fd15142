//! DeliveryAgent - captures samples locally and ships them in batches
//!
//! The agent is a single task that owns the capture buffer. It ticks every
//! `gcd(poll, report)` seconds (see [`Schedule`]), appends a capture to the
//! buffer on poll ticks and hands the buffer to the delivery workers on
//! report ticks. Because only the agent task touches the buffer, the swap on
//! flush can never interleave with a capture.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ─┬─> capture ──> buffer
//!             └─> flush ────> mem::take(buffer) ──> bounded queue ──> N workers ──> POST /updates/
//!     ↑
//!     └─── Commands (CaptureNow, FlushNow, Shutdown)
//! ```
//!
//! Delivery is at-most-once per flush: a batch that still fails after the
//! retry schedule, or that finds the queue full, is dropped.

pub mod delivery;
pub mod sampler;
pub mod schedule;

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::AgentConfig;
use crate::integrity::Signer;
use crate::metric::MetricRecord;
use crate::retry::RetryPolicy;

pub use delivery::{Deliverer, DeliveryError};
pub use sampler::{Sampler, SystemSampler};
pub use schedule::{Schedule, TickActions};

/// Result of handing the buffer to the delivery queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was captured since the last flush
    Empty,

    /// The batch was queued for delivery
    Queued(usize),

    /// Every worker was busy and the queue was full; the batch was discarded
    Dropped(usize),
}

/// Commands that can be sent to a [`DeliveryAgent`]
#[derive(Debug)]
enum AgentCommand {
    /// Capture immediately; responds with the buffer length afterwards
    CaptureNow { respond_to: oneshot::Sender<usize> },

    /// Flush immediately
    FlushNow {
        respond_to: oneshot::Sender<FlushOutcome>,
    },

    /// Flush what is buffered, wait for the workers to drain and stop
    Shutdown { respond_to: oneshot::Sender<()> },
}

type BatchQueue = Arc<Mutex<mpsc::Receiver<Vec<MetricRecord>>>>;

/// Agent task owning the sampler and the capture buffer
struct DeliveryAgent<S> {
    sampler: S,
    schedule: Schedule,
    buffer: Vec<MetricRecord>,
    queue: mpsc::Sender<Vec<MetricRecord>>,
    workers: Vec<JoinHandle<()>>,
    command_rx: mpsc::Receiver<AgentCommand>,
}

impl<S: Sampler> DeliveryAgent<S> {
    #[instrument(skip(self), fields(tick = ?self.schedule.tick()))]
    async fn run(mut self) {
        debug!("starting delivery agent with {} workers", self.workers.len());

        let tick = self.schedule.tick();
        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown_ack = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let actions = self.schedule.advance();
                    trace!("tick: {actions:?} ({}s into the cycle)", self.schedule.elapsed());
                    if actions.capture {
                        self.capture();
                    }
                    if actions.flush {
                        self.flush();
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(AgentCommand::CaptureNow { respond_to }) => {
                            self.capture();
                            let _ = respond_to.send(self.buffer.len());
                        }
                        Some(AgentCommand::FlushNow { respond_to }) => {
                            let _ = respond_to.send(self.flush());
                        }
                        Some(AgentCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            shutdown_ack = Some(respond_to);
                            break;
                        }
                        None => {
                            warn!("every handle dropped, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.flush();

        let DeliveryAgent { queue, workers, .. } = self;
        // closing the queue lets the workers exit once it is drained
        drop(queue);
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("delivery worker failed: {e}");
            }
        }

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }

        debug!("delivery agent stopped");
    }

    fn capture(&mut self) {
        let mut records = self.sampler.sample();
        records.push(MetricRecord::counter("PollCount", 1));
        records.push(MetricRecord::gauge("RandomValue", rand::random::<f64>()));

        trace!("captured {} metrics", records.len());
        self.buffer.extend(records);
    }

    fn flush(&mut self) -> FlushOutcome {
        let batch = std::mem::take(&mut self.buffer);
        let count = batch.len();

        if batch.is_empty() {
            trace!("buffer empty, nothing to flush");
            return FlushOutcome::Empty;
        }

        match self.queue.try_send(batch) {
            Ok(()) => {
                trace!("queued batch of {count} metrics");
                FlushOutcome::Queued(count)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("delivery queue full, dropping batch of {count} metrics");
                FlushOutcome::Dropped(count)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("delivery queue closed, dropping batch of {count} metrics");
                FlushOutcome::Dropped(count)
            }
        }
    }
}

/// Delivery worker; exits when the queue is closed and empty
async fn deliver_batches(id: usize, deliverer: Arc<Deliverer>, queue: BatchQueue) {
    loop {
        let batch = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };

        let Some(batch) = batch else {
            trace!("worker {id}: queue closed");
            break;
        };

        if let Err(e) = deliverer.deliver(&batch).await {
            error!(
                "worker {id}: dropping batch of {} metrics: {e}",
                batch.len()
            );
        }
    }
}

/// Handle for controlling a running [`DeliveryAgent`]
///
/// The handle can be cloned and shared across tasks.
#[derive(Clone)]
pub struct AgentHandle {
    sender: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    /// Spawn an agent for `config` with the default retry schedule
    pub fn spawn<S>(config: &AgentConfig, sampler: S) -> Result<Self, DeliveryError>
    where
        S: Sampler + 'static,
    {
        Self::spawn_with_retry(config, sampler, RetryPolicy::default())
    }

    pub fn spawn_with_retry<S>(
        config: &AgentConfig,
        sampler: S,
        retry: RetryPolicy,
    ) -> Result<Self, DeliveryError>
    where
        S: Sampler + 'static,
    {
        let signer = Signer::from_key(config.key.as_deref());
        let deliverer = Arc::new(Deliverer::new(&config.address, signer, retry)?);
        debug!("delivering to {}", deliverer.endpoint());

        let rate_limit = config.rate_limit.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(rate_limit);
        let queue_rx: BatchQueue = Arc::new(Mutex::new(queue_rx));

        let workers = (0..rate_limit)
            .map(|id| tokio::spawn(deliver_batches(id, deliverer.clone(), queue_rx.clone())))
            .collect();

        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let agent = DeliveryAgent {
            sampler,
            schedule: Schedule::new(config.poll_interval, config.report_interval),
            buffer: Vec::new(),
            queue: queue_tx,
            workers,
            command_rx: cmd_rx,
        };

        tokio::spawn(agent.run());

        Ok(Self { sender: cmd_tx })
    }

    /// Capture immediately, returning the number of buffered records
    pub async fn capture_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AgentCommand::CaptureNow { respond_to: tx })
            .await
            .context("failed to send CaptureNow command")?;

        rx.await.context("failed to receive response")
    }

    /// Hand the buffer to the delivery workers immediately
    pub async fn flush_now(&self) -> Result<FlushOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AgentCommand::FlushNow { respond_to: tx })
            .await
            .context("failed to send FlushNow command")?;

        rx.await.context("failed to receive response")
    }

    /// Flush, wait for in-flight deliveries and stop the agent
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AgentCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive response")
    }
}
