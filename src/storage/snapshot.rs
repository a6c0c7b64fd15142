//! File-snapshotted storage
//!
//! [`SnapshotBackend`] wraps any other backend and exports its complete
//! state to a JSON file. Two modes are supported:
//!
//! - **Write-through**: every save (and every committed batch) is followed
//!   by a synchronous export.
//! - **Interval**: a [`SnapshotFlusher`] task exports on a fixed interval and
//!   once more when it is shut down.
//!
//! Persistence is best-effort. Export failures are logged and never turned
//! into errors for the caller that triggered them. Exports go to a sibling
//! temporary file that is then renamed over the target, so readers never
//! observe a half-written snapshot.
//!
//! ## Message Flow (interval mode)
//!
//! ```text
//! Timer tick ──┐
//! FlushNow ────┼──> SnapshotFlusher ──> inner.snapshot() ──> file
//! Shutdown ────┘         (final export, then exit)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use super::backend::{Batch, Snapshot, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::metric::{MetricKind, MetricRecord};

/// When the snapshot file is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Export after every write
    WriteThrough,

    /// Export from a background task on a fixed interval
    Interval(Duration),
}

impl SnapshotMode {
    /// Interval of 0 seconds selects write-through, like the `-i 0` flag
    pub fn from_interval_secs(secs: u64) -> Self {
        if secs == 0 {
            SnapshotMode::WriteThrough
        } else {
            SnapshotMode::Interval(Duration::from_secs(secs))
        }
    }
}

/// Read a snapshot file
///
/// A missing or malformed file yields `None`; neither is a startup failure.
pub async fn read_snapshot(path: &Path) -> Option<Snapshot> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("no snapshot at {}, starting empty", path.display());
            return None;
        }
        Err(err) => {
            warn!("failed to read snapshot {}: {err}", path.display());
            return None;
        }
    };

    match serde_json::from_slice::<Snapshot>(&data) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!("ignoring malformed snapshot {}: {err}", path.display());
            None
        }
    }
}

/// Export the full state of `backend` to `path`
async fn write_snapshot(backend: &dyn StorageBackend, path: &Path) -> StorageResult<()> {
    let snapshot = backend.snapshot().await?;
    let data = serde_json::to_vec_pretty(&snapshot)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, &data).await?;
    tokio::fs::rename(&tmp_path, path).await?;

    trace!(
        "exported {} metrics to {}",
        snapshot.len(),
        path.display()
    );
    Ok(())
}

/// Exports one backend to one file, one export at a time
///
/// Shared by the write-through path and the flusher task. The lock is held
/// across `snapshot()`, the write and the rename, so exports land in the
/// order their snapshots were taken and never share the temporary file.
pub struct Exporter {
    backend: Arc<dyn StorageBackend>,
    path: PathBuf,
    lock: Mutex<()>,
}

impl Exporter {
    pub fn new(backend: Arc<dyn StorageBackend>, path: PathBuf) -> Self {
        Self {
            backend,
            path,
            lock: Mutex::new(()),
        }
    }

    pub async fn export(&self) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        write_snapshot(self.backend.as_ref(), &self.path).await
    }

    /// Export, logging instead of returning a failure
    async fn export_logged(&self) {
        if let Err(e) = self.export().await {
            error!("failed to write snapshot {}: {}", self.path.display(), e);
        }
    }
}

/// Backend decorator that persists the wrapped backend to a file
pub struct SnapshotBackend {
    inner: Arc<dyn StorageBackend>,
    exporter: Arc<Exporter>,
    mode: SnapshotMode,
    flusher: Option<FlusherHandle>,
}

impl SnapshotBackend {
    /// Wrap `inner`, optionally seeding it from an existing snapshot file
    ///
    /// In interval mode this spawns the flusher task, so it must be called
    /// from within a Tokio runtime.
    #[instrument(skip(inner), fields(path = %path.as_ref().display()))]
    pub async fn open(
        inner: Box<dyn StorageBackend>,
        path: impl AsRef<Path>,
        mode: SnapshotMode,
        restore: bool,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let inner: Arc<dyn StorageBackend> = Arc::from(inner);

        if restore {
            match read_snapshot(&path).await {
                Some(snapshot) if snapshot.is_empty() => {
                    debug!("snapshot {} is empty", path.display());
                }
                Some(snapshot) => {
                    info!("restoring {} metrics from {}", snapshot.len(), path.display());
                    inner.restore(snapshot).await?;
                }
                None => {}
            }
        }

        let exporter = Arc::new(Exporter::new(inner.clone(), path));

        let flusher = match mode {
            SnapshotMode::WriteThrough => {
                debug!("snapshot mode: write-through");
                None
            }
            SnapshotMode::Interval(every) => {
                debug!("snapshot mode: every {every:?}");
                Some(FlusherHandle::spawn(exporter.clone(), every))
            }
        };

        Ok(Self {
            inner,
            exporter,
            mode,
            flusher,
        })
    }

    /// Export right away, regardless of mode
    pub async fn flush(&self) -> StorageResult<()> {
        match &self.flusher {
            Some(flusher) => flusher.flush_now().await,
            None => self.exporter.export().await,
        }
    }

    /// Export after a write when running write-through; failures are only logged
    async fn persist(&self) {
        if self.mode != SnapshotMode::WriteThrough {
            return;
        }

        self.exporter.export_logged().await;
    }
}

#[async_trait]
impl StorageBackend for SnapshotBackend {
    async fn save_gauge(&self, id: &str, value: f64) -> StorageResult<()> {
        self.inner.save_gauge(id, value).await?;
        self.persist().await;
        Ok(())
    }

    async fn save_counter(&self, id: &str, delta: i64) -> StorageResult<i64> {
        let total = self.inner.save_counter(id, delta).await?;
        self.persist().await;
        Ok(total)
    }

    async fn get(&self, id: &str, kind: MetricKind) -> StorageResult<Option<MetricRecord>> {
        self.inner.get(id, kind).await
    }

    async fn list(&self, kind: MetricKind) -> StorageResult<Vec<MetricRecord>> {
        self.inner.list(kind).await
    }

    async fn ping(&self) -> bool {
        self.inner.ping().await
    }

    async fn snapshot(&self) -> StorageResult<Snapshot> {
        self.inner.snapshot().await
    }

    async fn restore(&self, snapshot: Snapshot) -> StorageResult<()> {
        self.inner.restore(snapshot).await?;
        self.persist().await;
        Ok(())
    }

    async fn begin_batch<'a>(&'a self) -> StorageResult<Box<dyn Batch + 'a>> {
        let inner = self.inner.begin_batch().await?;
        Ok(Box::new(SnapshotBatch {
            inner,
            backend: self,
        }))
    }

    async fn close(&self) -> StorageResult<()> {
        if let Some(flusher) = &self.flusher {
            flusher.shutdown().await;
        }
        self.inner.close().await
    }
}

/// Batch that exports once after the wrapped batch commits
struct SnapshotBatch<'a> {
    inner: Box<dyn Batch + 'a>,
    backend: &'a SnapshotBackend,
}

#[async_trait]
impl<'a> Batch for SnapshotBatch<'a> {
    async fn save_gauge(&mut self, id: &str, value: f64) -> StorageResult<()> {
        self.inner.save_gauge(id, value).await
    }

    async fn save_counter(&mut self, id: &str, delta: i64) -> StorageResult<i64> {
        self.inner.save_counter(id, delta).await
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let SnapshotBatch { inner, backend } = *self;
        inner.commit().await?;
        backend.persist().await;
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        self.inner.is_transactional()
    }
}

/// Commands that can be sent to a [`SnapshotFlusher`]
#[derive(Debug)]
enum FlushCommand {
    /// Export immediately, bypassing the interval timer
    FlushNow {
        respond_to: oneshot::Sender<StorageResult<()>>,
    },

    /// Export one last time and stop
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Background task that exports a backend on a fixed interval
struct SnapshotFlusher {
    exporter: Arc<Exporter>,
    every: Duration,
    command_rx: mpsc::Receiver<FlushCommand>,
    flush_count: u64,
}

impl SnapshotFlusher {
    #[instrument(skip(self), fields(path = %self.exporter.path.display()))]
    async fn run(mut self) {
        debug!("starting snapshot flusher (every {:?})", self.every);

        let mut ticker = interval_at(Instant::now() + self.every, self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    trace!("time-based snapshot triggered");
                    self.export_logged().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(FlushCommand::FlushNow { respond_to }) => {
                            debug!("manual snapshot requested");
                            let result = self.export().await;
                            let _ = respond_to.send(result);
                        }
                        Some(FlushCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            self.export_logged().await;
                            let _ = respond_to.send(());
                            break;
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            self.export_logged().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!("snapshot flusher stopped after {} exports", self.flush_count);
    }

    async fn export(&mut self) -> StorageResult<()> {
        self.exporter.export().await?;
        self.flush_count += 1;
        Ok(())
    }

    async fn export_logged(&mut self) {
        if let Err(e) = self.export().await {
            error!(
                "failed to write snapshot {}: {}",
                self.exporter.path.display(),
                e
            );
        }
    }
}

/// Handle for controlling a [`SnapshotFlusher`]
#[derive(Clone)]
pub struct FlusherHandle {
    sender: mpsc::Sender<FlushCommand>,
}

impl FlusherHandle {
    /// Spawn a flusher task running `exporter` every `every`
    pub fn spawn(exporter: Arc<Exporter>, every: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let flusher = SnapshotFlusher {
            exporter,
            every,
            command_rx: cmd_rx,
            flush_count: 0,
        };

        tokio::spawn(flusher.run());

        Self { sender: cmd_tx }
    }

    /// Export immediately and wait for the result
    pub async fn flush_now(&self) -> StorageResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FlushCommand::FlushNow { respond_to: tx })
            .await
            .map_err(|_| StorageError::InvalidConfig("snapshot flusher is stopped".to_string()))?;

        rx.await
            .map_err(|_| StorageError::InvalidConfig("snapshot flusher is stopped".to_string()))?
    }

    /// Stop the flusher after a final export
    ///
    /// Returns once the task has exited. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .sender
            .send(FlushCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command");

        match sent {
            Ok(()) => {
                let _ = rx.await;
            }
            Err(e) => trace!("{e:#}"),
        }
    }
}
