//! Persistence Side Channel
//!
//! Best-effort durable storage for performance records and feedback audit
//! rows. Routing never waits on it:
//!
//! ```text
//! PerformanceTracker              FeedbackRecorder
//!          |  set dirty flag               |  try_send (never blocks, drops when full)
//!          v                               v
//!   shared AtomicBool               bounded mpsc channel
//!          |                               |
//!          +---------------+---------------+
//!                          v
//!   PersistenceWorker  --(coalesced snapshot, every flush interval)--> PerformanceStore
//!                      --(feedback rows, as they arrive)-------------->
//! ```
//!
//! Record changes never travel through the channel, so a queue full of
//! feedback rows cannot hide a change from the next snapshot. Store failures
//! are logged and swallowed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::routing::{FeedbackRecord, PerformanceTracker, WorkerPerformance};

/// Default interval between coalesced snapshot flushes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Default capacity of the persistence channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Version written into state files
const STATE_FILE_VERSION: u32 = 1;

// ============================================================================
// Errors
// ============================================================================

/// Errors from a [`PerformanceStore`]
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure on a store file
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Snapshot or feedback row did not (de)serialize
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot written by a newer format
    #[error("unsupported state file version {0}")]
    UnsupportedVersion(u32),

    /// Store refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Durable sink for performance snapshots and feedback audit rows
#[async_trait]
pub trait PerformanceStore: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Load the last saved snapshot (empty when nothing was saved)
    async fn load_records(&self) -> Result<Vec<WorkerPerformance>, PersistenceError>;

    /// Replace the saved snapshot
    async fn save_records(&self, rows: &[WorkerPerformance]) -> Result<(), PersistenceError>;

    /// Append one feedback audit row
    async fn append_feedback(&self, row: &FeedbackRecord) -> Result<(), PersistenceError>;
}

// ============================================================================
// JSON File Store
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    saved_at: DateTime<Utc>,
    workers: Vec<WorkerPerformance>,
}

/// Snapshot in a JSON file, feedback in a JSON-lines file
///
/// Snapshots are written to a sibling temp file and renamed into place, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    state_path: PathBuf,
    feedback_path: PathBuf,
}

impl JsonFileStore {
    /// Store over the given snapshot and feedback files
    pub fn new(state_path: impl Into<PathBuf>, feedback_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            feedback_path: feedback_path.into(),
        }
    }

    /// Snapshot file
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Feedback JSON-lines file
    pub fn feedback_path(&self) -> &Path {
        &self.feedback_path
    }

    async fn ensure_parent(path: &Path) -> Result<(), PersistenceError> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent, e)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PerformanceStore for JsonFileStore {
    fn name(&self) -> &'static str {
        "json-file"
    }

    async fn load_records(&self) -> Result<Vec<WorkerPerformance>, PersistenceError> {
        let contents = match tokio::fs::read_to_string(&self.state_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&self.state_path, e)),
        };

        let state: StateFile = serde_json::from_str(&contents)?;
        if state.version != STATE_FILE_VERSION {
            return Err(PersistenceError::UnsupportedVersion(state.version));
        }
        Ok(state.workers)
    }

    async fn save_records(&self, rows: &[WorkerPerformance]) -> Result<(), PersistenceError> {
        Self::ensure_parent(&self.state_path).await?;

        let state = StateFile {
            version: STATE_FILE_VERSION,
            saved_at: Utc::now(),
            workers: rows.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&state)?;

        let mut tmp = self.state_path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| PersistenceError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.state_path)
            .await
            .map_err(|e| PersistenceError::io(&self.state_path, e))
    }

    async fn append_feedback(&self, row: &FeedbackRecord) -> Result<(), PersistenceError> {
        Self::ensure_parent(&self.feedback_path).await?;

        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.feedback_path)
            .await
            .map_err(|e| PersistenceError::io(&self.feedback_path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| PersistenceError::io(&self.feedback_path, e))?;
        file.flush()
            .await
            .map_err(|e| PersistenceError::io(&self.feedback_path, e))
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory store for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<WorkerPerformance>>,
    feedback: Mutex<Vec<FeedbackRecord>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a snapshot
    pub fn with_records(rows: Vec<WorkerPerformance>) -> Self {
        let store = Self::default();
        *store.records.lock() = rows;
        store
    }

    /// Make every operation fail (for exercising error paths)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Last saved snapshot
    pub fn records(&self) -> Vec<WorkerPerformance> {
        self.records.lock().clone()
    }

    /// Appended feedback rows
    pub fn feedback(&self) -> Vec<FeedbackRecord> {
        self.feedback.lock().clone()
    }

    /// Number of successful snapshot saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("memory store set to fail".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PerformanceStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load_records(&self) -> Result<Vec<WorkerPerformance>, PersistenceError> {
        self.check()?;
        Ok(self.records())
    }

    async fn save_records(&self, rows: &[WorkerPerformance]) -> Result<(), PersistenceError> {
        self.check()?;
        *self.records.lock() = rows.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn append_feedback(&self, row: &FeedbackRecord) -> Result<(), PersistenceError> {
        self.check()?;
        self.feedback.lock().push(row.clone());
        Ok(())
    }
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Debug)]
enum PersistenceEvent {
    /// Append an audit row
    Feedback(Box<FeedbackRecord>),
    /// Flush and stop
    Shutdown,
}

/// Non-blocking sender into the persistence worker
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<PersistenceEvent>,
    /// Set on every record change, cleared by the worker when it snapshots
    dirty: Arc<AtomicBool>,
}

impl PersistenceHandle {
    /// Note that a record changed
    ///
    /// The next flush picks the change up regardless of how full the channel
    /// is.
    pub fn records_changed(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        if self.tx.is_closed() {
            tracing::warn!("Persistence worker stopped, record change not persisted");
        }
    }

    /// Whether a record change is waiting for the next snapshot
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Queue an audit row
    pub fn feedback(&self, row: FeedbackRecord) {
        match self.tx.try_send(PersistenceEvent::Feedback(Box::new(row))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Persistence queue full, dropping feedback row")
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Persistence worker stopped, dropping feedback row")
            }
        }
    }

    /// Ask the worker to flush and stop
    pub async fn shutdown(&self) {
        if self.tx.send(PersistenceEvent::Shutdown).await.is_err() {
            tracing::debug!("Persistence worker already stopped");
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Background task draining the persistence channel
pub struct PersistenceWorker {
    rx: mpsc::Receiver<PersistenceEvent>,
    store: Arc<dyn PerformanceStore>,
    tracker: Arc<PerformanceTracker>,
    flush_interval: Duration,
    dirty: Arc<AtomicBool>,
}

impl PersistenceWorker {
    /// Spawn the worker on the current runtime
    pub fn spawn(
        store: Arc<dyn PerformanceStore>,
        tracker: Arc<PerformanceTracker>,
        flush_interval: Duration,
        channel_capacity: usize,
    ) -> (PersistenceHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let dirty = Arc::new(AtomicBool::new(false));
        let worker = Self {
            rx,
            store,
            tracker,
            flush_interval: flush_interval.max(Duration::from_millis(1)),
            dirty: Arc::clone(&dirty),
        };
        let task = tokio::spawn(worker.run());
        (PersistenceHandle { tx, dirty }, task)
    }

    async fn run(mut self) {
        tracing::debug!(
            store = self.store.name(),
            interval_ms = self.flush_interval.as_millis() as u64,
            "Persistence worker started"
        );

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(PersistenceEvent::Feedback(row)) => self.write_feedback(&row).await,
                    Some(PersistenceEvent::Shutdown) | None => break,
                },
                _ = ticker.tick() => self.flush_if_dirty().await,
            }
        }

        // Drain whatever was queued before the stop request
        self.rx.close();
        while let Ok(event) = self.rx.try_recv() {
            if let PersistenceEvent::Feedback(row) = event {
                self.write_feedback(&row).await;
            }
        }

        self.flush_if_dirty().await;
        tracing::debug!(store = self.store.name(), "Persistence worker stopped");
    }

    async fn flush_if_dirty(&self) {
        // Cleared before the snapshot so a concurrent change re-arms it
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        let rows = self.tracker.snapshot();
        match self.store.save_records(&rows).await {
            Ok(()) => tracing::debug!(workers = rows.len(), "Performance snapshot saved"),
            Err(e) => tracing::error!(store = self.store.name(), error = %e, "Failed to save performance snapshot"),
        }
    }

    async fn write_feedback(&self, row: &FeedbackRecord) {
        if let Err(e) = self.store.append_feedback(row).await {
            tracing::warn!(store = self.store.name(), error = %e, feedback_id = %row.id, "Failed to append feedback row");
        }
    }
}
