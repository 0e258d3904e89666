//! Performance Tracker
//!
//! Per-worker counters (volume, success, latency, per-task success) and the
//! ranking derived from them.
//!
//! Records live in a `DashMap` of individually locked entries: the map shard
//! lock is only held while fetching or creating an entry, and the record
//! itself is mutated under its own mutex. Updates to different workers never
//! contend on a record lock, and a reader always copies a whole record, so a
//! torn state such as `successful_responses > total_requests` is never
//! observed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::task::TaskType;
use crate::persistence::PersistenceHandle;

/// Opaque identifier of one backend worker
pub type WorkerId = String;

/// Success rate reported for a worker without history
pub const PRIOR_SUCCESS_RATE: f64 = 0.5;

/// Most records kept for workers outside the configured set
///
/// Such records are never ranked. Outcomes for further unconfigured workers
/// are dropped once the limit is reached.
pub const MAX_UNCONFIGURED_RECORDS: usize = 256;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The tracker has been closed
    #[error("performance tracker is unavailable")]
    Unavailable,

    /// No workers are configured, so there is nothing to rank
    #[error("no workers configured")]
    NoWorkers,
}

// ============================================================================
// Performance Record
// ============================================================================

/// Counters for one worker
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Every recorded outcome
    pub total_requests: u64,
    /// Outcomes recorded as successful
    pub successful_responses: u64,
    /// Sum of latencies of successful outcomes, in seconds
    pub total_latency: f64,
    /// Successful outcomes per task type
    #[serde(default)]
    pub task_success: BTreeMap<TaskType, u64>,
}

impl PerformanceRecord {
    /// Fraction of successful outcomes, [`PRIOR_SUCCESS_RATE`] without history
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            PRIOR_SUCCESS_RATE
        } else {
            self.successful_responses as f64 / self.total_requests as f64
        }
    }

    /// Share of this worker's task successes that belong to `task_type`
    ///
    /// Falls back to [`success_rate`](Self::success_rate) when no task is
    /// given or no task-specific successes have been observed.
    #[must_use]
    pub fn task_success_rate(&self, task_type: Option<TaskType>) -> f64 {
        let Some(task_type) = task_type else {
            return self.success_rate();
        };

        let observed: u64 = self.task_success.values().sum();
        if observed == 0 {
            return self.success_rate();
        }

        let hits = self.task_success.get(&task_type).copied().unwrap_or(0);
        hits as f64 / observed as f64
    }

    /// Mean latency of successful outcomes (0 when there are none)
    #[must_use]
    pub fn average_latency(&self) -> f64 {
        if self.successful_responses == 0 {
            0.0
        } else {
            self.total_latency / self.successful_responses as f64
        }
    }

    /// Whether the counters satisfy `successful_responses <= total_requests`
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let task_total: u64 = self.task_success.values().sum();
        self.successful_responses <= self.total_requests
            && task_total <= self.successful_responses
            && self.total_latency.is_finite()
            && self.total_latency >= 0.0
    }

    fn apply(&mut self, success: bool, latency: f64, task_type: Option<TaskType>) {
        self.total_requests += 1;
        if success {
            self.successful_responses += 1;
            self.total_latency += latency;
            if let Some(task_type) = task_type {
                *self.task_success.entry(task_type).or_insert(0) += 1;
            }
        }
    }
}

/// A persisted `(worker, record)` row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerPerformance {
    /// Worker the record belongs to
    pub worker_id: WorkerId,
    /// Counters for that worker
    pub record: PerformanceRecord,
}

/// One entry of a ranking
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedWorker {
    /// Ranked worker
    pub worker_id: WorkerId,
    /// Overall success rate, 4 decimal places on the wire
    pub success_rate: f64,
    /// Success rate for the ranking's task, 4 decimal places on the wire
    pub task_success_rate: f64,
    /// Requests seen so far
    pub total_requests: u64,
}

// ============================================================================
// Tracker
// ============================================================================

/// Shared per-worker performance state
#[derive(Debug)]
pub struct PerformanceTracker {
    /// Configured worker set, in configuration order
    workers: Vec<WorkerId>,
    /// Lazily created records, one lock per worker
    records: DashMap<WorkerId, Arc<Mutex<PerformanceRecord>>>,
    /// Records held for workers outside `workers`
    unconfigured: AtomicUsize,
    /// Set by [`close`](Self::close)
    closed: AtomicBool,
    /// Optional persistence side channel
    persistence: OnceLock<PersistenceHandle>,
}

impl PerformanceTracker {
    /// Create a tracker over the configured worker set
    pub fn new<I, S>(workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<WorkerId>,
    {
        let mut ids: Vec<WorkerId> = Vec::new();
        for id in workers {
            let id = id.into();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        Self {
            workers: ids,
            records: DashMap::new(),
            unconfigured: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            persistence: OnceLock::new(),
        }
    }

    /// Configured workers
    #[must_use]
    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    /// Whether `worker_id` belongs to the configured set
    #[must_use]
    pub fn is_configured(&self, worker_id: &str) -> bool {
        self.workers.iter().any(|w| w == worker_id)
    }

    /// Attach the persistence side channel; only the first call takes effect
    pub fn attach_persistence(&self, handle: PersistenceHandle) -> bool {
        self.persistence.set(handle).is_ok()
    }

    fn slot(&self, worker_id: &str) -> Option<Arc<Mutex<PerformanceRecord>>> {
        if let Some(existing) = self.records.get(worker_id) {
            return Some(Arc::clone(existing.value()));
        }

        let configured = self.is_configured(worker_id);
        if !configured && self.unconfigured_full() {
            return None;
        }

        let mut created = false;
        let slot = Arc::clone(
            self.records
                .entry(worker_id.to_string())
                .or_insert_with(|| {
                    created = true;
                    Arc::default()
                })
                .value(),
        );
        if created && !configured {
            self.unconfigured.fetch_add(1, Ordering::SeqCst);
        }
        Some(slot)
    }

    fn unconfigured_full(&self) -> bool {
        self.unconfigured.load(Ordering::SeqCst) >= MAX_UNCONFIGURED_RECORDS
    }

    /// Number of records held for workers outside the configured set
    #[must_use]
    pub fn unconfigured_count(&self) -> usize {
        self.unconfigured.load(Ordering::SeqCst)
    }

    /// Record one outcome for a worker
    ///
    /// Non-finite or negative latencies are counted as zero so the latency
    /// total stays monotonic. Outcomes for a new unconfigured worker are
    /// dropped once [`MAX_UNCONFIGURED_RECORDS`] is reached.
    pub fn record(&self, worker_id: &str, success: bool, latency: f64, task_type: Option<TaskType>) {
        let latency = if latency.is_finite() && latency > 0.0 {
            latency
        } else {
            0.0
        };

        let Some(slot) = self.slot(worker_id) else {
            tracing::warn!(
                worker_id,
                limit = MAX_UNCONFIGURED_RECORDS,
                "Unconfigured worker limit reached, outcome dropped"
            );
            return;
        };
        {
            let mut record = slot.lock();
            record.apply(success, latency, task_type);
        }

        tracing::trace!(worker_id, success, latency, ?task_type, "Recorded outcome");

        if let Some(handle) = self.persistence.get() {
            handle.records_changed();
        }
    }

    /// Copy of one worker's record, if it has been referenced
    #[must_use]
    pub fn get(&self, worker_id: &str) -> Option<PerformanceRecord> {
        self.records.get(worker_id).map(|r| r.value().lock().clone())
    }

    /// Copy of a worker's record, defaulting when it has no history
    #[must_use]
    pub fn record_or_default(&self, worker_id: &str) -> PerformanceRecord {
        self.get(worker_id).unwrap_or_default()
    }

    /// Rank the configured workers for a task type
    ///
    /// Sorted descending by `(task_success_rate, success_rate,
    /// total_requests)`; equal keys keep configuration order.
    pub fn rank(&self, task_type: Option<TaskType>) -> Result<Vec<RankedWorker>, TrackerError> {
        if self.is_closed() {
            return Err(TrackerError::Unavailable);
        }
        if self.workers.is_empty() {
            return Err(TrackerError::NoWorkers);
        }

        let mut ranked: Vec<RankedWorker> = self
            .workers
            .iter()
            .map(|id| {
                let record = self.record_or_default(id);
                RankedWorker {
                    worker_id: id.clone(),
                    success_rate: record.success_rate(),
                    task_success_rate: record.task_success_rate(task_type),
                    total_requests: record.total_requests,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.task_success_rate
                .total_cmp(&a.task_success_rate)
                .then_with(|| b.success_rate.total_cmp(&a.success_rate))
                .then_with(|| b.total_requests.cmp(&a.total_requests))
        });

        Ok(ranked)
    }

    /// Every known record, configured workers first
    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkerPerformance> {
        let mut rows: Vec<WorkerPerformance> = self
            .records
            .iter()
            .map(|entry| WorkerPerformance {
                worker_id: entry.key().clone(),
                record: entry.value().lock().clone(),
            })
            .collect();

        rows.sort_by_key(|row| {
            let position = self.workers.iter().position(|w| *w == row.worker_id);
            (position.unwrap_or(usize::MAX), row.worker_id.clone())
        });
        rows
    }

    /// Seed records from persisted rows, returning how many were applied
    ///
    /// Rows with inconsistent counters are skipped, as are unconfigured rows
    /// past [`MAX_UNCONFIGURED_RECORDS`].
    pub fn restore(&self, rows: Vec<WorkerPerformance>) -> usize {
        let mut applied = 0;
        for row in rows {
            if !row.record.is_consistent() {
                tracing::warn!(worker_id = %row.worker_id, "Skipping inconsistent persisted record");
                continue;
            }
            let configured = self.is_configured(&row.worker_id);
            let known = self.records.contains_key(&row.worker_id);
            if !configured && !known && self.unconfigured_full() {
                tracing::warn!(worker_id = %row.worker_id, "Skipping persisted record over the unconfigured limit");
                continue;
            }
            let replaced = self
                .records
                .insert(row.worker_id, Arc::new(Mutex::new(row.record)));
            if replaced.is_none() && !configured {
                self.unconfigured.fetch_add(1, Ordering::SeqCst);
            }
            applied += 1;
        }
        applied
    }

    /// Mark the tracker unavailable
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
