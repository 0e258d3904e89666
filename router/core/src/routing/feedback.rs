//! Feedback Recorder
//!
//! Folds post-hoc user ratings back into the [`PerformanceTracker`].
//!
//! - `rating >= 4` records a success (latency 0) for the rated worker
//! - `rating < 4` records a request without success: the worker's volume
//!   grows but its success counters are never decremented
//!
//! Every accepted rating is also kept in a bounded audit log (FIFO eviction)
//! and forwarded to the persistence side channel, if one is attached.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::task::{TaskType, UnknownTaskType};
use super::tracker::{PerformanceTracker, WorkerId};
use crate::persistence::PersistenceHandle;

/// Lowest accepted rating
pub const MIN_RATING: i64 = 1;

/// Highest accepted rating
pub const MAX_RATING: i64 = 5;

/// Ratings at or above this count as a success
pub const POSITIVE_RATING: u8 = 4;

/// Default audit log capacity
pub const DEFAULT_MAX_AUDIT_ENTRIES: usize = 1000;

/// Acknowledgement message for accepted feedback
pub const ACK_MESSAGE: &str = "Feedback recorded successfully";

// ============================================================================
// Errors
// ============================================================================

/// Malformed feedback input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Rating outside 1..=5
    #[error("rating must be between 1 and 5, got {0}")]
    RatingOutOfRange(i64),

    /// Task type string matched no known type
    #[error(transparent)]
    UnknownTaskType(#[from] UnknownTaskType),

    /// Blank worker id
    #[error("worker_id must not be empty")]
    EmptyWorkerId,
}

// ============================================================================
// Wire Types
// ============================================================================

/// A rating for one routed response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    /// Worker that produced the response
    pub worker_id: WorkerId,
    /// Prompt that was routed
    #[serde(default)]
    pub prompt: String,
    /// Response being rated
    #[serde(default)]
    pub response: String,
    /// 1 to 5, 4 and above is a success
    pub rating: i64,
    /// Optional free-form comment
    #[serde(default)]
    pub feedback: Option<String>,
    /// Wire name of the task type, validated on receipt
    #[serde(default)]
    pub task_type: Option<String>,
}

impl FeedbackRequest {
    /// Create a feedback request
    pub fn new(worker_id: impl Into<WorkerId>, rating: i64) -> Self {
        Self {
            worker_id: worker_id.into(),
            prompt: String::new(),
            response: String::new(),
            rating,
            feedback: None,
            task_type: None,
        }
    }

    /// Attach the exchange being rated
    #[must_use]
    pub fn with_exchange(mut self, prompt: impl Into<String>, response: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self.response = response.into();
        self
    }

    /// Attach free-form feedback text
    #[must_use]
    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    /// Attach the task type
    #[must_use]
    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type.as_str().to_string());
        self
    }
}

/// Response to accepted feedback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackAck {
    /// Always `"success"`
    pub status: String,
    /// Confirmation text
    pub message: String,
}

impl FeedbackAck {
    fn success() -> Self {
        Self {
            status: "success".to_string(),
            message: ACK_MESSAGE.to_string(),
        }
    }
}

/// Audit row for one accepted rating
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Row identifier
    pub id: Uuid,
    /// Rated worker
    pub worker_id: WorkerId,
    /// Prompt that was routed
    pub prompt: String,
    /// Response that was rated
    pub response: String,
    /// Validated rating, 1 to 5
    pub rating: u8,
    /// Optional free-form comment
    pub feedback: Option<String>,
    /// Parsed task type, if one was given
    pub task_type: Option<TaskType>,
    /// When the rating was accepted
    pub created_at: DateTime<Utc>,
}

impl FeedbackRecord {
    /// Whether the rating counts as a success
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.rating >= POSITIVE_RATING
    }
}

/// Per-worker rating statistics over the audit log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerFeedbackSummary {
    /// Rated worker
    pub worker_id: WorkerId,
    /// Ratings in the audit log
    pub count: usize,
    /// Mean rating
    pub average_rating: f64,
}

// ============================================================================
// Recorder
// ============================================================================

/// Validates ratings and applies them to the tracker
#[derive(Debug)]
pub struct FeedbackRecorder {
    tracker: Arc<PerformanceTracker>,
    audit: Mutex<VecDeque<FeedbackRecord>>,
    max_audit_entries: usize,
    persistence: Option<PersistenceHandle>,
}

impl FeedbackRecorder {
    /// Create a recorder with the given audit capacity
    pub fn new(tracker: Arc<PerformanceTracker>, max_audit_entries: usize) -> Self {
        Self {
            tracker,
            audit: Mutex::new(VecDeque::new()),
            max_audit_entries,
            persistence: None,
        }
    }

    /// Forward audit rows to the persistence side channel
    #[must_use]
    pub fn with_persistence(mut self, handle: PersistenceHandle) -> Self {
        self.persistence = Some(handle);
        self
    }

    /// Validate a request without applying it
    pub fn validate(request: &FeedbackRequest) -> Result<(u8, Option<TaskType>), ValidationError> {
        if request.worker_id.trim().is_empty() {
            return Err(ValidationError::EmptyWorkerId);
        }

        let rating = u8::try_from(request.rating)
            .ok()
            .filter(|r| (MIN_RATING..=MAX_RATING).contains(&i64::from(*r)))
            .ok_or(ValidationError::RatingOutOfRange(request.rating))?;

        let task_type = request
            .task_type
            .as_deref()
            .map(str::parse::<TaskType>)
            .transpose()?;

        Ok((rating, task_type))
    }

    /// Record a rating
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for an empty worker id, a rating outside
    /// 1..=5 or an unrecognized task type. Nothing is recorded in that case.
    pub fn record_feedback(&self, request: FeedbackRequest) -> Result<FeedbackAck, ValidationError> {
        let (rating, task_type) = Self::validate(&request)?;

        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            worker_id: request.worker_id,
            prompt: request.prompt,
            response: request.response,
            rating,
            feedback: request.feedback,
            task_type,
            created_at: Utc::now(),
        };

        self.tracker
            .record(&record.worker_id, record.is_positive(), 0.0, task_type);

        tracing::info!(
            worker_id = %record.worker_id,
            rating,
            task = ?task_type,
            positive = record.is_positive(),
            "Feedback recorded"
        );

        if let Some(handle) = &self.persistence {
            handle.feedback(record.clone());
        }

        let mut audit = self.audit.lock();
        audit.push_back(record);
        while audit.len() > self.max_audit_entries {
            audit.pop_front();
        }

        Ok(FeedbackAck::success())
    }

    /// Most recent audit rows, newest last
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<FeedbackRecord> {
        let audit = self.audit.lock();
        let skip = audit.len().saturating_sub(limit);
        audit.iter().skip(skip).cloned().collect()
    }

    /// Number of audit rows retained
    #[must_use]
    pub fn audit_len(&self) -> usize {
        self.audit.lock().len()
    }

    /// Rating count and average per worker, ordered by worker id
    #[must_use]
    pub fn summary(&self) -> Vec<WorkerFeedbackSummary> {
        let audit = self.audit.lock();

        let mut totals: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
        for row in audit.iter() {
            let entry = totals.entry(row.worker_id.as_str()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += u64::from(row.rating);
        }

        totals
            .into_iter()
            .map(|(worker_id, (count, sum))| WorkerFeedbackSummary {
                worker_id: worker_id.to_string(),
                count,
                average_rating: sum as f64 / count as f64,
            })
            .collect()
    }
}
