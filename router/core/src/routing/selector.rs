//! Worker Selector
//!
//! Combines caller preference, task classification and performance ranking
//! into one routing decision.
//!
//! # Decision Flow
//!
//! ```text
//! 1. Locked preference for a configured worker -> that worker, confidence 1.0
//! 2. Classify the prompt
//! 3. Rank configured workers for the detected task type
//! 4. Soft preference for a configured worker   -> that worker, confidence 0.9
//! 5. Otherwise                                  -> top-ranked worker
//! 6. Any internal failure in 2-5                -> default worker, confidence 0.1
//! ```
//!
//! Every path records an optimistic success for the chosen worker before
//! returning; feedback corrects it later.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::classifier::{Classification, TaskClassifier};
use super::task::TaskType;
use super::tracker::{PerformanceTracker, RankedWorker, TrackerError, WorkerId};

/// Confidence of a locked preference
pub const LOCKED_CONFIDENCE: f64 = 1.0;

/// Confidence of a soft preference
pub const PREFERENCE_CONFIDENCE: f64 = 0.9;

/// Confidence of a fail-open decision
pub const FAIL_OPEN_CONFIDENCE: f64 = 0.1;

// ============================================================================
// Routing Request
// ============================================================================

/// One turn of prior conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Speaker, e.g. `user` or `assistant`
    pub role: String,
    /// Turn text
    pub content: String,
}

/// A routing request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRequest {
    /// Caller-supplied correlation ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// The prompt to route (may be empty)
    pub prompt: String,

    /// Worker the caller would like to use
    pub user_preference: Option<WorkerId>,

    /// Honor `user_preference` unconditionally
    pub lock_preference: bool,

    /// Prior conversation (accepted, not used in the decision)
    pub conversation_history: Option<Vec<ConversationTurn>>,
}

impl RoutingRequest {
    /// Create a new routing request
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Prefer a worker
    #[must_use]
    pub fn with_preference(mut self, worker_id: impl Into<WorkerId>) -> Self {
        self.user_preference = Some(worker_id.into());
        self
    }

    /// Make the preference binding
    #[must_use]
    pub fn locked(mut self) -> Self {
        self.lock_preference = true;
        self
    }

    /// Attach conversation history
    #[must_use]
    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.conversation_history = Some(history);
        self
    }

    /// Attach a correlation ID
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

// ============================================================================
// Selection Result
// ============================================================================

/// How the chosen worker compares with the top-ranked one
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceComparison {
    /// Top-ranked worker for the task
    pub best_worker: WorkerId,
    /// Chosen worker's task success rate as a percentage of the best one's
    pub relative_performance: f64,
}

/// Outcome of one routing decision
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    /// Chosen worker
    pub worker_id: WorkerId,
    /// Which rule picked it
    pub reason: String,
    /// 1.0 locked, 0.9 soft preference, otherwise the classifier's
    pub confidence: f64,
    /// Classified task, `None` on the fail-open path
    pub task_type: Option<TaskType>,
    /// Display name of the task
    pub task_name: String,
    /// Whether the caller's preference decided the outcome
    pub user_preference_respected: bool,
    /// Top-ranked worker when a soft preference overrode it
    pub suggested_worker: Option<WorkerId>,
    /// Decision time
    pub timestamp: DateTime<Utc>,
    /// Decision latency, rounded to 4 places
    pub latency_seconds: f64,
    /// Full ranking, best first
    pub ranked_workers: Vec<RankedWorker>,
    /// 1-based position of the chosen worker in `ranked_workers`
    pub rank_of_selected: Option<usize>,
    /// Length of `ranked_workers`
    pub total_ranked: Option<usize>,
    /// Present when the chosen worker is not the top-ranked one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_comparison: Option<PerformanceComparison>,
    /// Echo of the request's correlation ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

// ============================================================================
// Selector
// ============================================================================

/// Internal failures on the routing path, never surfaced to callers
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Tracker refused to rank
    #[error("ranking failed: {0}")]
    Ranking(#[from] TrackerError),

    /// Tracker ranked nothing
    #[error("ranking returned no workers")]
    EmptyRanking,
}

/// Decision before bookkeeping
struct Decision {
    worker_id: WorkerId,
    reason: String,
    confidence: f64,
    task_type: TaskType,
    user_preference_respected: bool,
    suggested_worker: Option<WorkerId>,
    ranked: Vec<RankedWorker>,
}

/// The routing decision engine
#[derive(Debug)]
pub struct Selector {
    classifier: TaskClassifier,
    tracker: Arc<PerformanceTracker>,
    default_worker: WorkerId,
}

impl Selector {
    /// Create a selector
    pub fn new(
        classifier: TaskClassifier,
        tracker: Arc<PerformanceTracker>,
        default_worker: impl Into<WorkerId>,
    ) -> Self {
        Self {
            classifier,
            tracker,
            default_worker: default_worker.into(),
        }
    }

    /// Worker used when selection fails
    #[must_use]
    pub fn default_worker(&self) -> &str {
        &self.default_worker
    }

    /// The classifier in use
    #[must_use]
    pub fn classifier(&self) -> &TaskClassifier {
        &self.classifier
    }

    /// The shared tracker
    #[must_use]
    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    /// Route a request; never fails
    pub fn select(&self, request: &RoutingRequest) -> SelectionResult {
        let started = Instant::now();

        let preference = request.user_preference.as_deref().filter(|id| {
            let known = self.tracker.is_configured(id);
            if !known {
                tracing::debug!(preference = %id, "Ignoring preference for unknown worker");
            }
            known
        });

        let decision = match preference {
            Some(id) if request.lock_preference => self.locked(id, &request.prompt),
            _ => self.decide(&request.prompt, preference).unwrap_or_else(|e| {
                tracing::error!(error = %e, "Worker selection failed, using default worker");
                self.fail_open(&e)
            }),
        };

        self.finish(decision, request, started)
    }

    fn locked(&self, worker_id: &str, prompt: &str) -> Decision {
        let classification = self.classifier.classify(prompt);
        let ranked = match self.tracker.rank(Some(classification.task_type)) {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::warn!(error = %e, "Ranking unavailable for locked preference");
                Vec::new()
            }
        };

        Decision {
            worker_id: worker_id.to_string(),
            reason: "locked preference".to_string(),
            confidence: LOCKED_CONFIDENCE,
            task_type: classification.task_type,
            user_preference_respected: true,
            suggested_worker: None,
            ranked,
        }
    }

    fn decide(&self, prompt: &str, preference: Option<&str>) -> Result<Decision, SelectionError> {
        let Classification {
            task_type,
            confidence,
            ..
        } = self.classifier.classify(prompt);

        let ranked = self.tracker.rank(Some(task_type))?;
        let top = ranked
            .first()
            .map(|r| r.worker_id.clone())
            .ok_or(SelectionError::EmptyRanking)?;

        if let Some(preferred) = preference {
            let suggested_worker = (top != preferred).then(|| top.clone());
            let reason = match &suggested_worker {
                Some(s) => format!("user preference (top-ranked for {task_type} task: {s})"),
                None => "user preference".to_string(),
            };
            return Ok(Decision {
                worker_id: preferred.to_string(),
                reason,
                confidence: PREFERENCE_CONFIDENCE,
                task_type,
                user_preference_respected: true,
                suggested_worker,
                ranked,
            });
        }

        Ok(Decision {
            worker_id: top,
            reason: format!(
                "task detected as '{task_type}' with confidence {confidence:.2}; selected best performing worker"
            ),
            confidence,
            task_type,
            user_preference_respected: false,
            suggested_worker: None,
            ranked,
        })
    }

    fn fail_open(&self, error: &SelectionError) -> Decision {
        Decision {
            worker_id: self.default_worker.clone(),
            reason: format!("error in worker selection: {error}"),
            confidence: FAIL_OPEN_CONFIDENCE,
            task_type: TaskType::General,
            user_preference_respected: false,
            suggested_worker: None,
            ranked: Vec::new(),
        }
    }

    fn finish(&self, decision: Decision, request: &RoutingRequest, started: Instant) -> SelectionResult {
        let latency = started.elapsed().as_secs_f64();

        tracing::info!(
            worker_id = %decision.worker_id,
            task = %decision.task_type,
            confidence = decision.confidence,
            latency,
            reason = %decision.reason,
            "Worker selected"
        );

        self.tracker
            .record(&decision.worker_id, true, latency, Some(decision.task_type));

        let position = decision
            .ranked
            .iter()
            .position(|r| r.worker_id == decision.worker_id);

        let performance_comparison = position
            .filter(|&p| p > 0 && decision.ranked.len() > 1)
            .and_then(|p| {
                let best = &decision.ranked[0];
                let chosen = &decision.ranked[p];
                (best.task_success_rate > 0.0).then(|| PerformanceComparison {
                    best_worker: best.worker_id.clone(),
                    relative_performance: round_to(
                        chosen.task_success_rate / best.task_success_rate * 100.0,
                        1,
                    ),
                })
            });

        SelectionResult {
            worker_id: decision.worker_id,
            reason: decision.reason,
            confidence: decision.confidence,
            task_type: Some(decision.task_type),
            task_name: decision.task_type.display_name().to_string(),
            user_preference_respected: decision.user_preference_respected,
            suggested_worker: decision.suggested_worker,
            timestamp: Utc::now(),
            latency_seconds: round_to(latency, 4),
            rank_of_selected: position.map(|p| p + 1),
            total_ranked: position.map(|_| decision.ranked.len()),
            ranked_workers: decision
                .ranked
                .into_iter()
                .map(|r| RankedWorker {
                    success_rate: round_to(r.success_rate, 4),
                    task_success_rate: round_to(r.task_success_rate, 4),
                    ..r
                })
                .collect(),
            performance_comparison,
            request_id: request.request_id.clone(),
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
