//! Adaptive Worker Routing
//!
//! Classifies each prompt, ranks the configured workers by their observed
//! performance for that kind of task, and picks one.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |     Selector     |  <-- Entry point for routing requests
//! +--------+---------+
//!          |
//!    +-----+--------------+
//!    |                    |
//!    v                    v
//! +----------------+  +--------------------+
//! | TaskClassifier |  | PerformanceTracker |  <-- shared, per-worker locks
//! +----------------+  +---------+----------+
//!                               ^
//!                               |
//!                     +---------+---------+
//!                     | FeedbackRecorder  |  <-- post-hoc ratings
//!                     +-------------------+
//! ```
//!
//! Everything in this module is synchronous and in-memory. Durable state is
//! handled by the persistence side channel in [`crate::persistence`].

pub mod classifier;
pub mod feedback;
pub mod selector;
pub mod task;
pub mod tracker;

pub use classifier::{
    Classification, ClassifierError, PatternGroup, PatternTable, TaskClassifier,
    DEFAULT_MIN_CONFIDENCE, NEUTRAL_CONFIDENCE,
};
pub use feedback::{
    FeedbackAck, FeedbackRecord, FeedbackRecorder, FeedbackRequest, ValidationError,
    WorkerFeedbackSummary, DEFAULT_MAX_AUDIT_ENTRIES,
};
pub use selector::{
    ConversationTurn, PerformanceComparison, RoutingRequest, SelectionError, SelectionResult,
    Selector,
};
pub use task::{TaskType, UnknownTaskType};
pub use tracker::{
    PerformanceRecord, PerformanceTracker, RankedWorker, TrackerError, WorkerId,
    WorkerPerformance, MAX_UNCONFIGURED_RECORDS,
};
