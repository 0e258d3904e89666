//! Router Core - Adaptive Worker Selection
//!
//! Routes each prompt to one worker out of a configured pool. Prompts are
//! classified into a task type, workers are ranked by the outcomes observed
//! for that task type, and callers may override the choice with a soft or
//! locked preference. Post-hoc ratings feed back into the ranking.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Callers (agents, CLIs, tests)                 │
//! │        ClientMessage (up)          ServerMessage (down)       │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ transport (Unix socket frames)
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                        RouterService                          │
//! │  ┌────────────┐  ┌─────────────┐  ┌──────────────────┐        │
//! │  │  Selector  │  │  Feedback   │  │   Performance    │        │
//! │  │ (classify, │──│  Recorder   │──│     Tracker      │        │
//! │  │  rank)     │  └─────────────┘  └────────┬─────────┘        │
//! │  └────────────┘                            │ records_changed  │
//! │                                   ┌────────┴─────────┐        │
//! │                                   │ PersistenceWorker│        │
//! │                                   └──────────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use router_core::{RouterConfig, RouterService, RoutingRequest};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RouterConfig::in_memory(["fast-model", "code-model"]);
//!     let service = RouterService::start(config, None).await.unwrap();
//!
//!     let result = service.route(&RoutingRequest::new("Write a function to reverse a string"));
//!     println!("{} ({})", result.worker_id, result.reason);
//!
//!     service.shutdown().await;
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`routing`]: Classification, performance tracking, selection and feedback
//! - [`persistence`]: Durable records and the feedback audit log
//! - [`config`]: TOML/environment configuration
//! - [`protocol`]: Request and response messages
//! - [`transport`]: Frame codec and Unix socket client
//! - [`service`]: The assembled router

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod persistence;
pub mod protocol;
pub mod routing;
pub mod service;
pub mod transport;

// Routing exports
pub use routing::{
    Classification, FeedbackAck, FeedbackRecord, FeedbackRecorder, FeedbackRequest,
    PerformanceRecord, PerformanceTracker, RankedWorker, RoutingRequest, SelectionResult,
    Selector, TaskClassifier, TaskType, WorkerId,
};

// Service exports
pub use service::{RouterService, ServiceError};

// Protocol exports
pub use protocol::{ClientMessage, ErrorKind, ServerMessage};

// Transport exports
pub use transport::{TransportError, UnixSocketClient};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RouterConfig,
};

// Persistence exports
pub use persistence::{JsonFileStore, MemoryStore, PerformanceStore, PersistenceError};
