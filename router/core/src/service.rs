//! Router Service
//!
//! Owns one explicitly constructed router: classifier, tracker, selector,
//! feedback recorder and the persistence worker. Created by the process
//! startup sequence and torn down with [`RouterService::shutdown`].

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, RouterConfig};
use crate::persistence::{JsonFileStore, PerformanceStore, PersistenceHandle, PersistenceWorker};
use crate::protocol::{ClientMessage, ErrorKind, ServerMessage};
use crate::routing::{
    FeedbackAck, FeedbackRecorder, FeedbackRequest, PerformanceTracker, RankedWorker,
    RoutingRequest, SelectionResult, Selector, TaskType, TrackerError, ValidationError,
};

/// Errors raised while starting the service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Running persistence side channel
struct PersistenceRuntime {
    handle: PersistenceHandle,
    task: JoinHandle<()>,
}

/// A running router
pub struct RouterService {
    config: RouterConfig,
    tracker: Arc<PerformanceTracker>,
    selector: Selector,
    recorder: FeedbackRecorder,
    persistence: Mutex<Option<PersistenceRuntime>>,
}

impl RouterService {
    /// Validate the configuration and start the router
    ///
    /// Uses `store` when given, otherwise a [`JsonFileStore`] at the
    /// configured paths if persistence is enabled. Persisted records are
    /// loaded before the first request; load failures are logged and the
    /// router starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a classifier
    /// pattern does not compile.
    pub async fn start(
        config: RouterConfig,
        store: Option<Arc<dyn PerformanceStore>>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let classifier = config.build_classifier()?;

        let tracker = Arc::new(PerformanceTracker::new(config.workers.iter().cloned()));

        let store = store.or_else(|| {
            config.persistence_enabled.then(|| {
                Arc::new(JsonFileStore::new(&config.state_path, &config.feedback_path))
                    as Arc<dyn PerformanceStore>
            })
        });

        let persistence = match store {
            Some(store) => {
                match store.load_records().await {
                    Ok(rows) => {
                        let restored = tracker.restore(rows);
                        tracing::info!(store = store.name(), restored, "Loaded persisted records");
                    }
                    Err(e) => {
                        tracing::warn!(store = store.name(), error = %e, "Failed to load persisted records, starting empty");
                    }
                }

                let (handle, task) = PersistenceWorker::spawn(
                    store,
                    Arc::clone(&tracker),
                    config.flush_interval,
                    config.channel_capacity,
                );
                tracker.attach_persistence(handle.clone());
                Some(PersistenceRuntime { handle, task })
            }
            None => None,
        };

        let mut recorder = FeedbackRecorder::new(Arc::clone(&tracker), config.max_audit_entries);
        if let Some(runtime) = &persistence {
            recorder = recorder.with_persistence(runtime.handle.clone());
        }

        let selector = Selector::new(classifier, Arc::clone(&tracker), config.default_worker.clone());

        tracing::info!(
            workers = config.workers.len(),
            default_worker = %config.default_worker,
            persistence = persistence.is_some(),
            "Router started"
        );

        Ok(Self {
            config,
            tracker,
            selector,
            recorder,
            persistence: Mutex::new(persistence),
        })
    }

    /// Route a prompt
    pub fn route(&self, request: &RoutingRequest) -> SelectionResult {
        self.selector.select(request)
    }

    /// Apply feedback
    pub fn feedback(&self, request: FeedbackRequest) -> Result<FeedbackAck, ValidationError> {
        self.recorder.record_feedback(request)
    }

    /// Current ranking
    pub fn rankings(&self, task_type: Option<TaskType>) -> Result<Vec<RankedWorker>, TrackerError> {
        self.tracker.rank(task_type)
    }

    /// Answer one protocol message
    pub fn handle(&self, msg: ClientMessage) -> ServerMessage {
        match msg {
            ClientMessage::Route(request) => ServerMessage::Selection(self.route(&request)),
            ClientMessage::Feedback(request) => match self.feedback(request) {
                Ok(ack) => ServerMessage::FeedbackAck(ack),
                Err(e) => ServerMessage::error(ErrorKind::Validation, e.to_string()),
            },
            ClientMessage::Rankings { task_type } => match self.rankings(task_type) {
                Ok(ranked_workers) => ServerMessage::Rankings {
                    task_type,
                    ranked_workers,
                },
                Err(e) => ServerMessage::error(ErrorKind::Unavailable, e.to_string()),
            },
            ClientMessage::Ping => ServerMessage::Pong,
        }
    }

    /// Validated configuration the service was started with
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Shared performance tracker
    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    /// Feedback recorder and its audit log
    pub fn recorder(&self) -> &FeedbackRecorder {
        &self.recorder
    }

    /// Close the tracker, flush and join the persistence worker
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.tracker.close();

        let runtime = self.persistence.lock().take();
        if let Some(PersistenceRuntime { handle, task }) = runtime {
            handle.shutdown().await;
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Persistence worker panicked");
            }
        }

        tracing::info!("Router stopped");
    }
}
