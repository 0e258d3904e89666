//! TOML Configuration File Support
//!
//! Centralized configuration loading for the router, supporting a TOML file
//! at `~/.config/model-router/router.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - Config: `$XDG_CONFIG_HOME/model-router/router.toml`
//! - State: `$XDG_DATA_HOME/model-router/{records.json,feedback.jsonl}`
//! - Socket: `$XDG_RUNTIME_DIR/model-router/router.sock`
//!
//! # Example Configuration
//!
//! ```toml
//! [workers]
//! ids = ["fast-model", "code-model", "big-model"]
//! default = "fast-model"
//!
//! [classifier]
//! min_confidence = 0.15
//!
//! [classifier.patterns]
//! math = ['\bsolve\b', '\bequation\b']
//!
//! [persistence]
//! enabled = true
//! state_path = "/var/lib/model-router/records.json"
//! flush_interval_ms = 500
//!
//! [feedback]
//! max_audit_entries = 5000
//!
//! [daemon]
//! socket_path = "/run/user/1000/model-router/router.sock"
//! max_connections = 64
//! ```

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persistence::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_FLUSH_INTERVAL};
use crate::routing::{
    ClassifierError, PatternTable, TaskClassifier, TaskType, WorkerId, DEFAULT_MAX_AUDIT_ENTRIES,
    DEFAULT_MIN_CONFIDENCE,
};

/// Application directory name under the XDG base directories
const APP_DIR: &str = "model-router";

/// Workers used when nothing is configured
pub const DEFAULT_WORKERS: [&str; 4] = [
    "openrouter/deepseek/deepseek-chat:free",
    "openrouter/meta-llama/llama-3.1-8b-instruct:free",
    "openrouter/qwen/qwen3-235b-a22b:free",
    "openrouter/mistralai/mistral-7b-instruct:free",
];

/// General-purpose worker used as the fail-open default
pub const DEFAULT_WORKER: &str = "openrouter/mistralai/mistral-7b-instruct:free";

/// Default connection cap for the daemon
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Classifier patterns or threshold rejected
    #[error("Invalid classifier configuration: {0}")]
    Classifier(#[from] ClassifierError),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Workers section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersToml {
    /// Configured worker IDs
    pub ids: Option<Vec<String>>,

    /// Worker used when selection fails
    pub default: Option<String>,
}

/// Classifier section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierToml {
    /// Minimum accepted confidence
    pub min_confidence: Option<f64>,

    /// Per task type pattern overrides, keyed by wire name
    pub patterns: HashMap<String, Vec<String>>,
}

/// Persistence section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceToml {
    /// Whether records are persisted at all
    pub enabled: Option<bool>,

    /// Snapshot file
    pub state_path: Option<PathBuf>,

    /// Feedback JSON-lines file
    pub feedback_path: Option<PathBuf>,

    /// Snapshot coalescing interval in milliseconds
    pub flush_interval_ms: Option<u64>,

    /// Side channel capacity
    pub channel_capacity: Option<usize>,
}

/// Feedback section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackToml {
    /// In-memory audit log capacity
    pub max_audit_entries: Option<usize>,
}

/// Daemon section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonToml {
    /// Unix socket path
    pub socket_path: Option<PathBuf>,

    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// `[workers]` section
    pub workers: WorkersToml,
    /// `[classifier]` section
    pub classifier: ClassifierToml,
    /// `[persistence]` section
    pub persistence: PersistenceToml,
    /// `[feedback]` section
    pub feedback: FeedbackToml,
    /// `[daemon]` section
    pub daemon: DaemonToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved router configuration
///
/// Use [`load_config`] to load configuration with proper priority handling,
/// then [`RouterConfig::validate`] before starting the service.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Configured worker IDs, in ranking tie-break order
    pub workers: Vec<WorkerId>,

    /// Fail-open worker
    pub default_worker: WorkerId,

    /// Classifier acceptance threshold
    pub min_confidence: f64,

    /// Classifier pattern overrides
    pub patterns: HashMap<TaskType, Vec<String>>,

    /// Whether the persistence side channel is started
    pub persistence_enabled: bool,

    /// Snapshot file
    pub state_path: PathBuf,

    /// Feedback JSON-lines file
    pub feedback_path: PathBuf,

    /// Snapshot coalescing interval
    pub flush_interval: Duration,

    /// Side channel capacity
    pub channel_capacity: usize,

    /// In-memory audit log capacity
    pub max_audit_entries: usize,

    /// Daemon socket path
    pub socket_path: PathBuf,

    /// Daemon connection cap
    pub max_connections: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            workers: DEFAULT_WORKERS.iter().map(|w| w.to_string()).collect(),
            default_worker: DEFAULT_WORKER.to_string(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            patterns: HashMap::new(),
            persistence_enabled: true,
            state_path: data_dir.join("records.json"),
            feedback_path: data_dir.join("feedback.jsonl"),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_audit_entries: DEFAULT_MAX_AUDIT_ENTRIES,
            socket_path: default_socket_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RouterConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for the given workers, persistence disabled
    #[must_use]
    pub fn in_memory<I, S>(workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<WorkerId>,
    {
        let workers: Vec<WorkerId> = workers.into_iter().map(Into::into).collect();
        Self {
            default_worker: workers.first().cloned().unwrap_or_default(),
            workers,
            persistence_enabled: false,
            ..Self::default()
        }
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one worker must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for id in &self.workers {
            if id.trim().is_empty() {
                return Err(ConfigError::ValidationError("worker ids must not be empty".into()));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::ValidationError(format!("duplicate worker id '{id}'")));
            }
        }

        if !self.workers.contains(&self.default_worker) {
            return Err(ConfigError::ValidationError(format!(
                "default worker '{}' is not in the worker list",
                self.default_worker
            )));
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::ValidationError(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "persistence channel_capacity must be positive".into(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError("max_connections must be positive".into()));
        }

        Ok(())
    }

    /// Build the classifier described by this configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern override does not compile or the
    /// threshold is out of range.
    pub fn build_classifier(&self) -> Result<TaskClassifier, ConfigError> {
        let table = PatternTable::with_overrides(&self.patterns)?;
        Ok(TaskClassifier::new(table, self.min_confidence)?)
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/model-router/router.toml` or
/// `~/.config/model-router/router.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR).join("router.toml"))
}

/// Directory holding persisted records and feedback
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// Get the default daemon socket path
///
/// Uses `XDG_RUNTIME_DIR` if available, otherwise the system temp directory.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("router.sock")
}

/// Load configuration from all sources with proper priority
///
/// Priority order (highest first):
/// 1. CLI arguments (not handled here - caller should apply after)
/// 2. Environment variables
/// 3. TOML configuration file
/// 4. Default values
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<RouterConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, reading the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RouterConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration from a specific path with an explicit environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RouterConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RouterConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RouterToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Split a comma-separated worker list
fn parse_worker_list(raw: &str) -> Vec<WorkerId> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Replace the worker list
///
/// Unless the same layer also names a default, a default worker that is no
/// longer listed falls back to the first entry.
fn replace_workers(config: &mut RouterConfig, workers: Vec<WorkerId>, default_given: bool) {
    config.workers = workers;
    if !default_given && !config.workers.contains(&config.default_worker) {
        if let Some(first) = config.workers.first() {
            config.default_worker = first.clone();
        }
    }
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RouterConfig, toml: &RouterToml) -> Result<(), ConfigError> {
    // Workers
    if let Some(ref ids) = toml.workers.ids {
        replace_workers(config, ids.clone(), toml.workers.default.is_some());
    }
    if let Some(ref default) = toml.workers.default {
        config.default_worker = default.clone();
    }

    // Classifier
    if let Some(threshold) = toml.classifier.min_confidence {
        config.min_confidence = threshold;
    }
    if !toml.classifier.patterns.is_empty() {
        config.patterns = toml
            .classifier
            .patterns
            .iter()
            .map(|(name, patterns)| {
                name.parse::<TaskType>()
                    .map(|task_type| (task_type, patterns.clone()))
                    .map_err(|e| ConfigError::ValidationError(format!("[classifier.patterns]: {e}")))
            })
            .collect::<Result<_, _>>()?;
    }

    // Persistence
    if let Some(enabled) = toml.persistence.enabled {
        config.persistence_enabled = enabled;
    }
    if let Some(ref path) = toml.persistence.state_path {
        config.state_path = path.clone();
    }
    if let Some(ref path) = toml.persistence.feedback_path {
        config.feedback_path = path.clone();
    }
    if let Some(ms) = toml.persistence.flush_interval_ms {
        config.flush_interval = Duration::from_millis(ms);
    }
    if let Some(capacity) = toml.persistence.channel_capacity {
        config.channel_capacity = capacity;
    }

    // Feedback
    if let Some(entries) = toml.feedback.max_audit_entries {
        config.max_audit_entries = entries;
    }

    // Daemon
    if let Some(ref path) = toml.daemon.socket_path {
        config.socket_path = path.clone();
    }
    if let Some(max) = toml.daemon.max_connections {
        config.max_connections = max;
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut RouterConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let default_worker = env("ROUTER_DEFAULT_WORKER");

    if let Some(workers) = env("ROUTER_WORKERS") {
        let workers = parse_worker_list(&workers);
        if !workers.is_empty() {
            replace_workers(config, workers, default_worker.is_some());
            config.source = ConfigSource::Env;
        }
    }

    if let Some(default) = default_worker {
        config.default_worker = default.trim().to_string();
        config.source = ConfigSource::Env;
    }

    if let Some(threshold) = env("ROUTER_MIN_CONFIDENCE") {
        match threshold.parse::<f64>() {
            Ok(value) => {
                config.min_confidence = value;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(value = %threshold, "Ignoring unparsable ROUTER_MIN_CONFIDENCE"),
        }
    }

    if let Some(path) = env("ROUTER_STATE_PATH") {
        config.state_path = PathBuf::from(path);
        config.source = ConfigSource::Env;
    }

    if let Some(path) = env("ROUTER_FEEDBACK_PATH") {
        config.feedback_path = PathBuf::from(path);
        config.source = ConfigSource::Env;
    }

    if let Some(path) = env("ROUTER_SOCKET") {
        config.socket_path = PathBuf::from(path);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Worker list override
    pub workers: Option<Vec<WorkerId>>,

    /// Default worker override
    pub default_worker: Option<WorkerId>,

    /// Socket path override
    pub socket_path: Option<PathBuf>,

    /// State file override
    pub state_path: Option<PathBuf>,

    /// Disable persistence
    pub no_persistence: bool,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set worker list override
    #[must_use]
    pub fn with_workers(mut self, workers: Vec<WorkerId>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set default worker override
    #[must_use]
    pub fn with_default_worker(mut self, worker: impl Into<WorkerId>) -> Self {
        self.default_worker = Some(worker.into());
        self
    }

    /// Set socket path override
    #[must_use]
    pub fn with_socket_path(mut self, path: PathBuf) -> Self {
        self.socket_path = Some(path);
        self
    }

    /// Set state file override
    #[must_use]
    pub fn with_state_path(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }

    /// Disable persistence
    #[must_use]
    pub fn without_persistence(mut self) -> Self {
        self.no_persistence = true;
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RouterConfig) {
        if self.workers.is_some()
            || self.default_worker.is_some()
            || self.socket_path.is_some()
            || self.state_path.is_some()
            || self.no_persistence
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref workers) = self.workers {
            replace_workers(config, workers.clone(), self.default_worker.is_some());
        }
        if let Some(ref worker) = self.default_worker {
            config.default_worker = worker.clone();
        }
        if let Some(ref path) = self.socket_path {
            config.socket_path = path.clone();
        }
        if let Some(ref path) = self.state_path {
            config.state_path = path.clone();
        }
        if self.no_persistence {
            config.persistence_enabled = false;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
