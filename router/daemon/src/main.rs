//! Router Daemon
//!
//! Standalone server process for adaptive worker selection. Agents and CLIs
//! connect over a Unix socket and exchange framed JSON messages.
//!
//! # Usage
//!
//! ```bash
//! # Start with default socket path ($XDG_RUNTIME_DIR/model-router/router.sock)
//! router-daemon
//!
//! # Custom worker pool, no state on disk
//! router-daemon --workers fast-model,code-model --no-persistence
//!
//! # With verbose logging
//! RUST_LOG=debug router-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `ROUTER_SOCKET`: Custom Unix socket path
//! - `ROUTER_WORKERS`: Comma-separated worker IDs
//! - `ROUTER_DEFAULT_WORKER`: Fail-open worker
//! - `ROUTER_STATE_PATH`: Performance snapshot file
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Files
//!
//! - Config: `$XDG_CONFIG_HOME/model-router/router.toml`
//! - Socket: `$XDG_RUNTIME_DIR/model-router/router.sock`
//! - PID file: next to the socket, `router.pid`
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown (flushes records, removes PID file and socket)

mod server;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use router_core::{load_config_from_path, ConfigOverrides, RouterService};

use crate::server::DaemonServer;

/// Adaptive worker selection daemon
#[derive(Debug, Parser)]
#[command(name = "router-daemon", version, about)]
struct Args {
    /// Configuration file (defaults to the XDG config path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Unix socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Comma-separated worker IDs
    #[arg(short, long, value_delimiter = ',')]
    workers: Option<Vec<String>>,

    /// Fail-open worker
    #[arg(short, long)]
    default_worker: Option<String>,

    /// Performance snapshot file
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Keep records in memory only
    #[arg(long)]
    no_persistence: bool,

    /// Debug logging for router crates
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(workers) = &self.workers {
            overrides = overrides.with_workers(workers.clone());
        }
        if let Some(worker) = &self.default_worker {
            overrides = overrides.with_default_worker(worker.clone());
        }
        if let Some(path) = &self.socket {
            overrides = overrides.with_socket_path(path.clone());
        }
        if let Some(path) = &self.state_path {
            overrides = overrides.with_state_path(path.clone());
        }
        if self.no_persistence {
            overrides = overrides.without_persistence();
        }
        overrides
    }
}

fn pid_path_for(socket_path: &Path) -> PathBuf {
    socket_path.with_file_name("router.pid")
}

/// Write the PID file
fn write_pid_file(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let pid = std::process::id();
    let mut file = fs::File::create(path)?;
    writeln!(file, "{pid}")?;

    info!(pid, path = ?path, "PID file created");
    Ok(())
}

/// Remove the PID file
fn remove_pid_file(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = ?path, "Failed to remove PID file");
        } else {
            info!(path = ?path, "PID file removed");
        }
    }
}

/// Resolve once SIGINT or SIGTERM arrives
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("router_daemon={level}").parse()?)
                .add_directive(format!("router_core={level}").parse()?),
        )
        .with_target(true)
        .init();

    info!("Starting Router Daemon");

    let path = args.config.clone().or_else(router_core::default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);

    info!(
        source = ?config.source(),
        workers = ?config.workers,
        default_worker = %config.default_worker,
        persistence = config.persistence_enabled,
        "Configuration loaded"
    );

    let pid_path = pid_path_for(&config.socket_path);
    write_pid_file(&pid_path).with_context(|| {
        format!("Failed to write PID file at {pid_path:?}. Check directory permissions.")
    })?;

    let service = match RouterService::start(config, None).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            remove_pid_file(&pid_path);
            return Err(e).context("Failed to start router");
        }
    };

    let server = DaemonServer::new(Arc::clone(&service));
    let listener = match server.bind() {
        Ok(listener) => listener,
        Err(e) => {
            service.shutdown().await;
            remove_pid_file(&pid_path);
            return Err(e.context(
                "Check if another daemon is running or if you have permission to create sockets",
            ));
        }
    };

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown.notify_one();
        });
    }

    info!(path = ?server.socket_path(), "Ready to accept connections");

    let result = server.run(listener, shutdown).await;
    if let Err(e) = &result {
        error!(error = %e, "Server shutdown error");
    }

    info!("Flushing performance records");
    service.shutdown().await;
    remove_pid_file(&pid_path);

    info!("Router daemon stopped cleanly");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_overrides() {
        let args = Args::parse_from([
            "router-daemon",
            "--workers",
            "a,b",
            "--socket",
            "/tmp/r.sock",
            "--no-persistence",
        ]);
        let overrides = args.overrides();
        assert_eq!(overrides.workers, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(overrides.socket_path, Some(PathBuf::from("/tmp/r.sock")));
        assert!(overrides.no_persistence);
        assert!(overrides.default_worker.is_none());
    }

    #[test]
    fn test_worker_flag_alone_yields_valid_config() {
        let args = Args::parse_from(["router-daemon", "--workers", "fast,code"]);
        let mut config = router_core::RouterConfig::in_memory(["a", "b"]);
        args.overrides().apply(&mut config);
        assert_eq!(config.default_worker, "fast");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pid_file_next_to_socket() {
        let pid = pid_path_for(Path::new("/run/user/1000/model-router/router.sock"));
        assert_eq!(pid, PathBuf::from("/run/user/1000/model-router/router.pid"));
    }

    #[test]
    fn test_pid_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("router.pid");
        write_pid_file(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
        remove_pid_file(&path);
        assert!(!path.exists());
    }
}
