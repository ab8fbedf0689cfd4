//! ConflictLens daemon entry point.
//!
//! Loads configuration, opens one conflict session per file given on the
//! command line, logs every conflict change, polls the focused file's remote
//! version, and handles graceful shutdown.

mod reporter;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use conflictlens_core::config::AppConfig;
use conflictlens_core::vcs::build_backend;
use conflictlens_core::{DiskBuffer, RemotePoller, ServiceSlot, Services, SessionRegistry};

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// ConflictLens conflict watcher.
#[derive(Parser, Debug)]
#[command(
    name = "conflictlens-daemon",
    version,
    about = "Watch files for edits that collide with upstream commits"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// File whose remote version is polled (defaults to the first FILE).
    #[arg(long)]
    focus: Option<PathBuf>,

    /// Files to watch.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load and resolve configuration
    let mut config =
        AppConfig::load_from_file(&args.config).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables in config")?;
    config
        .validate()
        .context("configuration validation failed")?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let _log_guard = init_tracing(&log_level, config.daemon.log_file.as_ref())?;

    let settings = config.session.settings();

    // Startup banner
    info!("========================================");
    info!("  ConflictLens Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Backend       : {}", config.backend.kind);
    info!("Debounce      : {}ms", config.session.debounce_ms);
    info!("Poll interval : {}s", config.session.poll_interval_secs);
    info!("Watch files   : {}", settings.watch_files);
    info!("Log level     : {}", log_level);
    info!("========================================");

    // Bind the backend through the shared slot
    let slot = Arc::new(ServiceSlot::new());
    slot.bind(build_backend(&config.backend));
    let registry = Arc::new(SessionRegistry::new(
        Services::with_line_differ(slot),
        settings,
    ));

    // Open a session per file and start reporting
    let mut reporters = Vec::new();
    for file in &args.files {
        if !file.is_file() {
            warn!(path = %file.display(), "not a file, skipping");
            continue;
        }
        let session = registry.open(file, Arc::new(DiskBuffer::new(file)));
        reporters.push(tokio::spawn(reporter::run(session)));
    }
    if registry.is_empty() {
        bail!("none of the given paths is a readable file");
    }

    let focus = args.focus.as_ref().or_else(|| args.files.first());
    registry.set_focused(focus.map(PathBuf::as_path));
    if let Some(focused) = registry.focused_session() {
        info!(path = %focused.path().display(), "polling remote version of focused file");
    }

    // Start the remote poller with a cooperative shutdown
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let poller = RemotePoller::new(
        Arc::clone(&registry),
        settings.poll_interval,
        Arc::clone(&shutdown),
    );
    let poller_handle = tokio::spawn(poller.run());

    // Wait for shutdown signal
    let signal = signals::wait_for_shutdown().await;
    info!(signal, "Shutdown signal received, stopping...");

    // notify_one keeps the permit if the poller is mid-poll
    shutdown.notify_one();

    // Wait for the poller to finish its current poll (up to 10s)
    match tokio::time::timeout(std::time::Duration::from_secs(10), poller_handle).await {
        Ok(Ok(())) => info!("poller stopped gracefully"),
        Ok(Err(e)) => warn!("poller task error: {}", e),
        Err(_) => warn!("poller did not stop within 10s, forcing shutdown"),
    }

    registry.shutdown();
    for handle in reporters {
        handle.abort();
    }

    info!("ConflictLens daemon stopped.");
    Ok(())
}

/// Install the global subscriber: stdout, or a daily-rotated file when
/// `log_file` is set. The returned guard flushes the file writer on drop.
fn init_tracing(level: &str, log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(log_file) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .init();
        return Ok(None);
    };

    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let name = log_file
        .file_name()
        .context("log_file must name a file")?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_require_files() {
        assert!(Args::try_parse_from(["conflictlens-daemon", "-c", "c.toml"]).is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "conflictlens-daemon",
            "--config",
            "c.toml",
            "--focus",
            "b.rs",
            "a.rs",
            "b.rs",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("c.toml"));
        assert_eq!(args.focus, Some(PathBuf::from("b.rs")));
        assert_eq!(args.files.len(), 2);
        assert!(args.log_level.is_none());
    }
}
