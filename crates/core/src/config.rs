//! TOML-based configuration system for ConflictLens.
//!
//! Sensitive values (passwords, tokens) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon / logging settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Per-file session timing.
    #[serde(default)]
    pub session: SessionConfig,

    /// Version-control backend selection.
    #[serde(default)]
    pub backend: BackendConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional log file, rotated daily.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Recalculation timing for every open file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Debounce window for edit events, in milliseconds (default 500).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Seconds between remote polls of the focused file (default 120).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Watch each file's directory for saves and external syncs.
    #[serde(default = "default_true")]
    pub watch_files: bool,
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_poll_interval() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_secs: default_poll_interval(),
            watch_files: true,
        }
    }
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            watch_files: self.watch_files,
        }
    }
}

/// [`SessionConfig`] resolved into durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub watch_files: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionConfig::default().settings()
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Which version-control system tracks the files.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Svn,
    Git,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Svn => write!(f, "svn"),
            Self::Git => write!(f, "git"),
        }
    }
}

/// Backend selection plus per-backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default)]
    pub svn: SvnConfig,

    #[serde(default)]
    pub git: GitConfig,
}

/// Settings for the `svn` CLI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvnConfig {
    /// Name or path of the `svn` binary.
    #[serde(default = "default_svn_binary")]
    pub binary: String,

    /// SVN username; the working copy's cached credentials are used if unset.
    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the SVN password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Domain used to build owner emails from SVN usernames
    /// (e.g. `example.com` produces `jdoe@example.com`).
    #[serde(default)]
    pub email_domain: Option<String>,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_svn_binary() -> String {
    "svn".into()
}

impl Default for SvnConfig {
    fn default() -> Self {
        Self {
            binary: default_svn_binary(),
            username: None,
            password_env: None,
            email_domain: None,
            password: None,
        }
    }
}

/// Settings for the `git2` backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Remote whose tracking branch is the "latest" version.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Remote branch; defaults to the upstream of the checked-out branch.
    #[serde(default)]
    pub branch: Option<String>,

    /// Fetch from the remote whenever the latest version is re-checked.
    #[serde(default = "default_true")]
    pub fetch_on_poll: bool,

    /// Environment variable holding an access token for fetches.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Resolved token.
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_remote() -> String {
    "origin".into()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            branch: None,
            fetch_on_poll: true,
            token_env: None,
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// Fields that reference a missing variable log a warning but do **not**
    /// fail; the backends fall back to cached credentials.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        if let Some(ref env_name) = self.backend.svn.password_env {
            self.backend.svn.password = resolve_optional_env(env_name, "backend.svn.password_env");
        }

        if let Some(ref env_name) = self.backend.git.token_env {
            self.backend.git.token = resolve_optional_env(env_name, "backend.git.token_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all values are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.debounce_ms".into(),
                detail: "debounce window must be > 0".into(),
            });
        }
        if self.session.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.poll_interval_secs".into(),
                detail: "poll interval must be > 0".into(),
            });
        }
        if self.backend.svn.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "backend.svn.binary".into(),
                detail: "svn binary must not be empty".into(),
            });
        }
        if self.backend.git.remote.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "backend.git.remote".into(),
                detail: "git remote name must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
