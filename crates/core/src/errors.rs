//! Error types for the ConflictLens core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

// ---------------------------------------------------------------------------
// Version-control errors
// ---------------------------------------------------------------------------

/// Errors from the version-control collaborator.
#[derive(Debug, Error)]
pub enum VcsError {
    /// No backend has been bound yet. Retried on the next trigger.
    #[error("version control backend is not ready")]
    NotReady,

    /// The file is not tracked by the backend.
    #[error("'{0}' is not under version control")]
    NotUnderVersionControl(PathBuf),

    /// The `svn` binary was not found on `$PATH`.
    #[error("svn binary not found: {0}")]
    BinaryNotFound(String),

    /// An `svn` command exited with a non-zero status.
    #[error("svn command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// Could not parse the XML output produced by `svn`.
    #[error("failed to parse svn XML output: {0}")]
    XmlParseError(String),

    /// The requested version does not exist for this file.
    #[error("version {version} not found for '{path}'")]
    VersionNotFound { path: PathBuf, version: String },

    /// The working file has uncommitted edits that an update would clobber.
    #[error("'{0}' has local changes; commit or revert them before updating")]
    LocalChanges(PathBuf),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git(#[from] git2::Error),

    /// Generic I/O wrapper.
    #[error("version control I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VcsError {
    /// Whether the failure is expected to clear up on its own.
    ///
    /// Transient failures leave the session untouched and are retried on the
    /// next trigger.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotReady | Self::CommandFailed { .. } | Self::Io(_) | Self::Git(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Diff errors
// ---------------------------------------------------------------------------

/// Errors from computing differences.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The blocking diff task panicked or was cancelled.
    #[error("diff task failed: {0}")]
    Task(String),

    /// The live edit buffer could not be read.
    #[error("failed to read edit buffer: {0}")]
    Buffer(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// File watch errors
// ---------------------------------------------------------------------------

/// Errors from the file-system watch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create watcher: {0}")]
    Init(#[from] notify::Error),

    /// The watched file has no containing directory.
    #[error("'{0}' has no parent directory to watch")]
    NoParent(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = VcsError::NotUnderVersionControl(PathBuf::from("/tmp/a.rs"));
        assert_eq!(err.to_string(), "'/tmp/a.rs' is not under version control");

        let err = VcsError::CommandFailed {
            exit_code: 1,
            stderr: "E155007".into(),
        };
        assert!(err.to_string().contains("E155007"));

        let err = ConfigError::InvalidValue {
            field: "session.debounce_ms".into(),
            detail: "must be > 0".into(),
        };
        assert!(err.to_string().contains("session.debounce_ms"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = VcsError::NotReady.into();
        assert!(matches!(core_err, CoreError::Vcs(VcsError::NotReady)));

        let core_err: CoreError = DiffError::Task("cancelled".into()).into();
        assert!(matches!(core_err, CoreError::Diff(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(VcsError::NotReady.is_transient());
        assert!(!VcsError::XmlParseError("bad".into()).is_transient());
        assert!(!VcsError::NotUnderVersionControl(PathBuf::from("x")).is_transient());
        assert!(!VcsError::LocalChanges(PathBuf::from("x")).is_transient());
    }
}
