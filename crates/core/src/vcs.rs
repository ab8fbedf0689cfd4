//! The version-control collaborator interface.
//!
//! Sessions only ever talk to a backend through [`VersionControl`]. Concrete
//! backends live in [`crate::svn`] and [`crate::git`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendConfig, BackendKind};
use crate::errors::VcsError;
use crate::git::GitBackend;
use crate::models::{VersionId, VersionInfo};
use crate::svn::SvnBackend;

/// Operations the conflict engine needs from a version-control system.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Whether `path` is tracked. Checked on every recalculation because
    /// control status can change while a file is open.
    async fn is_under_version_control(&self, path: &Path) -> bool;

    /// Version the working copy was last synced to; `None` when the file has
    /// no synced version yet.
    async fn local_version(&self, path: &Path) -> Result<Option<VersionId>, VcsError>;

    /// Most recent committed version, irrespective of the working copy.
    async fn latest_version(&self, path: &Path) -> Result<Option<VersionInfo>, VcsError>;

    /// Write the content of `path` at `version` to `dest`.
    async fn download_at_version(
        &self,
        path: &Path,
        version: &VersionId,
        dest: &Path,
    ) -> Result<(), VcsError>;

    /// Whether the working file differs from its synced version.
    async fn has_pending_changes(&self, path: &Path) -> Result<bool, VcsError>;

    /// Bring the working copy of `path` to the latest version.
    async fn get_latest(&self, path: &Path) -> Result<(), VcsError>;

    /// Metadata of one specific version of `path`, for navigating to it.
    /// `None` when the backend cannot describe it.
    async fn version_info(
        &self,
        _path: &Path,
        _version: &VersionId,
    ) -> Result<Option<VersionInfo>, VcsError> {
        Ok(None)
    }

    /// Contact address for a version owner, if the backend knows one.
    async fn owner_email(&self, _account: &str) -> Result<Option<String>, VcsError> {
        Ok(None)
    }
}

/// Build the backend selected by the configuration.
pub fn build_backend(config: &BackendConfig) -> Arc<dyn VersionControl> {
    match config.kind {
        BackendKind::Svn => Arc::new(SvnBackend::from_config(&config.svn)),
        BackendKind::Git => Arc::new(GitBackend::from_config(&config.git)),
    }
}
