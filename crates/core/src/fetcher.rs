//! Thin wrapper over the version-control collaborator that turns versions
//! into in-memory content.

use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::errors::VcsError;
use crate::models::{VersionId, VersionInfo};
use crate::vcs::VersionControl;

/// Resolves versions and downloads content for a single backend.
#[derive(Clone)]
pub struct ContentFetcher {
    vcs: Arc<dyn VersionControl>,
}

impl ContentFetcher {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self { vcs }
    }

    pub async fn is_tracked(&self, path: &Path) -> bool {
        self.vcs.is_under_version_control(path).await
    }

    pub async fn local_version(&self, path: &Path) -> Result<Option<VersionId>, VcsError> {
        self.vcs.local_version(path).await
    }

    pub async fn latest_version(&self, path: &Path) -> Result<Option<VersionInfo>, VcsError> {
        self.vcs.latest_version(path).await
    }

    /// Content of `path` at `version`.
    ///
    /// The backend writes into a temporary file which is removed as soon as
    /// its content has been read.
    #[instrument(skip(self), fields(path = %path.display(), version = %version))]
    pub async fn download(&self, path: &Path, version: &VersionId) -> Result<String, VcsError> {
        let temp = NamedTempFile::new()?;
        debug!(dest = %temp.path().display(), "downloading content");
        self.vcs
            .download_at_version(path, version, temp.path())
            .await?;
        let text = tokio::fs::read_to_string(temp.path()).await?;
        debug!(bytes = text.len(), "download complete");
        Ok(text)
    }
}
