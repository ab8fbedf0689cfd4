//! Process-wide collaborator handles.
//!
//! The version-control backend may become available after sessions already
//! exist (for instance when the host loads its VCS integration lazily).
//! [`ServiceSlot`] stands in for it until then: every file reads as untracked
//! and every fetch as [`VcsError::NotReady`].

use std::path::Path;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::diff::{DiffEngine, LineDiffer, TextDiffer};
use crate::errors::VcsError;
use crate::models::{VersionId, VersionInfo};
use crate::vcs::VersionControl;

/// Lazily bound version-control backend.
#[derive(Default)]
pub struct ServiceSlot {
    backend: OnceLock<Arc<dyn VersionControl>>,
}

impl ServiceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the real backend. Only the first call has any effect; returns
    /// whether this call performed the binding.
    pub fn bind(&self, backend: Arc<dyn VersionControl>) -> bool {
        let bound = self.backend.set(backend).is_ok();
        if bound {
            info!("version control backend bound");
        } else {
            debug!("version control backend already bound, ignoring");
        }
        bound
    }

    pub fn is_ready(&self) -> bool {
        self.backend.get().is_some()
    }

    fn ready(&self) -> Result<&Arc<dyn VersionControl>, VcsError> {
        self.backend.get().ok_or(VcsError::NotReady)
    }
}

#[async_trait]
impl VersionControl for ServiceSlot {
    async fn is_under_version_control(&self, path: &Path) -> bool {
        match self.backend.get() {
            Some(backend) => backend.is_under_version_control(path).await,
            None => false,
        }
    }

    async fn local_version(&self, path: &Path) -> Result<Option<VersionId>, VcsError> {
        self.ready()?.local_version(path).await
    }

    async fn latest_version(&self, path: &Path) -> Result<Option<VersionInfo>, VcsError> {
        self.ready()?.latest_version(path).await
    }

    async fn download_at_version(
        &self,
        path: &Path,
        version: &VersionId,
        dest: &Path,
    ) -> Result<(), VcsError> {
        self.ready()?.download_at_version(path, version, dest).await
    }

    async fn has_pending_changes(&self, path: &Path) -> Result<bool, VcsError> {
        self.ready()?.has_pending_changes(path).await
    }

    async fn get_latest(&self, path: &Path) -> Result<(), VcsError> {
        self.ready()?.get_latest(path).await
    }

    async fn version_info(
        &self,
        path: &Path,
        version: &VersionId,
    ) -> Result<Option<VersionInfo>, VcsError> {
        self.ready()?.version_info(path, version).await
    }

    async fn owner_email(&self, account: &str) -> Result<Option<String>, VcsError> {
        self.ready()?.owner_email(account).await
    }
}

/// The collaborators every session shares.
#[derive(Clone)]
pub struct Services {
    pub vcs: Arc<dyn VersionControl>,
    pub diff: DiffEngine,
}

impl Services {
    pub fn new(vcs: Arc<dyn VersionControl>, differ: Arc<dyn TextDiffer>) -> Self {
        Self {
            vcs,
            diff: DiffEngine::new(differ),
        }
    }

    /// Services using the built-in line differ.
    pub fn with_line_differ(vcs: Arc<dyn VersionControl>) -> Self {
        Self::new(vcs, Arc::new(LineDiffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysTracked;

    #[async_trait]
    impl VersionControl for AlwaysTracked {
        async fn is_under_version_control(&self, _path: &Path) -> bool {
            true
        }
        async fn local_version(&self, _path: &Path) -> Result<Option<VersionId>, VcsError> {
            Ok(Some(VersionId::new("1")))
        }
        async fn latest_version(&self, _path: &Path) -> Result<Option<VersionInfo>, VcsError> {
            Ok(None)
        }
        async fn download_at_version(
            &self,
            _path: &Path,
            _version: &VersionId,
            _dest: &Path,
        ) -> Result<(), VcsError> {
            Ok(())
        }
        async fn has_pending_changes(&self, _path: &Path) -> Result<bool, VcsError> {
            Ok(false)
        }
        async fn get_latest(&self, _path: &Path) -> Result<(), VcsError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unbound_slot_is_not_ready() {
        let slot = ServiceSlot::new();
        assert!(!slot.is_ready());
        assert!(!slot.is_under_version_control(Path::new("a.rs")).await);
        assert!(matches!(
            slot.local_version(Path::new("a.rs")).await,
            Err(VcsError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_bind_is_idempotent() {
        let slot = ServiceSlot::new();
        assert!(slot.bind(Arc::new(AlwaysTracked)));
        assert!(!slot.bind(Arc::new(AlwaysTracked)));
        assert!(slot.is_ready());
        assert!(slot.is_under_version_control(Path::new("a.rs")).await);
        assert_eq!(
            slot.local_version(Path::new("a.rs")).await.unwrap(),
            Some(VersionId::new("1"))
        );
    }
}
