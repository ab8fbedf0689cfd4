//! Compare the working file with its synced or latest version.

use std::path::Path;

use tracing::debug;

use crate::buffer::EditBuffer;
use crate::diff::unified_patch;
use crate::errors::{CoreError, DiffError};
use crate::fetcher::ContentFetcher;
use crate::models::{VersionId, VersionInfo};

/// Which version the working file is compared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareWith {
    /// The most recent remote version.
    Latest,
    /// The version the working copy was last synced to.
    Workspace,
}

/// Result of [`compare`].
#[derive(Debug, Clone)]
pub struct Comparison {
    pub version: VersionId,
    /// Set when comparing with the latest version.
    pub version_info: Option<VersionInfo>,
    /// Unified patch from `version` to the working file; empty when they
    /// match.
    pub patch: String,
}

impl Comparison {
    pub fn is_identical(&self) -> bool {
        self.patch.is_empty()
    }
}

/// Diff the edit buffer of `path` against the version picked by `with`.
/// `None` when that version does not exist yet.
pub async fn compare(
    fetcher: &ContentFetcher,
    path: &Path,
    buffer: &dyn EditBuffer,
    with: CompareWith,
) -> Result<Option<Comparison>, CoreError> {
    let (version, version_info) = match with {
        CompareWith::Latest => match fetcher.latest_version(path).await? {
            Some(info) => (info.id.clone(), Some(info)),
            None => return Ok(None),
        },
        CompareWith::Workspace => match fetcher.local_version(path).await? {
            Some(id) => (id, None),
            None => return Ok(None),
        },
    };

    let old = fetcher.download(path, &version).await?;
    let current = buffer.text().map_err(DiffError::Buffer)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let patch = unified_patch(
        &format!("{name}@{version}"),
        &format!("{name} (working copy)"),
        &old,
        &current,
    );
    debug!(path = %path.display(), version = %version, identical = patch.is_empty(), "compared");

    Ok(Some(Comparison {
        version,
        version_info,
        patch,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::buffer::MemoryBuffer;
    use crate::errors::VcsError;
    use crate::vcs::VersionControl;

    /// Base at "1", latest at "2" unless `published` is false.
    struct TwoVersions {
        published: bool,
    }

    #[async_trait]
    impl VersionControl for TwoVersions {
        async fn is_under_version_control(&self, _path: &Path) -> bool {
            true
        }
        async fn local_version(&self, _path: &Path) -> Result<Option<VersionId>, VcsError> {
            Ok(Some(VersionId::new("1")))
        }
        async fn latest_version(&self, _path: &Path) -> Result<Option<VersionInfo>, VcsError> {
            Ok(self.published.then(|| VersionInfo {
                id: VersionId::new("2"),
                owner_account: "bob".into(),
                owner_display_name: "Bob".into(),
                created_at: Utc::now(),
                comment: "rework b".into(),
            }))
        }
        async fn download_at_version(
            &self,
            _path: &Path,
            version: &VersionId,
            dest: &Path,
        ) -> Result<(), VcsError> {
            let text = match version.as_str() {
                "1" => "a\nb\nc\n",
                _ => "a\nY\nc\n",
            };
            std::fs::write(dest, text)?;
            Ok(())
        }
        async fn has_pending_changes(&self, _path: &Path) -> Result<bool, VcsError> {
            Ok(true)
        }
        async fn get_latest(&self, _path: &Path) -> Result<(), VcsError> {
            Ok(())
        }
    }

    fn fetcher(published: bool) -> ContentFetcher {
        ContentFetcher::new(Arc::new(TwoVersions { published }))
    }

    #[tokio::test]
    async fn test_compare_with_latest() {
        let buffer = MemoryBuffer::new("a\nb\nc\nd\n", "txt");
        let cmp = compare(&fetcher(true), Path::new("/wc/notes.txt"), &buffer, CompareWith::Latest)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cmp.version, VersionId::new("2"));
        assert_eq!(cmp.version_info.unwrap().owner_display_name, "Bob");
        assert!(cmp.patch.starts_with("--- notes.txt@2\n+++ notes.txt (working copy)\n"));
        assert!(cmp.patch.contains("-Y\n"));
        assert!(cmp.patch.contains("+b\n"));
        assert!(cmp.patch.contains("+d\n"));
    }

    #[tokio::test]
    async fn test_compare_with_workspace() {
        let buffer = MemoryBuffer::new("a\nb\nc\nd\n", "txt");
        let cmp = compare(&fetcher(true), Path::new("/wc/notes.txt"), &buffer, CompareWith::Workspace)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cmp.version, VersionId::new("1"));
        assert!(cmp.version_info.is_none());
        assert!(!cmp.patch.contains("-b\n"));
        assert!(cmp.patch.contains("+d\n"));
    }

    #[tokio::test]
    async fn test_identical_and_missing() {
        let buffer = MemoryBuffer::new("a\nb\nc\n", "txt");
        let cmp = compare(&fetcher(false), Path::new("/wc/notes.txt"), &buffer, CompareWith::Workspace)
            .await
            .unwrap()
            .unwrap();
        assert!(cmp.is_identical());

        let none = compare(&fetcher(false), Path::new("/wc/notes.txt"), &buffer, CompareWith::Latest)
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
