//! [`VersionControl`] backend for files in a local Git repository via `git2`.
//!
//! The base version is the commit `HEAD` points at; the latest version is the
//! tip of the remote-tracking branch. `git2::Repository` is not `Sync`, so
//! every call opens the repository inside `spawn_blocking`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use git2::{Commit, Cred, FetchOptions, Oid, RemoteCallbacks, Repository, Status};
use tracing::{debug, info, instrument, warn};

use crate::config::GitConfig;
use crate::errors::VcsError;
use crate::models::{VersionId, VersionInfo};
use crate::vcs::VersionControl;

/// Backend for files inside a Git working tree.
#[derive(Debug, Clone)]
pub struct GitBackend {
    remote: String,
    branch: Option<String>,
    fetch_on_poll: bool,
    token: Option<String>,
}

impl GitBackend {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            branch: None,
            fetch_on_poll: false,
            token: None,
        }
    }

    pub fn from_config(config: &GitConfig) -> Self {
        let backend = Self {
            remote: config.remote.clone(),
            branch: config.branch.clone(),
            fetch_on_poll: config.fetch_on_poll,
            token: config.token.clone(),
        };
        info!(remote = %backend.remote, branch = ?backend.branch, "created GitBackend");
        backend
    }

    /// Track `branch` on the remote instead of the checked-out branch's
    /// upstream.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    fn fetch(&self, repo: &Repository) -> Result<(), git2::Error> {
        debug!(remote = %self.remote, "fetching");
        let mut remote = repo.find_remote(&self.remote)?;
        let mut callbacks = RemoteCallbacks::new();
        if let Some(ref tok) = self.token {
            let tok = tok.clone();
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("x-access-token", &tok)
            });
        }
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    /// Tip of the remote-tracking branch, or `None` when there is none.
    fn remote_tip<'r>(&self, repo: &'r Repository) -> Result<Option<Commit<'r>>, git2::Error> {
        let reference = match self.branch {
            Some(ref branch) => {
                let name = format!("refs/remotes/{}/{}", self.remote, branch);
                match repo.find_reference(&name) {
                    Ok(r) => r,
                    Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
                    Err(e) => return Err(e),
                }
            }
            None => {
                let head = repo.head()?;
                if !head.is_branch() {
                    return Ok(None);
                }
                match git2::Branch::wrap(head).upstream() {
                    Ok(upstream) => upstream.into_reference(),
                    Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
                    Err(e) => return Err(e),
                }
            }
        };
        Ok(Some(reference.peel_to_commit()?))
    }
}

/// An opened repository plus the file's path relative to its work tree.
struct Located {
    repo: Repository,
    relative: PathBuf,
}

fn locate(path: &Path) -> Result<Located, VcsError> {
    let not_tracked = || VcsError::NotUnderVersionControl(path.to_path_buf());
    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let parent = absolute.parent().ok_or_else(not_tracked)?;
    let repo = Repository::discover(parent).map_err(|_| not_tracked())?;
    let workdir = repo
        .workdir()
        .ok_or_else(not_tracked)?
        .canonicalize()?;
    let relative = absolute
        .strip_prefix(&workdir)
        .map_err(|_| not_tracked())?
        .to_path_buf();
    Ok(Located { repo, relative })
}

fn contains_file(commit: &Commit<'_>, relative: &Path) -> bool {
    commit
        .tree()
        .and_then(|tree| tree.get_path(relative))
        .is_ok()
}

/// `tip`, unless HEAD already contains it (unpushed local commits, or
/// nothing new upstream). The latest version is then HEAD itself, so it is
/// never older than the base.
fn newest_of<'r>(repo: &'r Repository, tip: Commit<'r>) -> Result<Commit<'r>, git2::Error> {
    let head = match repo.head() {
        Ok(head) => head.peel_to_commit()?,
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(tip),
        Err(e) => return Err(e),
    };
    if head.id() == tip.id() || repo.graph_descendant_of(head.id(), tip.id())? {
        debug!(head = %head.id(), tip = %tip.id(), "remote tip already contained in HEAD");
        return Ok(head);
    }
    Ok(tip)
}

fn commit_info(commit: &Commit<'_>) -> VersionInfo {
    let author = commit.author();
    let created_at = Utc
        .timestamp_opt(author.when().seconds(), 0)
        .single()
        .unwrap_or_default();
    VersionInfo {
        id: VersionId::new(commit.id().to_string()),
        owner_account: author.email().unwrap_or("").to_string(),
        owner_display_name: author.name().unwrap_or("").to_string(),
        created_at,
        comment: commit.message().unwrap_or("").to_string(),
    }
}

/// Status bits that count as uncommitted changes to a tracked file.
fn pending_flags() -> Status {
    Status::INDEX_NEW
        | Status::INDEX_MODIFIED
        | Status::INDEX_DELETED
        | Status::INDEX_RENAMED
        | Status::INDEX_TYPECHANGE
        | Status::WT_MODIFIED
        | Status::WT_DELETED
        | Status::WT_RENAMED
        | Status::WT_TYPECHANGE
        | Status::CONFLICTED
}

async fn blocking<T, F>(f: F) -> Result<T, VcsError>
where
    F: FnOnce() -> Result<T, VcsError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VcsError::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl VersionControl for GitBackend {
    async fn is_under_version_control(&self, path: &Path) -> bool {
        let path = path.to_path_buf();
        let result = blocking(move || {
            let located = locate(&path)?;
            if located.repo.index()?.get_path(&located.relative, 0).is_some() {
                return Ok(true);
            }
            let head = match located.repo.head() {
                Ok(head) => head.peel_to_commit()?,
                Err(_) => return Ok(false),
            };
            Ok(contains_file(&head, &located.relative))
        })
        .await;
        match result {
            Ok(tracked) => tracked,
            Err(e) => {
                debug!(error = %e, "not a git-tracked file");
                false
            }
        }
    }

    async fn local_version(&self, path: &Path) -> Result<Option<VersionId>, VcsError> {
        let path = path.to_path_buf();
        blocking(move || {
            let located = locate(&path)?;
            let head = match located.repo.head() {
                Ok(head) => head.peel_to_commit()?,
                // unborn branch
                Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            if !contains_file(&head, &located.relative) {
                return Ok(None);
            }
            Ok(Some(VersionId::new(head.id().to_string())))
        })
        .await
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn latest_version(&self, path: &Path) -> Result<Option<VersionInfo>, VcsError> {
        let backend = self.clone();
        let path = path.to_path_buf();
        blocking(move || {
            let located = locate(&path)?;
            if backend.fetch_on_poll {
                if let Err(e) = backend.fetch(&located.repo) {
                    warn!(error = %e, "fetch failed, using cached remote-tracking ref");
                }
            }
            let Some(tip) = backend.remote_tip(&located.repo)? else {
                debug!("no remote-tracking branch");
                return Ok(None);
            };
            let latest = newest_of(&located.repo, tip)?;
            if !contains_file(&latest, &located.relative) {
                return Ok(None);
            }
            Ok(Some(commit_info(&latest)))
        })
        .await
    }

    async fn download_at_version(
        &self,
        path: &Path,
        version: &VersionId,
        dest: &Path,
    ) -> Result<(), VcsError> {
        let path = path.to_path_buf();
        let version = version.clone();
        let dest = dest.to_path_buf();
        blocking(move || {
            let located = locate(&path)?;
            let not_found = || VcsError::VersionNotFound {
                path: path.clone(),
                version: version.to_string(),
            };
            let oid = Oid::from_str(version.as_str()).map_err(|_| not_found())?;
            let commit = located.repo.find_commit(oid).map_err(|_| not_found())?;
            let entry = commit
                .tree()?
                .get_path(&located.relative)
                .map_err(|_| not_found())?;
            let blob = entry.to_object(&located.repo)?.peel_to_blob()?;
            std::fs::write(&dest, blob.content())?;
            Ok(())
        })
        .await
    }

    async fn has_pending_changes(&self, path: &Path) -> Result<bool, VcsError> {
        let path = path.to_path_buf();
        blocking(move || {
            let located = locate(&path)?;
            let status = located.repo.status_file(&located.relative)?;
            Ok(status.intersects(pending_flags()))
        })
        .await
    }

    /// Fast-forward the checked-out branch to the remote tip. Refused while
    /// the file has uncommitted changes; anything other than a fast-forward
    /// is left for the user to merge.
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn get_latest(&self, path: &Path) -> Result<(), VcsError> {
        let backend = self.clone();
        let path = path.to_path_buf();
        blocking(move || {
            let located = locate(&path)?;
            let repo = &located.repo;
            if repo.status_file(&located.relative)?.intersects(pending_flags()) {
                return Err(VcsError::LocalChanges(path.clone()));
            }
            if let Err(e) = backend.fetch(repo) {
                warn!(error = %e, "fetch failed, updating from cached remote-tracking ref");
            }
            let tip = backend.remote_tip(repo)?.ok_or_else(|| {
                git2::Error::from_str("no remote-tracking branch to update from")
            })?;

            let annotated = repo.find_annotated_commit(tip.id())?;
            let (analysis, _) = repo.merge_analysis(&[&annotated])?;
            if analysis.is_up_to_date() {
                debug!("already up to date");
                return Ok(());
            }
            if !analysis.is_fast_forward() {
                return Err(git2::Error::from_str(
                    "local branch has diverged from the remote; merge manually",
                )
                .into());
            }

            // Update the work tree first; HEAD moves only once that worked.
            repo.checkout_tree(
                tip.as_object(),
                Some(git2::build::CheckoutBuilder::new().safe()),
            )?;
            let head = repo.head()?;
            if head.is_branch() {
                let head_name = head
                    .name()
                    .ok_or_else(|| git2::Error::from_str("HEAD is not a named branch"))?
                    .to_string();
                repo.find_reference(&head_name)?
                    .set_target(tip.id(), "conflictlens: fast-forward")?;
            } else {
                repo.set_head_detached(tip.id())?;
            }
            info!(sha = %tip.id(), "fast-forwarded to remote tip");
            Ok(())
        })
        .await
    }

    async fn version_info(
        &self,
        path: &Path,
        version: &VersionId,
    ) -> Result<Option<VersionInfo>, VcsError> {
        let path = path.to_path_buf();
        let version = version.clone();
        blocking(move || {
            let located = locate(&path)?;
            let Ok(oid) = Oid::from_str(version.as_str()) else {
                return Ok(None);
            };
            let result = match located.repo.find_commit(oid) {
                Ok(commit) => Ok(Some(commit_info(&commit))),
                Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            };
            result
        })
        .await
    }

    async fn owner_email(&self, account: &str) -> Result<Option<String>, VcsError> {
        Ok(account.contains('@').then(|| account.to_string()))
    }
}
