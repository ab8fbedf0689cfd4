//! File-system watch that re-checks the base snapshot on save.
//!
//! The containing directory is watched rather than the file itself: editors
//! and sync tools commonly replace a file by writing a temporary and renaming
//! it over the original, which a watch on the file's inode would miss.

use std::path::Path;
use std::sync::Weak;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::WatchError;
use crate::session::ConflictSession;

/// Active watch for one session. Dropping it stops the watch.
pub struct FileWatch {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl FileWatch {
    /// Start watching `path`. Must be called inside a tokio runtime.
    pub fn start(path: &Path, session: Weak<ConflictSession>) -> Result<Self, WatchError> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| WatchError::NoParent(path.to_path_buf()))?
            .to_path_buf();

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let target = path.to_path_buf();
        let dir = parent.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &dir, &target) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "file watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // one save usually produces several events
                while rx.try_recv().is_ok() {}
                let Some(session) = session.upgrade() else {
                    break;
                };
                debug!(path = %session.path().display(), "watched file changed");
                session.file_changed().await;
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for FileWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Whether `event` modifies, creates or renames onto `target`. The watch is
/// non-recursive, so every reported path is `dir` itself or a direct child.
fn touches(event: &Event, dir: &Path, target: &Path) -> bool {
    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.as_path() != dir && same_file_name(p, target))
}

#[cfg(windows)]
fn same_file_name(a: &Path, b: &Path) -> bool {
    match (a.file_name(), b.file_name()) {
        (Some(a), Some(b)) => a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy()),
        _ => false,
    }
}

#[cfg(not(windows))]
fn same_file_name(a: &Path, b: &Path) -> bool {
    a.file_name().is_some() && a.file_name() == b.file_name()
}
