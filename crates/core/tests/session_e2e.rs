//! End-to-end tests for conflict sessions.
//!
//! These drive real `ConflictSession`s, the registry and the remote poller
//! against a scripted in-memory version-control backend, so every scenario
//! is deterministic and needs neither svn nor a network.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use conflictlens_core::config::SessionSettings;
use conflictlens_core::errors::VcsError;
use conflictlens_core::models::{LineRange, VersionId, VersionInfo};
use conflictlens_core::{
    conflicts_in_region, ConflictSession, DiskBuffer, MemoryBuffer, Recalculation, RemotePoller,
    ServiceSlot, Services, SessionRegistry, Trigger, VersionControl,
};

// ===========================================================================
// Scripted backend
// ===========================================================================

#[derive(Default)]
struct Script {
    tracked: bool,
    local: Option<VersionId>,
    latest: Option<VersionInfo>,
    contents: Vec<(VersionId, String)>,
    fail_downloads: bool,
    fail_latest_lookup: bool,
    lookup_delay: Option<Duration>,
    downloads: usize,
}

/// Backend for a single file whose versions are set by the test.
#[derive(Default)]
struct ScriptedVcs {
    script: Mutex<Script>,
}

impl ScriptedVcs {
    /// Tracked file synced to `base_id`, with `latest_id` on the remote.
    fn new(base_id: &str, base: &str, latest_id: &str, latest: &str) -> Arc<Self> {
        let vcs = Self::default();
        {
            let mut s = vcs.script.lock().unwrap();
            s.tracked = true;
            s.local = Some(VersionId::new(base_id));
            s.contents.push((VersionId::new(base_id), base.to_string()));
        }
        vcs.publish(latest_id, latest);
        Arc::new(vcs)
    }

    fn publish(&self, id: &str, text: &str) {
        let mut s = self.script.lock().unwrap();
        s.latest = Some(version(id));
        s.contents.push((VersionId::new(id), text.to_string()));
    }

    fn sync_local(&self, id: &str) {
        self.script.lock().unwrap().local = Some(VersionId::new(id));
    }

    fn set_fail_downloads(&self, fail: bool) {
        self.script.lock().unwrap().fail_downloads = fail;
    }

    fn set_fail_latest_lookup(&self, fail: bool) {
        self.script.lock().unwrap().fail_latest_lookup = fail;
    }

    fn withdraw_latest(&self) {
        self.script.lock().unwrap().latest = None;
    }

    fn set_lookup_delay(&self, delay: Duration) {
        self.script.lock().unwrap().lookup_delay = Some(delay);
    }

    fn set_tracked(&self, tracked: bool) {
        self.script.lock().unwrap().tracked = tracked;
    }

    fn downloads(&self) -> usize {
        self.script.lock().unwrap().downloads
    }

    async fn delay(&self) {
        let delay = self.script.lock().unwrap().lookup_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl VersionControl for ScriptedVcs {
    async fn is_under_version_control(&self, _path: &Path) -> bool {
        self.script.lock().unwrap().tracked
    }

    async fn local_version(&self, _path: &Path) -> Result<Option<VersionId>, VcsError> {
        self.delay().await;
        Ok(self.script.lock().unwrap().local.clone())
    }

    async fn latest_version(&self, _path: &Path) -> Result<Option<VersionInfo>, VcsError> {
        self.delay().await;
        let s = self.script.lock().unwrap();
        if s.fail_latest_lookup {
            return Err(VcsError::CommandFailed {
                exit_code: 1,
                stderr: "server unavailable".into(),
            });
        }
        Ok(s.latest.clone())
    }

    async fn download_at_version(
        &self,
        path: &Path,
        version: &VersionId,
        dest: &Path,
    ) -> Result<(), VcsError> {
        let text = {
            let mut s = self.script.lock().unwrap();
            if s.fail_downloads {
                return Err(VcsError::CommandFailed {
                    exit_code: 1,
                    stderr: "connection reset".into(),
                });
            }
            s.downloads += 1;
            s.contents
                .iter()
                .rev()
                .find(|(id, _)| id == version)
                .map(|(_, text)| text.clone())
                .ok_or_else(|| VcsError::VersionNotFound {
                    path: path.to_path_buf(),
                    version: version.to_string(),
                })?
        };
        tokio::fs::write(dest, text).await?;
        Ok(())
    }

    async fn has_pending_changes(&self, _path: &Path) -> Result<bool, VcsError> {
        Ok(false)
    }

    async fn get_latest(&self, _path: &Path) -> Result<(), VcsError> {
        Ok(())
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

fn version(id: &str) -> VersionInfo {
    VersionInfo {
        id: VersionId::new(id),
        owner_account: "bob".into(),
        owner_display_name: "Bob".into(),
        created_at: Utc::now(),
        comment: format!("commit {id}"),
    }
}

fn settings() -> SessionSettings {
    SessionSettings {
        debounce: Duration::from_millis(500),
        poll_interval: Duration::from_secs(120),
        watch_files: false,
    }
}

fn session(vcs: Arc<ScriptedVcs>, buffer: Arc<MemoryBuffer>) -> Arc<ConflictSession> {
    ConflictSession::new(
        "/wc/notes.txt",
        buffer,
        Services::with_line_differ(vcs),
        &settings(),
    )
}

fn buffer(text: &str) -> Arc<MemoryBuffer> {
    Arc::new(MemoryBuffer::new(text, "txt"))
}

// ===========================================================================
// Conflict derivation
// ===========================================================================

#[tokio::test]
async fn test_non_overlapping_then_overlapping_edit() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nb\nY\n");
    let buf = buffer("a\nX\nc\n");
    let session = session(Arc::clone(&vcs), buf);
    let mut rx = session.subscribe();

    // local edit on line 1, remote edit on line 2
    assert_eq!(session.recalculate(Trigger::None).await, Recalculation::Changed);
    assert!(session.get_conflicts().await.is_empty());
    let first = rx.try_recv().unwrap();
    assert!(first.conflicts.is_empty());

    // the remote now also edits line 1
    vcs.publish("3", "a\nY\nc\n");
    assert_eq!(
        session.recalculate(Trigger::ForceLatest).await,
        Recalculation::Changed
    );

    let conflicts = session.get_conflicts().await;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].local.left, LineRange::new(1, 2));
    assert_eq!(conflicts[0].remote.left, LineRange::new(1, 2));
    assert_eq!(conflicts[0].buffer_range(), LineRange::new(1, 2));

    let event = rx.try_recv().unwrap();
    assert_eq!(event.path, PathBuf::from("/wc/notes.txt"));
    assert_eq!(event.conflicts.len(), 1);
    assert_eq!(
        event.latest_version.map(|v| v.id),
        Some(VersionId::new("3"))
    );
    assert_eq!(session.latest_version().unwrap().comment, "commit 3");
}

#[tokio::test]
async fn test_no_conflicts_when_synced() {
    let vcs = ScriptedVcs::new("7", "a\nb\nc\n", "7", "a\nb\nc\n");
    let session = session(Arc::clone(&vcs), buffer("a\nX\nX\n"));

    assert!(session.get_conflicts().await.is_empty());
    // latest shares the base's content, so only one download
    assert_eq!(vcs.downloads(), 1);
}

#[tokio::test]
async fn test_recalculation_is_idempotent() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nY\nc\n");
    let session = session(vcs, buffer("a\nX\nc\n"));
    let mut rx = session.subscribe();

    assert_eq!(session.recalculate(Trigger::None).await, Recalculation::Changed);
    let first = session.get_conflicts().await;
    assert_eq!(session.recalculate(Trigger::None).await, Recalculation::Unchanged);
    let second = session.get_conflicts().await;

    assert_eq!(&*first, &*second);
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
    assert_eq!(session.stats().notifications, 1);
}

#[tokio::test]
async fn test_edit_away_from_conflict_clears_it() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\nd\n", "2", "a\nY\nc\nd\n");
    let buf = buffer("a\nX\nc\nd\n");
    let session = session(vcs, Arc::clone(&buf));

    assert_eq!(session.get_conflicts().await.len(), 1);

    buf.set_text("a\nb\nc\nZ\n");
    assert_eq!(session.recalculate(Trigger::None).await, Recalculation::Changed);
    assert!(session.get_conflicts().await.is_empty());
}

#[tokio::test]
async fn test_region_query() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\nd\ne\n", "2", "A\nb\nc\nd\nE\n");
    let session = session(vcs, buffer("X\nb\nc\nd\nZ\n"));

    let conflicts = session.get_conflicts().await;
    assert_eq!(conflicts.len(), 2);
    let hits = conflicts_in_region(&conflicts, &LineRange::new(3, 4));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].buffer_range(), LineRange::new(4, 5));
}

// ===========================================================================
// Failure handling
// ===========================================================================

#[tokio::test]
async fn test_untracked_file_is_a_no_op() {
    let vcs = ScriptedVcs::new("1", "a\n", "2", "b\n");
    vcs.set_tracked(false);
    let session = session(Arc::clone(&vcs), buffer("c\n"));

    assert_eq!(
        session.recalculate(Trigger::ForceBase).await,
        Recalculation::NotTracked
    );
    assert!(session.get_conflicts().await.is_empty());
    assert!(!session.is_calculated());
    assert_eq!(session.stats().passes, 0);

    // added to version control while open
    vcs.set_tracked(true);
    assert_eq!(session.recalculate(Trigger::None).await, Recalculation::Changed);
    assert_eq!(session.get_conflicts().await.len(), 1);
}

#[tokio::test]
async fn test_failed_download_keeps_previous_state() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nY\nc\n");
    let session = session(Arc::clone(&vcs), buffer("a\nX\nc\n"));
    assert_eq!(session.get_conflicts().await.len(), 1);

    vcs.publish("3", "a\nb\nc\n");
    vcs.set_fail_downloads(true);
    assert_eq!(
        session.recalculate(Trigger::ForceLatest).await,
        Recalculation::Deferred
    );
    assert_eq!(session.get_conflicts().await.len(), 1);
    assert_eq!(session.latest_version().unwrap().id, VersionId::new("2"));

    vcs.set_fail_downloads(false);
    assert_eq!(
        session.recalculate(Trigger::ForceLatest).await,
        Recalculation::Changed
    );
    assert!(session.get_conflicts().await.is_empty());
    assert_eq!(session.latest_version().unwrap().id, VersionId::new("3"));
}

#[tokio::test]
async fn test_version_change_after_partial_failure_is_announced() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nb\nY\n");
    vcs.withdraw_latest();
    let session = session(Arc::clone(&vcs), buffer("a\nb\nc\n"));
    let mut rx = session.subscribe();
    assert!(session.get_conflicts().await.is_empty());
    assert!(rx.try_recv().is_ok());

    // the base moves, then the latest lookup fails in the same pass
    vcs.sync_local("2");
    vcs.set_fail_latest_lookup(true);
    assert_eq!(
        session.recalculate(Trigger::ForceBase).await,
        Recalculation::Deferred
    );
    assert!(rx.try_recv().is_err());

    // the next pass changes no version and no conflict, but the earlier base
    // move has not been announced yet
    vcs.set_fail_latest_lookup(false);
    assert_eq!(session.recalculate(Trigger::None).await, Recalculation::Changed);
    assert!(rx.try_recv().is_ok());
    assert_eq!(session.recalculate(Trigger::None).await, Recalculation::Unchanged);
}

#[tokio::test]
async fn test_backend_bound_after_session_opened() {
    let slot = Arc::new(ServiceSlot::new());
    let session = ConflictSession::new(
        "/wc/notes.txt",
        buffer("a\nX\nc\n"),
        Services::with_line_differ(Arc::clone(&slot) as Arc<dyn VersionControl>),
        &settings(),
    );

    assert_eq!(
        session.recalculate(Trigger::None).await,
        Recalculation::NotTracked
    );

    slot.bind(ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nY\nc\n"));
    assert_eq!(session.recalculate(Trigger::None).await, Recalculation::Changed);
    assert_eq!(session.get_conflicts().await.len(), 1);
}

// ===========================================================================
// Scheduling and concurrency
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_debounce_bounds_passes_per_burst() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nY\nc\n");
    let buf = buffer("a\nb\nc\n");
    let session = session(vcs, Arc::clone(&buf));
    let mut rx = session.subscribe();

    assert_eq!(session.buffer_changed().await, Some(Recalculation::Changed));
    assert!(rx.recv().await.unwrap().conflicts.is_empty());
    for i in 0..20 {
        buf.set_text(format!("a\nX{i}\nc\n"));
        assert_eq!(session.buffer_changed().await, None);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(session.stats().passes, 1);

    // the trailing pass picks up the last edit
    let event = rx.recv().await.unwrap();
    assert_eq!(event.conflicts.len(), 1);
    assert_eq!(session.stats().passes, 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.stats().passes, 2);

    // the first edit after idling recalculates immediately again
    buf.set_text("a\nb\nc\n");
    assert_eq!(session.buffer_changed().await, Some(Recalculation::Changed));
    assert_eq!(session.stats().passes, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_are_serialized() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nY\nc\n");
    vcs.set_lookup_delay(Duration::from_millis(20));
    let session = session(vcs, buffer("a\nX\nc\n"));

    let mut handles = Vec::new();
    for i in 0..8 {
        let session = Arc::clone(&session);
        let trigger = match i % 3 {
            0 => Trigger::None,
            1 => Trigger::ForceBase,
            _ => Trigger::ForceLatest,
        };
        handles.push(tokio::spawn(async move { session.recalculate(trigger).await }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = session.stats();
    assert_eq!(stats.passes, 8);
    assert_eq!(stats.max_concurrent_passes, 1);
    assert_eq!(stats.notifications, 1);
    assert_eq!(session.get_conflicts().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_readers_share_one_calculation() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nY\nc\n");
    vcs.set_lookup_delay(Duration::from_millis(50));
    let session = session(vcs, buffer("a\nX\nc\n"));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move { session.get_conflicts().await }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(session.stats().passes, 1);
    for result in &results {
        assert!(Arc::ptr_eq(result, &results[0]));
        assert_eq!(result.len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_poller_refreshes_focused_session() {
    let vcs = ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nb\nY\n");
    let registry = Arc::new(SessionRegistry::new(
        Services::with_line_differ(Arc::clone(&vcs) as Arc<dyn VersionControl>),
        settings(),
    ));
    let session = registry.open("/wc/notes.txt", buffer("a\nX\nc\n"));
    assert!(session.get_conflicts().await.is_empty());
    let mut rx = session.subscribe();

    let shutdown = Arc::new(Notify::new());
    let poller = RemotePoller::new(
        Arc::clone(&registry),
        Duration::from_secs(120),
        Arc::clone(&shutdown),
    );
    let handle = tokio::spawn(poller.run());

    // nothing is focused yet
    tokio::time::sleep(Duration::from_secs(130)).await;
    assert_eq!(session.stats().passes, 1);

    registry.set_focused(Some(Path::new("/wc/notes.txt")));
    vcs.publish("3", "a\nY\nc\n");
    let event = rx.recv().await.unwrap();
    assert_eq!(event.conflicts.len(), 1);
    assert_eq!(session.stats().passes, 2);

    shutdown.notify_one();
    handle.await.unwrap();
}

// ===========================================================================
// Registry
// ===========================================================================

#[tokio::test]
async fn test_registry_lifecycle() {
    let vcs = ScriptedVcs::new("1", "a\n", "1", "a\n");
    let registry = SessionRegistry::new(
        Services::with_line_differ(vcs as Arc<dyn VersionControl>),
        settings(),
    );
    assert!(registry.is_empty());

    let a = registry.open("/wc/a.txt", buffer("a\n"));
    let again = registry.open("/wc/a.txt", buffer("ignored\n"));
    assert!(Arc::ptr_eq(&a, &again));
    registry.open("/wc/b.txt", buffer("b\n"));
    assert_eq!(
        registry.paths(),
        vec![PathBuf::from("/wc/a.txt"), PathBuf::from("/wc/b.txt")]
    );

    registry.set_focused(Some(Path::new("/wc/a.txt")));
    assert!(Arc::ptr_eq(&registry.focused_session().unwrap(), &a));

    assert!(registry.close("/wc/a.txt"));
    assert!(!registry.close("/wc/a.txt"));
    assert!(a.is_closed());
    assert!(registry.focused_session().is_none());
    assert!(registry.get("/wc/a.txt").is_none());

    registry.shutdown();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_wait_for_session() {
    let vcs = ScriptedVcs::new("1", "a\n", "1", "a\n");
    let registry = Arc::new(SessionRegistry::new(
        Services::with_line_differ(vcs as Arc<dyn VersionControl>),
        settings(),
    ));

    let waiter = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .wait_for_session("/wc/late.txt", Duration::from_secs(5))
                .await
        })
    };
    tokio::task::yield_now().await;
    let opened = registry.open("/wc/late.txt", buffer("a\n"));

    let found = waiter.await.unwrap().expect("session should appear");
    assert!(Arc::ptr_eq(&found, &opened));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_session_times_out() {
    let vcs = ScriptedVcs::new("1", "a\n", "1", "a\n");
    let registry = SessionRegistry::new(
        Services::with_line_differ(vcs as Arc<dyn VersionControl>),
        settings(),
    );
    let found = registry
        .wait_for_session("/wc/never.txt", Duration::from_secs(1))
        .await;
    assert!(found.is_none());
}

// ===========================================================================
// File watch
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_save_triggers_base_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "a\nX\nc\n").unwrap();

    let vcs = ScriptedVcs::new("1", "a\nb\nc\n", "2", "a\nY\nc\n");
    let registry = SessionRegistry::new(
        Services::with_line_differ(Arc::clone(&vcs) as Arc<dyn VersionControl>),
        SessionSettings {
            watch_files: true,
            ..settings()
        },
    );
    let session = registry.open(&path, Arc::new(DiskBuffer::new(&path)));
    assert!(session.is_watching());
    assert_eq!(session.get_conflicts().await.len(), 1);
    let mut rx = session.subscribe();

    // an external sync brings the working copy to the latest version
    vcs.sync_local("2");
    std::fs::write(&path, "a\nY\nc\n").unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("watch should trigger a recalculation")
        .unwrap();
    assert!(event.conflicts.is_empty());
    registry.shutdown();
}
