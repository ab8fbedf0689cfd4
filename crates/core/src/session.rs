//! Per-file conflict session.
//!
//! A [`ConflictSession`] owns the base snapshot (the locally synced version),
//! the latest snapshot (the most recent remote version) and the two
//! difference sets derived from them. Every trigger funnels into
//! [`ConflictSession::recalculate`], which runs at most one pass at a time.
//!
//! A pass:
//!
//! 1. refreshes the base and/or latest snapshot if the trigger asks for it or
//!    the snapshot is missing,
//! 2. re-diffs base against latest when either snapshot moved,
//! 3. diffs base against the live edit buffer and intersects the two,
//! 4. replaces the stored conflict set and notifies subscribers, but only
//!    when the result differs materially from the previous one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::buffer::EditBuffer;
use crate::config::SessionSettings;
use crate::conflict::{ConflictDetector, ConflictInfo};
use crate::errors::{CoreError, VcsError, WatchError};
use crate::fetcher::ContentFetcher;
use crate::models::{ContentSnapshot, DifferenceSet, VersionInfo};
use crate::services::Services;
use crate::watch::FileWatch;

/// Capacity of each session's notification channel. Slow subscribers that
/// fall further behind observe `RecvError::Lagged` and skip to the newest
/// event.
const EVENT_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What a recalculation should re-check even if it is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fetch only what is missing.
    None,
    /// Re-check the locally synced version (save, external sync).
    ForceBase,
    /// Re-check the remote latest version (periodic poll).
    ForceLatest,
}

/// Outcome of one call to [`ConflictSession::recalculate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recalculation {
    /// The file is not under version control; nothing was done.
    NotTracked,
    /// The backend was not ready or a fetch failed. State is unchanged and
    /// the next trigger retries.
    Deferred,
    /// The pass ran and the conflict set did not change materially.
    Unchanged,
    /// The conflict set was replaced and subscribers were notified.
    Changed,
}

/// Notification sent to subscribers when the conflict set changes.
#[derive(Debug, Clone)]
pub struct ConflictDataChanged {
    pub path: PathBuf,
    pub conflicts: Arc<[ConflictInfo]>,
    pub latest_version: Option<VersionInfo>,
}

/// Counters describing a session's activity so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Recalculation passes that acquired the session lock.
    pub passes: u64,
    /// Change notifications sent.
    pub notifications: u64,
    /// Highest number of passes ever running at once. Stays at 1.
    pub max_concurrent_passes: usize,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SessionState {
    base: Option<ContentSnapshot>,
    latest: Option<ContentSnapshot>,
    latest_vs_base: Option<Arc<DifferenceSet>>,
    edits_vs_base: Option<DifferenceSet>,
    /// A snapshot moved since `latest_vs_base` was last computed.
    latest_vs_base_stale: bool,
    /// A snapshot moved since subscribers were last notified.
    unannounced_version_change: bool,
}

#[derive(Default)]
struct Counters {
    passes: AtomicU64,
    notifications: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Marks one pass as running for the lifetime of the guard.
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        counters.passes.fetch_add(1, Ordering::SeqCst);
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Live conflict tracking for one open file.
pub struct ConflictSession {
    path: PathBuf,
    buffer: Arc<dyn EditBuffer>,
    fetcher: ContentFetcher,
    services: Services,

    /// Serializes recalculation passes.
    state: tokio::sync::Mutex<SessionState>,
    /// Held while the first calculation runs on behalf of `get_conflicts`.
    first_calculation: tokio::sync::Mutex<()>,
    /// `None` until the first pass completes, never reset afterwards.
    conflicts: RwLock<Option<Arc<[ConflictInfo]>>>,
    latest_version: RwLock<Option<VersionInfo>>,
    events: broadcast::Sender<ConflictDataChanged>,

    debounce: Duration,
    debounce_active: AtomicBool,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
    watch: Mutex<Option<FileWatch>>,
    closed: AtomicBool,
    counters: Counters,
}

impl ConflictSession {
    pub fn new(
        path: impl Into<PathBuf>,
        buffer: Arc<dyn EditBuffer>,
        services: Services,
        settings: &SessionSettings,
    ) -> Arc<Self> {
        let path = path.into();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        debug!(path = %path.display(), "creating conflict session");
        Arc::new(Self {
            path,
            buffer,
            fetcher: ContentFetcher::new(Arc::clone(&services.vcs)),
            services,
            state: tokio::sync::Mutex::new(SessionState::default()),
            first_calculation: tokio::sync::Mutex::new(()),
            conflicts: RwLock::new(None),
            latest_version: RwLock::new(None),
            events,
            debounce: settings.debounce,
            debounce_active: AtomicBool::new(false),
            debounce_task: Mutex::new(None),
            watch: Mutex::new(None),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribe to conflict change notifications. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConflictDataChanged> {
        self.events.subscribe()
    }

    /// The most recent remote version observed, if any.
    pub fn latest_version(&self) -> Option<VersionInfo> {
        self.latest_version
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The stored conflict set without waiting; `None` before the first
    /// calculation.
    pub fn current_conflicts(&self) -> Option<Arc<[ConflictInfo]>> {
        self.conflicts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_calculated(&self) -> bool {
        self.current_conflicts().is_some()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            passes: self.counters.passes.load(Ordering::SeqCst),
            notifications: self.counters.notifications.load(Ordering::SeqCst),
            max_concurrent_passes: self.counters.max_in_flight.load(Ordering::SeqCst),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The current conflict set, running the first calculation if none has
    /// happened yet. Once a result exists this never waits.
    pub async fn get_conflicts(&self) -> Arc<[ConflictInfo]> {
        if let Some(conflicts) = self.current_conflicts() {
            return conflicts;
        }

        let _first = self.first_calculation.lock().await;
        if let Some(conflicts) = self.current_conflicts() {
            return conflicts;
        }
        self.recalculate(Trigger::None).await;
        self.current_conflicts().unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Run one recalculation pass. Never fails: errors are logged and
    /// reported as [`Recalculation::Deferred`].
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn recalculate(&self, trigger: Trigger) -> Recalculation {
        if !self.fetcher.is_tracked(&self.path).await {
            debug!("file is not under version control");
            return Recalculation::NotTracked;
        }

        let mut state = self.state.lock().await;
        let _in_flight = InFlight::enter(&self.counters);

        match self.run_pass(&mut state, trigger).await {
            Ok(outcome) => {
                trace!(?outcome, "recalculation finished");
                outcome
            }
            Err(CoreError::Vcs(VcsError::NotReady)) => {
                debug!("version control backend not ready, deferring");
                Recalculation::Deferred
            }
            Err(e) => {
                let transient = matches!(&e, CoreError::Vcs(v) if v.is_transient());
                warn!(error = %e, transient, "recalculation failed, keeping previous state");
                Recalculation::Deferred
            }
        }
    }

    async fn run_pass(
        &self,
        state: &mut SessionState,
        trigger: Trigger,
    ) -> Result<Recalculation, CoreError> {
        if trigger == Trigger::ForceBase || state.base.is_none() {
            self.refresh_base(state).await?;
        }
        if trigger == Trigger::ForceLatest || state.latest.is_none() {
            self.refresh_latest(state).await?;
        }

        if state.latest_vs_base_stale {
            state.latest_vs_base = match (&state.base, &state.latest) {
                (Some(base), Some(latest)) if base.id() != latest.id() => {
                    let set = self
                        .services
                        .diff
                        .compute(
                            &self.buffer.content_type(),
                            Arc::clone(&base.text),
                            Arc::clone(&latest.text),
                        )
                        .await?;
                    Some(Arc::new(set))
                }
                _ => None,
            };
            state.latest_vs_base_stale = false;
        }

        let conflicts = match eligible_inputs(state) {
            Some((base_text, latest_vs_base)) => {
                let edits = self
                    .services
                    .diff
                    .compute_against_buffer(base_text, Arc::clone(&self.buffer))
                    .await?;
                let conflicts = ConflictDetector::intersect(&edits, &latest_vs_base);
                state.edits_vs_base = Some(edits);
                conflicts
            }
            None => {
                state.edits_vs_base = None;
                Vec::new()
            }
        };

        let previous = self.current_conflicts();
        if !ConflictDetector::has_changed(
            previous.as_deref(),
            &conflicts,
            state.unannounced_version_change,
        ) {
            return Ok(Recalculation::Unchanged);
        }

        state.unannounced_version_change = false;
        let latest_version = state.latest.as_ref().and_then(|s| s.version_info()).cloned();
        self.publish(conflicts.into(), latest_version);
        Ok(Recalculation::Changed)
    }

    async fn refresh_base(&self, state: &mut SessionState) -> Result<(), CoreError> {
        let Some(id) = self.fetcher.local_version(&self.path).await? else {
            debug!("file has no local version yet");
            return Ok(());
        };
        if state.base.as_ref().is_some_and(|base| base.id() == &id) {
            return Ok(());
        }

        let text = self.fetcher.download(&self.path, &id).await?;
        info!(path = %self.path.display(), version = %id, "base snapshot updated");
        state.base = Some(ContentSnapshot::local(id, text));
        state.latest_vs_base_stale = true;
        state.unannounced_version_change = true;
        Ok(())
    }

    async fn refresh_latest(&self, state: &mut SessionState) -> Result<(), CoreError> {
        let Some(info) = self.fetcher.latest_version(&self.path).await? else {
            debug!("file has no remote version yet");
            return Ok(());
        };
        if state.latest.as_ref().is_some_and(|latest| latest.id() == &info.id) {
            return Ok(());
        }

        // Same id as the base means same content.
        let text: Arc<str> = match state.base {
            Some(ref base) if base.id() == &info.id => Arc::clone(&base.text),
            _ => self.fetcher.download(&self.path, &info.id).await?.into(),
        };
        info!(
            path = %self.path.display(),
            version = %info.id,
            owner = %info.owner_display_name,
            "latest snapshot updated"
        );
        *self
            .latest_version
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(info.clone());
        state.latest = Some(ContentSnapshot::remote(info, text));
        state.latest_vs_base_stale = true;
        state.unannounced_version_change = true;
        Ok(())
    }

    fn publish(&self, conflicts: Arc<[ConflictInfo]>, latest_version: Option<VersionInfo>) {
        *self.conflicts.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&conflicts));
        self.counters.notifications.fetch_add(1, Ordering::SeqCst);
        info!(
            path = %self.path.display(),
            conflicts = conflicts.len(),
            "conflict data changed"
        );
        // No receivers is fine.
        let _ = self.events.send(ConflictDataChanged {
            path: self.path.clone(),
            conflicts,
            latest_version,
        });
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Report an edit to the buffer.
    ///
    /// The first edit after an idle period recalculates immediately and opens
    /// a debounce window; edits inside the window are coalesced and return
    /// `None`. When the window closes one more pass picks up whatever changed
    /// in the meantime.
    pub async fn buffer_changed(self: &Arc<Self>) -> Option<Recalculation> {
        if self.is_closed() {
            return None;
        }
        if self
            .debounce_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("edit coalesced into active debounce window");
            return None;
        }

        self.arm_debounce();
        Some(self.recalculate(Trigger::None).await)
    }

    /// Fire-and-forget variant of [`buffer_changed`](Self::buffer_changed)
    /// for synchronous editor callbacks.
    pub fn notify_buffer_changed(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.buffer_changed().await;
        });
    }

    fn arm_debounce(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let window = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            session.debounce_active.store(false, Ordering::Release);
            if session.is_closed() {
                return;
            }
            trace!("debounce window elapsed");
            session.recalculate(Trigger::None).await;
        });

        let mut slot = self.debounce_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// The file on disk was saved, replaced or renamed onto.
    pub async fn file_changed(&self) -> Recalculation {
        self.recalculate(Trigger::ForceBase).await
    }

    /// Watch the file's directory and run [`file_changed`](Self::file_changed)
    /// whenever the file itself changes.
    pub fn start_watch(self: &Arc<Self>) -> Result<(), WatchError> {
        let watch = FileWatch::start(&self.path, Arc::downgrade(self))?;
        *self.watch.lock().unwrap_or_else(|e| e.into_inner()) = Some(watch);
        debug!(path = %self.path.display(), "file watch started");
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stop timers and the file watch. Passes already running complete.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self
            .debounce_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.watch.lock().unwrap_or_else(|e| e.into_inner()).take();
        debug!(path = %self.path.display(), "session closed");
    }
}

impl Drop for ConflictSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Base text and `latest_vs_base` when conflicts are possible: both
/// snapshots present and non-empty, at different versions.
fn eligible_inputs(state: &SessionState) -> Option<(Arc<str>, Arc<DifferenceSet>)> {
    let base = state.base.as_ref()?;
    let latest = state.latest.as_ref()?;
    if base.text.is_empty() || latest.text.is_empty() || base.id() == latest.id() {
        return None;
    }
    let latest_vs_base = state.latest_vs_base.as_ref()?;
    Some((Arc::clone(&base.text), Arc::clone(latest_vs_base)))
}
