//! Process-wide table of open sessions, keyed by file path.
//!
//! Construct one registry at host startup, [`open`](SessionRegistry::open)
//! a session when an editor buffer opens and [`close`](SessionRegistry::close)
//! it when the buffer closes. [`shutdown`](SessionRegistry::shutdown) closes
//! whatever is left.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::buffer::EditBuffer;
use crate::config::SessionSettings;
use crate::services::Services;
use crate::session::ConflictSession;

pub struct SessionRegistry {
    services: Services,
    settings: SessionSettings,
    sessions: RwLock<HashMap<PathBuf, Arc<ConflictSession>>>,
    focused: RwLock<Option<PathBuf>>,
    opened: Notify,
}

impl SessionRegistry {
    pub fn new(services: Services, settings: SessionSettings) -> Self {
        Self {
            services,
            settings,
            sessions: RwLock::new(HashMap::new()),
            focused: RwLock::new(None),
            opened: Notify::new(),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Session for `path`, created on first open. Opening a path that already
    /// has a session returns the existing one and ignores `buffer`.
    pub fn open(&self, path: impl AsRef<Path>, buffer: Arc<dyn EditBuffer>) -> Arc<ConflictSession> {
        let key = session_key(path.as_ref());
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = sessions.get(&key) {
            debug!(path = %key.display(), "session already open");
            return Arc::clone(existing);
        }

        let session = ConflictSession::new(key.clone(), buffer, self.services.clone(), &self.settings);
        if self.settings.watch_files {
            if let Err(e) = session.start_watch() {
                warn!(path = %key.display(), error = %e, "could not watch file, saves will not be detected");
            }
        }
        sessions.insert(key.clone(), Arc::clone(&session));
        drop(sessions);

        info!(path = %key.display(), "session opened");
        self.opened.notify_waiters();
        session
    }

    /// Close and forget the session for `path`. Returns whether one existed.
    pub fn close(&self, path: impl AsRef<Path>) -> bool {
        let key = session_key(path.as_ref());
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
        match removed {
            Some(session) => {
                session.close();
                let mut focused = self.focused.write().unwrap_or_else(|e| e.into_inner());
                if focused.as_deref() == Some(key.as_path()) {
                    *focused = None;
                }
                info!(path = %key.display(), "session closed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Arc<ConflictSession>> {
        let key = session_key(path.as_ref());
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }

    /// Wait up to `timeout` for a session for `path` to be opened.
    pub async fn wait_for_session(
        &self,
        path: impl AsRef<Path>,
        timeout: Duration,
    ) -> Option<Arc<ConflictSession>> {
        let path = path.as_ref();
        let wait = async {
            loop {
                // Register interest before checking so an open between the
                // check and the await is not missed.
                let notified = self.opened.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(session) = self.get(path) {
                    return session;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Record which file has focus in the host editor; `None` when no
    /// tracked file does.
    pub fn set_focused(&self, path: Option<&Path>) {
        let key = path.map(session_key);
        debug!(path = ?key, "focus changed");
        *self.focused.write().unwrap_or_else(|e| e.into_inner()) = key;
    }

    pub fn focused_session(&self) -> Option<Arc<ConflictSession>> {
        let focused = self
            .focused
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()?;
        self.get(focused)
    }

    /// Paths with an open session, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session.
    pub fn shutdown(&self) {
        let sessions: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, session) in &sessions {
            session.close();
        }
        *self.focused.write().unwrap_or_else(|e| e.into_inner()) = None;
        info!(count = sessions.len(), "all sessions closed");
    }
}

/// Registry key for `path`: canonical when the file exists, otherwise made
/// absolute against the current directory.
fn session_key(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
