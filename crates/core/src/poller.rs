//! Low-frequency timer that re-checks the focused file's remote version.
//!
//! Edits and saves only ever refresh the base snapshot; without this poll a
//! commit by someone else would go unnoticed until the next forced check.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::registry::SessionRegistry;
use crate::session::{Recalculation, Trigger};

pub struct RemotePoller {
    registry: Arc<SessionRegistry>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl RemotePoller {
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration, shutdown: Arc<Notify>) -> Self {
        Self {
            registry,
            interval,
            shutdown,
        }
    }

    /// Poll until `shutdown` is notified. Signal it with `notify_one` so a
    /// request that arrives mid-poll is still seen afterwards.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "remote poller started");

        let mut ticker = time::interval(self.interval);
        // A slow poll delays the schedule instead of causing a burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; sessions run their own first pass.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_focused().await;
                }
                _ = self.shutdown.notified() => {
                    info!("remote poller shutting down");
                    break;
                }
            }
        }
    }

    /// Re-check the latest version of the focused file, if any.
    pub async fn poll_focused(&self) -> Option<Recalculation> {
        let Some(session) = self.registry.focused_session() else {
            debug!("no focused session to poll");
            return None;
        };
        debug!(path = %session.path().display(), "polling remote version");
        Some(session.recalculate(Trigger::ForceLatest).await)
    }
}
