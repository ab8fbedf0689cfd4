//! Logs conflict notifications for one session.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, info, warn};

use conflictlens_core::{ConflictDataChanged, ConflictSession};

/// Run the session's first calculation, then log every change notification
/// until the session is dropped.
pub async fn run(session: Arc<ConflictSession>) {
    let rx = session.subscribe();
    let initial = session.get_conflicts().await;
    info!(
        path = %session.path().display(),
        conflicts = initial.len(),
        "initial conflict check complete"
    );
    // The session owns the sender; hold only the receiver from here on.
    drop(session);
    report(rx).await;
}

pub async fn report(mut rx: Receiver<ConflictDataChanged>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "conflict reporter fell behind, skipping to newest");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &ConflictDataChanged) {
    let path = event.path.display();
    match event.latest_version {
        Some(ref latest) => info!(
            path = %path,
            conflicts = event.conflicts.len(),
            version = %latest.id,
            owner = %latest.owner_display_name,
            comment = %latest.display_comment(),
            "conflict data changed"
        ),
        None => info!(
            path = %path,
            conflicts = event.conflicts.len(),
            "conflict data changed"
        ),
    }
    for conflict in event.conflicts.iter() {
        debug!(
            path = %path,
            buffer_lines = %conflict.buffer_range(),
            base_lines = %conflict.base_range(),
            local = %conflict.local.kind,
            remote = %conflict.remote.kind,
            "conflict"
        );
    }
}
