//! Conflict detection logic.
//!
//! Given the edit buffer's hunks against base and the remote latest version's
//! hunks against the same base, the detector pairs every local hunk with every
//! remote hunk whose base-side ranges overlap.

use tracing::{debug, trace};

use super::info::ConflictInfo;
use crate::models::DifferenceSet;

/// Stateless conflict detector.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Full bipartite intersection of local and remote hunks.
    ///
    /// Equal hunks are ignored on both sides. Output order follows the local
    /// hunks' base order, then the remote hunks' base order, so two results
    /// can be compared positionally.
    pub fn intersect(edits_vs_base: &DifferenceSet, latest_vs_base: &DifferenceSet) -> Vec<ConflictInfo> {
        let remote: Vec<_> = latest_vs_base.changes().collect();
        let mut conflicts = Vec::new();

        for local in edits_vs_base.changes() {
            trace!(
                kind = %local.kind,
                left = %local.left,
                right = %local.right,
                "examining local hunk"
            );
            for remote_hunk in remote.iter().filter(|r| local.left.intersects(&r.left)) {
                conflicts.push(ConflictInfo::new(*local, **remote_hunk));
            }
        }

        debug!(
            local = edits_vs_base.len(),
            remote = latest_vs_base.len(),
            conflicts = conflicts.len(),
            "intersection complete"
        );
        conflicts
    }

    /// Whether `current` should replace `previous` and be announced.
    ///
    /// Changed when there was no previous set, the count differs, a snapshot
    /// version moved this cycle, or a local hunk differs at the same position.
    pub fn has_changed(
        previous: Option<&[ConflictInfo]>,
        current: &[ConflictInfo],
        versions_changed: bool,
    ) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        if previous.len() != current.len() || versions_changed {
            return true;
        }
        previous
            .iter()
            .zip(current)
            .any(|(old, new)| old.local != new.local)
    }
}
