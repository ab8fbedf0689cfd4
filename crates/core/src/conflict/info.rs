//! A single local-vs-remote conflict.

use serde::{Deserialize, Serialize};

use crate::models::{Hunk, LineRange};

/// One local edit paired with one remote change that touches the same base
/// lines.
///
/// Invariant: `local.left` intersects `remote.left`; both are base-line
/// coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Hunk from the edit buffer compared to base.
    pub local: Hunk,
    /// Hunk from the remote latest version compared to base.
    pub remote: Hunk,
}

impl ConflictInfo {
    pub fn new(local: Hunk, remote: Hunk) -> Self {
        debug_assert!(local.left.intersects(&remote.left));
        Self { local, remote }
    }

    /// Lines of the current edit buffer covered by the local edit.
    pub fn buffer_range(&self) -> LineRange {
        self.local.right
    }

    /// Lines of the base version shared by both sides.
    pub fn base_range(&self) -> LineRange {
        let start = self.local.left.start.min(self.remote.left.start);
        let end = self.local.left.end.max(self.remote.left.end);
        LineRange::new(start, end)
    }

    /// Whether the edit-buffer side of this conflict touches `region`.
    ///
    /// Closed-interval test, so a conflict sitting on the first or last line
    /// of a region (or a pure deletion at its edge) still counts.
    pub fn intersects_with(&self, region: &LineRange) -> bool {
        let range = self.buffer_range();
        range.start <= region.end && region.start <= range.end
    }
}

/// Conflicts whose edit-buffer side touches `region`, in order.
pub fn conflicts_in_region<'a>(
    conflicts: &'a [ConflictInfo],
    region: &LineRange,
) -> Vec<&'a ConflictInfo> {
    conflicts
        .iter()
        .filter(|c| c.intersects_with(region))
        .collect()
}
