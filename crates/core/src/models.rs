//! Domain model types shared by the session, the backends and the binaries.
//!
//! Line numbers are 0-based and ranges are half-open (`[start, end)`)
//! throughout.

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Comments longer than this are cut before being shown on a single line.
pub const COMMENT_DISPLAY_LIMIT: usize = 2048;

/// Placeholder shown for a version that carries no comment.
pub const EMPTY_COMMENT: &str = "(no comment)";

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Opaque, backend-defined version identifier (an SVN revision, a git
/// commit id, ...). Only equality is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VersionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Descriptor of a remote revision. Never mutated once observed; a newer
/// version replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub id: VersionId,
    pub owner_account: String,
    pub owner_display_name: String,
    pub created_at: DateTime<Utc>,
    pub comment: String,
}

impl VersionInfo {
    /// The comment collapsed onto a single line, suitable for a popup or a
    /// table cell.
    pub fn display_comment(&self) -> String {
        let trimmed = self.comment.trim();
        if trimmed.is_empty() {
            return EMPTY_COMMENT.to_string();
        }

        let limited: String = trimmed.chars().take(COMMENT_DISPLAY_LIMIT).collect();
        single_line_regex().replace_all(&limited, " ").into_owned()
    }
}

fn single_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\t\r\n]+|\s{2,})").expect("static regex is valid"))
}

// ---------------------------------------------------------------------------
// Line ranges and hunks
// ---------------------------------------------------------------------------

/// Half-open interval of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "line range start must not exceed end");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Overlap test on base-line coordinates.
    ///
    /// Two non-empty ranges intersect when `max(start) < min(end)`, so
    /// adjacent ranges do not. An empty range is a point between lines: it
    /// intersects a non-empty range only strictly inside it, and another
    /// empty range only at the same point.
    ///
    /// Boundary case: an insertion exactly at the first line of a change
    /// (`start == other.start`) or just past its last line
    /// (`start == other.end`) does not intersect. Such an insertion lands
    /// next to the remote edit, not inside it, and merges cleanly.
    pub fn intersects(&self, other: &LineRange) -> bool {
        match (self.is_empty(), other.is_empty()) {
            (false, false) => self.start.max(other.start) < self.end.min(other.end),
            (true, false) => other.start < self.start && self.start < other.end,
            (false, true) => self.start < other.start && other.start < self.end,
            (true, true) => self.start == other.start,
        }
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// What a hunk does to the left side to produce the right side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Delete,
    Replace,
    Equal,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Delete => write!(f, "delete"),
            Self::Replace => write!(f, "replace"),
            Self::Equal => write!(f, "equal"),
        }
    }
}

/// A contiguous line-range change between a left ("before") and a right
/// ("after") text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hunk {
    pub kind: ChangeKind,
    pub left: LineRange,
    pub right: LineRange,
}

impl Hunk {
    pub fn new(kind: ChangeKind, left: LineRange, right: LineRange) -> Self {
        Self { kind, left, right }
    }

    /// Build a hunk and infer its kind from which sides are empty.
    pub fn between(left: LineRange, right: LineRange) -> Self {
        let kind = match (left.is_empty(), right.is_empty()) {
            (true, false) => ChangeKind::Insert,
            (false, true) => ChangeKind::Delete,
            (false, false) => ChangeKind::Replace,
            (true, true) => ChangeKind::Equal,
        };
        Self { kind, left, right }
    }

    pub fn is_change(&self) -> bool {
        self.kind != ChangeKind::Equal
    }
}

/// Ordered hunks produced by diffing two texts, sorted by left range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceSet {
    hunks: Vec<Hunk>,
}

impl DifferenceSet {
    pub fn new(hunks: Vec<Hunk>) -> Self {
        Self { hunks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    /// Only the hunks that actually change something.
    pub fn changes(&self) -> impl Iterator<Item = &Hunk> {
        self.hunks.iter().filter(|h| h.is_change())
    }

    pub fn len(&self) -> usize {
        self.hunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }
}

impl FromIterator<Hunk> for DifferenceSet {
    fn from_iter<I: IntoIterator<Item = Hunk>>(iter: I) -> Self {
        Self {
            hunks: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Which version a snapshot was taken at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotVersion {
    /// The locally synced version; only its id is known.
    Local(VersionId),
    /// A remote version with full metadata.
    Remote(VersionInfo),
}

impl SnapshotVersion {
    pub fn id(&self) -> &VersionId {
        match self {
            Self::Local(id) => id,
            Self::Remote(info) => &info.id,
        }
    }
}

/// File content at a known version.
#[derive(Debug, Clone)]
pub struct ContentSnapshot {
    pub version: SnapshotVersion,
    pub text: Arc<str>,
}

impl ContentSnapshot {
    pub fn local(id: VersionId, text: impl Into<Arc<str>>) -> Self {
        Self {
            version: SnapshotVersion::Local(id),
            text: text.into(),
        }
    }

    pub fn remote(info: VersionInfo, text: impl Into<Arc<str>>) -> Self {
        Self {
            version: SnapshotVersion::Remote(info),
            text: text.into(),
        }
    }

    pub fn id(&self) -> &VersionId {
        self.version.id()
    }

    pub fn version_info(&self) -> Option<&VersionInfo> {
        match &self.version {
            SnapshotVersion::Remote(info) => Some(info),
            SnapshotVersion::Local(_) => None,
        }
    }
}
