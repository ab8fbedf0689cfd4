//! Line-level differencing.
//!
//! [`TextDiffer`] is the seam to the differencing backend; [`LineDiffer`] is
//! the built-in `diffy` implementation. [`DiffEngine`] runs a differ on the
//! blocking pool so callers never diff on their own task.

use std::sync::Arc;

use diffy::{DiffOptions, Line};
use tracing::debug;

use crate::buffer::EditBuffer;
use crate::errors::DiffError;
use crate::models::{DifferenceSet, Hunk, LineRange};

/// Turns two texts into an ordered set of line-range hunks.
pub trait TextDiffer: Send + Sync {
    fn diff(&self, content_type: &str, left: &str, right: &str) -> DifferenceSet;
}

/// `diffy`-backed line differ producing change hunks only (no context).
#[derive(Debug, Clone, Copy, Default)]
pub struct LineDiffer;

impl TextDiffer for LineDiffer {
    fn diff(&self, _content_type: &str, left: &str, right: &str) -> DifferenceSet {
        if left == right {
            return DifferenceSet::empty();
        }
        let left = terminate_last_line(left);
        let right = terminate_last_line(right);

        let mut options = DiffOptions::new();
        options.set_context_len(0);
        let patch = options.create_patch(&left, &right);

        let mut hunks = Vec::new();
        // Right-side position minus left-side position before the current hunk.
        let mut offset: isize = 0;

        for hunk in patch.hunks() {
            let old = hunk.old_range();
            let new = hunk.new_range();

            // Unified-diff start lines are 1-based, except for empty ranges.
            // Anchor on whichever side is non-empty and derive the other.
            let (mut l, mut r) = if old.len() > 0 {
                let l = old.start() - 1;
                (l, shift(l, offset))
            } else if new.len() > 0 {
                let r = new.start() - 1;
                (shift(r, -offset), r)
            } else {
                continue;
            };

            let mut run: Option<(usize, usize)> = None;
            for line in hunk.lines() {
                match line {
                    Line::Context(_) => {
                        flush(&mut run, l, r, &mut hunks);
                        l += 1;
                        r += 1;
                    }
                    Line::Delete(_) => {
                        run.get_or_insert((l, r));
                        l += 1;
                    }
                    Line::Insert(_) => {
                        run.get_or_insert((l, r));
                        r += 1;
                    }
                }
            }
            flush(&mut run, l, r, &mut hunks);

            offset += new.len() as isize - old.len() as isize;
        }

        DifferenceSet::new(hunks)
    }
}

fn flush(run: &mut Option<(usize, usize)>, l: usize, r: usize, hunks: &mut Vec<Hunk>) {
    if let Some((left_start, right_start)) = run.take() {
        hunks.push(Hunk::between(
            LineRange::new(left_start, l),
            LineRange::new(right_start, r),
        ));
    }
}

fn shift(pos: usize, by: isize) -> usize {
    (pos as isize + by).max(0) as usize
}

/// A missing final newline would otherwise make the last line differ.
fn terminate_last_line(text: &str) -> std::borrow::Cow<'_, str> {
    if text.is_empty() || text.ends_with('\n') {
        std::borrow::Cow::Borrowed(text)
    } else {
        std::borrow::Cow::Owned(format!("{text}\n"))
    }
}

/// Unified patch from `left` to `right` with `git diff`-style headers.
/// Empty when the texts have no line differences.
pub fn unified_patch(left_label: &str, right_label: &str, left: &str, right: &str) -> String {
    let rendered = diffy::create_patch(&terminate_last_line(left), &terminate_last_line(right))
        .to_string();
    match rendered.find("@@") {
        Some(start) => format!("--- {left_label}\n+++ {right_label}\n{}", &rendered[start..]),
        None => String::new(),
    }
}

/// Runs a [`TextDiffer`] off the calling task.
#[derive(Clone)]
pub struct DiffEngine {
    differ: Arc<dyn TextDiffer>,
}

impl DiffEngine {
    pub fn new(differ: Arc<dyn TextDiffer>) -> Self {
        Self { differ }
    }

    /// Diff two snapshots.
    pub async fn compute(
        &self,
        content_type: &str,
        left: Arc<str>,
        right: Arc<str>,
    ) -> Result<DifferenceSet, DiffError> {
        let differ = Arc::clone(&self.differ);
        let content_type = content_type.to_string();
        let set = tokio::task::spawn_blocking(move || differ.diff(&content_type, &left, &right))
            .await
            .map_err(|e| DiffError::Task(e.to_string()))?;
        debug!(hunks = set.len(), "computed differences");
        Ok(set)
    }

    /// Diff `base` against the edit buffer, reading the buffer on the worker
    /// at the moment the diff runs.
    pub async fn compute_against_buffer(
        &self,
        base: Arc<str>,
        buffer: Arc<dyn EditBuffer>,
    ) -> Result<DifferenceSet, DiffError> {
        let differ = Arc::clone(&self.differ);
        let set = tokio::task::spawn_blocking(move || {
            let text = buffer.text()?;
            Ok::<_, DiffError>(differ.diff(&buffer.content_type(), &base, &text))
        })
        .await
        .map_err(|e| DiffError::Task(e.to_string()))??;
        debug!(hunks = set.len(), "computed edit buffer differences");
        Ok(set)
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(Arc::new(LineDiffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemoryBuffer;
    use crate::models::ChangeKind;

    fn diff(left: &str, right: &str) -> Vec<Hunk> {
        LineDiffer.diff("text", left, right).hunks().to_vec()
    }

    fn range(start: usize, end: usize) -> LineRange {
        LineRange::new(start, end)
    }

    #[test]
    fn test_identical_texts() {
        assert!(diff("a\nb\n", "a\nb\n").is_empty());
    }

    #[test]
    fn test_single_replace() {
        let hunks = diff("a\nb\nc\n", "a\nX\nc\n");
        assert_eq!(hunks, vec![Hunk::new(ChangeKind::Replace, range(1, 2), range(1, 2))]);
    }

    #[test]
    fn test_separate_hunks() {
        let hunks = diff("a\nb\nc\nd\ne\n", "A\nb\nc\nd\nE\n");
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].left, range(0, 1));
        assert_eq!(hunks[1].left, range(4, 5));
    }

    #[test]
    fn test_insertion_and_later_replace() {
        let hunks = diff("a\nb\nc\n", "a\nnew1\nnew2\nb\nC\n");
        assert_eq!(
            hunks,
            vec![
                Hunk::new(ChangeKind::Insert, range(1, 1), range(1, 3)),
                Hunk::new(ChangeKind::Replace, range(2, 3), range(4, 5)),
            ]
        );
    }

    #[test]
    fn test_deletion() {
        let hunks = diff("a\nb\nc\nd\n", "a\nd\n");
        assert_eq!(hunks, vec![Hunk::new(ChangeKind::Delete, range(1, 3), range(1, 1))]);
    }

    #[test]
    fn test_missing_final_newline_is_not_a_change() {
        assert!(diff("a\nb", "a\nb\n").is_empty());
    }

    #[test]
    fn test_unified_patch() {
        let patch = unified_patch("notes.txt@1", "notes.txt@2", "a\nb\nc\n", "a\nY\nc\n");
        assert!(patch.starts_with("--- notes.txt@1\n+++ notes.txt@2\n@@"));
        assert!(patch.contains("-b\n"));
        assert!(patch.contains("+Y\n"));
        assert_eq!(unified_patch("l", "r", "a\n", "a"), "");
    }

    #[tokio::test]
    async fn test_engine_runs_against_buffer() {
        let engine = DiffEngine::default();
        let buffer = Arc::new(MemoryBuffer::new("a\nX\nc\n", "rs"));
        let set = engine
            .compute_against_buffer(Arc::from("a\nb\nc\n"), buffer)
            .await
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.hunks()[0].right, range(1, 2));
    }
}
