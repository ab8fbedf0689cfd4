//! Sources of the live edit-buffer text.
//!
//! The buffer is read fresh on every recalculation and never cached by the
//! session.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// The current, possibly unsaved, text of the file being edited.
pub trait EditBuffer: Send + Sync {
    fn text(&self) -> std::io::Result<String>;

    /// Content type handed to the differ, e.g. `rs` or `text`.
    fn content_type(&self) -> String;
}

/// Content type derived from a file extension, `text` when there is none.
pub fn content_type_for(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "text".to_string())
}

/// In-memory buffer shared with an editor host.
#[derive(Debug)]
pub struct MemoryBuffer {
    text: RwLock<String>,
    content_type: String,
}

impl MemoryBuffer {
    pub fn new(text: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            text: RwLock::new(text.into()),
            content_type: content_type.into(),
        }
    }

    /// Replace the buffer contents. The owning session must still be told
    /// that the buffer changed.
    pub fn set_text(&self, text: impl Into<String>) {
        let mut guard = self.text.write().unwrap_or_else(|e| e.into_inner());
        *guard = text.into();
    }
}

impl EditBuffer for MemoryBuffer {
    fn text(&self) -> std::io::Result<String> {
        Ok(self.text.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn content_type(&self) -> String {
        self.content_type.clone()
    }
}

/// The working file on disk, used when saved edits are the user's edits.
#[derive(Debug, Clone)]
pub struct DiskBuffer {
    path: PathBuf,
    content_type: String,
}

impl DiskBuffer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content_type = content_type_for(&path);
        Self { path, content_type }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EditBuffer for DiskBuffer {
    fn text(&self) -> std::io::Result<String> {
        std::fs::read_to_string(&self.path)
    }

    fn content_type(&self) -> String {
        self.content_type.clone()
    }
}
