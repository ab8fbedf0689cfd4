//! ConflictLens core library.
//!
//! Tracks, per open file under version control, where the user's unsaved
//! edits overlap changes already committed to the remote latest version:
//! configuration, version-control backends, line diffing, conflict
//! detection, and the per-file session that keeps all of it current.

pub mod buffer;
pub mod compare;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod errors;
pub mod fetcher;
pub mod git;
pub mod models;
pub mod poller;
pub mod registry;
pub mod services;
pub mod session;
pub mod svn;
pub mod vcs;
pub mod watch;

// Re-exports for convenience.
pub use buffer::{DiskBuffer, EditBuffer, MemoryBuffer};
pub use compare::{compare, CompareWith, Comparison};
pub use config::AppConfig;
pub use conflict::{conflicts_in_region, ConflictInfo};
pub use poller::RemotePoller;
pub use registry::SessionRegistry;
pub use services::{ServiceSlot, Services};
pub use session::{ConflictDataChanged, ConflictSession, Recalculation, Trigger};
pub use vcs::VersionControl;
