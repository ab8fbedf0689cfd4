//! Conflict derivation.
//!
//! The conflict subsystem is responsible for:
//! 1. **Pairing** -- matching local-edit hunks with remote hunks whose
//!    base-side line ranges overlap.
//! 2. **Change detection** -- deciding whether a freshly derived conflict set
//!    differs materially from the previous one.

pub mod detector;
pub mod info;

pub use detector::ConflictDetector;
pub use info::{conflicts_in_region, ConflictInfo};
