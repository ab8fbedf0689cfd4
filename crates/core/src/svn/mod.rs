//! SVN CLI backend.

pub mod client;
pub mod parser;

pub use client::SvnBackend;
pub use parser::*;
