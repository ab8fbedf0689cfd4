//! Git backend.

pub mod client;

pub use client::GitBackend;
