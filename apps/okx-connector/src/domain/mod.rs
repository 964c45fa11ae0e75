//! Domain Layer - Core connector types and routing rules.
//!
//! This layer contains the session model and the channel classification
//! rules with no I/O. Everything here is pure Rust with serialization
//! support.

/// Channel classification (which session serves which channel).
pub mod classifier;

/// Session classes, subscription topics and routing keys.
pub mod topic;
