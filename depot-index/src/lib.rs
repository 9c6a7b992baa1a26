//! # depot-index
//!
//! Local filesystem index backend.
//!
//! Reads a metadata tree of YAML files
//! (`<root>/<type-folder>/<unique-id>/global.yaml` plus
//! `versions/*.yaml`), assigns stable content ids, resolves dependency
//! references, and serves lookups from in-memory maps that are swapped
//! atomically on reload.

pub mod local;
pub mod schema;

pub use local::{LocalIndex, ReloadStats};
