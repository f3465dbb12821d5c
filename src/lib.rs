//! Confmap - Persistent key=value configuration store
//!
//! Confmap gives command-line programs a small string-to-string settings map
//! persisted to a single file, in either a JSON document or a line-oriented
//! `key=value` format. Saves use optimistic conflict detection so independent
//! processes sharing the same file do not silently clobber each other's
//! changes: a save that would overwrite a newer on-disk document fails with a
//! recoverable stale-write error, and the expected response is to reload and
//! retry.

pub mod cli;
pub mod logging;
pub mod resolve;
pub mod store;

pub use store::{ConfigMap, ConfigStore, Format, StoreError, StoreLocation};

/// Result type alias for confmap binary-side operations
pub type Result<T> = anyhow::Result<T>;
