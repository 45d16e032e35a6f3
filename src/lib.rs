#![forbid(unsafe_code)]

//! Snapshot and guarded restore of remote configuration objects.
//!
//! [`SnapshotManager`] captures a target's live configuration into a
//! [`store::BlobStore`], restores an earlier snapshot through a
//! compare-and-swap [`remote::ConfigurationService`], verifies the result,
//! and keeps a bounded restore history.

pub mod config;
pub mod digest;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod remote;
pub mod store;
pub mod summary;

pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use orchestrator::snapshot_manager::SnapshotManager;
