//! Key/value blob storage contract and the key layout used on top of it.
//!
//! Every persisted document lives under one of three prefixes:
//!
//! - `index/<target>.json`: the snapshot catalogue for a target
//! - `snapshots/<target>/<id>.snap`: one encoded snapshot per id
//! - `history/<target>.json`: the bounded restore history

pub mod fs;
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use crate::{AppError, Result};

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

const SNAPSHOT_SUFFIX: &str = ".snap";

/// Durable key to bytes storage with prefix listing.
///
/// Implementations must be [`Send`] and [`Sync`] so a store can be shared
/// through [`std::sync::Arc`].
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous value.
    ///
    /// The write must be durable once the future resolves.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on storage failure or `AppError::Validation`
    /// for keys the backend cannot represent.
    fn put(&self, key: &str, bytes: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Read the bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the key is absent, `AppError::Io` on
    /// storage failure.
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + '_>>;

    /// List every key that starts with `prefix`, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on storage failure.
    fn list(&self, prefix: &str) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>>;

    /// Remove `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on storage failure.
    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Read `key`, mapping an absent key to `None`.
///
/// # Errors
///
/// Propagates every store error other than `AppError::NotFound`.
pub async fn get_optional(store: &dyn BlobStore, key: &str) -> Result<Option<Vec<u8>>> {
    match store.get(key).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(AppError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Catalogue document key for a target.
#[must_use]
pub fn index_key(target_id: &str) -> String {
    format!("index/{target_id}.json")
}

/// History document key for a target.
#[must_use]
pub fn history_key(target_id: &str) -> String {
    format!("history/{target_id}.json")
}

/// Prefix shared by every snapshot blob of a target.
#[must_use]
pub fn snapshot_prefix(target_id: &str) -> String {
    format!("snapshots/{target_id}/")
}

/// Blob key for one snapshot.
#[must_use]
pub fn snapshot_key(target_id: &str, snapshot_id: &str) -> String {
    format!("{}{snapshot_id}{SNAPSHOT_SUFFIX}", snapshot_prefix(target_id))
}

/// Recover the snapshot id from a blob key produced by [`snapshot_key`].
#[must_use]
pub fn snapshot_id_from_key<'a>(target_id: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(&snapshot_prefix(target_id))?
        .strip_suffix(SNAPSHOT_SUFFIX)
        .filter(|id| !id.is_empty() && !id.contains('/'))
}
