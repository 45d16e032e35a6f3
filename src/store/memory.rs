//! In-process blob store for tests and dry runs.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use super::BlobStore;
use crate::{AppError, Result};

/// Blob store holding everything in a sorted map.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the internal lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Whether the store holds no blobs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the internal lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|_| AppError::Io("memory blob store mutex poisoned".into()))
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            self.lock()?.insert(key, bytes);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            self.lock()?
                .get(&key)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("blob '{key}'")))
        })
    }

    fn list(&self, prefix: &str) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
        let prefix = prefix.to_owned();
        Box::pin(async move {
            Ok(self
                .lock()?
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone())
                .collect())
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            self.lock()?.remove(&key);
            Ok(())
        })
    }
}
