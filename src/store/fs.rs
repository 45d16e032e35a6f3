//! Filesystem-backed blob store.
//!
//! Keys map to relative paths under a root directory. Writes go to a
//! temporary file in the destination directory, are synced, then renamed
//! into place via `tempfile::NamedTempFile::persist()` so a crash never
//! leaves a half-written blob behind.

use std::future::Future;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use tempfile::NamedTempFile;
use tracing::debug;

use super::BlobStore;
use crate::{AppError, Result};

const TEMP_PREFIX: &str = ".tmp";

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|err| {
            AppError::Config(format!(
                "failed to create store directory {}: {err}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path, rejecting anything that could escape the root.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.ends_with('/') {
            return Err(AppError::Validation(format!("invalid blob key '{key}'")));
        }
        let mut relative = PathBuf::new();
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                _ => {
                    return Err(AppError::Validation(format!(
                        "blob key '{key}' must be a plain relative path"
                    )))
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            let path = self.path_for(&key)?;
            tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
                .await
                .map_err(|err| AppError::Io(format!("blob write task panicked: {err}")))??;
            debug!(key = %key, "blob written");
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            let path = self.path_for(&key)?;
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    Err(AppError::NotFound(format!("blob '{key}'")))
                }
                Err(err) => Err(AppError::Io(format!("failed to read blob '{key}': {err}"))),
            }
        })
    }

    fn list(&self, prefix: &str) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
        let prefix = prefix.to_owned();
        Box::pin(async move {
            // Only the directory part of the prefix is walked.
            let dir_part = prefix.rfind('/').map_or("", |pos| &prefix[..=pos]).to_owned();
            let start = if dir_part.is_empty() {
                self.root.clone()
            } else {
                self.path_for(dir_part.trim_end_matches('/'))?
            };
            let mut keys = tokio::task::spawn_blocking(move || collect_keys(&start, &dir_part))
                .await
                .map_err(|err| AppError::Io(format!("blob list task panicked: {err}")))??;
            keys.retain(|key| key.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            let path = self.path_for(&key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(key = %key, "blob deleted");
                    Ok(())
                }
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(AppError::Io(format!("failed to delete blob '{key}': {err}"))),
            }
        })
    }
}

pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io("blob path has no parent directory".into()))?;
    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create blob directory {}: {err}",
            parent.display()
        ))
    })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(bytes)
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| AppError::Io(format!("failed to sync temporary file: {err}")))?;
    persist(tmp, path)
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<()> {
    tmp.persist(path).map_err(|err| {
        AppError::Io(format!("failed to persist blob to {}: {err}", path.display()))
    })?;
    Ok(())
}

/// Walk `start` recursively and return keys relative to the store root.
fn collect_keys(start: &Path, key_prefix: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut pending = vec![(start.to_path_buf(), key_prefix.to_owned())];

    while let Some((dir, prefix)) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to list {}: {err}",
                    dir.display()
                )))
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                pending.push((path, format!("{prefix}{name}/")));
            } else if path.is_file() {
                keys.push(format!("{prefix}{name}"));
            }
        }
    }

    Ok(keys)
}
