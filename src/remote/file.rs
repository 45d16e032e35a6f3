//! Configuration service backed by one document per target in a directory.
//!
//! The concurrency token is the SHA-256 of the stored document, so any
//! out-of-band edit to the file invalidates previously read tokens the same
//! way an entity tag would.

use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::info;

use super::{ConfigurationService, RemoteConfig};
use crate::digest::sha256_hex;
use crate::models::snapshot::validate_target_id;
use crate::models::{ConcurrencyToken, Payload};
use crate::store::fs::write_atomically;
use crate::{AppError, Result};

/// Serves `<dir>/<target>.json` documents as remote configurations.
#[derive(Debug, Clone)]
pub struct FileConfigurationService {
    dir: PathBuf,
}

impl FileConfigurationService {
    /// Serve documents from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn document_path(&self, target_id: &str) -> Result<PathBuf> {
        validate_target_id(target_id)?;
        Ok(self.dir.join(format!("{target_id}.json")))
    }

    async fn read_document(&self, target_id: &str) -> Result<Vec<u8>> {
        let path = self.document_path(target_id)?;
        tokio::fs::read(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AppError::NotFound(format!("remote target '{target_id}'"))
            } else {
                AppError::Io(format!("failed to read {}: {err}", path.display()))
            }
        })
    }
}

fn token_for(bytes: &[u8]) -> ConcurrencyToken {
    ConcurrencyToken::new(sha256_hex(bytes))
}

impl ConfigurationService for FileConfigurationService {
    fn fetch_current(
        &self,
        target_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteConfig>> + Send + '_>> {
        let target_id = target_id.to_owned();
        Box::pin(async move {
            let bytes = self.read_document(&target_id).await?;
            let token = token_for(&bytes);
            Ok(RemoteConfig {
                payload: Payload::new(bytes),
                token,
            })
        })
    }

    fn apply_configuration(
        &self,
        target_id: &str,
        payload: Payload,
        token: ConcurrencyToken,
    ) -> Pin<Box<dyn Future<Output = Result<ConcurrencyToken>> + Send + '_>> {
        let target_id = target_id.to_owned();
        Box::pin(async move {
            // Not atomic against another process writing between this read
            // and the rename below.
            let current = self.read_document(&target_id).await?;
            let current_token = token_for(&current);
            if current_token != token {
                return Err(AppError::Conflict(format!(
                    "token {token} is stale for '{target_id}' (current {current_token})"
                )));
            }

            let path = self.document_path(&target_id)?;
            let new_token = token_for(payload.as_bytes());
            let bytes = payload.into_bytes();
            tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
                .await
                .map_err(|err| AppError::Io(format!("configuration write task panicked: {err}")))??;

            info!(target_id = %target_id, %new_token, "configuration document replaced");
            Ok(new_token)
        })
    }
}
