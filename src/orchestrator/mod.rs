//! Snapshot, restore, and retention orchestration.

pub mod diff_preview;
pub mod restore_validator;
pub mod retention;
pub mod snapshot_manager;

use std::future::Future;
use std::time::Duration;

use crate::{AppError, Result};

/// Bound a remote call; an elapsed timer surfaces as `AppError::Io`.
pub(crate) async fn with_timeout<T, F>(operation: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, call).await.map_err(|_| {
        AppError::Io(format!(
            "{operation} timed out after {}s",
            limit.as_secs()
        ))
    })?
}
