//! Bounded restore history, one JSON document per target.

use std::sync::Arc;

use tracing::warn;

use crate::models::HistoryRecord;
use crate::store::{self, BlobStore};
use crate::{AppError, Result};

/// Default number of records kept per target.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Append-only, count-capped record of restore attempts.
#[derive(Clone)]
pub struct HistoryLog {
    store: Arc<dyn BlobStore>,
    cap: usize,
}

impl HistoryLog {
    /// History over `store`, keeping at most `cap` records per target.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, cap: usize) -> Self {
        Self {
            store,
            cap: cap.max(1),
        }
    }

    /// Append a record, dropping the oldest ones beyond the cap.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the existing history document is
    /// unreadable (it is never silently replaced), or `AppError::Io` on
    /// storage failure.
    pub async fn append(&self, record: HistoryRecord) -> Result<()> {
        let key = store::history_key(&record.target_id);
        let mut records = match store::get_optional(self.store.as_ref(), &key).await? {
            None => Vec::new(),
            Some(bytes) => serde_json::from_slice::<Vec<HistoryRecord>>(&bytes).map_err(|err| {
                AppError::Validation(format!(
                    "history for '{}' is unreadable: {err}",
                    record.target_id
                ))
            })?,
        };

        records.push(record);
        if records.len() > self.cap {
            let excess = records.len() - self.cap;
            records.drain(..excess);
        }

        let bytes = serde_json::to_vec_pretty(&records)?;
        self.store.put(&key, bytes).await
    }

    /// Up to `limit` records for a target, newest first.
    ///
    /// A missing or unreadable document yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on storage failure.
    pub async fn list(&self, target_id: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let key = store::history_key(target_id);
        let Some(bytes) = store::get_optional(self.store.as_ref(), &key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<Vec<HistoryRecord>>(&bytes) {
            Ok(records) => Ok(records.into_iter().rev().take(limit).collect()),
            Err(err) => {
                warn!(target_id, %err, "restore history unreadable, treating as empty");
                Ok(Vec::new())
            }
        }
    }
}
