//! Snapshot catalogue: one JSON document per target.
//!
//! Updates are read-modify-write on that single document with no locking.
//! Two processes mutating the same target's catalogue at once can lose an
//! entry; the tool assumes a single operator per target.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::codec::SnapshotCodec;
use crate::models::SnapshotSummary;
use crate::store::{self, BlobStore};
use crate::{AppError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
struct Catalogue {
    target_id: String,
    entries: Vec<SnapshotSummary>,
}

/// State of a catalogue document as read from the store.
enum Loaded {
    Missing,
    Corrupt(String),
    Present(Catalogue),
}

/// Ordered catalogue of snapshot summaries, backed by a [`BlobStore`].
#[derive(Clone)]
pub struct SnapshotIndex {
    store: Arc<dyn BlobStore>,
}

impl SnapshotIndex {
    /// Create an index over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Add an entry to its target's catalogue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the id is already catalogued,
    /// `AppError::Validation` if the existing catalogue is unreadable, or
    /// `AppError::Io` on storage failure.
    pub async fn append(&self, entry: SnapshotSummary) -> Result<()> {
        let target_id = entry.target_id.clone();
        let mut catalogue = self.load_for_update(&target_id).await?;
        if catalogue.entries.iter().any(|e| e.id == entry.id) {
            return Err(AppError::Conflict(format!(
                "snapshot {} already catalogued for '{target_id}'",
                entry.id
            )));
        }
        catalogue.entries.push(entry);
        self.save(&target_id, catalogue).await
    }

    /// Entries for a target, newest first.
    ///
    /// A missing or unreadable catalogue yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on storage failure.
    pub async fn list(&self, target_id: &str) -> Result<Vec<SnapshotSummary>> {
        match self.load(target_id).await? {
            Loaded::Missing => Ok(Vec::new()),
            Loaded::Corrupt(reason) => {
                warn!(target_id, %reason, "snapshot catalogue unreadable, treating as empty");
                Ok(Vec::new())
            }
            Loaded::Present(catalogue) => Ok(newest_first(catalogue.entries)),
        }
    }

    /// Look up a single entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on storage failure.
    pub async fn get(&self, target_id: &str, snapshot_id: &str) -> Result<Option<SnapshotSummary>> {
        Ok(self
            .list(target_id)
            .await?
            .into_iter()
            .find(|entry| entry.id == snapshot_id))
    }

    /// Remove an entry. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the catalogue is unreadable, or
    /// `AppError::Io` on storage failure.
    pub async fn remove(&self, target_id: &str, snapshot_id: &str) -> Result<bool> {
        let mut catalogue = match self.load(target_id).await? {
            Loaded::Missing => return Ok(false),
            Loaded::Corrupt(reason) => return Err(corrupt(target_id, &reason)),
            Loaded::Present(catalogue) => catalogue,
        };
        let before = catalogue.entries.len();
        catalogue.entries.retain(|entry| entry.id != snapshot_id);
        if catalogue.entries.len() == before {
            return Ok(false);
        }
        self.save(target_id, catalogue).await?;
        Ok(true)
    }

    /// Whether a catalogue document can currently be read.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on storage failure.
    pub async fn is_readable(&self, target_id: &str) -> Result<bool> {
        Ok(!matches!(self.load(target_id).await?, Loaded::Corrupt(_)))
    }

    /// Rewrite the catalogue from the snapshot blobs present in the store.
    ///
    /// Blobs that fail to decode are skipped with a warning. Returns the
    /// number of catalogued entries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on storage failure.
    pub async fn rebuild(&self, target_id: &str) -> Result<usize> {
        let mut entries = Vec::new();
        for key in self.store.list(&store::snapshot_prefix(target_id)).await? {
            let Some(bytes) = store::get_optional(self.store.as_ref(), &key).await? else {
                continue;
            };
            match SnapshotCodec::decode(&bytes) {
                Ok(snapshot) if snapshot.target_id == target_id => entries.push(snapshot.summary()),
                Ok(snapshot) => {
                    warn!(key = %key, owner = %snapshot.target_id, "blob belongs to another target, skipped");
                }
                Err(err) => warn!(key = %key, %err, "undecodable snapshot blob skipped"),
            }
        }

        let count = entries.len();
        self.save(
            target_id,
            Catalogue {
                target_id: target_id.to_owned(),
                entries,
            },
        )
        .await?;
        info!(target_id, entries = count, "snapshot catalogue rebuilt");
        Ok(count)
    }

    async fn load(&self, target_id: &str) -> Result<Loaded> {
        let key = store::index_key(target_id);
        let Some(bytes) = store::get_optional(self.store.as_ref(), &key).await? else {
            return Ok(Loaded::Missing);
        };
        match serde_json::from_slice::<Catalogue>(&bytes) {
            Ok(catalogue) if catalogue.target_id == target_id => Ok(Loaded::Present(catalogue)),
            Ok(catalogue) => Ok(Loaded::Corrupt(format!(
                "catalogue names target '{}'",
                catalogue.target_id
            ))),
            Err(err) => Ok(Loaded::Corrupt(err.to_string())),
        }
    }

    async fn load_for_update(&self, target_id: &str) -> Result<Catalogue> {
        match self.load(target_id).await? {
            Loaded::Missing => Ok(Catalogue {
                target_id: target_id.to_owned(),
                entries: Vec::new(),
            }),
            Loaded::Corrupt(reason) => Err(corrupt(target_id, &reason)),
            Loaded::Present(catalogue) => Ok(catalogue),
        }
    }

    async fn save(&self, target_id: &str, mut catalogue: Catalogue) -> Result<()> {
        catalogue.entries = newest_first(catalogue.entries);
        let bytes = serde_json::to_vec_pretty(&catalogue)?;
        self.store.put(&store::index_key(target_id), bytes).await
    }
}

fn newest_first(mut entries: Vec<SnapshotSummary>) -> Vec<SnapshotSummary> {
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    entries
}

fn corrupt(target_id: &str, reason: &str) -> AppError {
    AppError::Validation(format!(
        "snapshot catalogue for '{target_id}' is unreadable ({reason}); rebuild it before writing"
    ))
}
