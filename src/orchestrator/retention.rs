//! Age-based snapshot pruning and blob/catalogue consistency checks.
//!
//! Deletion order is blob first, catalogue entry second: an entry is only
//! removed once its blob delete succeeded (absent blobs count as deleted),
//! so the catalogue never points at a blob that might still half-exist.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::models::snapshot::snapshot_created_at;
use crate::persistence::SnapshotIndex;
use crate::store::{self, BlobStore};
use crate::{AppError, Result};

/// Orphan blobs younger than this are left alone; they may belong to a
/// snapshot whose catalogue entry is still being written.
const ORPHAN_GRACE_MINUTES: i64 = 10;

/// A snapshot the prune pass could not fully remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneFailure {
    /// Snapshot identifier.
    pub snapshot_id: String,
    /// What went wrong.
    pub error: String,
}

/// Outcome of one prune pass over a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneResult {
    /// Snapshots whose blob and catalogue entry were both removed.
    pub deleted_ids: Vec<String>,
    /// Catalogue entries still present after the pass.
    pub retained_count: usize,
    /// Per-snapshot failures; the pass continues past them.
    pub failures: Vec<PruneFailure>,
}

/// Catalogue and blob disagreement for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Whether the catalogue document could be parsed.
    pub catalogue_readable: bool,
    /// Catalogue entries whose blob is missing.
    pub dangling_entries: Vec<String>,
    /// Blobs with no catalogue entry.
    pub orphan_blobs: Vec<String>,
}

impl ConsistencyReport {
    /// True when every entry has a blob and every blob an entry.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.catalogue_readable && self.dangling_entries.is_empty() && self.orphan_blobs.is_empty()
    }
}

/// Prunes snapshots by age and keeps blobs and catalogue in step.
#[derive(Clone)]
pub struct RetentionManager {
    store: Arc<dyn BlobStore>,
    index: SnapshotIndex,
}

impl RetentionManager {
    /// Build a retention manager over the same store the index uses.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, index: SnapshotIndex) -> Self {
        Self { store, index }
    }

    /// Delete snapshots older than `max_age_days`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the catalogue cannot be read. Per-snapshot
    /// failures are reported in [`PruneResult::failures`] instead.
    pub async fn prune(&self, target_id: &str, max_age_days: u32) -> Result<PruneResult> {
        self.prune_at(target_id, max_age_days, Utc::now()).await
    }

    /// [`prune`](Self::prune) against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the catalogue cannot be read.
    pub async fn prune_at(
        &self,
        target_id: &str,
        max_age_days: u32,
        now: DateTime<Utc>,
    ) -> Result<PruneResult> {
        // A window reaching past the earliest representable time prunes nothing.
        let cutoff = now
            .checked_sub_signed(chrono::Duration::days(i64::from(max_age_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let span = info_span!("prune", target_id, max_age_days);

        async move {
            let entries = self.index.list(target_id).await?;
            let total = entries.len();
            let mut result = PruneResult::default();

            for entry in entries.into_iter().filter(|e| e.created_at < cutoff) {
                let key = store::snapshot_key(target_id, &entry.id);
                if let Err(err) = self.store.delete(&key).await {
                    warn!(snapshot_id = %entry.id, %err, "blob delete failed, keeping catalogue entry");
                    result.failures.push(PruneFailure {
                        snapshot_id: entry.id,
                        error: err.to_string(),
                    });
                    continue;
                }
                match self.index.remove(target_id, &entry.id).await {
                    Ok(_) => result.deleted_ids.push(entry.id),
                    Err(err) => {
                        warn!(snapshot_id = %entry.id, %err, "catalogue removal failed after blob delete");
                        result.failures.push(PruneFailure {
                            snapshot_id: entry.id,
                            error: err.to_string(),
                        });
                    }
                }
            }

            result.retained_count = total - result.deleted_ids.len();
            info!(
                deleted = result.deleted_ids.len(),
                retained = result.retained_count,
                failed = result.failures.len(),
                "prune pass completed"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Compare the catalogue with the blobs actually stored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on storage failure.
    pub async fn check_consistency(&self, target_id: &str) -> Result<ConsistencyReport> {
        let catalogue_readable = self.index.is_readable(target_id).await?;
        let entries = self.index.list(target_id).await?;
        let blob_ids = self.blob_ids(target_id).await?;

        let catalogued: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let dangling_entries: Vec<String> = entries
            .iter()
            .filter(|e| !blob_ids.contains(&e.id))
            .map(|e| e.id.clone())
            .collect();
        let mut orphan_blobs: Vec<String> = blob_ids
            .iter()
            .filter(|id| !catalogued.contains(id.as_str()))
            .cloned()
            .collect();
        orphan_blobs.sort();

        for id in &dangling_entries {
            warn!(target_id, snapshot_id = %id, "catalogue entry references a missing blob");
        }

        Ok(ConsistencyReport {
            catalogue_readable,
            dangling_entries,
            orphan_blobs,
        })
    }

    /// Delete blobs that have no catalogue entry and are older than the
    /// grace period. Returns the ids removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the catalogue is unreadable (every
    /// blob would look orphaned), or `AppError::Io` on storage failure.
    pub async fn sweep_orphans(&self, target_id: &str) -> Result<Vec<String>> {
        self.sweep_orphans_at(target_id, Utc::now()).await
    }

    /// [`sweep_orphans`](Self::sweep_orphans) against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Same as [`sweep_orphans`](Self::sweep_orphans).
    pub async fn sweep_orphans_at(&self, target_id: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let report = self.check_consistency(target_id).await?;
        if !report.catalogue_readable {
            return Err(AppError::Validation(format!(
                "snapshot catalogue for '{target_id}' is unreadable; rebuild it before sweeping"
            )));
        }

        let grace = chrono::Duration::minutes(ORPHAN_GRACE_MINUTES);
        let mut swept = Vec::new();
        for id in report.orphan_blobs {
            let old_enough = snapshot_created_at(&id)
                .and_then(|created| created.checked_add_signed(grace))
                .is_some_and(|expires| expires < now);
            if !old_enough {
                continue;
            }
            self.store.delete(&store::snapshot_key(target_id, &id)).await?;
            info!(target_id, snapshot_id = %id, "orphan snapshot blob deleted");
            swept.push(id);
        }
        Ok(swept)
    }

    async fn blob_ids(&self, target_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .store
            .list(&store::snapshot_prefix(target_id))
            .await?
            .iter()
            .filter_map(|key| store::snapshot_id_from_key(target_id, key))
            .map(ToOwned::to_owned)
            .collect())
    }
}

/// Spawn the periodic prune task.
///
/// On each tick every target in `target_ids` is pruned to `max_age_days`.
/// Failures are logged and the task keeps running until `cancel` fires.
#[must_use]
pub fn spawn_retention_task(
    retention: Arc<RetentionManager>,
    target_ids: Vec<String>,
    max_age_days: u32,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    for target_id in &target_ids {
                        if let Err(err) = retention.prune(target_id, max_age_days).await {
                            error!(target_id = %target_id, ?err, "retention prune failed");
                        }
                    }
                }
            }
        }
    })
}
