//! Snapshot capture and guarded restore.
//!
//! A restore runs its steps in a fixed order: load the snapshot, read the
//! live configuration, preview, take a safety snapshot, apply with the token
//! just read, validate, then record history. Nothing before the apply
//! touches the remote object or the history. Everything from the apply
//! onward is recorded, success or not.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use super::diff_preview::{compute_diff, DiffResult};
use super::restore_validator::{RestoreValidator, ValidationResult};
use super::retention::{ConsistencyReport, PruneResult, RetentionManager};
use super::with_timeout;
use crate::config::AppConfig;
use crate::errors::{MutationState, RestoreStep};
use crate::models::snapshot::{snapshot_id_at, validate_snapshot_id, validate_target_id};
use crate::models::{
    ConcurrencyToken, HistoryOutcome, HistoryRecord, Snapshot, SnapshotKind, SnapshotSummary,
    SummaryFields,
};
use crate::persistence::history::DEFAULT_HISTORY_CAP;
use crate::persistence::{HistoryLog, SnapshotCodec, SnapshotIndex};
use crate::remote::{ConfigurationService, FileConfigurationService, RemoteConfig};
use crate::store::{self, BlobStore, FsBlobStore};
use crate::summary::SummaryExtractor;
use crate::{AppError, Result};

/// Default bound on a single remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Switches for a single restore run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Apply without computing a diff or consulting the preview gate.
    pub force_without_preview: bool,
    /// Do not capture the live configuration before applying.
    pub skip_safety_backup: bool,
}

/// What a restore would change, shown before anything is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestorePreview {
    /// Target being restored.
    pub target_id: String,
    /// Snapshot that would be applied.
    pub snapshot: SnapshotSummary,
    /// Summary of the live configuration as just read.
    pub live_summary: SummaryFields,
    /// Live (before) versus snapshot (after).
    pub diff: DiffResult,
}

/// Decides whether a previewed restore may proceed.
pub trait PreviewGate: Send + Sync {
    /// Return `true` to apply, `false` to stop before any mutation.
    fn approve(&self, preview: &RestorePreview) -> bool;
}

/// Gate that approves every preview.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl PreviewGate for AutoApprove {
    fn approve(&self, _preview: &RestorePreview) -> bool {
        true
    }
}

/// Show `preview` on `output` and read a yes/no answer from `input`.
///
/// Anything but `y` or `yes` declines, and so does a prompt that cannot be
/// written or an answer that cannot be read.
pub fn prompt_for_approval(
    preview: &RestorePreview,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> bool {
    let shown = write!(
        output,
        "restore {} onto '{}' ({})\n{}apply? [y/N] ",
        preview.snapshot.id,
        preview.target_id,
        preview.snapshot.description,
        preview.diff.render()
    )
    .and_then(|()| output.flush());
    if let Err(err) = shown {
        warn!(%err, "could not show restore prompt, declining");
        return false;
    }

    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

/// Result of a restore that was applied to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRestore {
    /// Restored target.
    pub target_id: String,
    /// Snapshot that was applied.
    pub snapshot_id: String,
    /// Diff shown before the apply; `None` when the preview was forced off.
    pub diff: Option<DiffResult>,
    /// Safety snapshot captured before the apply, unless skipped.
    pub safety_snapshot: Option<SnapshotSummary>,
    /// Token returned by the remote for the restored configuration.
    pub new_token: ConcurrencyToken,
    /// Post-restore comparison.
    pub validation: ValidationResult,
    /// Outcome written to the history.
    pub outcome: HistoryOutcome,
}

/// How a restore run ended without error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RestoreOutcome {
    /// The preview gate declined; nothing was written anywhere.
    Declined(RestorePreview),
    /// The snapshot was applied. Validation may still have found mismatches.
    Applied(AppliedRestore),
}

/// Entry point for snapshot creation, restore, retention, and history.
pub struct SnapshotManager {
    remote: Arc<dyn ConfigurationService>,
    store: Arc<dyn BlobStore>,
    index: SnapshotIndex,
    history: HistoryLog,
    extractor: Arc<dyn SummaryExtractor>,
    validator: RestoreValidator,
    retention: RetentionManager,
    gate: Arc<dyn PreviewGate>,
    remote_timeout: Duration,
}

impl SnapshotManager {
    /// Build a manager with default history cap, timeout, and an
    /// auto-approving preview gate.
    #[must_use]
    pub fn new(
        remote: Arc<dyn ConfigurationService>,
        store: Arc<dyn BlobStore>,
        extractor: Arc<dyn SummaryExtractor>,
    ) -> Self {
        let index = SnapshotIndex::new(Arc::clone(&store));
        Self {
            validator: RestoreValidator::new(
                Arc::clone(&remote),
                Arc::clone(&extractor),
                DEFAULT_REMOTE_TIMEOUT,
            ),
            retention: RetentionManager::new(Arc::clone(&store), index.clone()),
            history: HistoryLog::new(Arc::clone(&store), DEFAULT_HISTORY_CAP),
            index,
            remote,
            store,
            extractor,
            gate: Arc::new(AutoApprove),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    /// Build a manager over the filesystem store and file-backed remote
    /// named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the store directory cannot be opened or
    /// no remote directory is configured.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let remote_dir = config.remote.config_dir.clone().ok_or_else(|| {
            AppError::Config("remote.config_dir must be set to reach the remote service".into())
        })?;
        let store = FsBlobStore::open(&config.store_dir)?;
        Ok(Self::new(
            Arc::new(FileConfigurationService::new(remote_dir)),
            Arc::new(store),
            config.summary_extractor(),
        )
        .with_history_cap(config.history_cap)
        .with_remote_timeout(config.remote_timeout()))
    }

    /// Keep at most `cap` history records per target.
    #[must_use]
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history = HistoryLog::new(Arc::clone(&self.store), cap);
        self
    }

    /// Bound every remote call by `timeout`.
    #[must_use]
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self.validator = RestoreValidator::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.extractor),
            timeout,
        );
        self
    }

    /// Consult `gate` before applying a previewed restore.
    #[must_use]
    pub fn with_preview_gate(mut self, gate: Arc<dyn PreviewGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Retention manager sharing this manager's store and catalogue.
    #[must_use]
    pub fn retention(&self) -> RetentionManager {
        self.retention.clone()
    }

    /// Capture the live configuration of `target_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a malformed target id,
    /// `AppError::NotFound` if the remote target is unknown,
    /// `AppError::Conflict` if the generated id already exists, or
    /// `AppError::Io` on transport or storage failure.
    pub async fn create_snapshot(&self, target_id: &str, description: &str) -> Result<SnapshotSummary> {
        self.create_snapshot_at(target_id, description, Utc::now()).await
    }

    /// [`create_snapshot`](Self::create_snapshot) stamped with an explicit
    /// capture time, which also fixes the snapshot id.
    ///
    /// # Errors
    ///
    /// Same as [`create_snapshot`](Self::create_snapshot).
    pub async fn create_snapshot_at(
        &self,
        target_id: &str,
        description: &str,
        created_at: DateTime<Utc>,
    ) -> Result<SnapshotSummary> {
        validate_target_id(target_id)?;
        let span = info_span!("create_snapshot", target_id);

        async move {
            let live = self.fetch_live(target_id).await?;
            let snapshot = self
                .capture(target_id, description, SnapshotKind::Manual, &live, created_at)
                .await?;
            Ok(snapshot.summary())
        }
        .instrument(span)
        .await
    }

    /// Catalogued snapshots for a target, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a malformed target id or
    /// `AppError::Io` on storage failure.
    pub async fn list_snapshots(&self, target_id: &str) -> Result<Vec<SnapshotSummary>> {
        validate_target_id(target_id)?;
        self.index.list(target_id).await
    }

    /// Read and verify a full snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the blob is absent, or
    /// `AppError::Validation` if it is corrupt, malformed, or belongs to a
    /// different target.
    pub async fn load_snapshot(&self, target_id: &str, snapshot_id: &str) -> Result<Snapshot> {
        validate_target_id(target_id)?;
        validate_snapshot_id(snapshot_id)?;

        let key = store::snapshot_key(target_id, snapshot_id);
        let Some(bytes) = store::get_optional(self.store.as_ref(), &key).await? else {
            if self.index.get(target_id, snapshot_id).await?.is_some() {
                warn!(target_id, snapshot_id, "catalogue entry references a missing blob");
            }
            return Err(AppError::NotFound(format!(
                "snapshot {snapshot_id} for target '{target_id}'"
            )));
        };

        let snapshot = SnapshotCodec::decode(&bytes)?;
        if snapshot.target_id != target_id {
            return Err(AppError::Validation(format!(
                "snapshot {snapshot_id} belongs to target '{}', not '{target_id}'",
                snapshot.target_id
            )));
        }
        if snapshot.id != snapshot_id {
            return Err(AppError::Validation(format!(
                "blob for {snapshot_id} holds snapshot {}",
                snapshot.id
            )));
        }
        Ok(snapshot)
    }

    /// Diff the live configuration against a snapshot without applying it.
    ///
    /// # Errors
    ///
    /// Same as the load and fetch steps of [`restore`](Self::restore).
    pub async fn preview_restore(&self, target_id: &str, snapshot_id: &str) -> Result<RestorePreview> {
        let snapshot = self.load_snapshot(target_id, snapshot_id).await?;
        let live = self.fetch_live(target_id).await?;
        Ok(self.build_preview(&snapshot, &live))
    }

    /// Restore `snapshot_id` onto the live configuration of `target_id`.
    ///
    /// A stale concurrency token is never retried; re-run the restore to
    /// re-read and re-preview.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Restore` naming the failed step and whether the
    /// remote was mutated. The root cause is `NotFound`, `Validation`,
    /// `Conflict`, or `Io`.
    pub async fn restore(
        &self,
        target_id: &str,
        snapshot_id: &str,
        options: RestoreOptions,
    ) -> Result<RestoreOutcome> {
        let span = info_span!(
            "restore",
            target_id,
            snapshot_id,
            force = options.force_without_preview,
            skip_safety = options.skip_safety_backup
        );
        self.run_restore(target_id, snapshot_id, options)
            .instrument(span)
            .await
    }

    #[allow(clippy::too_many_lines)] // Restore steps are strictly sequential.
    async fn run_restore(
        &self,
        target_id: &str,
        snapshot_id: &str,
        options: RestoreOptions,
    ) -> Result<RestoreOutcome> {
        let fail = |err: AppError, step: RestoreStep, mutation: MutationState| {
            err.at_step(step, target_id, snapshot_id, mutation)
        };

        let snapshot = self
            .load_snapshot(target_id, snapshot_id)
            .await
            .map_err(|err| fail(err, RestoreStep::LoadSnapshot, MutationState::NotApplied))?;

        let live = self
            .fetch_live(target_id)
            .await
            .map_err(|err| fail(err, RestoreStep::FetchLive, MutationState::NotApplied))?;

        let diff = if options.force_without_preview {
            None
        } else {
            let preview = self.build_preview(&snapshot, &live);
            if !self.gate.approve(&preview) {
                info!("restore declined at preview");
                return Ok(RestoreOutcome::Declined(preview));
            }
            Some(preview.diff)
        };

        let safety_snapshot = if options.skip_safety_backup {
            None
        } else {
            let description = format!("safety snapshot before restoring {snapshot_id}");
            let safety = self
                .capture(target_id, &description, SnapshotKind::Safety, &live, Utc::now())
                .await
                .map_err(|err| fail(err, RestoreStep::SafetyBackup, MutationState::NotApplied))?;
            Some(safety.summary())
        };
        let safety_id = safety_snapshot.as_ref().map(|s| s.id.clone());

        let applied = with_timeout(
            "apply configuration",
            self.remote_timeout,
            self.remote
                .apply_configuration(target_id, snapshot.payload.clone(), live.token.clone()),
        )
        .await;

        let new_token = match applied {
            Ok(token) => token,
            Err(err) => {
                let mutation = match &err {
                    AppError::Conflict(_) | AppError::NotFound(_) => MutationState::NotApplied,
                    _ => MutationState::Unknown,
                };
                warn!(%err, %mutation, "apply failed");
                let record = HistoryRecord::new(
                    target_id,
                    snapshot_id,
                    HistoryOutcome::Failed,
                    format!("apply failed (mutation {mutation}): {err}"),
                )
                .with_safety_snapshot(safety_id);
                let failure = fail(err, RestoreStep::Apply, mutation);
                return Err(match self.history.append(record).await {
                    Ok(()) => failure,
                    Err(history_err) => {
                        error!(%history_err, "failed to record failed restore attempt");
                        failure.with_history_error(&history_err)
                    }
                });
            }
        };
        info!(%new_token, "snapshot applied");

        let validation = match self.validator.validate(&snapshot).await {
            Ok(validation) => validation,
            Err(err) => {
                let record = HistoryRecord::new(
                    target_id,
                    snapshot_id,
                    HistoryOutcome::Failed,
                    format!("applied, but post-restore validation could not run: {err}"),
                )
                .with_safety_snapshot(safety_id);
                let failure = fail(err, RestoreStep::Validate, MutationState::Applied);
                return Err(match self.history.append(record).await {
                    Ok(()) => failure,
                    Err(history_err) => {
                        error!(%history_err, "failed to record restore attempt");
                        failure.with_history_error(&history_err)
                    }
                });
            }
        };

        let (outcome, details) = if validation.success {
            (
                HistoryOutcome::Succeeded,
                "restored and validated".to_owned(),
            )
        } else {
            let fields: Vec<&str> = validation
                .mismatches
                .iter()
                .map(|m| m.field.as_str())
                .collect();
            (
                HistoryOutcome::ValidationMismatch,
                format!("applied, but live fields differ: {}", fields.join(", ")),
            )
        };

        self.history
            .append(
                HistoryRecord::new(target_id, snapshot_id, outcome, details)
                    .with_safety_snapshot(safety_id),
            )
            .await
            .map_err(|err| fail(err, RestoreStep::RecordHistory, MutationState::Applied))?;

        info!(?outcome, "restore finished");
        Ok(RestoreOutcome::Applied(AppliedRestore {
            target_id: target_id.to_owned(),
            snapshot_id: snapshot_id.to_owned(),
            diff,
            safety_snapshot,
            new_token,
            validation,
            outcome,
        }))
    }

    /// Delete snapshots of `target_id` older than `max_age_days`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a malformed target id or
    /// `AppError::Io` if the catalogue cannot be read.
    pub async fn prune(&self, target_id: &str, max_age_days: u32) -> Result<PruneResult> {
        validate_target_id(target_id)?;
        self.retention.prune(target_id, max_age_days).await
    }

    /// Up to `limit` restore records for a target, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a malformed target id or
    /// `AppError::Io` on storage failure.
    pub async fn list_history(&self, target_id: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        validate_target_id(target_id)?;
        self.history.list(target_id, limit).await
    }

    /// Compare the catalogue with the stored blobs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a malformed target id or
    /// `AppError::Io` on storage failure.
    pub async fn check_consistency(&self, target_id: &str) -> Result<ConsistencyReport> {
        validate_target_id(target_id)?;
        self.retention.check_consistency(target_id).await
    }

    /// Delete uncatalogued blobs past the grace period.
    ///
    /// # Errors
    ///
    /// See [`RetentionManager::sweep_orphans`].
    pub async fn sweep_orphans(&self, target_id: &str) -> Result<Vec<String>> {
        validate_target_id(target_id)?;
        self.retention.sweep_orphans(target_id).await
    }

    /// Re-derive the catalogue of `target_id` from its blobs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a malformed target id or
    /// `AppError::Io` on storage failure.
    pub async fn rebuild_index(&self, target_id: &str) -> Result<usize> {
        validate_target_id(target_id)?;
        self.index.rebuild(target_id).await
    }

    async fn fetch_live(&self, target_id: &str) -> Result<RemoteConfig> {
        with_timeout(
            "fetch live configuration",
            self.remote_timeout,
            self.remote.fetch_current(target_id),
        )
        .await
    }

    fn summarize(&self, live: &RemoteConfig, target_id: &str) -> SummaryFields {
        self.extractor.extract(&live.payload).unwrap_or_else(|err| {
            warn!(target_id, %err, "configuration could not be summarized");
            SummaryFields::new()
        })
    }

    fn build_preview(&self, snapshot: &Snapshot, live: &RemoteConfig) -> RestorePreview {
        let live_summary = self.summarize(live, &snapshot.target_id);
        let diff = compute_diff(&live_summary, &snapshot.summary_fields);
        RestorePreview {
            target_id: snapshot.target_id.clone(),
            snapshot: snapshot.summary(),
            live_summary,
            diff,
        }
    }

    /// Persist `live` as a new snapshot: blob first, catalogue entry second.
    async fn capture(
        &self,
        target_id: &str,
        description: &str,
        kind: SnapshotKind,
        live: &RemoteConfig,
        created_at: DateTime<Utc>,
    ) -> Result<Snapshot> {
        let id = snapshot_id_at(created_at);
        let key = store::snapshot_key(target_id, &id);

        if self.index.get(target_id, &id).await?.is_some()
            || self.store.list(&key).await?.iter().any(|k| *k == key)
        {
            return Err(AppError::Conflict(format!(
                "snapshot id {id} already exists for target '{target_id}'"
            )));
        }

        let snapshot = Snapshot {
            id,
            created_at,
            description: description.to_owned(),
            target_id: target_id.to_owned(),
            kind,
            payload: live.payload.clone(),
            concurrency_token_at_capture: live.token.clone(),
            summary_fields: self.summarize(live, target_id),
        };

        self.store.put(&key, SnapshotCodec::encode(&snapshot)?).await?;
        self.index.append(snapshot.summary()).await?;

        info!(
            target_id,
            snapshot_id = %snapshot.id,
            ?kind,
            fields = snapshot.summary_fields.len(),
            "snapshot captured"
        );
        Ok(snapshot)
    }
}
