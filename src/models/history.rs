//! Restore history record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final outcome of a restore attempt that reached the apply step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryOutcome {
    /// Applied and verified.
    Succeeded,
    /// Apply was rejected or a post-apply step failed.
    Failed,
    /// Applied, but the re-read configuration differs from the snapshot.
    ValidationMismatch,
}

/// One audit entry for a restore attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HistoryRecord {
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Target the restore was applied to.
    pub target_id: String,
    /// Snapshot that was being restored.
    pub snapshot_id: String,
    /// Attempt outcome.
    pub outcome: HistoryOutcome,
    /// Human-readable detail (error text, mismatch list).
    pub details: String,
    /// Safety snapshot captured before the apply, if any.
    #[serde(default)]
    pub safety_snapshot_id: Option<String>,
}

impl HistoryRecord {
    /// Construct a record timestamped now.
    #[must_use]
    pub fn new(
        target_id: &str,
        snapshot_id: &str,
        outcome: HistoryOutcome,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            target_id: target_id.to_owned(),
            snapshot_id: snapshot_id.to_owned(),
            outcome,
            details: details.into(),
            safety_snapshot_id: None,
        }
    }

    /// Attach the safety snapshot identifier.
    #[must_use]
    pub fn with_safety_snapshot(mut self, safety_snapshot_id: Option<String>) -> Self {
        self.safety_snapshot_id = safety_snapshot_id;
        self
    }
}
