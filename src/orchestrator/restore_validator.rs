//! Post-restore verification against a fresh read of the remote.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::diff_preview::{compute_diff, DiffEntry};
use super::with_timeout;
use crate::models::{Snapshot, SummaryFields};
use crate::remote::ConfigurationService;
use crate::summary::SummaryExtractor;
use crate::Result;

/// Result of comparing the live configuration with the restored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// True when every summarized field matches.
    pub success: bool,
    /// Fields that differ; `before` is the live value, `after` the expected.
    pub mismatches: Vec<DiffEntry>,
}

/// Re-fetches and compares. Mismatches are data, not errors.
#[derive(Clone)]
pub struct RestoreValidator {
    remote: Arc<dyn ConfigurationService>,
    extractor: Arc<dyn SummaryExtractor>,
    remote_timeout: Duration,
}

impl RestoreValidator {
    /// Build a validator. `extractor` must be the one used at capture time.
    #[must_use]
    pub fn new(
        remote: Arc<dyn ConfigurationService>,
        extractor: Arc<dyn SummaryExtractor>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            extractor,
            remote_timeout,
        }
    }

    /// Check that the live configuration now matches `target`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` or `AppError::NotFound` if the re-fetch fails.
    pub async fn validate(&self, target: &Snapshot) -> Result<ValidationResult> {
        let live = with_timeout(
            "fetch live configuration",
            self.remote_timeout,
            self.remote.fetch_current(&target.target_id),
        )
        .await?;

        // An unreadable live document matches none of the expected fields.
        let live_summary = self.extractor.extract(&live.payload).unwrap_or_else(|err| {
            warn!(target_id = %target.target_id, %err, "live configuration could not be summarized");
            SummaryFields::new()
        });

        let mismatches: Vec<DiffEntry> = compute_diff(&live_summary, &target.summary_fields)
            .changed()
            .cloned()
            .collect();
        let success = mismatches.is_empty();

        if success {
            info!(target_id = %target.target_id, snapshot_id = %target.id, "post-restore validation passed");
        } else {
            warn!(
                target_id = %target.target_id,
                snapshot_id = %target.id,
                mismatched = mismatches.len(),
                "post-restore validation found mismatches"
            );
        }

        Ok(ValidationResult {
            success,
            mismatches,
        })
    }
}
