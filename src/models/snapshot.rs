//! Snapshot model, identifiers, and opaque payload types.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::summary::SummaryFields;
use crate::{AppError, Result};

const SNAPSHOT_ID_FORMAT: &str = "%Y%m%dT%H%M%S%.9f";
const MAX_TARGET_ID_LEN: usize = 128;

/// Opaque remote configuration document.
///
/// The engine never interprets these bytes; only a
/// [`SummaryExtractor`](crate::summary::SummaryExtractor) looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Wrap raw bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the payload, returning the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

/// Opaque compare-and-swap token handed out by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcurrencyToken(String);

impl ConcurrencyToken {
    /// Wrap a token value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConcurrencyToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Requested explicitly by an operator.
    Manual,
    /// Captured automatically right before a restore.
    Safety,
}

/// An immutable capture of one target's full configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Timestamp-derived identifier, unique per target.
    pub id: String,
    /// Capture time.
    pub created_at: DateTime<Utc>,
    /// Caller-supplied description.
    pub description: String,
    /// Remote configuration instance the snapshot belongs to.
    pub target_id: String,
    /// Manual or automatic safety capture.
    pub kind: SnapshotKind,
    /// Full configuration document at capture time.
    pub payload: Payload,
    /// Token returned alongside the payload. Provenance only.
    pub concurrency_token_at_capture: ConcurrencyToken,
    /// Structured subset of the payload used for diff and validation.
    pub summary_fields: SummaryFields,
}

impl Snapshot {
    /// Catalogue entry mirroring this snapshot.
    #[must_use]
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            target_id: self.target_id.clone(),
            created_at: self.created_at,
            description: self.description.clone(),
            kind: self.kind,
            summary_fields: self.summary_fields.clone(),
        }
    }
}

/// Index entry for a snapshot; everything except the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SnapshotSummary {
    /// Snapshot identifier.
    pub id: String,
    /// Owning target.
    pub target_id: String,
    /// Capture time.
    pub created_at: DateTime<Utc>,
    /// Caller-supplied description.
    pub description: String,
    /// Manual or safety capture.
    pub kind: SnapshotKind,
    /// Structured payload summary.
    pub summary_fields: SummaryFields,
}

/// Build the snapshot identifier for a capture time.
///
/// Nanosecond resolution; the fixed-width format sorts lexicographically
/// in chronological order.
#[must_use]
pub fn snapshot_id_at(created_at: DateTime<Utc>) -> String {
    format!("{}Z", created_at.format(SNAPSHOT_ID_FORMAT))
}

/// Check that `id` was produced by [`snapshot_id_at`].
///
/// # Errors
///
/// Returns `AppError::Validation` if the id is not a well-formed timestamp id.
pub fn validate_snapshot_id(id: &str) -> Result<()> {
    snapshot_created_at(id)
        .map(|_| ())
        .ok_or_else(|| AppError::Validation(format!("invalid snapshot id '{id}'")))
}

/// Recover the capture time encoded in a snapshot id.
#[must_use]
pub fn snapshot_created_at(id: &str) -> Option<DateTime<Utc>> {
    let stamp = id.strip_suffix('Z')?;
    NaiveDateTime::parse_from_str(stamp, SNAPSHOT_ID_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Check that a target identifier is safe to embed in storage keys.
///
/// # Errors
///
/// Returns `AppError::Validation` for empty, oversized, or non
/// `[A-Za-z0-9._-]` identifiers, or identifiers starting with a dot.
pub fn validate_target_id(target_id: &str) -> Result<()> {
    if target_id.is_empty() || target_id.len() > MAX_TARGET_ID_LEN {
        return Err(AppError::Validation(format!(
            "target id must be 1..={MAX_TARGET_ID_LEN} characters"
        )));
    }
    if target_id.starts_with('.') {
        return Err(AppError::Validation(format!(
            "target id '{target_id}' must not start with '.'"
        )));
    }
    if !target_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(AppError::Validation(format!(
            "target id '{target_id}' contains unsupported characters"
        )));
    }
    Ok(())
}

