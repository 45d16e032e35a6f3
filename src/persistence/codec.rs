//! Snapshot blob codec.
//!
//! A snapshot blob is three parts separated by `\n`:
//!
//! ```text
//! CONFSNAP/1
//! {"id":"…","target_id":"…",…,"payload_len":42,"payload_sha256":"…"}
//! <payload bytes, verbatim>
//! ```
//!
//! The header is compact JSON and never contains a raw newline. The payload
//! is stored untouched, so any byte sequence round-trips. Length and
//! SHA-256 in the header let [`SnapshotCodec::decode`] reject truncated or
//! altered blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::sha256_hex;
use crate::models::snapshot::{validate_snapshot_id, validate_target_id};
use crate::models::{ConcurrencyToken, Payload, Snapshot, SnapshotKind, SummaryFields};
use crate::{AppError, Result};

const MAGIC_PREFIX: &str = "CONFSNAP/";
const FORMAT_VERSION: u32 = 1;

/// Maximum header size accepted on decode: 1 MiB.
pub const MAX_HEADER_BYTES: usize = 1_048_576;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
struct SnapshotHeader {
    id: String,
    target_id: String,
    created_at: DateTime<Utc>,
    description: String,
    kind: SnapshotKind,
    concurrency_token_at_capture: ConcurrencyToken,
    summary_fields: SummaryFields,
    payload_len: u64,
    payload_sha256: String,
}

/// Encodes and decodes snapshot blobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotCodec;

impl SnapshotCodec {
    /// Serialize a snapshot and its metadata.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the header cannot be serialized.
    pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>> {
        let payload = snapshot.payload.as_bytes();
        let header = SnapshotHeader {
            id: snapshot.id.clone(),
            target_id: snapshot.target_id.clone(),
            created_at: snapshot.created_at,
            description: snapshot.description.clone(),
            kind: snapshot.kind,
            concurrency_token_at_capture: snapshot.concurrency_token_at_capture.clone(),
            summary_fields: snapshot.summary_fields.clone(),
            payload_len: payload.len() as u64,
            payload_sha256: sha256_hex(payload),
        };
        let header = serde_json::to_vec(&header)?;

        let magic = format!("{MAGIC_PREFIX}{FORMAT_VERSION}\n");
        let mut out = Vec::with_capacity(magic.len() + header.len() + 1 + payload.len());
        out.extend_from_slice(magic.as_bytes());
        out.extend_from_slice(&header);
        out.push(b'\n');
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// Parse and verify a snapshot blob.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the magic line, format version,
    /// header, identifiers, payload length, or payload digest are wrong.
    pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
        let (magic, rest) = split_line(bytes)
            .ok_or_else(|| AppError::Validation("snapshot blob has no format line".into()))?;
        let version = std::str::from_utf8(magic)
            .ok()
            .and_then(|line| line.strip_prefix(MAGIC_PREFIX))
            .ok_or_else(|| AppError::Validation("not a snapshot blob".into()))?;
        if version != FORMAT_VERSION.to_string() {
            return Err(AppError::Validation(format!(
                "unsupported snapshot format version '{version}'"
            )));
        }

        let (header, payload) = split_line(rest)
            .ok_or_else(|| AppError::Validation("snapshot blob has no header".into()))?;
        if header.len() > MAX_HEADER_BYTES {
            return Err(AppError::Validation(format!(
                "snapshot header exceeds {MAX_HEADER_BYTES} bytes"
            )));
        }
        let header: SnapshotHeader = serde_json::from_slice(header)?;
        validate_snapshot_id(&header.id)?;
        validate_target_id(&header.target_id)?;

        if payload.len() as u64 != header.payload_len {
            return Err(AppError::Validation(format!(
                "snapshot {} payload is {} bytes, header says {}",
                header.id,
                payload.len(),
                header.payload_len
            )));
        }
        if sha256_hex(payload) != header.payload_sha256 {
            return Err(AppError::Validation(format!(
                "snapshot {} payload digest mismatch",
                header.id
            )));
        }

        Ok(Snapshot {
            id: header.id,
            created_at: header.created_at,
            description: header.description,
            target_id: header.target_id,
            kind: header.kind,
            payload: Payload::new(payload.to_vec()),
            concurrency_token_at_capture: header.concurrency_token_at_capture,
            summary_fields: header.summary_fields,
        })
    }
}

fn split_line(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = bytes.iter().position(|&b| b == b'\n')?;
    Some((&bytes[..pos], &bytes[pos + 1..]))
}
