//! Summary extraction: the single place that looks inside a payload.
//!
//! Snapshot capture and post-restore validation must use the same
//! [`SummaryExtractor`] instance, otherwise comparing their output means
//! nothing. [`SnapshotManager`](crate::orchestrator::snapshot_manager::SnapshotManager)
//! owns one and hands it to the validator.

use serde::Deserialize;
use serde_json::Value;

use crate::models::{Payload, SummaryFields, SummaryValue};
use crate::{AppError, Result};

/// Derives the structured summary of a configuration payload.
pub trait SummaryExtractor: Send + Sync {
    /// Extract summary fields from `payload`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the payload cannot be interpreted.
    fn extract(&self, payload: &Payload) -> Result<SummaryFields>;
}

/// One named field located by a JSON pointer (RFC 6901).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SummaryFieldSpec {
    /// Field name used in diffs and validation reports.
    pub name: String,
    /// Location inside the document, e.g. `/DefaultCacheBehavior/Compress`.
    pub pointer: String,
}

/// Summarizes JSON documents.
///
/// Scalars become values, arrays and objects become element counts, and
/// `null` or missing locations are left out.
#[derive(Debug, Clone, Default)]
pub struct JsonSummaryExtractor {
    fields: Vec<SummaryFieldSpec>,
}

impl JsonSummaryExtractor {
    /// Summarize every top-level member of the document.
    #[must_use]
    pub fn top_level() -> Self {
        Self::default()
    }

    /// Summarize only the given pointer locations; falls back to
    /// [`top_level`](Self::top_level) when `fields` is empty.
    #[must_use]
    pub fn with_fields(fields: Vec<SummaryFieldSpec>) -> Self {
        Self { fields }
    }
}

impl SummaryExtractor for JsonSummaryExtractor {
    fn extract(&self, payload: &Payload) -> Result<SummaryFields> {
        let document: Value = serde_json::from_slice(payload.as_bytes())
            .map_err(|err| AppError::Validation(format!("payload is not JSON: {err}")))?;

        if self.fields.is_empty() {
            let Value::Object(members) = &document else {
                return Err(AppError::Validation(
                    "payload must be a JSON object to summarize top-level fields".into(),
                ));
            };
            return Ok(members
                .iter()
                .filter_map(|(name, value)| summarize(value).map(|v| (name.clone(), v)))
                .collect());
        }

        Ok(self
            .fields
            .iter()
            .filter_map(|field| {
                document
                    .pointer(&field.pointer)
                    .and_then(summarize)
                    .map(|value| (field.name.clone(), value))
            })
            .collect())
    }
}

fn summarize(value: &Value) -> Option<SummaryValue> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(SummaryValue::Flag(*flag)),
        Value::Number(number) => Some(
            number
                .as_i64()
                .map_or_else(|| SummaryValue::Text(number.to_string()), SummaryValue::Number),
        ),
        Value::String(text) => Some(SummaryValue::Text(text.clone())),
        Value::Array(items) => Some(count(items.len())),
        Value::Object(members) => Some(count(members.len())),
    }
}

fn count(len: usize) -> SummaryValue {
    SummaryValue::Number(i64::try_from(len).unwrap_or(i64::MAX))
}
