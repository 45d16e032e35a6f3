//! Field-by-field diff of two snapshot summaries.
//!
//! Operates on [`SummaryFields`] only, never on payloads, so a preview is
//! cheap and independent of the payload format.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::Serialize;

use crate::models::{SummaryFields, SummaryValue};

/// One compared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    /// Field name.
    pub field: String,
    /// Value on the current (left) side; `None` if absent there.
    pub before: Option<SummaryValue>,
    /// Value on the target (right) side; `None` if absent there.
    pub after: Option<SummaryValue>,
    /// Whether the two sides differ.
    pub changed: bool,
}

/// Comparison over the union of both sides' field names, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DiffResult {
    /// Every compared field, changed or not.
    pub entries: Vec<DiffEntry>,
}

impl DiffResult {
    /// Only the fields that differ.
    pub fn changed(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(|entry| entry.changed)
    }

    /// Whether any field differs.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changed().next().is_some()
    }

    /// Human-readable listing of the changed fields.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut unchanged = 0usize;
        for entry in &self.entries {
            if entry.changed {
                let _ = writeln!(
                    out,
                    "  {}: {} -> {}",
                    entry.field,
                    display(entry.before.as_ref()),
                    display(entry.after.as_ref())
                );
            } else {
                unchanged += 1;
            }
        }
        if out.is_empty() {
            out.push_str("  no summarized fields differ\n");
        }
        if unchanged > 0 {
            let _ = writeln!(out, "  ({unchanged} unchanged)");
        }
        out
    }
}

fn display(value: Option<&SummaryValue>) -> String {
    value.map_or_else(|| "<absent>".to_owned(), ToString::to_string)
}

/// Compare `current` against `target`.
#[must_use]
pub fn compute_diff(current: &SummaryFields, target: &SummaryFields) -> DiffResult {
    let fields: BTreeSet<&String> = current.field_names().chain(target.field_names()).collect();

    let entries = fields
        .into_iter()
        .map(|field| {
            let before = current.get(field).cloned();
            let after = target.get(field).cloned();
            DiffEntry {
                field: field.clone(),
                changed: before != after,
                before,
                after,
            }
        })
        .collect();

    DiffResult { entries }
}
