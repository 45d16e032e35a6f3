//! Strongly-typed payload summary used for diff and post-restore checks.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A single summarized value: a flag, an integer or count, or short text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SummaryValue {
    /// Boolean toggle.
    Flag(bool),
    /// Integer value or element count.
    Number(i64),
    /// Any other scalar rendered as text.
    Text(String),
}

impl Display for SummaryValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<bool> for SummaryValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<i64> for SummaryValue {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for SummaryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Named summary values, ordered by field name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SummaryFields(BTreeMap<String, SummaryValue>);

impl SummaryFields {
    /// Empty summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<SummaryValue>) {
        self.0.insert(field.into(), value.into());
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<SummaryValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Look up a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&SummaryValue> {
        self.0.get(field)
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SummaryValue)> {
        self.0.iter()
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no fields were extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, SummaryValue)> for SummaryFields {
    fn from_iter<I: IntoIterator<Item = (String, SummaryValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
