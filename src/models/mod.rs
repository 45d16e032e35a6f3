//! Domain model module declarations.

pub mod history;
pub mod snapshot;
pub mod summary;

pub use history::{HistoryOutcome, HistoryRecord};
pub use snapshot::{ConcurrencyToken, Payload, Snapshot, SnapshotKind, SnapshotSummary};
pub use summary::{SummaryFields, SummaryValue};
