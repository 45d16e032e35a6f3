//! Persistence layer modules.

pub mod codec;
pub mod history;
pub mod index;

pub use codec::SnapshotCodec;
pub use history::HistoryLog;
pub use index::SnapshotIndex;
