//! Persistent, size-bounded conversation history.
//!
//! Each instance owns one active history file plus any number of archive
//! files holding records evicted by rotation.

mod record;
mod store;

pub use record::{HistoryRecord, TokenCounts};
pub use store::{AppendOutcome, HistoryLimits, HistoryStore, HistoryWindow};
