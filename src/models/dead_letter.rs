use serde::{Deserialize, Serialize};

/// An event that exhausted its retries (or failed permanently), retained
/// with its full payload and failure history for manual inspection or replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: String,
    /// External event id of the dead-lettered event.
    pub event_id: String,
    pub kind: String,
    pub payload: String,
    pub attempts: i64,
    /// JSON array of `{attempt, at, classification, message}` entries.
    pub error_history: String,
    pub dead_lettered_at: i64,
    /// Set when an operator replays the event; the row is kept as a record.
    pub replayed_at: Option<i64>,
}
