use serde::{Deserialize, Serialize};

/// Closed set of provider event types we understand.
///
/// Anything else parses as `Unknown` and is acknowledged without a handler,
/// so new provider event types don't break ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PaymentCreated,
    PaymentUpdated,
    RefundCreated,
    RefundUpdated,
    CustomerCreated,
    CustomerUpdated,
    CustomerDeleted,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentCreated => "payment.created",
            Self::PaymentUpdated => "payment.updated",
            Self::RefundCreated => "refund.created",
            Self::RefundUpdated => "refund.updated",
            Self::CustomerCreated => "customer.created",
            Self::CustomerUpdated => "customer.updated",
            Self::CustomerDeleted => "customer.deleted",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a provider type tag. Unrecognized tags map to `Unknown` rather
    /// than failing, for forward compatibility.
    pub fn parse(s: &str) -> Self {
        match s {
            "payment.created" => Self::PaymentCreated,
            "payment.updated" => Self::PaymentUpdated,
            "refund.created" => Self::RefundCreated,
            "refund.updated" => Self::RefundUpdated,
            "customer.created" => Self::CustomerCreated,
            "customer.updated" => Self::CustomerUpdated,
            "customer.deleted" => Self::CustomerDeleted,
            _ => Self::Unknown,
        }
    }

    pub const ALL: [EventKind; 8] = [
        Self::PaymentCreated,
        Self::PaymentUpdated,
        Self::RefundCreated,
        Self::RefundUpdated,
        Self::CustomerCreated,
        Self::CustomerUpdated,
        Self::CustomerDeleted,
        Self::Unknown,
    ];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event lifecycle state.
///
/// `received → queued → processing → {completed | dead_lettered}`, with a
/// transient-failure loop back to `queued`. `dead_lettered` is terminal
/// except for explicit administrative replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Received,
    Queued,
    Processing,
    Completed,
    DeadLettered,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A webhook event as persisted in the event log.
///
/// The event log row is the single point of truth for status and attempt
/// count. `version` is an optimistic-concurrency counter: every state
/// transition bumps it, and a transition only applies if the caller holds
/// the current value. Two workers racing on the same item cannot both win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider-assigned external event id (idempotency key).
    pub id: String,
    pub kind: EventKind,
    /// Raw request body, retained for processing, audit, and replay.
    pub payload: String,
    pub received_at: i64,
    pub signature_valid: bool,
    pub status: EventStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// Accumulated failure history as a JSON array, carried into the
    /// dead-letter record.
    pub error_history: String,
    /// Higher dequeues first.
    pub priority: u8,
    pub version: i64,
    pub completed_at: Option<i64>,
}

/// Input for recording a freshly ingested event.
#[derive(Debug, Clone)]
pub struct CreateEvent {
    pub id: String,
    pub kind: EventKind,
    pub payload: String,
    pub signature_valid: bool,
    pub priority: u8,
}

/// Provider webhook envelope. The inner object is parsed per event kind.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Provider-side creation time (unix seconds).
    pub created_at: Option<i64>,
    pub data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
pub struct EnvelopeData {
    pub object: serde_json::Value,
}
