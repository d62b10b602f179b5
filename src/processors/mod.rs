//! Event processors, dispatched by event kind.
//!
//! The dispatch table is a closed match: adding a kind without a handler
//! arm is a compile error. All processors are duplicate-safe and tolerate
//! out-of-order delivery; every downstream touch goes through the circuit
//! breaker registry.

mod customer;
mod payment;
mod refund;

use rusqlite::Connection;
use serde::de::DeserializeOwned;

use crate::breaker::BreakerRegistry;
use crate::error::ProcessError;
use crate::models::{EventKind, WebhookEnvelope, WebhookEvent};
use crate::notify::Notifier;

/// Dependencies a processor may touch, threaded through from the worker.
pub struct ProcessContext<'a> {
    pub conn: &'a Connection,
    pub breakers: &'a BreakerRegistry,
    pub notifier: &'a Notifier,
}

/// Run the handler for `event`'s kind.
pub fn process(ctx: &ProcessContext, event: &WebhookEvent) -> Result<(), ProcessError> {
    match event.kind {
        EventKind::PaymentCreated | EventKind::PaymentUpdated => payment::handle(ctx, event),
        EventKind::RefundCreated | EventKind::RefundUpdated => refund::handle(ctx, event),
        EventKind::CustomerCreated | EventKind::CustomerUpdated => {
            customer::handle_upsert(ctx, event)
        }
        EventKind::CustomerDeleted => customer::handle_delete(ctx, event),
        EventKind::Unknown => {
            // Acknowledged without side effects; the payload stays in the
            // event log should a handler be added later.
            tracing::debug!(event_id = %event.id, "no handler for event kind, acknowledging");
            Ok(())
        }
    }
}

pub(crate) fn parse_envelope(event: &WebhookEvent) -> Result<WebhookEnvelope, ProcessError> {
    serde_json::from_str(&event.payload)
        .map_err(|e| ProcessError::Validation(format!("malformed envelope: {}", e)))
}

pub(crate) fn parse_object<T: DeserializeOwned>(
    envelope: &WebhookEnvelope,
) -> Result<T, ProcessError> {
    serde_json::from_value(envelope.data.object.clone())
        .map_err(|e| ProcessError::Validation(format!("malformed event object: {}", e)))
}

/// Classify a storage-layer failure for retry routing.
pub(crate) fn db_err(e: crate::error::AppError) -> ProcessError {
    match e {
        crate::error::AppError::Database(e) => e.into(),
        crate::error::AppError::Pool(e) => e.into(),
        other => ProcessError::Transient(other.to_string()),
    }
}
