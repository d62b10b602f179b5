//! Customer event handling.
//!
//! Create and update share an upsert path; deletion is a soft flag so a
//! late update cannot resurrect a deleted customer with stale data.

use serde::Deserialize;

use super::{db_err, parse_envelope, parse_object, ProcessContext};
use crate::db::queries;
use crate::error::ProcessError;
use crate::models::{CustomerObject, WebhookEvent};

pub fn handle_upsert(ctx: &ProcessContext, event: &WebhookEvent) -> Result<(), ProcessError> {
    let envelope = parse_envelope(event)?;
    let customer: CustomerObject = parse_object(&envelope)?;

    if customer.id.is_empty() {
        return Err(ProcessError::Validation("customer missing id".to_string()));
    }

    ctx.breakers
        .call("db", || queries::upsert_customer(ctx.conn, &customer).map_err(db_err))?;

    tracing::debug!(customer_id = %customer.id, "customer upserted");
    Ok(())
}

/// Deletion payloads carry little more than the id.
#[derive(Debug, Deserialize)]
struct DeletedCustomer {
    id: String,
    updated_at: Option<i64>,
}

pub fn handle_delete(ctx: &ProcessContext, event: &WebhookEvent) -> Result<(), ProcessError> {
    let envelope = parse_envelope(event)?;
    let deleted: DeletedCustomer = parse_object(&envelope)?;

    if deleted.id.is_empty() {
        return Err(ProcessError::Validation("customer missing id".to_string()));
    }

    // Fall back to the envelope's creation time when the object carries no
    // state timestamp of its own.
    let state_updated_at = deleted
        .updated_at
        .or(envelope.created_at)
        .unwrap_or_else(queries::now);

    ctx.breakers.call("db", || {
        queries::mark_customer_deleted(ctx.conn, &deleted.id, state_updated_at).map_err(db_err)
    })?;

    tracing::debug!(customer_id = %deleted.id, "customer soft-deleted");
    Ok(())
}
