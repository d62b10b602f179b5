//! Refund event handling.
//!
//! Upserts the local refund mirror. A refund arriving before its payment's
//! own events is valid: the mirror rows are independent, ordered only by
//! the provider's state timestamps.

use super::{db_err, parse_envelope, parse_object, ProcessContext};
use crate::db::queries;
use crate::error::ProcessError;
use crate::models::{RefundObject, WebhookEvent};

pub fn handle(ctx: &ProcessContext, event: &WebhookEvent) -> Result<(), ProcessError> {
    let envelope = parse_envelope(event)?;
    let refund: RefundObject = parse_object(&envelope)?;

    if refund.amount_cents < 0 {
        return Err(ProcessError::Validation(format!(
            "negative amount for refund {}",
            refund.id
        )));
    }
    if refund.payment_id.is_empty() {
        return Err(ProcessError::Validation(format!(
            "refund {} missing payment reference",
            refund.id
        )));
    }

    ctx.breakers
        .call("db", || queries::upsert_refund(ctx.conn, &refund).map_err(db_err))?;

    tracing::info!(
        refund_id = %refund.id,
        payment_id = %refund.payment_id,
        status = %refund.status,
        "refund recorded"
    );
    Ok(())
}
