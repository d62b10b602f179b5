//! Payment event handling.
//!
//! Upserts the local payment mirror and, when the provider reports the
//! payment completed against a known order, flips that order to paid and
//! fires the order-paid notification.

use super::{db_err, parse_envelope, parse_object, ProcessContext};
use crate::db::queries;
use crate::error::ProcessError;
use crate::models::{PaymentObject, WebhookEvent};

pub fn handle(ctx: &ProcessContext, event: &WebhookEvent) -> Result<(), ProcessError> {
    let envelope = parse_envelope(event)?;
    let payment: PaymentObject = parse_object(&envelope)?;

    if payment.amount_cents < 0 {
        return Err(ProcessError::Validation(format!(
            "negative amount for payment {}",
            payment.id
        )));
    }

    let order_paid = ctx.breakers.call("db", || {
        queries::upsert_payment(ctx.conn, &payment).map_err(db_err)?;

        if payment.status == "completed" {
            if let Some(order_id) = &payment.order_id {
                let known =
                    queries::mark_order_paid(ctx.conn, order_id, &payment.id).map_err(db_err)?;
                if !known {
                    return Err(ProcessError::Permanent(format!(
                        "payment {} references unknown order {}",
                        payment.id, order_id
                    )));
                }
                return Ok(Some(order_id.clone()));
            }
        }
        Ok(None)
    })?;

    if let Some(order_id) = order_paid {
        tracing::info!(
            payment_id = %payment.id,
            order_id = %order_id,
            amount_cents = payment.amount_cents,
            "order marked paid"
        );
        ctx.notifier.order_paid(&order_id, &payment.id);
    }

    Ok(())
}
