use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{
    CreateEvent, Customer, CustomerObject, DeadLetter, EventKind, EventStatus, Payment,
    PaymentObject, Refund, RefundObject, StoreOrder, WebhookEvent,
};

/// Current unix timestamp in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Generate a unique ID for database records.
pub fn gen_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn event_from_row(row: &Row) -> rusqlite::Result<WebhookEvent> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    Ok(WebhookEvent {
        id: row.get("id")?,
        kind: EventKind::parse(&kind),
        payload: row.get("payload")?,
        received_at: row.get("received_at")?,
        signature_valid: row.get("signature_valid")?,
        status: EventStatus::from_str(&status).unwrap_or(EventStatus::Received),
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        error_history: row.get("error_history")?,
        priority: row.get::<_, i64>("priority")? as u8,
        version: row.get("version")?,
        completed_at: row.get("completed_at")?,
    })
}

// ===== Event log =====

/// Record a freshly ingested event. Returns false if an event with this id
/// is already in the log (duplicate delivery that slipped past the
/// in-memory idempotency check, e.g. after a restart).
pub fn insert_event(conn: &Connection, event: &CreateEvent) -> Result<bool> {
    let rows = conn.execute(
        "INSERT OR IGNORE INTO webhook_events
            (id, kind, payload, received_at, signature_valid, status, priority)
         VALUES (?1, ?2, ?3, ?4, ?5, 'received', ?6)",
        params![
            event.id,
            event.kind.as_str(),
            event.payload,
            now(),
            event.signature_valid,
            event.priority as i64,
        ],
    )?;
    Ok(rows > 0)
}

pub fn get_event(conn: &Connection, id: &str) -> Result<Option<WebhookEvent>> {
    let event = conn
        .query_row(
            "SELECT * FROM webhook_events WHERE id = ?1",
            params![id],
            event_from_row,
        )
        .optional()?;
    Ok(event)
}

/// Hard-delete an event row. Used when a `reject` overflow rolls back an
/// ingestion that could not be queued, so the provider's later retry is not
/// treated as a duplicate.
pub fn delete_event(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn.execute("DELETE FROM webhook_events WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

/// Move a received (or replayed) event to queued, returning the new version
/// for the work ticket. Returns None if the event is not in a queueable
/// state.
pub fn mark_queued(conn: &Connection, id: &str) -> Result<Option<i64>> {
    let version = conn
        .query_row(
            "UPDATE webhook_events
             SET status = 'queued', version = version + 1
             WHERE id = ?1 AND status = 'received'
             RETURNING version",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

/// Claim a queued event for processing. The version check makes the claim
/// exclusive: of two workers holding the same ticket, at most one gets the
/// row back, the other sees None and drops the ticket as stale.
pub fn try_claim_event(
    conn: &Connection,
    id: &str,
    expected_version: i64,
) -> Result<Option<WebhookEvent>> {
    let event = conn
        .query_row(
            "UPDATE webhook_events
             SET status = 'processing', attempts = attempts + 1, version = version + 1
             WHERE id = ?1 AND status = 'queued' AND version = ?2
             RETURNING *",
            params![id, expected_version],
            event_from_row,
        )
        .optional()?;
    Ok(event)
}

pub fn complete_event(conn: &Connection, id: &str, expected_version: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE webhook_events
         SET status = 'completed', completed_at = ?2, last_error = NULL,
             version = version + 1
         WHERE id = ?1 AND status = 'processing' AND version = ?3",
        params![id, now(), expected_version],
    )?;
    Ok(rows > 0)
}

fn push_error_entry(history: &str, attempt: i64, classification: &str, message: &str) -> String {
    let mut entries: Vec<serde_json::Value> =
        serde_json::from_str(history).unwrap_or_default();
    entries.push(serde_json::json!({
        "attempt": attempt,
        "at": now(),
        "classification": classification,
        "message": message,
    }));
    serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
}

/// Put a transiently failed event back to queued with its failure appended
/// to the history. Returns the new version for the retry ticket.
pub fn reschedule_event(
    conn: &Connection,
    event: &WebhookEvent,
    classification: &str,
    message: &str,
) -> Result<Option<i64>> {
    let history = push_error_entry(&event.error_history, event.attempts, classification, message);
    let version = conn
        .query_row(
            "UPDATE webhook_events
             SET status = 'queued', last_error = ?2, error_history = ?3,
                 version = version + 1
             WHERE id = ?1 AND status = 'processing' AND version = ?4
             RETURNING version",
            params![event.id, message, history, event.version],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

/// Close out an event whose payload failed validation. Acknowledged, never
/// retried; the error is kept on the row for inspection.
pub fn mark_validation_failed(
    conn: &Connection,
    event: &WebhookEvent,
    message: &str,
) -> Result<bool> {
    let history = push_error_entry(&event.error_history, event.attempts, "validation", message);
    let rows = conn.execute(
        "UPDATE webhook_events
         SET status = 'completed', completed_at = ?2, last_error = ?3,
             error_history = ?4, version = version + 1
         WHERE id = ?1 AND status = 'processing' AND version = ?5",
        params![event.id, now(), message, history, event.version],
    )?;
    Ok(rows > 0)
}

/// Park an event in the dead-letter table and mark the log row. The two
/// writes commit atomically.
pub fn dead_letter_event(
    conn: &mut Connection,
    event: &WebhookEvent,
    classification: &str,
    message: &str,
) -> Result<bool> {
    let history = push_error_entry(&event.error_history, event.attempts, classification, message);

    let tx = conn.transaction()?;
    let rows = tx.execute(
        "UPDATE webhook_events
         SET status = 'dead_lettered', last_error = ?2, error_history = ?3,
             version = version + 1
         WHERE id = ?1 AND status IN ('processing', 'queued') AND version = ?4",
        params![event.id, message, history, event.version],
    )?;
    if rows == 0 {
        return Ok(false);
    }
    tx.execute(
        "INSERT INTO dead_letters
            (id, event_id, kind, payload, attempts, error_history, dead_lettered_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            gen_id(),
            event.id,
            event.kind.as_str(),
            event.payload,
            event.attempts,
            history,
            now(),
        ],
    )?;
    tx.commit()?;
    Ok(rows > 0)
}

pub fn get_dead_letter(conn: &Connection, id: &str) -> Result<Option<DeadLetter>> {
    let dl = conn
        .query_row(
            "SELECT * FROM dead_letters WHERE id = ?1",
            params![id],
            dead_letter_from_row,
        )
        .optional()?;
    Ok(dl)
}

pub fn list_dead_letters(conn: &Connection, limit: i64) -> Result<Vec<DeadLetter>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM dead_letters ORDER BY dead_lettered_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], dead_letter_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn dead_letter_from_row(row: &Row) -> rusqlite::Result<DeadLetter> {
    Ok(DeadLetter {
        id: row.get("id")?,
        event_id: row.get("event_id")?,
        kind: row.get("kind")?,
        payload: row.get("payload")?,
        attempts: row.get("attempts")?,
        error_history: row.get("error_history")?,
        dead_lettered_at: row.get("dead_lettered_at")?,
        replayed_at: row.get("replayed_at")?,
    })
}

/// Requeue a dead-lettered event with a fresh retry budget. The dead-letter
/// row is kept, stamped with the replay time. Returns the new work ticket
/// fields (event id, kind, priority, version), or None if the dead letter
/// does not exist or its event row is gone.
pub fn replay_dead_letter(
    conn: &mut Connection,
    dead_letter_id: &str,
) -> Result<Option<(String, EventKind, u8, i64)>> {
    let tx = conn.transaction()?;

    let event_id: Option<String> = tx
        .query_row(
            "UPDATE dead_letters SET replayed_at = ?2
             WHERE id = ?1
             RETURNING event_id",
            params![dead_letter_id, now()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(event_id) = event_id else {
        return Ok(None);
    };

    let ticket = tx
        .query_row(
            "UPDATE webhook_events
             SET status = 'queued', attempts = 0, last_error = NULL,
                 version = version + 1
             WHERE id = ?1 AND status = 'dead_lettered'
             RETURNING kind, priority, version",
            params![event_id],
            |row| {
                let kind: String = row.get(0)?;
                let priority: i64 = row.get(1)?;
                let version: i64 = row.get(2)?;
                Ok((EventKind::parse(&kind), priority as u8, version))
            },
        )
        .optional()?;
    let Some((kind, priority, version)) = ticket else {
        return Ok(None);
    };

    tx.commit()?;
    Ok(Some((event_id, kind, priority, version)))
}

/// Requeue events left in flight by a previous run, returning fresh work
/// tickets. Rows in 'processing' were claimed by workers that no longer
/// exist; rows in 'queued' lost their in-memory tickets; rows in 'received'
/// were accepted by an ingestion that died before queueing them.
pub fn requeue_stuck_events(conn: &Connection) -> Result<Vec<crate::queue::QueueItem>> {
    let mut stmt = conn.prepare(
        "UPDATE webhook_events
         SET status = 'queued', version = version + 1
         WHERE status IN ('received', 'queued', 'processing')
         RETURNING id, kind, priority, version",
    )?;
    let rows = stmt.query_map([], |row| {
        let kind: String = row.get(1)?;
        Ok(crate::queue::QueueItem {
            event_id: row.get(0)?,
            kind: EventKind::parse(&kind),
            priority: row.get::<_, i64>(2)? as u8,
            version: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Event counts per lifecycle status, for the status endpoint.
pub fn counts_by_status(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM webhook_events GROUP BY status ORDER BY status",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Delete completed event-log rows older than the retention window.
pub fn purge_old_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - retention_days * 86_400;
    let rows = conn.execute(
        "DELETE FROM webhook_events WHERE status = 'completed' AND completed_at < ?1",
        params![cutoff],
    )?;
    Ok(rows)
}

// ===== Provider state mirrors =====

/// Upsert a payment, last-writer-wins by the provider's state timestamp.
/// A delivery carrying older state than the stored row is a no-op.
pub fn upsert_payment(conn: &Connection, payment: &PaymentObject) -> Result<()> {
    conn.execute(
        "INSERT INTO payments
            (id, order_id, customer_id, status, amount_cents, currency,
             state_updated_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(id) DO UPDATE SET
            order_id = excluded.order_id,
            customer_id = excluded.customer_id,
            status = excluded.status,
            amount_cents = excluded.amount_cents,
            currency = excluded.currency,
            state_updated_at = excluded.state_updated_at,
            updated_at = excluded.updated_at
         WHERE excluded.state_updated_at >= payments.state_updated_at",
        params![
            payment.id,
            payment.order_id,
            payment.customer_id,
            payment.status,
            payment.amount_cents,
            payment.currency,
            payment.updated_at,
            now(),
        ],
    )?;
    Ok(())
}

pub fn get_payment(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    let payment = conn
        .query_row(
            "SELECT * FROM payments WHERE id = ?1",
            params![id],
            |row| {
                Ok(Payment {
                    id: row.get("id")?,
                    order_id: row.get("order_id")?,
                    customer_id: row.get("customer_id")?,
                    status: row.get("status")?,
                    amount_cents: row.get("amount_cents")?,
                    currency: row.get("currency")?,
                    state_updated_at: row.get("state_updated_at")?,
                    created_at: row.get("created_at")?,
                    updated_at: row.get("updated_at")?,
                })
            },
        )
        .optional()?;
    Ok(payment)
}

pub fn upsert_refund(conn: &Connection, refund: &RefundObject) -> Result<()> {
    conn.execute(
        "INSERT INTO refunds
            (id, payment_id, status, amount_cents, currency,
             state_updated_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(id) DO UPDATE SET
            payment_id = excluded.payment_id,
            status = excluded.status,
            amount_cents = excluded.amount_cents,
            currency = excluded.currency,
            state_updated_at = excluded.state_updated_at,
            updated_at = excluded.updated_at
         WHERE excluded.state_updated_at >= refunds.state_updated_at",
        params![
            refund.id,
            refund.payment_id,
            refund.status,
            refund.amount_cents,
            refund.currency,
            refund.updated_at,
            now(),
        ],
    )?;
    Ok(())
}

pub fn get_refund(conn: &Connection, id: &str) -> Result<Option<Refund>> {
    let refund = conn
        .query_row(
            "SELECT * FROM refunds WHERE id = ?1",
            params![id],
            |row| {
                Ok(Refund {
                    id: row.get("id")?,
                    payment_id: row.get("payment_id")?,
                    status: row.get("status")?,
                    amount_cents: row.get("amount_cents")?,
                    currency: row.get("currency")?,
                    state_updated_at: row.get("state_updated_at")?,
                    created_at: row.get("created_at")?,
                    updated_at: row.get("updated_at")?,
                })
            },
        )
        .optional()?;
    Ok(refund)
}

pub fn upsert_customer(conn: &Connection, customer: &CustomerObject) -> Result<()> {
    conn.execute(
        "INSERT INTO customers
            (id, email, name, deleted, state_updated_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5)
         ON CONFLICT(id) DO UPDATE SET
            email = excluded.email,
            name = excluded.name,
            state_updated_at = excluded.state_updated_at,
            updated_at = excluded.updated_at
         WHERE excluded.state_updated_at >= customers.state_updated_at
           AND customers.deleted = 0",
        params![
            customer.id,
            customer.email,
            customer.name,
            customer.updated_at,
            now(),
        ],
    )?;
    Ok(())
}

/// Soft-delete a customer. The row is kept so a late out-of-order update
/// cannot resurrect it. Deleting an unknown customer is a no-op.
pub fn mark_customer_deleted(conn: &Connection, id: &str, state_updated_at: i64) -> Result<()> {
    conn.execute(
        "UPDATE customers
         SET deleted = 1, state_updated_at = ?2, updated_at = ?3
         WHERE id = ?1 AND state_updated_at <= ?2",
        params![id, state_updated_at, now()],
    )?;
    Ok(())
}

pub fn get_customer(conn: &Connection, id: &str) -> Result<Option<Customer>> {
    let customer = conn
        .query_row(
            "SELECT * FROM customers WHERE id = ?1",
            params![id],
            |row| {
                Ok(Customer {
                    id: row.get("id")?,
                    email: row.get("email")?,
                    name: row.get("name")?,
                    deleted: row.get("deleted")?,
                    state_updated_at: row.get("state_updated_at")?,
                    created_at: row.get("created_at")?,
                    updated_at: row.get("updated_at")?,
                })
            },
        )
        .optional()?;
    Ok(customer)
}

/// Flip an order to paid when its payment completes. Idempotent: repeated
/// deliveries keep the original paid_at. Returns false when no such order
/// exists.
pub fn mark_order_paid(conn: &Connection, order_id: &str, payment_id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE store_orders
         SET paid = 1, paid_at = COALESCE(paid_at, ?3), payment_id = ?2,
             updated_at = ?3
         WHERE id = ?1",
        params![order_id, payment_id, now()],
    )?;
    Ok(rows > 0)
}

pub fn get_order(conn: &Connection, id: &str) -> Result<Option<StoreOrder>> {
    let order = conn
        .query_row(
            "SELECT * FROM store_orders WHERE id = ?1",
            params![id],
            |row| {
                Ok(StoreOrder {
                    id: row.get("id")?,
                    payment_id: row.get("payment_id")?,
                    paid: row.get("paid")?,
                    paid_at: row.get("paid_at")?,
                    created_at: row.get("created_at")?,
                    updated_at: row.get("updated_at")?,
                })
            },
        )
        .optional()?;
    Ok(order)
}
