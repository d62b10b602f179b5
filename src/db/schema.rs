use rusqlite::Connection;

use crate::error::Result;

/// Create all tables and indexes. Idempotent, run at startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Durable event log. One row per accepted webhook delivery; the row
        -- is the point of truth for status, attempts, and version.
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            received_at INTEGER NOT NULL,
            signature_valid INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'received',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            error_history TEXT NOT NULL DEFAULT '[]',
            priority INTEGER NOT NULL DEFAULT 50,
            version INTEGER NOT NULL DEFAULT 0,
            completed_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_webhook_events_status
            ON webhook_events(status);
        CREATE INDEX IF NOT EXISTS idx_webhook_events_received_at
            ON webhook_events(received_at);

        -- Events that exhausted retries or failed permanently.
        CREATE TABLE IF NOT EXISTS dead_letters (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            error_history TEXT NOT NULL DEFAULT '[]',
            dead_lettered_at INTEGER NOT NULL,
            replayed_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_dead_letters_event_id
            ON dead_letters(event_id);

        -- Local mirrors of provider state, upserted last-writer-wins by
        -- state_updated_at.
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            order_id TEXT,
            customer_id TEXT,
            status TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            state_updated_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS refunds (
            id TEXT PRIMARY KEY,
            payment_id TEXT NOT NULL,
            status TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            state_updated_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_refunds_payment_id
            ON refunds(payment_id);

        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            email TEXT,
            name TEXT,
            deleted INTEGER NOT NULL DEFAULT 0,
            state_updated_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS store_orders (
            id TEXT PRIMARY KEY,
            payment_id TEXT,
            paid INTEGER NOT NULL DEFAULT 0,
            paid_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}
