//! Shared test fixtures: in-memory database, app state, signed requests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use r2d2_sqlite::SqliteConnectionManager;

use inflow::breaker::{BreakerConfig, BreakerRegistry};
use inflow::config::{Config, OverflowPolicy, PriorityMap};
use inflow::db::{schema, AppState, DbPool};
use inflow::notify::Notifier;
use inflow::queue::EventQueue;
use inflow::rate_limit::RateLimiter;
use inflow::signature;
use inflow::store::{IdempotencyStore, MemoryStore, StateStore};

pub const TEST_SECRET: &str = "test-webhook-secret";

/// Single shared in-memory connection so every pool checkout sees the same
/// database.
pub fn setup_test_db() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
    schema::init_db(&pool.get().unwrap()).unwrap();
    pool
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: ":memory:".to_string(),
        dev_mode: true,
        webhook_secret: TEST_SECRET.to_string(),
        signature_tolerance_secs: 600,
        rate_limit_per_minute: 1_000,
        idempotency_ttl_secs: 3_600,
        max_attempts: 3,
        backoff_base_ms: 10,
        backoff_cap_ms: 100,
        queue_capacity: 100,
        overflow_policy: OverflowPolicy::Reject,
        worker_count: 2,
        processing_timeout_secs: 5,
        notify_url: None,
        admin_key: None,
        priorities: PriorityMap::default(),
        event_retention_days: 30,
    }
}

/// Full application state over an in-memory database. Must run inside a
/// tokio runtime.
pub fn setup_state(config: &Config) -> AppState {
    let pool = setup_test_db();
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let queue = Arc::new(EventQueue::new(config.queue_capacity));
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
    let rate_limiter = Arc::new(RateLimiter::per_minute(
        store.clone(),
        config.rate_limit_per_minute,
    ));
    let idempotency = Arc::new(IdempotencyStore::new(
        store.clone(),
        Duration::from_secs(config.idempotency_ttl_secs),
    ));
    let notifier = Notifier::new(config.notify_url.clone(), breakers.clone());

    AppState::new(
        config,
        pool,
        queue,
        breakers,
        rate_limiter,
        idempotency,
        notifier,
    )
}

pub fn peer_addr() -> SocketAddr {
    "203.0.113.7:44321".parse().unwrap()
}

/// Headers carrying a valid signature for `body`, plus an optional
/// merchant id.
pub fn signed_headers(body: &str, merchant: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let header = signature::sign(body.as_bytes(), TEST_SECRET, chrono::Utc::now().timestamp());
    headers.insert("x-webhook-signature", header.parse().unwrap());
    if let Some(merchant) = merchant {
        headers.insert("x-merchant-id", merchant.parse().unwrap());
    }
    headers
}

pub fn payment_envelope(
    event_id: &str,
    payment_id: &str,
    status: &str,
    order_id: Option<&str>,
    updated_at: i64,
) -> String {
    serde_json::json!({
        "event_id": event_id,
        "type": "payment.updated",
        "created_at": updated_at,
        "data": {
            "object": {
                "id": payment_id,
                "order_id": order_id,
                "customer_id": null,
                "status": status,
                "amount_cents": 2500,
                "currency": "USD",
                "updated_at": updated_at,
            }
        }
    })
    .to_string()
}

pub fn refund_envelope(event_id: &str, refund_id: &str, payment_id: &str, updated_at: i64) -> String {
    serde_json::json!({
        "event_id": event_id,
        "type": "refund.created",
        "created_at": updated_at,
        "data": {
            "object": {
                "id": refund_id,
                "payment_id": payment_id,
                "status": "pending",
                "amount_cents": 1000,
                "currency": "USD",
                "updated_at": updated_at,
            }
        }
    })
    .to_string()
}

pub fn customer_envelope(event_id: &str, event_type: &str, customer_id: &str, updated_at: i64) -> String {
    serde_json::json!({
        "event_id": event_id,
        "type": event_type,
        "created_at": updated_at,
        "data": {
            "object": {
                "id": customer_id,
                "email": "jo@example.com",
                "name": "Jo Example",
                "updated_at": updated_at,
            }
        }
    })
    .to_string()
}

pub fn insert_order(pool: &DbPool, order_id: &str) {
    let conn = pool.get().unwrap();
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO store_orders (id, paid, created_at, updated_at) VALUES (?1, 0, ?2, ?2)",
        rusqlite::params![order_id, now],
    )
    .unwrap();
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_for(check: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
