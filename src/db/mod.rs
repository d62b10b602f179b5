pub mod queries;
pub mod schema;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::breaker::BreakerRegistry;
use crate::config::{Config, OverflowPolicy, PriorityMap};
use crate::error::Result;
use crate::notify::Notifier;
use crate::queue::EventQueue;
use crate::rate_limit::RateLimiter;
use crate::signature::SignatureVerifier;
use crate::store::IdempotencyStore;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared application state handed to every handler and worker.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub queue: Arc<EventQueue>,
    pub breakers: Arc<BreakerRegistry>,
    pub verifier: Arc<SignatureVerifier>,
    pub rate_limiter: Arc<RateLimiter>,
    pub idempotency: Arc<IdempotencyStore>,
    pub notifier: Notifier,
    pub priorities: PriorityMap,
    pub overflow_policy: OverflowPolicy,
    pub max_attempts: i64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub processing_timeout_secs: u64,
    pub worker_count: usize,
    pub admin_key: Option<String>,
    pub started_at: i64,
}

pub fn create_pool(database_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        // WAL lets webhook ingestion and workers write concurrently;
        // busy_timeout turns lock contention into a wait instead of an error.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
    });

    let pool = Pool::builder().max_size(16).build(manager)?;

    let conn = pool.get()?;
    schema::init_db(&conn)?;

    Ok(pool)
}

impl AppState {
    pub fn new(
        config: &Config,
        db: DbPool,
        queue: Arc<EventQueue>,
        breakers: Arc<BreakerRegistry>,
        rate_limiter: Arc<RateLimiter>,
        idempotency: Arc<IdempotencyStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            db,
            queue,
            breakers,
            verifier: Arc::new(SignatureVerifier::new(
                config.webhook_secret.clone(),
                config.signature_tolerance_secs,
            )),
            rate_limiter,
            idempotency,
            notifier,
            priorities: config.priorities.clone(),
            overflow_policy: config.overflow_policy,
            max_attempts: config.max_attempts,
            backoff_base_ms: config.backoff_base_ms,
            backoff_cap_ms: config.backoff_cap_ms,
            processing_timeout_secs: config.processing_timeout_secs,
            worker_count: config.worker_count,
            admin_key: config.admin_key.clone(),
            started_at: queries::now(),
        }
    }
}
