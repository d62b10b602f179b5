//! Injectable state store for ingestion-path bookkeeping.
//!
//! Idempotency suppression and rate-limit counters are shared mutable state
//! touched by every concurrent ingestion request. Both sit behind the
//! [`StateStore`] trait (atomic insert-if-absent, windowed increment) so a
//! durable, shareable backing store can replace the in-memory one in
//! production without touching call sites.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Atomic check-and-set primitives for ingestion-path state.
pub trait StateStore: Send + Sync {
    /// Insert `key` if absent, with a TTL. Returns true if this call
    /// inserted (first sighting). Two concurrent calls for the same key
    /// yield exactly one `true`.
    fn insert_if_absent(&self, key: &str, ttl: Duration) -> bool;

    /// Atomically increment the counter for `key` within its current fixed
    /// window, returning the post-increment count. A new window starts once
    /// `window` has elapsed since the window began.
    fn increment_window(&self, key: &str, window: Duration) -> u64;

    /// Expiry time (unix millis) of an unexpired key, if present.
    fn expiry(&self, key: &str) -> Option<i64>;

    /// Remove a key. Returns true if it was present and unexpired.
    fn remove(&self, key: &str) -> bool;

    /// Drop expired entries. Called periodically by the cleanup task.
    fn purge_expired(&self);
}

/// Process-local store backed by mutex-protected maps.
#[derive(Default)]
pub struct MemoryStore {
    /// key -> expires_at (unix millis)
    entries: Mutex<HashMap<String, i64>>,
    /// key -> (window_started_at millis, count)
    counters: Mutex<HashMap<String, (i64, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn insert_if_absent(&self, key: &str, ttl: Duration) -> bool {
        let now = now_millis();
        let mut entries = self.entries.lock().expect("state store lock poisoned");
        match entries.get(key) {
            Some(&expires_at) if expires_at > now => false,
            _ => {
                entries.insert(key.to_string(), now + ttl.as_millis() as i64);
                true
            }
        }
    }

    fn increment_window(&self, key: &str, window: Duration) -> u64 {
        let now = now_millis();
        let window_ms = window.as_millis() as i64;
        let mut counters = self.counters.lock().expect("state store lock poisoned");
        let entry = counters.entry(key.to_string()).or_insert((now, 0));
        if now - entry.0 >= window_ms {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1
    }

    fn expiry(&self, key: &str) -> Option<i64> {
        let now = now_millis();
        let entries = self.entries.lock().expect("state store lock poisoned");
        entries
            .get(key)
            .copied()
            .filter(|&expires_at| expires_at > now)
    }

    fn remove(&self, key: &str) -> bool {
        let now = now_millis();
        let mut entries = self.entries.lock().expect("state store lock poisoned");
        match entries.remove(key) {
            Some(expires_at) => expires_at > now,
            None => false,
        }
    }

    fn purge_expired(&self) {
        let now = now_millis();
        self.entries
            .lock()
            .expect("state store lock poisoned")
            .retain(|_, &mut expires_at| expires_at > now);
        // Counters older than an hour belong to long-dead windows
        self.counters
            .lock()
            .expect("state store lock poisoned")
            .retain(|_, &mut (started, _)| now - started < 3_600_000);
    }
}

/// Suppresses reprocessing of previously seen event ids within a TTL.
///
/// Best-effort and time-bounded: the persisted event log is the durable
/// cross-check, and processor side effects are duplicate-safe regardless.
pub struct IdempotencyStore {
    store: std::sync::Arc<dyn StateStore>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(store: std::sync::Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Atomically record an event id, returning true if it is a duplicate
    /// (already seen within the TTL).
    pub fn check_and_record(&self, event_id: &str) -> bool {
        !self.store.insert_if_absent(&Self::key(event_id), self.ttl)
    }

    /// Expiry time (unix seconds) of an event id's record, if still held.
    pub fn inspect(&self, event_id: &str) -> Option<i64> {
        self.store.expiry(&Self::key(event_id)).map(|ms| ms / 1_000)
    }

    /// Administrative purge of a single record. Returns true if it existed.
    pub fn purge(&self, event_id: &str) -> bool {
        self.store.remove(&Self::key(event_id))
    }

    fn key(event_id: &str) -> String {
        format!("idem:{}", event_id)
    }
}
