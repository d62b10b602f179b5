use std::env;
use std::str::FromStr;

use crate::models::EventKind;

/// What to do with new ingestions once the queue buffer is full.
///
/// `Reject` returns 503 at the HTTP boundary so the provider retries later;
/// `DeadLetter` accepts and parks the event immediately. Either way memory
/// stays bounded during an extended downstream outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    Reject,
    DeadLetter,
}

impl OverflowPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reject" => Some(Self::Reject),
            "dead_letter" => Some(Self::DeadLetter),
            _ => None,
        }
    }
}

/// Relative processing priority per event kind. Higher dequeues first.
///
/// The mapping is deliberately configuration, not inference: money-affecting
/// updates default above informational profile updates, unknown kinds last.
#[derive(Debug, Clone)]
pub struct PriorityMap {
    priorities: [(EventKind, u8); 8],
}

impl Default for PriorityMap {
    fn default() -> Self {
        Self {
            priorities: [
                (EventKind::PaymentCreated, 80),
                (EventKind::PaymentUpdated, 90),
                (EventKind::RefundCreated, 80),
                (EventKind::RefundUpdated, 90),
                (EventKind::CustomerCreated, 50),
                (EventKind::CustomerUpdated, 50),
                (EventKind::CustomerDeleted, 50),
                (EventKind::Unknown, 10),
            ],
        }
    }
}

impl PriorityMap {
    /// Load overrides from `INFLOW_PRIORITY_<KIND>` variables, e.g.
    /// `INFLOW_PRIORITY_PAYMENT_UPDATED=95`.
    pub fn from_env() -> Self {
        let mut map = Self::default();
        for (kind, priority) in map.priorities.iter_mut() {
            let var = format!(
                "INFLOW_PRIORITY_{}",
                kind.as_str().replace('.', "_").to_uppercase()
            );
            if let Some(p) = env::var(&var).ok().and_then(|v| v.parse().ok()) {
                *priority = p;
            }
        }
        map
    }

    pub fn for_kind(&self, kind: EventKind) -> u8 {
        self.priorities
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| *p)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,

    /// Shared secret for webhook signature verification. Never logged.
    pub webhook_secret: String,
    /// Maximum age of a signed timestamp before the request is rejected.
    pub signature_tolerance_secs: i64,

    pub rate_limit_per_minute: u64,
    pub idempotency_ttl_secs: u64,

    pub max_attempts: i64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,

    pub worker_count: usize,
    pub processing_timeout_secs: u64,

    /// Outbound order-paid notification target. None disables notifications.
    pub notify_url: Option<String>,

    /// Bearer key for the administrative endpoints. None disables them.
    pub admin_key: Option<String>,

    /// Completed event-log rows older than this are purged on startup and by
    /// the background cleanup task. 0 = never purge.
    pub event_retention_days: i64,

    pub priorities: PriorityMap,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("INFLOW_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_parse("PORT", 3000);

        let webhook_secret = env::var("INFLOW_WEBHOOK_SECRET").unwrap_or_else(|_| {
            if !dev_mode {
                tracing::warn!(
                    "INFLOW_WEBHOOK_SECRET not set, using insecure dev default"
                );
            }
            "insecure-dev-secret".to_string()
        });

        let overflow_policy = env::var("INFLOW_OVERFLOW_POLICY")
            .ok()
            .and_then(|v| OverflowPolicy::parse(&v))
            .unwrap_or(OverflowPolicy::Reject);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "inflow.db".to_string()),
            dev_mode,
            webhook_secret,
            signature_tolerance_secs: env_parse("INFLOW_SIGNATURE_TOLERANCE_SECS", 600),
            rate_limit_per_minute: env_parse("INFLOW_RATE_LIMIT_RPM", 100),
            idempotency_ttl_secs: env_parse("INFLOW_IDEMPOTENCY_TTL_SECS", 86_400),
            max_attempts: env_parse("INFLOW_MAX_ATTEMPTS", 5),
            backoff_base_ms: env_parse("INFLOW_BACKOFF_BASE_MS", 1_000),
            backoff_cap_ms: env_parse("INFLOW_BACKOFF_CAP_MS", 300_000),
            queue_capacity: env_parse("INFLOW_QUEUE_CAPACITY", 10_000),
            overflow_policy,
            worker_count: env_parse("INFLOW_WORKER_COUNT", 4),
            processing_timeout_secs: env_parse("INFLOW_PROCESSING_TIMEOUT_SECS", 30),
            notify_url: env::var("INFLOW_NOTIFY_URL").ok(),
            admin_key: env::var("INFLOW_ADMIN_KEY").ok(),
            event_retention_days: env_parse("INFLOW_EVENT_RETENTION_DAYS", 30),
            priorities: PriorityMap::from_env(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priorities_rank_money_above_profile() {
        let map = PriorityMap::default();
        assert!(map.for_kind(EventKind::PaymentUpdated) > map.for_kind(EventKind::CustomerUpdated));
        assert!(map.for_kind(EventKind::RefundUpdated) > map.for_kind(EventKind::CustomerCreated));
        assert!(map.for_kind(EventKind::CustomerUpdated) > map.for_kind(EventKind::Unknown));
    }

    #[test]
    fn test_overflow_policy_parse() {
        assert_eq!(OverflowPolicy::parse("reject"), Some(OverflowPolicy::Reject));
        assert_eq!(
            OverflowPolicy::parse("dead_letter"),
            Some(OverflowPolicy::DeadLetter)
        );
        assert_eq!(OverflowPolicy::parse("drop"), None);
    }
}
