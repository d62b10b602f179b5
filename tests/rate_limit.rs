//! Fixed-window rate limiting over the shared state store.

use std::sync::Arc;
use std::time::Duration;

use inflow::rate_limit::RateLimiter;
use inflow::store::MemoryStore;

#[test]
fn test_requests_within_limit_allowed() {
    let limiter = RateLimiter::per_minute(Arc::new(MemoryStore::new()), 5);
    for _ in 0..5 {
        assert!(limiter.allow("merchant-a"));
    }
}

#[test]
fn test_requests_over_limit_blocked() {
    let limiter = RateLimiter::per_minute(Arc::new(MemoryStore::new()), 3);
    for _ in 0..3 {
        assert!(limiter.allow("merchant-a"));
    }
    assert!(!limiter.allow("merchant-a"));
    assert!(!limiter.allow("merchant-a"));
}

#[test]
fn test_identities_limited_independently() {
    let limiter = RateLimiter::per_minute(Arc::new(MemoryStore::new()), 2);
    assert!(limiter.allow("merchant-a"));
    assert!(limiter.allow("merchant-a"));
    assert!(!limiter.allow("merchant-a"));

    // A different source is unaffected by the exhausted one
    assert!(limiter.allow("merchant-b"));
    assert!(limiter.allow("198.51.100.4"));
}

#[test]
fn test_window_resets() {
    let limiter = RateLimiter::new(
        Arc::new(MemoryStore::new()),
        2,
        Duration::from_millis(50),
    );
    assert!(limiter.allow("merchant-a"));
    assert!(limiter.allow("merchant-a"));
    assert!(!limiter.allow("merchant-a"));

    std::thread::sleep(Duration::from_millis(60));
    assert!(limiter.allow("merchant-a"));
}

#[test]
fn test_concurrent_requests_cannot_exceed_limit() {
    let limiter = Arc::new(RateLimiter::per_minute(Arc::new(MemoryStore::new()), 50));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = limiter.clone();
            std::thread::spawn(move || {
                let mut allowed = 0u64;
                for _ in 0..25 {
                    if limiter.allow("merchant-a") {
                        allowed += 1;
                    }
                }
                allowed
            })
        })
        .collect();

    let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // 200 attempts against a limit of 50: exactly the limit gets through
    assert_eq!(total, 50);
}
