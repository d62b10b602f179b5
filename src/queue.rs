//! In-process priority queue with delayed redelivery.
//!
//! Ready items dequeue highest priority first, FIFO within a priority.
//! Items rescheduled after a transient failure sit in a delayed heap until
//! their backoff elapses, then promote to the ready heap. Workers park on a
//! [`Notify`] instead of polling.
//!
//! The buffer is bounded: `try_enqueue` refuses new work past capacity so an
//! extended outage cannot grow memory without limit. Requeues of items
//! already admitted bypass the bound, otherwise a full queue could strand an
//! in-flight retry.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::models::EventKind;

/// Retry delay before attempt `attempts + 1`, in milliseconds.
///
/// Exponential from `base_ms` doubling per attempt, plus up to 25% random
/// jitter, saturating at `cap_ms`. Delays are non-decreasing across
/// attempts: below the cap 1.25x of one step stays under the next doubled
/// step, and at the cap every later delay is exactly `cap_ms`.
pub fn backoff_delay_ms(attempts: i64, base_ms: u64, cap_ms: u64) -> u64 {
    let exp = attempts.saturating_sub(1).min(62) as u32;
    let delay = base_ms.saturating_mul(1u64 << exp).min(cap_ms);
    let jitter = rand::thread_rng().gen_range(0..=delay / 4);
    delay.saturating_add(jitter).min(cap_ms)
}

/// Work ticket for one queued event. The heavy payload stays in the event
/// log; workers load it at claim time.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub event_id: String,
    pub kind: EventKind,
    pub priority: u8,
    /// Event-log version this ticket was cut against. A worker whose claim
    /// fails the version check drops the ticket as stale.
    pub version: i64,
}

struct ReadyItem {
    item: QueueItem,
    seq: u64,
}

impl PartialEq for ReadyItem {
    fn eq(&self, other: &Self) -> bool {
        self.item.priority == other.item.priority && self.seq == other.seq
    }
}

impl Eq for ReadyItem {}

impl Ord for ReadyItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier seq
        self.item
            .priority
            .cmp(&other.item.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct DelayedItem {
    item: QueueItem,
    due: Instant,
    seq: u64,
}

impl PartialEq for DelayedItem {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DelayedItem {}

impl Ord for DelayedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on due time
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DelayedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Counters for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub ready_depth: usize,
    pub delayed_depth: usize,
    pub capacity: usize,
    pub enqueued_total: u64,
    pub completed_total: u64,
    /// Mean processing latency over completed events, milliseconds.
    pub mean_processing_ms: Option<u64>,
}

#[derive(Default)]
struct Inner {
    ready: BinaryHeap<ReadyItem>,
    delayed: BinaryHeap<DelayedItem>,
    seq: u64,
    closed: bool,
    enqueued_total: u64,
    completed_total: u64,
    processing_ms_total: u64,
}

pub struct EventQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            capacity,
        }
    }

    fn depth_locked(inner: &Inner) -> usize {
        inner.ready.len() + inner.delayed.len()
    }

    /// Admit a new event. Fails, returning the item back, once the buffer is
    /// at capacity; the caller decides between rejecting upstream and
    /// dead-lettering per its overflow policy.
    pub fn try_enqueue(&self, item: QueueItem) -> Result<(), QueueItem> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if Self::depth_locked(&inner) >= self.capacity {
            return Err(item);
        }
        let seq = inner.seq;
        inner.seq += 1;
        inner.enqueued_total += 1;
        inner.ready.push(ReadyItem { item, seq });
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Reschedule an already-admitted item after `delay`. Not subject to the
    /// capacity bound.
    pub fn requeue_after(&self, item: QueueItem, delay: Duration) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let seq = inner.seq;
        inner.seq += 1;
        inner.delayed.push(DelayedItem {
            item,
            due: Instant::now() + delay,
            seq,
        });
        drop(inner);
        // Wake a worker so it recomputes its sleep deadline
        self.notify.notify_one();
    }

    /// Pop the highest-priority ready item, waiting if none is due yet.
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<QueueItem> {
        loop {
            let wait_until = {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                Self::promote_due(&mut inner);

                if let Some(ready) = inner.ready.pop() {
                    return Some(ready.item);
                }
                if inner.closed && inner.delayed.is_empty() {
                    return None;
                }
                inner.delayed.peek().map(|d| d.due)
            };

            let notified = self.notify.notified();
            match wait_until {
                Some(due) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn promote_due(inner: &mut Inner) {
        let now = Instant::now();
        while inner.delayed.peek().is_some_and(|d| d.due <= now) {
            let delayed = inner.delayed.pop().expect("peeked entry vanished");
            let seq = inner.seq;
            inner.seq += 1;
            inner.ready.push(ReadyItem {
                item: delayed.item,
                seq,
            });
        }
    }

    /// Record a successful completion for latency stats.
    pub fn record_completion(&self, elapsed: Duration) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.completed_total += 1;
        inner.processing_ms_total += elapsed.as_millis() as u64;
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue lock poisoned");
        QueueStats {
            ready_depth: inner.ready.len(),
            delayed_depth: inner.delayed.len(),
            capacity: self.capacity,
            enqueued_total: inner.enqueued_total,
            completed_total: inner.completed_total,
            mean_processing_ms: (inner.completed_total > 0)
                .then(|| inner.processing_ms_total / inner.completed_total),
        }
    }

    pub fn depth(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        Self::depth_locked(&inner)
    }

    /// Stop accepting waits. Workers drain remaining ready items, then their
    /// `dequeue` calls resolve to `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, priority: u8) -> QueueItem {
        QueueItem {
            event_id: id.to_string(),
            kind: EventKind::PaymentCreated,
            priority,
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_higher_priority_dequeues_first() {
        let queue = EventQueue::new(10);
        queue.try_enqueue(item("low", 10)).unwrap();
        queue.try_enqueue(item("high", 90)).unwrap();
        queue.try_enqueue(item("mid", 50)).unwrap();

        assert_eq!(queue.dequeue().await.unwrap().event_id, "high");
        assert_eq!(queue.dequeue().await.unwrap().event_id, "mid");
        assert_eq!(queue.dequeue().await.unwrap().event_id, "low");
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = EventQueue::new(10);
        queue.try_enqueue(item("first", 50)).unwrap();
        queue.try_enqueue(item("second", 50)).unwrap();
        queue.try_enqueue(item("third", 50)).unwrap();

        assert_eq!(queue.dequeue().await.unwrap().event_id, "first");
        assert_eq!(queue.dequeue().await.unwrap().event_id, "second");
        assert_eq!(queue.dequeue().await.unwrap().event_id, "third");
    }

    #[tokio::test]
    async fn test_capacity_bound_rejects() {
        let queue = EventQueue::new(2);
        queue.try_enqueue(item("a", 50)).unwrap();
        queue.try_enqueue(item("b", 50)).unwrap();

        let rejected = queue.try_enqueue(item("c", 50));
        assert_eq!(rejected.unwrap_err().event_id, "c");
    }

    #[tokio::test]
    async fn test_requeue_bypasses_capacity() {
        let queue = EventQueue::new(1);
        queue.try_enqueue(item("a", 50)).unwrap();
        // Already-admitted retry must not be turned away
        queue.requeue_after(item("b", 50), Duration::from_millis(1));
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_item_not_visible_until_due() {
        let queue = EventQueue::new(10);
        queue.requeue_after(item("later", 90), Duration::from_secs(5));
        queue.try_enqueue(item("now", 10)).unwrap();

        // Ready item wins despite lower priority: the delayed one is not due
        assert_eq!(queue.dequeue().await.unwrap().event_id, "now");
        // Paused clock auto-advances through the sleep
        assert_eq!(queue.dequeue().await.unwrap().event_id, "later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drains_then_ends() {
        let queue = EventQueue::new(10);
        queue.try_enqueue(item("a", 50)).unwrap();
        queue.close();

        assert_eq!(queue.dequeue().await.unwrap().event_id, "a");
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_wakes_waiting_dequeue() {
        let queue = std::sync::Arc::new(EventQueue::new(10));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::task::yield_now().await;
        queue.try_enqueue(item("wake", 50)).unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.event_id, "wake");
    }

    #[test]
    fn test_backoff_is_non_decreasing_and_capped() {
        for _ in 0..100 {
            let mut prev = 0;
            for attempt in 1..=10 {
                let delay = backoff_delay_ms(attempt, 1_000, 300_000);
                assert!(delay >= prev, "attempt {} regressed", attempt);
                assert!(delay <= 300_000);
                prev = delay;
            }
        }
    }

    #[test]
    fn test_backoff_saturates_at_cap_across_the_boundary() {
        // With base 1 s the exponential crosses a 300 s cap between
        // attempts 9 and 10; jittered attempt 9 must never exceed what
        // attempt 10 yields
        for _ in 0..1_000 {
            let ninth = backoff_delay_ms(9, 1_000, 300_000);
            let tenth = backoff_delay_ms(10, 1_000, 300_000);
            assert!(ninth <= 300_000);
            assert_eq!(tenth, 300_000);
            assert!(tenth >= ninth);
        }
    }

    #[test]
    fn test_backoff_first_attempt_uses_base() {
        let delay = backoff_delay_ms(1, 1_000, 300_000);
        assert!((1_000..=1_250).contains(&delay));
    }
}
