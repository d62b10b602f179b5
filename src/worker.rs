//! Worker pool draining the event queue.
//!
//! A fixed number of workers pull tickets concurrently. Each ticket is
//! claimed against the event log with an optimistic version check before any
//! processing happens, so duplicate or stale tickets fall out harmlessly.
//! Processors run on the blocking pool under a timeout; a timed-out task may
//! still finish its entity writes, which is safe because those writes are
//! duplicate-safe and the event row transition is version-guarded.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::db::{queries, AppState};
use crate::error::ProcessError;
use crate::models::WebhookEvent;
use crate::processors::{self, ProcessContext};
use crate::queue::{backoff_delay_ms, QueueItem};

pub fn spawn_workers(state: AppState) -> Vec<JoinHandle<()>> {
    (0..state.worker_count)
        .map(|worker_id| {
            let state = state.clone();
            tokio::spawn(async move {
                tracing::debug!(worker_id, "worker started");
                while let Some(item) = state.queue.dequeue().await {
                    process_item(&state, item).await;
                }
                tracing::debug!(worker_id, "worker stopped");
            })
        })
        .collect()
}

async fn process_item(state: &AppState, item: QueueItem) {
    let started = Instant::now();

    let claimed = {
        let db = state.db.clone();
        let event_id = item.event_id.clone();
        let version = item.version;
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            queries::try_claim_event(&conn, &event_id, version)
        })
        .await
    };

    let event = match claimed {
        Ok(Ok(Some(event))) => event,
        Ok(Ok(None)) => {
            // Another worker won the claim, or the row moved on
            tracing::debug!(event_id = %item.event_id, "stale ticket dropped");
            return;
        }
        Ok(Err(e)) => {
            tracing::warn!(event_id = %item.event_id, error = %e, "claim failed, retrying ticket");
            state
                .queue
                .requeue_after(item, Duration::from_millis(state.backoff_base_ms));
            return;
        }
        Err(e) => {
            tracing::error!(event_id = %item.event_id, error = %e, "claim task panicked");
            return;
        }
    };

    let result = run_processor(state, event.clone()).await;
    route_outcome(state, event, result, started).await;
}

async fn run_processor(state: &AppState, event: WebhookEvent) -> Result<(), ProcessError> {
    let db = state.db.clone();
    let breakers = state.breakers.clone();
    let notifier = state.notifier.clone();

    let task = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(ProcessError::from)?;
        let ctx = ProcessContext {
            conn: &conn,
            breakers: &breakers,
            notifier: &notifier,
        };
        processors::process(&ctx, &event)
    });

    match tokio::time::timeout(Duration::from_secs(state.processing_timeout_secs), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ProcessError::Transient(format!("processor panicked: {}", e))),
        Err(_) => Err(ProcessError::Transient("processing timed out".to_string())),
    }
}

async fn route_outcome(
    state: &AppState,
    event: WebhookEvent,
    result: Result<(), ProcessError>,
    started: Instant,
) {
    let db = state.db.clone();
    let queue = state.queue.clone();
    let max_attempts = state.max_attempts;
    let backoff_base_ms = state.backoff_base_ms;
    let backoff_cap_ms = state.backoff_cap_ms;

    let routed = tokio::task::spawn_blocking(move || {
        let mut conn = db.get()?;
        match result {
            Ok(()) => {
                queries::complete_event(&conn, &event.id, event.version)?;
                queue.record_completion(started.elapsed());
                tracing::info!(
                    event_id = %event.id,
                    kind = %event.kind,
                    attempts = event.attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "event processed"
                );
            }
            Err(err @ ProcessError::Validation(_)) => {
                queries::mark_validation_failed(&conn, &event, &err.to_string())?;
                tracing::warn!(
                    event_id = %event.id,
                    kind = %event.kind,
                    error = %err,
                    "event failed validation, acknowledged without retry"
                );
            }
            Err(err @ ProcessError::Permanent(_)) => {
                queries::dead_letter_event(&mut conn, &event, err.classification(), &err.to_string())?;
                tracing::error!(
                    event_id = %event.id,
                    kind = %event.kind,
                    error = %err,
                    "permanent failure, event dead-lettered"
                );
            }
            Err(err) => {
                // Transient or circuit-open: retry with backoff until the
                // attempt budget runs out
                if event.attempts >= max_attempts {
                    queries::dead_letter_event(
                        &mut conn,
                        &event,
                        err.classification(),
                        &err.to_string(),
                    )?;
                    tracing::error!(
                        event_id = %event.id,
                        kind = %event.kind,
                        attempts = event.attempts,
                        error = %err,
                        "retries exhausted, event dead-lettered"
                    );
                } else if let Some(new_version) =
                    queries::reschedule_event(&conn, &event, err.classification(), &err.to_string())?
                {
                    let delay = backoff_delay_ms(event.attempts, backoff_base_ms, backoff_cap_ms);
                    tracing::warn!(
                        event_id = %event.id,
                        kind = %event.kind,
                        attempt = event.attempts,
                        delay_ms = delay,
                        error = %err,
                        "transient failure, retry scheduled"
                    );
                    queue.requeue_after(
                        QueueItem {
                            event_id: event.id.clone(),
                            kind: event.kind,
                            priority: event.priority,
                            version: new_version,
                        },
                        Duration::from_millis(delay),
                    );
                }
            }
        }
        Ok::<_, crate::error::AppError>(())
    })
    .await;

    match routed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "failed to record processing outcome"),
        Err(e) => tracing::error!(error = %e, "outcome task panicked"),
    }
}

/// Re-enqueue events stranded in flight by a previous run. Called once at
/// startup before workers start.
pub fn recover_stranded(state: &AppState) -> crate::error::Result<usize> {
    let conn = state.db.get()?;
    let tickets = queries::requeue_stuck_events(&conn)?;
    let count = tickets.len();
    for ticket in tickets {
        // Recovery bypasses the capacity bound: these events were already
        // accepted and acknowledged upstream
        state.queue.requeue_after(ticket, Duration::ZERO);
    }
    if count > 0 {
        tracing::info!(count, "recovered stranded events from previous run");
    }
    Ok(count)
}

/// Periodic housekeeping: prune old completed events and expired
/// idempotency/rate-limit state.
pub fn spawn_cleanup_task(
    state: AppState,
    store: std::sync::Arc<dyn crate::store::StateStore>,
    retention_days: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            store.purge_expired();
            if retention_days > 0 {
                let db = state.db.clone();
                let purged = tokio::task::spawn_blocking(move || {
                    let conn = db.get()?;
                    queries::purge_old_events(&conn, retention_days)
                })
                .await;
                match purged {
                    Ok(Ok(n)) if n > 0 => tracing::info!(purged = n, "pruned old events"),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "event pruning failed"),
                    Err(e) => tracing::error!(error = %e, "cleanup task panicked"),
                }
            }
        }
    })
}
