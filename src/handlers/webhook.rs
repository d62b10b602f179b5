//! Webhook ingestion endpoint.
//!
//! The response code is the contract with the provider: 200 acknowledges
//! (including duplicates and malformed-but-authentic payloads), 401 rejects
//! bad signatures, 429 sheds load per source, 503 asks for a later retry
//! when the buffer is full. Acknowledgement happens after the event is
//! durably recorded and queued, never after processing.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{CreateEvent, EventKind, WebhookEnvelope};
use crate::queue::QueueItem;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const MERCHANT_HEADER: &str = "x-merchant-id";

pub async fn receive(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str)> {
    // Authentication first: nothing below runs for an unsigned request
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let outcome = state.verifier.verify(&body, signature);
    if !outcome.is_valid() {
        tracing::warn!(source = %addr.ip(), reason = outcome.reason(), "webhook signature rejected");
        return Err(AppError::Unauthorized);
    }

    // Rate limit by merchant id when the provider sends one, else peer IP
    let identity = headers
        .get(MERCHANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string());

    if !state.rate_limiter.allow(&identity) {
        tracing::warn!(%identity, "webhook rate limited");
        return Err(AppError::RateLimited);
    }

    // An authentic but unparseable delivery is acknowledged, not retried:
    // the provider re-sending the same bytes cannot help
    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(source = %addr.ip(), error = %e, "malformed webhook payload acknowledged");
            return Ok((StatusCode::OK, "acknowledged"));
        }
    };
    if envelope.event_id.is_empty() {
        tracing::warn!(source = %addr.ip(), "webhook payload missing event id, acknowledged");
        return Ok((StatusCode::OK, "acknowledged"));
    }

    if state.idempotency.check_and_record(&envelope.event_id) {
        tracing::debug!(event_id = %envelope.event_id, "duplicate webhook suppressed");
        return Ok((StatusCode::OK, "duplicate"));
    }

    let kind = EventKind::parse(&envelope.event_type);
    let create = CreateEvent {
        id: envelope.event_id.clone(),
        kind,
        payload: String::from_utf8_lossy(&body).into_owned(),
        signature_valid: true,
        priority: state.priorities.for_kind(kind),
    };

    match persist_and_queue(&state, &create) {
        Ok(Admitted::Accepted) => {
            tracing::info!(
                event_id = %create.id,
                kind = %kind,
                priority = create.priority,
                "webhook accepted"
            );
            Ok((StatusCode::OK, "accepted"))
        }
        Ok(Admitted::Duplicate) => {
            tracing::debug!(event_id = %create.id, "duplicate webhook found in event log");
            Ok((StatusCode::OK, "duplicate"))
        }
        Ok(Admitted::Rejected) => {
            tracing::warn!(event_id = %create.id, "queue full, rejecting webhook");
            Err(AppError::QueueFull)
        }
        Ok(Admitted::Parked) => {
            tracing::warn!(event_id = %create.id, "queue full, event dead-lettered");
            Ok((StatusCode::OK, "accepted"))
        }
        Err(e) => {
            // The provider redelivers on a non-success response; the
            // idempotency record from this failed attempt must not suppress
            // that redelivery
            state.idempotency.purge(&create.id);
            Err(e)
        }
    }
}

enum Admitted {
    Accepted,
    Duplicate,
    Rejected,
    Parked,
}

fn persist_and_queue(state: &AppState, create: &CreateEvent) -> Result<Admitted> {
    let mut conn = state.db.get()?;

    // The event log is the durable cross-check behind the in-memory
    // idempotency store. An existing row is not automatically a duplicate:
    // a prior ingestion may have failed between insert and queue, leaving
    // it in `received`, and the redelivery resumes it.
    let inserted = queries::insert_event(&conn, create)?;
    let Some(version) = queries::mark_queued(&conn, &create.id)? else {
        return Ok(Admitted::Duplicate);
    };
    if !inserted {
        tracing::info!(event_id = %create.id, "resuming interrupted ingestion");
    }

    let ticket = QueueItem {
        event_id: create.id.clone(),
        kind: create.kind,
        priority: create.priority,
        version,
    };

    if let Err(ticket) = state.queue.try_enqueue(ticket) {
        match state.overflow_policy {
            crate::config::OverflowPolicy::Reject => {
                // Roll back so the provider's later retry is not mistaken
                // for a duplicate
                queries::delete_event(&conn, &ticket.event_id)?;
                state.idempotency.purge(&ticket.event_id);
                return Ok(Admitted::Rejected);
            }
            crate::config::OverflowPolicy::DeadLetter => {
                let event = queries::get_event(&conn, &ticket.event_id)?.ok_or_else(|| {
                    AppError::Internal("event vanished during overflow handling".to_string())
                })?;
                queries::dead_letter_event(&mut conn, &event, "overflow", "queue at capacity")?;
                return Ok(Admitted::Parked);
            }
        }
    }

    Ok(Admitted::Accepted)
}
