//! Administrative endpoints: event inspection, dead-letter review and
//! replay, idempotency purge.
//!
//! All routes require the configured bearer key. With no key configured the
//! routes answer 404, indistinguishable from not existing.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{DeadLetter, WebhookEvent};
use crate::queue::QueueItem;

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = &state.admin_key else {
        return Err(AppError::NotFound("no such route".to_string()));
    };
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        Some(key) if key == expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

pub async fn get_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<WebhookEvent>> {
    require_admin(&state, &headers)?;
    let conn = state.db.get()?;
    let event = queries::get_event(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("event {}", id)))?;
    Ok(Json(event))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

pub async fn list_dead_letters(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<DeadLetter>>> {
    require_admin(&state, &headers)?;
    let conn = state.db.get()?;
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(queries::list_dead_letters(&conn, limit)?))
}

#[derive(Serialize)]
pub struct ReplayResponse {
    pub event_id: String,
}

/// Requeue a dead-lettered event with a fresh retry budget.
pub async fn replay_dead_letter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ReplayResponse>> {
    require_admin(&state, &headers)?;
    let mut conn = state.db.get()?;

    let (event_id, kind, priority, version) = queries::replay_dead_letter(&mut conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("dead letter {}", id)))?;

    // Operator-driven and rare, so the capacity bound does not apply
    state.queue.requeue_after(
        QueueItem {
            event_id: event_id.clone(),
            kind,
            priority,
            version,
        },
        std::time::Duration::ZERO,
    );

    tracing::info!(dead_letter_id = %id, event_id = %event_id, "dead letter replayed");
    Ok(Json(ReplayResponse { event_id }))
}

#[derive(Serialize)]
pub struct IdempotencyResponse {
    pub present: bool,
    /// Unix seconds at which the record lapses, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Inspect the idempotency record for an event id.
pub async fn get_idempotency(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<IdempotencyResponse>> {
    require_admin(&state, &headers)?;
    let expires_at = state.idempotency.inspect(&id);
    Ok(Json(IdempotencyResponse {
        present: expires_at.is_some(),
        expires_at,
    }))
}

#[derive(Serialize)]
pub struct PurgeResponse {
    pub removed: bool,
}

/// Drop the idempotency record for an event id so a re-delivery is treated
/// as new. The event-log cross-check still applies.
pub async fn purge_idempotency(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PurgeResponse>> {
    require_admin(&state, &headers)?;
    let removed = state.idempotency.purge(&id);
    tracing::info!(event_id = %id, removed, "idempotency record purged");
    Ok(Json(PurgeResponse { removed }))
}
