//! Health and operational status endpoints.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::breaker::BreakerStatus;
use crate::db::{queries, AppState};
use crate::error::Result;
use crate::queue::QueueStats;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: queries::now() - state.started_at,
    })
}

#[derive(Serialize)]
pub struct StatusResponse {
    /// Event counts per lifecycle status.
    pub events: BTreeMap<String, i64>,
    pub queue: QueueStats,
    pub breakers: Vec<BreakerStatus>,
    pub workers: usize,
    pub uptime_secs: i64,
}

pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>> {
    let conn = state.db.get()?;
    let events = queries::counts_by_status(&conn)?.into_iter().collect();

    Ok(Json(StatusResponse {
        events,
        queue: state.queue.stats(),
        breakers: state.breakers.statuses(),
        workers: state.worker_count,
        uptime_secs: queries::now() - state.started_at,
    }))
}
