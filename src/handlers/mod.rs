pub mod admin;
pub mod status;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::db::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/payments", post(webhook::receive))
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/admin/events/{id}", get(admin::get_event))
        .route("/admin/dead-letters", get(admin::list_dead_letters))
        .route("/admin/dead-letters/{id}/replay", post(admin::replay_dead_letter))
        .route(
            "/admin/idempotency/{id}",
            get(admin::get_idempotency).delete(admin::purge_idempotency),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
