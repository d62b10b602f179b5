//! HTTP boundary semantics: response codes are the provider contract.

mod common;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use inflow::config::OverflowPolicy;
use inflow::db::{queries, AppState};
use inflow::handlers::{admin, status, webhook};
use inflow::models::EventStatus;
use inflow::signature::sign;

async fn send(
    state: &AppState,
    headers: HeaderMap,
    body: &str,
) -> Result<(StatusCode, &'static str), StatusCode> {
    webhook::receive(
        State(state.clone()),
        ConnectInfo(common::peer_addr()),
        headers,
        Bytes::from(body.to_string()),
    )
    .await
    .map_err(|e| e.into_response().status())
}

#[tokio::test]
async fn test_missing_signature_rejected_401() {
    let state = common::setup_state(&common::test_config());
    let payload = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);

    let result = send(&state, HeaderMap::new(), &payload).await;
    assert_eq!(result.unwrap_err(), StatusCode::UNAUTHORIZED);

    // Nothing was recorded for the rejected request
    let conn = state.db.get().unwrap();
    assert!(queries::get_event(&conn, "evt_1").unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_signature_rejected_401() {
    let state = common::setup_state(&common::test_config());
    let payload = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);

    // Signed over different bytes than the ones delivered
    let headers = common::signed_headers("other body", None);
    let result = send(&state, headers, &payload).await;
    assert_eq!(result.unwrap_err(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stale_signature_rejected_401() {
    let state = common::setup_state(&common::test_config());
    let payload = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);

    let stale = chrono::Utc::now().timestamp() - 700;
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-webhook-signature",
        sign(payload.as_bytes(), common::TEST_SECRET, stale).parse().unwrap(),
    );
    let result = send(&state, headers, &payload).await;
    assert_eq!(result.unwrap_err(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_accepted_event_is_durably_queued() {
    let state = common::setup_state(&common::test_config());
    let payload = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);

    let (code, body) = send(&state, common::signed_headers(&payload, None), &payload)
        .await
        .unwrap();
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "accepted");

    let conn = state.db.get().unwrap();
    let event = queries::get_event(&conn, "evt_1").unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Queued);
    assert!(event.signature_valid);
    assert_eq!(state.queue.depth(), 1);
}

#[tokio::test]
async fn test_rate_limit_returns_429_per_identity() {
    let mut config = common::test_config();
    config.rate_limit_per_minute = 2;
    let state = common::setup_state(&config);

    for i in 0..2 {
        let payload = common::payment_envelope(&format!("evt_{}", i), "pay_1", "pending", None, 1_000);
        let headers = common::signed_headers(&payload, Some("merchant-a"));
        assert!(send(&state, headers, &payload).await.is_ok());
    }

    let payload = common::payment_envelope("evt_3", "pay_1", "pending", None, 1_000);
    let headers = common::signed_headers(&payload, Some("merchant-a"));
    let result = send(&state, headers, &payload).await;
    assert_eq!(result.unwrap_err(), StatusCode::TOO_MANY_REQUESTS);

    // Another merchant is unaffected
    let payload = common::payment_envelope("evt_4", "pay_1", "pending", None, 1_000);
    let headers = common::signed_headers(&payload, Some("merchant-b"));
    assert!(send(&state, headers, &payload).await.is_ok());
}

#[tokio::test]
async fn test_malformed_payload_acknowledged_not_recorded() {
    let state = common::setup_state(&common::test_config());
    let payload = "this is not json";

    let (code, body) = send(&state, common::signed_headers(payload, None), payload)
        .await
        .unwrap();
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "acknowledged");
    assert_eq!(state.queue.depth(), 0);
}

#[tokio::test]
async fn test_payload_without_event_id_acknowledged() {
    let state = common::setup_state(&common::test_config());
    let payload = serde_json::json!({
        "event_id": "",
        "type": "payment.created",
        "data": { "object": {} }
    })
    .to_string();

    let (code, body) = send(&state, common::signed_headers(&payload, None), &payload)
        .await
        .unwrap();
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "acknowledged");
}

#[tokio::test]
async fn test_duplicate_acknowledged_without_requeue() {
    let state = common::setup_state(&common::test_config());
    let payload = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);

    send(&state, common::signed_headers(&payload, None), &payload).await.unwrap();
    let (code, body) = send(&state, common::signed_headers(&payload, None), &payload)
        .await
        .unwrap();
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "duplicate");
    assert_eq!(state.queue.depth(), 1);
}

#[tokio::test]
async fn test_redelivery_resumes_event_stranded_in_received() {
    let state = common::setup_state(&common::test_config());
    let payload = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);

    // A previous ingestion died after the event-log insert: the row sits in
    // `received`, nothing was queued, and its idempotency record was purged
    // on the error path
    {
        let conn = state.db.get().unwrap();
        conn.execute(
            "INSERT INTO webhook_events (id, kind, payload, received_at, signature_valid, status, priority)
             VALUES ('evt_1', 'payment.updated', ?1, ?2, 1, 'received', 90)",
            rusqlite::params![payload, chrono::Utc::now().timestamp()],
        )
        .unwrap();
    }
    assert_eq!(state.queue.depth(), 0);

    let (code, body) = send(&state, common::signed_headers(&payload, None), &payload)
        .await
        .unwrap();
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "accepted");

    let conn = state.db.get().unwrap();
    let event = queries::get_event(&conn, "evt_1").unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Queued);
    assert_eq!(state.queue.depth(), 1);
}

#[tokio::test]
async fn test_queue_full_reject_returns_503_and_rolls_back() {
    let mut config = common::test_config();
    config.queue_capacity = 1;
    config.overflow_policy = OverflowPolicy::Reject;
    let state = common::setup_state(&config);

    let first = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);
    send(&state, common::signed_headers(&first, None), &first).await.unwrap();

    let second = common::payment_envelope("evt_2", "pay_2", "pending", None, 1_000);
    let result = send(&state, common::signed_headers(&second, None), &second).await;
    assert_eq!(result.unwrap_err(), StatusCode::SERVICE_UNAVAILABLE);

    // Rolled back: the provider's retry of evt_2 must not read as duplicate
    let conn = state.db.get().unwrap();
    assert!(queries::get_event(&conn, "evt_2").unwrap().is_none());
    assert!(!state.idempotency.check_and_record("evt_2"));
}

#[tokio::test]
async fn test_queue_full_dead_letter_policy_parks_event() {
    let mut config = common::test_config();
    config.queue_capacity = 1;
    config.overflow_policy = OverflowPolicy::DeadLetter;
    let state = common::setup_state(&config);

    let first = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);
    send(&state, common::signed_headers(&first, None), &first).await.unwrap();

    let second = common::payment_envelope("evt_2", "pay_2", "pending", None, 1_000);
    let (code, body) = send(&state, common::signed_headers(&second, None), &second)
        .await
        .unwrap();
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "accepted");

    let conn = state.db.get().unwrap();
    let event = queries::get_event(&conn, "evt_2").unwrap().unwrap();
    assert_eq!(event.status, EventStatus::DeadLettered);
    let dead = queries::list_dead_letters(&conn, 10).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_id, "evt_2");
}

#[tokio::test]
async fn test_admin_routes_hidden_without_configured_key() {
    let state = common::setup_state(&common::test_config());
    let result = admin::get_event(
        State(state.clone()),
        HeaderMap::new(),
        Path("evt_1".to_string()),
    )
    .await;
    assert_eq!(
        result.err().unwrap().into_response().status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_admin_requires_correct_bearer_key() {
    let mut config = common::test_config();
    config.admin_key = Some("adminkey".to_string());
    let state = common::setup_state(&config);

    let mut wrong = HeaderMap::new();
    wrong.insert("authorization", "Bearer nope".parse().unwrap());
    let result = admin::get_event(State(state.clone()), wrong, Path("evt_1".to_string())).await;
    assert_eq!(
        result.err().unwrap().into_response().status(),
        StatusCode::UNAUTHORIZED
    );

    // Right key, unknown event: authenticated 404
    let mut right = HeaderMap::new();
    right.insert("authorization", "Bearer adminkey".parse().unwrap());
    let result = admin::get_event(State(state.clone()), right, Path("evt_1".to_string())).await;
    assert_eq!(
        result.err().unwrap().into_response().status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_admin_event_inspection_and_idempotency_purge() {
    let mut config = common::test_config();
    config.admin_key = Some("adminkey".to_string());
    let state = common::setup_state(&config);

    let payload = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);
    send(&state, common::signed_headers(&payload, None), &payload).await.unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer adminkey".parse().unwrap());

    let event = admin::get_event(
        State(state.clone()),
        headers.clone(),
        Path("evt_1".to_string()),
    )
    .await
    .unwrap();
    assert_eq!(event.0.id, "evt_1");
    assert_eq!(event.0.status, EventStatus::Queued);

    let record = admin::get_idempotency(
        State(state.clone()),
        headers.clone(),
        Path("evt_1".to_string()),
    )
    .await
    .unwrap();
    assert!(record.0.present);
    assert!(record.0.expires_at.unwrap() > chrono::Utc::now().timestamp());

    let purged = admin::purge_idempotency(
        State(state.clone()),
        headers.clone(),
        Path("evt_1".to_string()),
    )
    .await
    .unwrap();
    assert!(purged.0.removed);

    let purged_again = admin::purge_idempotency(
        State(state.clone()),
        headers,
        Path("evt_1".to_string()),
    )
    .await
    .unwrap();
    assert!(!purged_again.0.removed);
}

#[tokio::test]
async fn test_admin_lists_dead_letters() {
    let mut config = common::test_config();
    config.admin_key = Some("adminkey".to_string());
    config.queue_capacity = 1;
    config.overflow_policy = OverflowPolicy::DeadLetter;
    let state = common::setup_state(&config);

    let first = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);
    send(&state, common::signed_headers(&first, None), &first).await.unwrap();
    let second = common::payment_envelope("evt_2", "pay_2", "pending", None, 1_000);
    send(&state, common::signed_headers(&second, None), &second).await.unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer adminkey".parse().unwrap());
    let listed = admin::list_dead_letters(
        State(state.clone()),
        headers,
        Query(admin::ListParams { limit: None }),
    )
    .await
    .unwrap();
    assert_eq!(listed.0.len(), 1);
    assert_eq!(listed.0[0].event_id, "evt_2");
}

#[tokio::test]
async fn test_status_reports_counts_and_queue_depth() {
    let state = common::setup_state(&common::test_config());
    let payload = common::payment_envelope("evt_1", "pay_1", "pending", None, 1_000);
    send(&state, common::signed_headers(&payload, None), &payload).await.unwrap();

    let health = status::health(State(state.clone())).await;
    assert_eq!(health.0.status, "ok");

    let report = status::status(State(state.clone())).await.unwrap();
    assert_eq!(report.0.events.get("queued"), Some(&1));
    assert_eq!(report.0.queue.ready_depth, 1);
    assert_eq!(report.0.queue.enqueued_total, 1);
    assert!(report.0.breakers.is_empty());
}
