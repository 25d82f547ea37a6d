//! In-process scenario tests for lwd-daemon HTTP endpoints.
//!
//! The router is driven via `tower::ServiceExt::oneshot` over a simulated
//! runtime; no socket is bound.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use lwd_daemon::{routes, state::AppState};
use lwd_testkit::{desk_config, start_desk, ScriptedConnectors};
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn make_router() -> axum::Router {
    let desk = start_desk(&desk_config(), Arc::new(ScriptedConnectors::offline()))
        .await
        .expect("desk starts");
    assert!(desk.wait_for_samples(Duration::from_secs(2)).await);
    let st = Arc::new(AppState::new(Arc::new(desk.runtime), "test-hash"));
    routes::build_router(st)
}

async fn call(router: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(axum::body::Body::from(b.to_string())),
        None => req.body(axum::body::Body::empty()),
    }
    .unwrap();

    let resp = router.clone().oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is not valid JSON")
    };
    (status, json)
}

async fn active_session(router: &axum::Router) -> String {
    let (status, _) = call(router, "PUT", "/v1/tare", Some(json!({"tare_weight": 0.15}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, s) = call(
        router,
        "POST",
        "/v1/sessions",
        Some(json!({"lorry_number": "KA-01-1234", "line": "L1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = s["id"].as_str().unwrap().to_string();
    let (status, s) = call(router, "POST", &format!("/v1/sessions/{id}/activate"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(s["status"], "active");
    id
}

// ---------------------------------------------------------------------------
// Health and status
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn health_and_status() {
    let router = make_router().await;

    let (status, json) = call(&router, "GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "lwd-daemon");

    let (status, json) = call(&router, "GET", "/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["config_hash"], "test-hash");
    assert_eq!(json["channels"].as_array().unwrap().len(), 2);
    assert_eq!(json["channels"][0]["state"], "simulated");
    assert!(json["active_session"].is_null());
    assert_eq!(json["check"]["status"], "good");

    let (status, json) = call(&router, "GET", "/v1/weight/check", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["final_weight"], 12.0);
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn session_capture_complete_over_http() {
    let router = make_router().await;
    let id = active_session(&router).await;

    for tag in ["T-1", "T-2"] {
        let (status, rec) = call(&router, "POST", "/v1/captures", Some(json!({"tagId": tag}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(rec["net_weight"], 11.85);
        assert_eq!(rec["tolerance_status"], "good");
    }

    let (_, caps) = call(&router, "GET", &format!("/v1/sessions/{id}/captures"), None).await;
    assert_eq!(caps.as_array().unwrap().len(), 2);

    let (status, done) = call(
        &router,
        "POST",
        &format!("/v1/sessions/{id}/complete"),
        Some(json!({"total_bags": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");
    assert_eq!(done["total_bags"], 3);

    // Terminal: a second completion conflicts.
    let (status, err) = call(
        &router,
        "POST",
        &format!("/v1/sessions/{id}/complete"),
        Some(json!({"total_bags": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "invalid_transition");
}

#[tokio::test(start_paused = true)]
async fn error_mapping() {
    let router = make_router().await;

    let (status, err) = call(&router, "POST", "/v1/captures", Some(json!({"tag_id": "T-1"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "invalid_capture");

    let missing = uuid::Uuid::new_v4();
    let (status, err) = call(&router, "GET", &format!("/v1/sessions/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "not_found");

    let (status, err) = call(&router, "POST", "/v1/sessions", Some(json!({"lorry_number": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "invalid_request");

    // No tare yet for today.
    let (status, _) = call(&router, "GET", "/v1/tare", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, s) = call(&router, "POST", "/v1/sessions", Some(json!({"lorry_number": "A"}))).await;
    let (status, err) = call(
        &router,
        "POST",
        &format!("/v1/sessions/{}/activate", s["id"].as_str().unwrap()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "invalid_transition");
}

#[tokio::test(start_paused = true)]
async fn remove_waiting_session() {
    let router = make_router().await;
    let (_, s) = call(&router, "POST", "/v1/sessions", Some(json!({"lorry_number": "B"}))).await;
    let id = s["id"].as_str().unwrap();

    let (status, body) = call(&router, "DELETE", &format!("/v1/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (_, list) = call(&router, "GET", "/v1/sessions", None).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retained_captures_outlive_their_session() {
    let router = make_router().await;
    let id = active_session(&router).await;
    let (status, _) = call(&router, "POST", "/v1/captures", Some(json!({"tag_id": "T-1"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(&router, "DELETE", &format!("/v1/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, caps) = call(&router, "GET", &format!("/v1/sessions/{id}/captures"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(caps.as_array().unwrap().len(), 1);
    assert_eq!(caps[0]["tag_id"], "T-1");

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = call(&router, "GET", &format!("/v1/sessions/{unknown}/captures"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn config_get_and_patch() {
    let router = make_router().await;

    let (status, tol) = call(&router, "GET", "/v1/config/tolerance", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tol["tolerance"], 0.05);

    let (status, tol) = call(
        &router,
        "PATCH",
        "/v1/config/tolerance",
        Some(json!({"tolerance": 0.1, "on_disagreement": "block"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tol["tolerance"], 0.1);
    assert_eq!(tol["on_disagreement"], "block");

    let (status, err) = call(
        &router,
        "PATCH",
        "/v1/config/sync",
        Some(json!({"max_attempts": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "invalid_config");

    let (status, _) = call(&router, "PATCH", "/v1/config/scale", Some(json!({"bogus": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&router, "GET", "/v1/config/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, scale) = call(
        &router,
        "PATCH",
        "/v1/config/scale",
        Some(json!({"probe_timeout_ms": 250})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scale["probe_timeout_ms"], 250);

    let (_, all) = call(&router, "GET", "/v1/config", None).await;
    assert_eq!(all["scale"]["probe_timeout_ms"], 250);
    assert_eq!(all["tolerance"]["tolerance"], 0.1);
}

#[tokio::test(start_paused = true)]
async fn explicit_channel_reconnect() {
    let router = make_router().await;
    let (status, body) = call(&router, "POST", "/v1/channels/scale/reconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "simulated");
    assert_eq!(body["generation"], 2);

    let (status, _) = call(&router, "POST", "/v1/channels/other/reconnect", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
