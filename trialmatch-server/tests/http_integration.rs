//! HTTP integration tests for the TrialMatch REST API.
//!
//! Requests go through the full Axum router with `oneshot`; the reasoning
//! service and result store are in-memory fakes.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{service, test_config, MemoryStore, ScriptedBackend};
use serde_json::{json, Value};
use tower::ServiceExt;
use trialmatch_server::http::{build_router, HttpState};

fn app(replies: Vec<&str>) -> Router {
    let service = service(test_config(), ScriptedBackend::new(replies), Arc::new(MemoryStore::default()));
    build_router(Arc::new(HttpState { service }))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn start(app: &Router) -> String {
    let (status, body) = call(app, "POST", "/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    body["session_id"].as_str().unwrap().to_string()
}

// ===========================================================================
// TEST 1: GET /version and /health
// ===========================================================================
#[tokio::test]
async fn test_version_and_health_endpoints() {
    let app = app(vec![]);

    let (status, body) = call(&app, "GET", "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
    assert_eq!(body["protocol"], "trialmatch/1");

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
    assert_eq!(body["reasoning"], "scripted");
    assert!(body["socket"].is_string());
}

// ===========================================================================
// TEST 2: unhealthy store yields 503
// ===========================================================================
#[tokio::test]
async fn test_health_reports_store_failure() {
    let service = service(test_config(), ScriptedBackend::new(vec![]), MemoryStore::failing());
    let app = build_router(Arc::new(HttpState { service }));

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

// ===========================================================================
// TEST 3: start session, send a message, read it back
// ===========================================================================
#[tokio::test]
async fn test_session_message_roundtrip() {
    let app = app(vec!["Thanks! Have you been diagnosed with asthma in the last 12 months?"]);
    let id = start(&app).await;

    let uri = format!("/sessions/{id}/messages");
    let (status, body) = call(&app, "POST", &uri, Some(json!({ "text": "42" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "interviewing");
    assert_eq!(body["appended"].as_array().unwrap().len(), 2);
    assert!(body.get("persisted").is_none());

    let (status, body) = call(&app, "GET", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let transcript = body["transcript"].as_array().unwrap();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[1]["speaker"], "user");
    assert_eq!(transcript[1]["text"], "42");
}

// ===========================================================================
// TEST 4: empty message is a 400, session untouched
// ===========================================================================
#[tokio::test]
async fn test_empty_message_rejected() {
    let app = app(vec![]);
    let id = start(&app).await;

    let uri = format!("/sessions/{id}/messages");
    let (status, body) = call(&app, "POST", &uri, Some(json!({ "text": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "empty_message");

    let (_, body) = call(&app, "GET", &format!("/sessions/{id}"), None).await;
    assert_eq!(body["transcript"].as_array().unwrap().len(), 1);
}

// ===========================================================================
// TEST 5: contact form flow: pending, invalid (422), then accepted
// ===========================================================================
#[tokio::test]
async fn test_contact_form_over_http() {
    let app = app(vec![
        "You may qualify!\n[CONTACT_INFO_FORM]",
        "Thanks, a coordinator will be in touch.",
    ]);
    let id = start(&app).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/sessions/{id}/contact"),
        Some(json!({ "email": "x@y.com", "phone": "5551234567", "consent": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "not_awaiting_contact");

    let (_, body) = call(&app, "POST", &format!("/sessions/{id}/messages"), Some(json!({ "text": "42" }))).await;
    assert_eq!(body["mode"], "awaiting_contact");

    let (status, body) = call(&app, "POST", &format!("/sessions/{id}/messages"), Some(json!({ "text": "hello" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "contact_form_pending");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/sessions/{id}/contact"),
        Some(json!({ "email": "not-an-email", "phone": "12", "consent": true })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_contact");
    assert!(body["fields"]["email"].is_string());
    assert!(body["fields"]["phone"].is_string());

    let (status, body) = call(
        &app,
        "POST",
        &format!("/sessions/{id}/contact"),
        Some(json!({ "email": " x@y.com ", "phone": "(555) 123-4567", "consent": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "interviewing");
    let appended = body["appended"].as_array().unwrap();
    assert_eq!(appended[0]["kind"]["type"], "contact_snapshot");
    assert_eq!(appended[1]["text"], "Thanks, a coordinator will be in touch.");
}

// ===========================================================================
// TEST 6: unknown and ended sessions are 404
// ===========================================================================
#[tokio::test]
async fn test_unknown_session_is_404() {
    let app = app(vec![]);

    let (status, body) = call(&app, "GET", "/sessions/00000000-0000-0000-0000-000000000000", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_session");

    let id = start(&app).await;
    let (status, body) = call(&app, "DELETE", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ended"], true);

    let (status, _) = call(&app, "GET", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ===========================================================================
// TEST 7: SSE stream emits sanitized partials and one outcome event
// ===========================================================================
#[tokio::test]
async fn test_stream_endpoint_ends_with_outcome() {
    let app = app(vec![
        "Got it. Any COPD?\n```json\n{\"decision\": \"Unknown\", \"final\": false}\n```",
    ]);
    let id = start(&app).await;

    let req = Request::builder()
        .method("POST")
        .uri(format!("/sessions/{id}/messages/stream"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "text": "42" }).to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("event: partial"));
    assert!(text.contains("data: Got it. Any COPD?"));
    assert!(!text.contains("\"final\": false"), "payload leaked into partials");
    assert_eq!(text.matches("event: outcome").count(), 1);

    let outcome_line = text
        .lines()
        .skip_while(|l| *l != "event: outcome")
        .find(|l| l.starts_with("data: "))
        .unwrap();
    let outcome: Value = serde_json::from_str(outcome_line.trim_start_matches("data: ")).unwrap();
    assert_eq!(outcome["status"], 200);
    assert_eq!(outcome["body"]["mode"], "interviewing");
}
