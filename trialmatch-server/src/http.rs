//! TrialMatch HTTP API
//!
//! Axum server exposing pre-screen sessions to a presentation layer. Runs
//! alongside the Unix socket IPC server.
//!
//! Each endpoint is a thin axum handler over an inner function returning
//! `(StatusCode, Value)`, so the logic is testable without axum dispatch.
//!
//! Endpoints:
//! - GET    /health
//! - GET    /version
//! - POST   /sessions
//! - GET    /sessions/:id
//! - DELETE /sessions/:id
//! - POST   /sessions/:id/messages
//! - POST   /sessions/:id/messages/stream  (SSE: `partial` events, then `outcome`)
//! - POST   /sessions/:id/contact

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use trialmatch_core::{sanitize_for_display, ContactForm};

use crate::router::error_detail;
use crate::service::PrescreenService;
use crate::subsystems::conversation::ConversationError;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub service: Arc<PrescreenService>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/sessions", post(start_session_handler))
        .route(
            "/sessions/:id",
            get(get_session_handler).delete(end_session_handler),
        )
        .route("/sessions/:id/messages", post(send_message_handler))
        .route("/sessions/:id/messages/stream", post(stream_message_handler))
        .route("/sessions/:id/contact", post(submit_contact_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    service: Arc<PrescreenService>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let http = &service.config().http;
    let addr = format!("{}:{}", http.host, http.port);
    let state = Arc::new(HttpState {
        service: service.clone(),
    });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("TrialMatch HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub fn error_status(e: &ConversationError) -> StatusCode {
    match e {
        ConversationError::Upstream(_) => StatusCode::BAD_GATEWAY,
        ConversationError::Busy
        | ConversationError::ContactFormPending
        | ConversationError::NotAwaitingContact
        | ConversationError::NotStarted => StatusCode::CONFLICT,
        ConversationError::InvalidContact(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ConversationError::EmptyMessage => StatusCode::BAD_REQUEST,
        ConversationError::UnknownSession(_) => StatusCode::NOT_FOUND,
    }
}

fn error_body(e: &ConversationError) -> (StatusCode, Value) {
    let mut body = error_detail(e);
    body["status"] = json!("error");
    body["error"] = json!(e.to_string());
    (error_status(e), body)
}

fn ok_body<T: serde::Serialize>(status: StatusCode, value: &T) -> (StatusCode, Value) {
    match serde_json::to_value(value) {
        Ok(body) => (status, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "status": "error", "error": format!("Serialization error: {e}") }),
        ),
    }
}

pub async fn health_inner(service: &PrescreenService) -> (StatusCode, Value) {
    match service.health().await {
        Ok(mut body) => {
            body["version"] = json!(env!("CARGO_PKG_VERSION"));
            body["socket"] = json!(service.config().service.socket_path);
            (StatusCode::OK, body)
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "status": "unhealthy", "error": e }),
        ),
    }
}

/// Pure, no IO.
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "trialmatch/1",
    })
}

pub async fn start_session_inner(service: &PrescreenService) -> (StatusCode, Value) {
    match service.start_session().await {
        Ok(view) => ok_body(StatusCode::CREATED, &view),
        Err(e) => error_body(&e),
    }
}

pub async fn get_session_inner(service: &PrescreenService, id: Uuid) -> (StatusCode, Value) {
    match service.session(id).await {
        Ok(view) => ok_body(StatusCode::OK, &view),
        Err(e) => error_body(&e),
    }
}

pub async fn end_session_inner(service: &PrescreenService, id: Uuid) -> (StatusCode, Value) {
    match service.end_session(id).await {
        Ok(()) => (StatusCode::OK, json!({ "ended": true, "session_id": id })),
        Err(e) => error_body(&e),
    }
}

pub async fn send_message_inner(
    service: &PrescreenService,
    id: Uuid,
    req: MessageRequest,
    fragments: Option<mpsc::UnboundedSender<String>>,
) -> (StatusCode, Value) {
    let text = req.text.unwrap_or_default();
    match service.send_message(id, &text, fragments).await {
        Ok(outcome) => ok_body(StatusCode::OK, &outcome),
        Err(e) => error_body(&e),
    }
}

pub async fn submit_contact_inner(
    service: &PrescreenService,
    id: Uuid,
    form: ContactForm,
) -> (StatusCode, Value) {
    match service.submit_contact(id, &form, None).await {
        Ok(outcome) => ok_body(StatusCode::OK, &outcome),
        Err(e) => error_body(&e),
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.service).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn start_session_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = start_session_inner(&state.service).await;
    (status, Json(body))
}

pub async fn get_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = get_session_inner(&state.service, id).await;
    (status, Json(body))
}

pub async fn end_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = end_session_inner(&state.service, id).await;
    (status, Json(body))
}

pub async fn send_message_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> impl IntoResponse {
    let (status, body) = send_message_inner(&state.service, id, req, None).await;
    (status, Json(body))
}

pub async fn submit_contact_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(form): Json<ContactForm>,
) -> impl IntoResponse {
    let (status, body) = submit_contact_inner(&state.service, id, form).await;
    (status, Json(body))
}

/// Streams sanitized partial text while the reply arrives, then exactly one
/// `outcome` event carrying `{ "status": <http status>, "body": <outcome> }`.
/// Decision logic only ever sees the complete reply.
pub async fn stream_message_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let (fragment_tx, mut fragment_rx) = mpsc::unbounded_channel::<String>();
    let service = state.service.clone();
    let token = service.contact_token().to_string();

    let partial_tx = event_tx.clone();
    let forwarder = tokio::spawn(async move {
        let mut accumulated = String::new();
        while let Some(fragment) = fragment_rx.recv().await {
            accumulated.push_str(&fragment);
            let shown = sanitize_for_display(&accumulated, &token);
            if !shown.is_empty() {
                let _ = partial_tx.send(Event::default().event("partial").data(shown));
            }
        }
    });

    tokio::spawn(async move {
        let (status, body) = send_message_inner(&service, id, req, Some(fragment_tx)).await;
        let _ = forwarder.await;
        let outcome = json!({ "status": status.as_u16(), "body": body });
        let _ = event_tx.send(Event::default().event("outcome").data(outcome.to_string()));
    });

    let stream = futures::stream::unfold(event_rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<Event, Infallible>(event), rx))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use trialmatch_core::validate::ContactFieldErrors;
    use trialmatch_core::ReasoningError;

    // ========================================================================
    // TEST 1: version_inner is pure and returns correct fields
    // ========================================================================
    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "trialmatch/1");
    }

    // ========================================================================
    // TEST 2: conversation errors map to HTTP statuses
    // ========================================================================
    #[test]
    fn test_error_status_mapping() {
        let upstream = ConversationError::Upstream(ReasoningError::EmptyReply);
        assert_eq!(error_status(&upstream), StatusCode::BAD_GATEWAY);
        assert_eq!(error_status(&ConversationError::Busy), StatusCode::CONFLICT);
        assert_eq!(
            error_status(&ConversationError::ContactFormPending),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&ConversationError::InvalidContact(ContactFieldErrors::default())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            error_status(&ConversationError::UnknownSession(Uuid::nil())),
            StatusCode::NOT_FOUND
        );
    }

    // ========================================================================
    // TEST 3: error body has status, message and code
    // ========================================================================
    #[test]
    fn test_error_body_shape() {
        let (status, body) = error_body(&ConversationError::Busy);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "error");
        assert_eq!(body["code"], "busy");
        assert_eq!(body["retryable"], true);
        assert!(body["error"].is_string());
    }
}
