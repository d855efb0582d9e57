use serde_json::json;
use trialmatch_core::ipc::{PrescreenRequest, PrescreenResponse};

use crate::service::PrescreenService;
use crate::subsystems::conversation::ConversationError;

pub async fn handle_request(request: PrescreenRequest, service: &PrescreenService) -> PrescreenResponse {
    match request {
        PrescreenRequest::Ping => PrescreenResponse::pong(),
        PrescreenRequest::Health => match service.health().await {
            Ok(data) => PrescreenResponse::ok(data),
            Err(e) => PrescreenResponse::err(e),
        },
        PrescreenRequest::StartSession => match service.start_session().await {
            Ok(view) => to_response(&view),
            Err(e) => error_response(&e),
        },
        PrescreenRequest::GetSession { session_id } => match service.session(session_id).await {
            Ok(view) => to_response(&view),
            Err(e) => error_response(&e),
        },
        PrescreenRequest::SendMessage { session_id, text } => {
            match service.send_message(session_id, &text, None).await {
                Ok(outcome) => to_response(&outcome),
                Err(e) => error_response(&e),
            }
        }
        PrescreenRequest::SubmitContact { session_id, form } => {
            match service.submit_contact(session_id, &form, None).await {
                Ok(outcome) => to_response(&outcome),
                Err(e) => error_response(&e),
            }
        }
        PrescreenRequest::EndSession { session_id } => match service.end_session(session_id).await {
            Ok(()) => PrescreenResponse::ok(json!({"ended": true, "session_id": session_id})),
            Err(e) => error_response(&e),
        },
    }
}

fn to_response<T: serde::Serialize>(value: &T) -> PrescreenResponse {
    match serde_json::to_value(value) {
        Ok(data) => PrescreenResponse::ok(data),
        Err(e) => PrescreenResponse::err(format!("Serialization error: {e}")),
    }
}

/// Error body shared by IPC and HTTP: a stable code plus field messages for
/// rejected contact forms.
pub fn error_detail(e: &ConversationError) -> serde_json::Value {
    let mut detail = json!({
        "code": e.code(),
        "retryable": e.is_retryable(),
    });
    if let ConversationError::InvalidContact(fields) = e {
        detail["fields"] = json!(fields);
    }
    detail
}

pub fn error_response(e: &ConversationError) -> PrescreenResponse {
    PrescreenResponse::err_with_data(e.to_string(), error_detail(e))
}
