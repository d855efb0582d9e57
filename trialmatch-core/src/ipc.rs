use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrialMatchError;
use crate::models::ContactForm;

pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PrescreenRequest {
    Ping,
    Health,
    StartSession,
    GetSession {
        session_id: Uuid,
    },
    SendMessage {
        session_id: Uuid,
        text: String,
    },
    SubmitContact {
        session_id: Uuid,
        #[serde(flatten)]
        form: ContactForm,
    },
    EndSession {
        session_id: Uuid,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PrescreenResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl PrescreenResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Error carrying structured detail, e.g. per-field contact errors.
    pub fn err_with_data(msg: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::err(msg)
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// MessagePack body of one IPC frame (named fields, so maps on the wire).
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, TrialMatchError> {
    rmp_serde::to_vec_named(value).map_err(|e| TrialMatchError::Ipc(format!("encode: {e}")))
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TrialMatchError> {
    rmp_serde::from_slice(bytes).map_err(|e| TrialMatchError::Ipc(format!("decode: {e}")))
}
