use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys the reasoning service is instructed to emit. A decoded object must
/// carry at least one of them before any field is trusted.
pub const PAYLOAD_KEYS: &[&str] = &[
    "decision",
    "rationale",
    "asked_questions",
    "answers",
    "missing_info",
    "parsed_rules",
    "contact_info",
    "final",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<Value>,
    pub phone: Option<Value>,
    pub consent: Option<Value>,
}

/// Structured decision record embedded in a reasoning-service reply.
///
/// Fields stay loosely typed because the service follows a textual
/// convention, not a schema; `raw` keeps the object verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionPayload {
    pub decision: Option<String>,
    pub rationale: Option<String>,
    pub asked_questions: Option<Value>,
    pub answers: Option<Value>,
    pub missing_info: Option<Value>,
    pub parsed_rules: Option<Value>,
    pub contact_info: ContactInfo,
    pub is_final: bool,
    pub raw: Value,
}

impl DecisionPayload {
    /// Accepts only JSON objects that carry at least one expected key.
    pub fn from_value(value: Value) -> Option<Self> {
        let obj = value.as_object()?;
        if !PAYLOAD_KEYS.iter().any(|key| obj.contains_key(*key)) {
            return None;
        }

        let contact_info = match obj.get("contact_info") {
            Some(Value::Object(contact)) => ContactInfo {
                email: field(contact, "email"),
                phone: field(contact, "phone"),
                consent: field(contact, "consent"),
            },
            _ => ContactInfo::default(),
        };

        Some(Self {
            decision: field(obj, "decision").as_ref().and_then(value_to_text),
            rationale: field(obj, "rationale").as_ref().and_then(value_to_text),
            asked_questions: field(obj, "asked_questions"),
            answers: field(obj, "answers"),
            missing_info: field(obj, "missing_info"),
            parsed_rules: field(obj, "parsed_rules"),
            contact_info,
            // Only a literal `true` marks the terminal reply.
            is_final: matches!(obj.get("final"), Some(Value::Bool(true))),
            raw: value.clone(),
        })
    }

    pub fn trial_title(&self) -> Option<String> {
        self.parsed_rules
            .as_ref()
            .and_then(|rules| rules.get("trial_title"))
            .and_then(value_to_text)
    }

    pub fn contact_email(&self) -> Option<String> {
        self.contact_info.email.as_ref().and_then(value_to_text)
    }

    pub fn contact_phone(&self) -> Option<String> {
        self.contact_info.phone.as_ref().and_then(value_to_text)
    }
}

fn field(obj: &Map<String, Value>, key: &str) -> Option<Value> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.clone()),
    }
}

/// Flatten a JSON value into display text; `null` and empty strings yield `None`.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
