use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decision::Decision;

/// One row of the `prescreen_contacts` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub created_at: DateTime<Utc>,
    pub trial_title: Option<String>,
    pub decision: Decision,
    pub rationale: Option<String>,
    pub asked_questions: Option<Value>,
    pub answers: Option<Value>,
    pub parsed_rules: Option<Value>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub consent: bool,
    pub session_id: String,
}
