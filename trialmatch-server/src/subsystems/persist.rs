//! Maps a terminal reply's payload into a result row and writes it.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use trialmatch_core::{coerce_consent, normalize_decision, Decision, DecisionPayload, ResultRecord, ResultStore};

pub const NO_PAYLOAD_RATIONALE: &str = "No JSON payload found";

/// What the presentation layer is told after a write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub saved: bool,
    pub message: String,
    pub decision: Decision,
}

pub struct ResultPersister {
    store: Arc<dyn ResultStore>,
}

impl ResultPersister {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    /// Write one record. Failures are reported, never retried or propagated.
    pub async fn persist(&self, session_id: &str, payload: Option<&DecisionPayload>) -> PersistOutcome {
        let record = build_record(session_id, payload);
        let decision = record.decision;

        match self.store.insert(&record).await {
            Ok(()) => {
                tracing::info!(
                    session_id,
                    decision = %decision,
                    store = self.store.name(),
                    "Pre-screen result saved"
                );
                PersistOutcome {
                    saved: true,
                    message: "Saved.".to_string(),
                    decision,
                }
            }
            Err(e) => {
                tracing::error!(
                    session_id,
                    store = self.store.name(),
                    error = %e,
                    "Failed to save pre-screen result"
                );
                PersistOutcome {
                    saved: false,
                    message: format!("DB error: {e}"),
                    decision,
                }
            }
        }
    }
}

/// Build the row for a terminal reply. Without a payload the row records an
/// `Unknown` decision with a fixed rationale.
pub fn build_record(session_id: &str, payload: Option<&DecisionPayload>) -> ResultRecord {
    let Some(payload) = payload else {
        return ResultRecord {
            created_at: Utc::now(),
            trial_title: None,
            decision: Decision::Unknown,
            rationale: Some(NO_PAYLOAD_RATIONALE.to_string()),
            asked_questions: None,
            answers: None,
            parsed_rules: None,
            contact_email: None,
            contact_phone: None,
            consent: false,
            session_id: session_id.to_string(),
        };
    };

    ResultRecord {
        created_at: Utc::now(),
        trial_title: payload.trial_title(),
        decision: normalize_decision(payload.decision.as_deref().unwrap_or_default()),
        rationale: payload.rationale.clone(),
        asked_questions: payload.asked_questions.clone(),
        answers: payload.answers.clone(),
        parsed_rules: payload.parsed_rules.clone(),
        contact_email: payload.contact_email(),
        contact_phone: payload.contact_phone(),
        consent: coerce_consent(payload.contact_info.consent.as_ref()),
        session_id: session_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use trialmatch_core::StoreError;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<ResultRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl ResultStore for MemoryStore {
        async fn insert(&self, record: &ResultRecord) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Api {
                    code: 503,
                    message: "unavailable".to_string(),
                });
            }
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn health_check(&self) -> Result<String, StoreError> {
            Ok("memory".to_string())
        }

        fn name(&self) -> &str {
            "memory"
        }
    }

    fn payload() -> DecisionPayload {
        DecisionPayload::from_value(json!({
            "decision": "likely eligible, pending labs",
            "rationale": "Inclusion 1-4 met",
            "asked_questions": ["age?"],
            "answers": {"age": 42},
            "parsed_rules": {"trial_title": "NCT06422689"},
            "contact_info": {"email": "x@y.com", "phone": "5551234567", "consent": "yes"},
            "final": true
        }))
        .unwrap()
    }

    #[test]
    fn test_record_from_payload() {
        let record = build_record("s-1", Some(&payload()));
        assert_eq!(record.decision, Decision::LikelyEligible);
        assert_eq!(record.trial_title.as_deref(), Some("NCT06422689"));
        assert_eq!(record.rationale.as_deref(), Some("Inclusion 1-4 met"));
        assert_eq!(record.contact_email.as_deref(), Some("x@y.com"));
        assert_eq!(record.contact_phone.as_deref(), Some("5551234567"));
        assert!(record.consent);
        assert_eq!(record.session_id, "s-1");
        assert_eq!(record.answers, Some(json!({"age": 42})));
    }

    #[test]
    fn test_record_without_payload_is_unknown() {
        let record = build_record("s-2", None);
        assert_eq!(record.decision, Decision::Unknown);
        assert_eq!(record.rationale.as_deref(), Some(NO_PAYLOAD_RATIONALE));
        assert!(record.contact_email.is_none());
        assert!(!record.consent);
    }

    #[test]
    fn test_missing_decision_label_is_unknown() {
        let payload = DecisionPayload::from_value(json!({"rationale": "n/a", "final": true})).unwrap();
        assert_eq!(build_record("s", Some(&payload)).decision, Decision::Unknown);
    }

    #[tokio::test]
    async fn test_persist_reports_saved() {
        let store = Arc::new(MemoryStore::default());
        let persister = ResultPersister::new(store.clone());

        let outcome = persister.persist("s-1", Some(&payload())).await;
        assert!(outcome.saved);
        assert_eq!(outcome.message, "Saved.");
        assert_eq!(outcome.decision, Decision::LikelyEligible);
        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persist_reports_failure() {
        let store = Arc::new(MemoryStore {
            fail: true,
            ..Default::default()
        });
        let persister = ResultPersister::new(store);

        let outcome = persister.persist("s-1", None).await;
        assert!(!outcome.saved);
        assert!(outcome.message.starts_with("DB error: "));
        assert_eq!(outcome.decision, Decision::Unknown);
    }
}
