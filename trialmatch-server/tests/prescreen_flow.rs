//! End-to-end pre-screen conversations through `PrescreenService`.

mod common;

use std::sync::Arc;

use common::{service, test_config, MemoryStore, ScriptedBackend};
use serde_json::Value;
use tokio::sync::Notify;
use trialmatch_core::config::FirstTurnMode;
use trialmatch_core::reasoning::{OpenAiChatClient, ReasoningConfig};
use trialmatch_core::{ContactForm, Decision, ReasoningBackend, SessionMode, Speaker, TurnKind};
use trialmatch_server::subsystems::conversation::ConversationError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FINAL_REPLY: &str = "Thanks for completing the pre-screen!\n\n\
**Decision:** Likely Eligible\n\
This is a preliminary screen based on the provided criteria; a clinician must confirm.\n\n\
```json\n\
{\"decision\": \"Likely Eligible\", \"rationale\": \"Adult with recent asthma diagnosis, no COPD\", \
\"asked_questions\": [\"age\", \"diagnosis\", \"copd\"], \"answers\": {\"age\": 42, \"diagnosis\": \"yes\", \"copd\": \"no\"}, \
\"missing_info\": [], \"parsed_rules\": {\"trial_title\": \"Asthma rescue therapy study\"}, \
\"contact_info\": {\"email\": \"x@y.com\", \"phone\": \"5551234567\", \"consent\": true}, \"final\": true}\n\
```";

fn completion(content: &str) -> Value {
    serde_json::json!({
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
    })
}

fn contact_form() -> ContactForm {
    ContactForm {
        email: "x@y.com".to_string(),
        phone: "5551234567".to_string(),
        consent: true,
    }
}

// ===========================================================================
// TEST 1: full interview against a mocked chat-completions API
// ===========================================================================
#[tokio::test]
async fn test_full_prescreen_with_mocked_reasoning_api() {
    let mock_server = MockServer::start().await;

    let replies = [
        "Thanks! Have you been diagnosed with asthma in the last 12 months?",
        "Got it. Have you ever been diagnosed with COPD?",
        "Great news, you may be a fit for this study!\n[CONTACT_INFO_FORM]",
        FINAL_REPLY,
    ];
    for reply in replies {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(reply)))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
    }

    let reasoning = ReasoningConfig {
        api_key: "test-key".to_string(),
        base_url: String::new(),
        model: "gpt-4o".to_string(),
        temperature: 0.4,
        timeout_seconds: 5,
        max_retries: 0,
        retry_delay_ms: 10,
    };
    let backend: Arc<dyn ReasoningBackend> =
        Arc::new(OpenAiChatClient::with_base_url(reasoning, mock_server.uri()).unwrap());
    let store = Arc::new(MemoryStore::default());
    let service = service(test_config(), backend, store.clone());

    let view = service.start_session().await.unwrap();
    assert_eq!(view.mode, SessionMode::Interviewing);
    assert_eq!(view.transcript.len(), 1, "only the greeting is visible");
    assert!(view.transcript[0].text.contains("How old are you?"));
    let id = view.session_id;

    for answer in ["42", "yes, last spring", "no"] {
        let outcome = service.send_message(id, answer, None).await.unwrap();
        assert!(outcome.persisted.is_none());
    }

    let view = service.session(id).await.unwrap();
    assert_eq!(view.mode, SessionMode::AwaitingContact);
    let prompt = &view.transcript.last().unwrap().text;
    assert_eq!(prompt, "Great news, you may be a fit for this study!");

    let outcome = service.submit_contact(id, &contact_form(), None).await.unwrap();
    assert_eq!(outcome.mode, SessionMode::Complete);
    assert!(matches!(outcome.appended[0].kind, TurnKind::ContactSnapshot { .. }));
    let summary = &outcome.appended[1].text;
    assert!(summary.starts_with("Thanks for completing the pre-screen!"));
    assert!(!summary.contains("```"), "payload must not be displayed");

    let persisted = outcome.persisted.expect("final reply persists");
    assert!(persisted.saved);
    assert_eq!(persisted.message, "Saved.");

    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].decision, Decision::LikelyEligible);
    assert!(records[0].consent);
    assert_eq!(records[0].contact_email.as_deref(), Some("x@y.com"));
    assert_eq!(records[0].trial_title.as_deref(), Some("Asthma rescue therapy study"));
    assert_eq!(records[0].session_id, id.to_string());

    // Last request: system prompt, hidden seed first, hidden contact turn last.
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
    let body: Value = serde_json::from_slice(&requests[3].body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "user");
    assert!(messages[1]["content"]
        .as_str()
        .unwrap()
        .starts_with("**Asthma rescue therapy study**"));
    let last = messages.last().unwrap()["content"].as_str().unwrap();
    assert!(last.starts_with("Here is my contact information from the form:"));
    assert!(last.contains("Consent: true"));
}

// ===========================================================================
// TEST 2: visible transcript keeps hidden turns out and snapshot in
// ===========================================================================
#[tokio::test]
async fn test_visible_transcript_order() {
    let backend = ScriptedBackend::new(vec![
        "Please share your email and phone so the site can reach you.",
        FINAL_REPLY,
    ]);
    let service = service(test_config(), backend.clone(), Arc::new(MemoryStore::default()));

    let id = service.start_session().await.unwrap().session_id;
    service.send_message(id, "42", None).await.unwrap();
    service.submit_contact(id, &contact_form(), None).await.unwrap();

    let view = service.session(id).await.unwrap();
    let speakers: Vec<Speaker> = view.transcript.iter().map(|t| t.speaker).collect();
    assert_eq!(
        speakers,
        vec![
            Speaker::Assistant, // greeting
            Speaker::User,      // "42"
            Speaker::Assistant, // contact request
            Speaker::Assistant, // snapshot
            Speaker::Assistant, // summary
        ]
    );
    assert!(view.transcript[3].text.contains("x@y.com"));
    assert!(view.transcript.iter().all(|t| !t.text.contains("Asthma rescue therapy study**")));

    // Service-bound history never carries the snapshot's rendering.
    let history = backend.last_history();
    assert!(history.iter().all(|m| !m.content.contains("Submitted contact details")));
}

// ===========================================================================
// TEST 3: malformed final payload persists exactly one Unknown record
// ===========================================================================
#[tokio::test]
async fn test_malformed_final_reply_persists_unknown() {
    let backend = ScriptedBackend::new(vec![
        "[CONTACT_INFO_FORM]",
        "Here is your summary.\n```json\n{\"decision\": \"Likely Eligible\", \"final\": true,, }\n```",
    ]);
    let store = Arc::new(MemoryStore::default());
    let service = service(test_config(), backend, store.clone());

    let id = service.start_session().await.unwrap().session_id;
    service.send_message(id, "42", None).await.unwrap();
    let outcome = service.submit_contact(id, &contact_form(), None).await.unwrap();

    assert_eq!(outcome.mode, SessionMode::Complete);
    assert_eq!(outcome.appended.last().unwrap().text, "Here is your summary.");

    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].decision, Decision::Unknown);
    assert_eq!(records[0].rationale.as_deref(), Some("No JSON payload found"));
}

// ===========================================================================
// TEST 4: persistence failure is reported and the session still completes
// ===========================================================================
#[tokio::test]
async fn test_persistence_failure_is_only_reported() {
    let backend = ScriptedBackend::new(vec!["[CONTACT_INFO_FORM]", FINAL_REPLY]);
    let service = service(test_config(), backend, MemoryStore::failing());

    let id = service.start_session().await.unwrap().session_id;
    service.send_message(id, "42", None).await.unwrap();
    let outcome = service.submit_contact(id, &contact_form(), None).await.unwrap();

    assert_eq!(outcome.mode, SessionMode::Complete);
    let persisted = outcome.persisted.unwrap();
    assert!(!persisted.saved);
    assert!(persisted.message.starts_with("DB error: "));
}

// ===========================================================================
// TEST 5: a second input during an outstanding dispatch is rejected
// ===========================================================================
#[tokio::test]
async fn test_concurrent_input_is_busy() {
    let gate = Arc::new(Notify::new());
    let entered = Arc::new(Notify::new());
    let backend = ScriptedBackend::gated(vec!["Any COPD?"], gate.clone(), entered.clone());
    let service = service(test_config(), backend, Arc::new(MemoryStore::default()));

    let id = service.start_session().await.unwrap().session_id;

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.send_message(id, "42", None).await })
    };
    entered.notified().await;

    let second = service.send_message(id, "43", None).await;
    assert!(matches!(second, Err(ConversationError::Busy)));

    gate.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.appended.len(), 2);
}

// ===========================================================================
// TEST 6: live bootstrap failure discards the session
// ===========================================================================
#[tokio::test]
async fn test_live_bootstrap_failure() {
    let mut config = test_config();
    config.conversation.first_turn = FirstTurnMode::Live;
    let backend = ScriptedBackend::with_results(vec![Err(trialmatch_core::ReasoningError::Api {
        code: 503,
        message: "overloaded".to_string(),
    })]);
    let service = service(config, backend, Arc::new(MemoryStore::default()));

    let err = service.start_session().await.unwrap_err();
    assert!(matches!(err, ConversationError::Upstream(_)));
    assert!(service.sessions().is_empty().await);
}

// ===========================================================================
// TEST 7: unknown and ended sessions
// ===========================================================================
#[tokio::test]
async fn test_end_session() {
    let service = service(
        test_config(),
        ScriptedBackend::new(vec![]),
        Arc::new(MemoryStore::default()),
    );
    let id = service.start_session().await.unwrap().session_id;

    service.end_session(id).await.unwrap();
    assert!(matches!(
        service.send_message(id, "42", None).await,
        Err(ConversationError::UnknownSession(_))
    ));
    assert!(service.end_session(id).await.is_err());
}
