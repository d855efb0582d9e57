//! Conversation state machine for one pre-screen session.
//!
//! A `Conversation` owns the mode and the append-only transcript. The
//! `PrescreenEngine` drives it: it builds the service-bound history, calls the
//! reasoning backend and routes the reply through contact detection, payload
//! extraction and persistence. Turns are only appended after a successful
//! dispatch, so a failed call leaves the session exactly as it was.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use trialmatch_core::config::ConversationConfig;
use trialmatch_core::prompt::{build_system_prompt, criteria_seed};
use trialmatch_core::{
    is_terminal, sanitize_for_display, scan_payload, validate_contact_form, ChatMessage,
    ContactFieldErrors, ContactForm, ContactTrigger, CriteriaSet, ReasoningBackend,
    ReasoningError, RenderedTurn, ResultStore, SessionMode, TrialMatchConfig, Turn,
};

use super::first_turn::{create_first_turn, FirstTurn, FirstTurnStrategy};
use super::persist::{PersistOutcome, ResultPersister};

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Reasoning service failed: {0}")]
    Upstream(#[from] ReasoningError),

    #[error("Session is busy with another request")]
    Busy,

    #[error("Contact form is pending; submit email, phone and consent")]
    ContactFormPending,

    #[error("Session is not waiting for contact details")]
    NotAwaitingContact,

    #[error("Invalid contact details: {0}")]
    InvalidContact(ContactFieldErrors),

    #[error("Session has not started")]
    NotStarted,

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Unknown session: {0}")]
    UnknownSession(Uuid),
}

impl ConversationError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Upstream(_) => "upstream",
            Self::Busy => "busy",
            Self::ContactFormPending => "contact_form_pending",
            Self::NotAwaitingContact => "not_awaiting_contact",
            Self::InvalidContact(_) => "invalid_contact",
            Self::NotStarted => "not_started",
            Self::EmptyMessage => "empty_message",
            Self::UnknownSession(_) => "unknown_session",
        }
    }

    /// Whether repeating the same input may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Busy)
    }
}

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone)]
pub struct Conversation {
    id: Uuid,
    mode: SessionMode,
    transcript: Vec<Turn>,
    created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            mode: SessionMode::Bootstrapping,
            transcript: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub fn visible_transcript(&self) -> Vec<RenderedTurn> {
        self.transcript.iter().filter_map(Turn::render).collect()
    }

    /// System instruction, every recorded turn (hidden ones included), then
    /// the turns about to be appended.
    fn history(&self, system_prompt: &str, pending: &[&Turn]) -> Vec<ChatMessage> {
        std::iter::once(ChatMessage::system(system_prompt))
            .chain(
                self.transcript
                    .iter()
                    .chain(pending.iter().copied())
                    .filter_map(Turn::to_chat_message),
            )
            .collect()
    }

    fn append(&mut self, turn: Turn) -> Option<RenderedTurn> {
        let rendered = turn.render();
        self.transcript.push(turn);
        rendered
    }

    fn set_mode(&mut self, mode: SessionMode) {
        if self.mode != mode {
            tracing::info!(session_id = %self.id, from = %self.mode, to = %mode, "Session mode changed");
            self.mode = mode;
        }
    }
}

/// Result of one accepted input.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub session_id: Uuid,
    pub mode: SessionMode,
    /// Visible turns appended by this input, in order.
    pub appended: Vec<RenderedTurn>,
    /// Present only when the reply was terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<PersistOutcome>,
}

impl TurnOutcome {
    fn new(conv: &Conversation, appended: Vec<RenderedTurn>, persisted: Option<PersistOutcome>) -> Self {
        Self {
            session_id: conv.id,
            mode: conv.mode,
            appended,
            persisted,
        }
    }
}

// ============================================================================
// PrescreenEngine
// ============================================================================

pub struct PrescreenEngine {
    backend: Arc<dyn ReasoningBackend>,
    first_turn: Arc<dyn FirstTurnStrategy>,
    persister: ResultPersister,
    trigger: ContactTrigger,
    system_prompt: String,
    seed: String,
    contact_fallback: String,
    stream: bool,
}

impl PrescreenEngine {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        first_turn: Arc<dyn FirstTurnStrategy>,
        store: Arc<dyn ResultStore>,
        criteria: &CriteriaSet,
        conversation: &ConversationConfig,
    ) -> Self {
        Self {
            backend,
            first_turn,
            persister: ResultPersister::new(store),
            trigger: ContactTrigger::new(conversation.contact_token.clone()),
            system_prompt: build_system_prompt(&conversation.contact_token),
            seed: criteria_seed(criteria),
            contact_fallback: conversation.contact_fallback.clone(),
            stream: false,
        }
    }

    pub fn from_config(
        config: &TrialMatchConfig,
        backend: Arc<dyn ReasoningBackend>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let first_turn = create_first_turn(
            config.conversation.first_turn,
            &config.conversation.greeting,
            backend.clone(),
        );
        Self::new(backend, first_turn, store, &config.criteria, &config.conversation)
            .with_streaming(config.reasoning.stream)
    }

    /// Use the backend's streaming call even when nobody consumes fragments.
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn contact_token(&self) -> &str {
        self.trigger.token()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Bootstrapping → Interviewing. Appends the hidden criteria seed and the
    /// opening turn. A session that already started is returned unchanged.
    pub async fn start(&self, conv: &mut Conversation) -> Result<TurnOutcome, ConversationError> {
        if conv.mode != SessionMode::Bootstrapping {
            return Ok(TurnOutcome::new(conv, Vec::new(), None));
        }

        let seed = Turn::hidden_user(self.seed.clone());
        let history = conv.history(&self.system_prompt, &[&seed]);

        let opening = self.first_turn.open(&history).await.map_err(|e| {
            tracing::warn!(session_id = %conv.id, strategy = self.first_turn.name(), error = %e, "Session bootstrap failed");
            e
        })?;

        let mut appended: Vec<RenderedTurn> = conv.append(seed).into_iter().collect();
        tracing::info!(session_id = %conv.id, strategy = self.first_turn.name(), "Session started");

        match opening {
            FirstTurn::Greeting(text) => {
                appended.extend(conv.append(Turn::assistant(text)));
                conv.set_mode(SessionMode::Interviewing);
                Ok(TurnOutcome::new(conv, appended, None))
            }
            FirstTurn::Reply(raw) => Ok(self.handle_reply(conv, raw, true, appended).await),
        }
    }

    /// Free-text participant input. `fragments` receives raw reply fragments
    /// when the caller wants to stream.
    pub async fn submit_message(
        &self,
        conv: &mut Conversation,
        text: &str,
        fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<TurnOutcome, ConversationError> {
        if !conv.mode.accepts_free_text() {
            return Err(match conv.mode {
                SessionMode::AwaitingContact => ConversationError::ContactFormPending,
                _ => ConversationError::NotStarted,
            });
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        let user_turn = Turn::user(text);
        let history = conv.history(&self.system_prompt, &[&user_turn]);
        let raw = self.dispatch(conv, &history, fragments).await?;

        let appended: Vec<RenderedTurn> = conv.append(user_turn).into_iter().collect();
        Ok(self.handle_reply(conv, raw, true, appended).await)
    }

    /// AwaitingContact → Interviewing or Complete. Validation failure leaves
    /// the session untouched and reports every bad field.
    pub async fn submit_contact(
        &self,
        conv: &mut Conversation,
        form: &ContactForm,
        fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<TurnOutcome, ConversationError> {
        if conv.mode != SessionMode::AwaitingContact {
            return Err(ConversationError::NotAwaitingContact);
        }

        let contact = validate_contact_form(form).map_err(ConversationError::InvalidContact)?;

        let hidden = Turn::hidden_user(contact.to_service_text());
        let history = conv.history(&self.system_prompt, &[&hidden]);
        let raw = self.dispatch(conv, &history, fragments).await?;

        let mut appended: Vec<RenderedTurn> = conv.append(hidden).into_iter().collect();
        appended.extend(conv.append(Turn::contact_snapshot(contact)));
        tracing::info!(session_id = %conv.id, "Contact details submitted");

        // The contact is already collected, so the reply is not checked for
        // another form request.
        Ok(self.handle_reply(conv, raw, false, appended).await)
    }

    async fn dispatch(
        &self,
        conv: &Conversation,
        history: &[ChatMessage],
        fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<String, ConversationError> {
        let result = match fragments {
            Some(tx) => self.backend.complete_streaming(history, tx).await,
            None if self.stream => {
                let (tx, _rx) = mpsc::unbounded_channel();
                self.backend.complete_streaming(history, tx).await
            }
            None => self.backend.complete(history).await,
        };

        match result {
            Ok(raw) => {
                tracing::debug!(
                    session_id = %conv.id,
                    backend = self.backend.name(),
                    messages = history.len(),
                    reply_len = raw.len(),
                    "Reply received"
                );
                Ok(raw)
            }
            Err(e) => {
                tracing::warn!(session_id = %conv.id, backend = self.backend.name(), error = %e, "Dispatch failed; session unchanged");
                Err(e.into())
            }
        }
    }

    /// Reply branch: contact trigger first, then terminal detection.
    async fn handle_reply(
        &self,
        conv: &mut Conversation,
        raw: String,
        detect_contact: bool,
        mut appended: Vec<RenderedTurn>,
    ) -> TurnOutcome {
        let display = sanitize_for_display(&raw, self.trigger.token());

        if detect_contact {
            if let Some(rule) = self.trigger.matched_rule(&raw) {
                tracing::info!(session_id = %conv.id, rule, "Contact form requested");
                let shown = if display.is_empty() {
                    self.contact_fallback.clone()
                } else {
                    display
                };
                appended.extend(conv.append(Turn::assistant_reply(raw, Some(shown))));
                conv.set_mode(SessionMode::AwaitingContact);
                return TurnOutcome::new(conv, appended, None);
            }
        }

        let scan = scan_payload(&raw);
        let terminal = is_terminal(&scan, &raw);

        let persisted = if terminal {
            let session_id = conv.id.to_string();
            Some(self.persister.persist(&session_id, scan.payload()).await)
        } else {
            None
        };

        let shown = (!display.is_empty()).then_some(display);
        appended.extend(conv.append(Turn::assistant_reply(raw, shown)));
        conv.set_mode(if terminal {
            SessionMode::Complete
        } else {
            SessionMode::Interviewing
        });

        TurnOutcome::new(conv, appended, persisted)
    }
}
