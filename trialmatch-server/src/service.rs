//! Session-level operations shared by the IPC router and the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use trialmatch_core::{ContactForm, ReasoningBackend, RenderedTurn, ResultStore, SessionMode, TrialMatchConfig};

use crate::subsystems::conversation::{Conversation, ConversationError, PrescreenEngine, TurnOutcome};
use crate::subsystems::sessions::SessionStore;

/// Snapshot of a session as the presentation layer sees it.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub mode: SessionMode,
    pub created_at: DateTime<Utc>,
    pub transcript: Vec<RenderedTurn>,
}

impl SessionView {
    fn of(conv: &Conversation) -> Self {
        Self {
            session_id: conv.id(),
            mode: conv.mode(),
            created_at: conv.created_at(),
            transcript: conv.visible_transcript(),
        }
    }
}

pub struct PrescreenService {
    engine: PrescreenEngine,
    sessions: Arc<SessionStore>,
    store: Arc<dyn ResultStore>,
    config: TrialMatchConfig,
}

impl PrescreenService {
    pub fn new(
        config: TrialMatchConfig,
        backend: Arc<dyn ReasoningBackend>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let engine = PrescreenEngine::from_config(&config, backend, store.clone());
        Self::with_engine(config, engine, store)
    }

    pub fn with_engine(config: TrialMatchConfig, engine: PrescreenEngine, store: Arc<dyn ResultStore>) -> Self {
        let idle = Duration::from_secs(config.conversation.session_idle_minutes * 60);
        Self {
            engine,
            sessions: Arc::new(SessionStore::new(idle)),
            store,
            config,
        }
    }

    pub fn config(&self) -> &TrialMatchConfig {
        &self.config
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    pub fn contact_token(&self) -> &str {
        self.engine.contact_token()
    }

    /// Create a session and run its opening turn. A session whose bootstrap
    /// fails is discarded; the caller simply starts again.
    pub async fn start_session(&self) -> Result<SessionView, ConversationError> {
        let (id, conversation) = self.sessions.create().await;
        let mut conv = conversation.lock().await;

        if let Err(e) = self.engine.start(&mut conv).await {
            drop(conv);
            self.sessions.end(id).await;
            return Err(e);
        }
        Ok(SessionView::of(&conv))
    }

    /// Waits for an in-flight input on the same session to finish.
    pub async fn session(&self, id: Uuid) -> Result<SessionView, ConversationError> {
        let conversation = self.sessions.get(id).await?;
        let conv = conversation.lock().await;
        Ok(SessionView::of(&conv))
    }

    pub async fn send_message(
        &self,
        id: Uuid,
        text: &str,
        fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<TurnOutcome, ConversationError> {
        let mut conv = self.sessions.acquire(id).await?;
        self.engine.submit_message(&mut conv, text, fragments).await
    }

    pub async fn submit_contact(
        &self,
        id: Uuid,
        form: &ContactForm,
        fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<TurnOutcome, ConversationError> {
        let mut conv = self.sessions.acquire(id).await?;
        self.engine.submit_contact(&mut conv, form, fragments).await
    }

    pub async fn end_session(&self, id: Uuid) -> Result<(), ConversationError> {
        if self.sessions.end(id).await {
            Ok(())
        } else {
            Err(ConversationError::UnknownSession(id))
        }
    }

    /// Store connectivity plus static wiring details.
    pub async fn health(&self) -> Result<serde_json::Value, String> {
        let store_status = self
            .store
            .health_check()
            .await
            .map_err(|e| format!("{} store check failed: {e}", self.store.name()))?;

        Ok(serde_json::json!({
            "status": "healthy",
            "store": self.store.name(),
            "store_status": store_status,
            "reasoning": self.engine.backend_name(),
            "model": self.config.reasoning.model,
            "active_sessions": self.sessions.len().await,
        }))
    }
}
