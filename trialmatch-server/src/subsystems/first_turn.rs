//! How a session opens once the hidden criteria seed is in place.

use std::sync::Arc;

use async_trait::async_trait;
use trialmatch_core::config::FirstTurnMode;
use trialmatch_core::{ChatMessage, ReasoningBackend, ReasoningError};

/// What the opening strategy produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstTurn {
    /// Locally authored greeting; shown as-is and sent as assistant history.
    Greeting(String),
    /// Raw reasoning-service reply; goes through the normal reply branch.
    Reply(String),
}

#[async_trait]
pub trait FirstTurnStrategy: Send + Sync {
    /// `history` is the system instruction followed by the hidden seed.
    async fn open(&self, history: &[ChatMessage]) -> Result<FirstTurn, ReasoningError>;

    fn name(&self) -> &str;
}

/// Canned greeting, no service call.
pub struct StaticGreeting {
    greeting: String,
}

impl StaticGreeting {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }
}

#[async_trait]
impl FirstTurnStrategy for StaticGreeting {
    async fn open(&self, _history: &[ChatMessage]) -> Result<FirstTurn, ReasoningError> {
        Ok(FirstTurn::Greeting(self.greeting.clone()))
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Dispatches the seed and lets the service ask the first question.
pub struct LiveReasoning {
    backend: Arc<dyn ReasoningBackend>,
}

impl LiveReasoning {
    pub fn new(backend: Arc<dyn ReasoningBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl FirstTurnStrategy for LiveReasoning {
    async fn open(&self, history: &[ChatMessage]) -> Result<FirstTurn, ReasoningError> {
        self.backend.complete(history).await.map(FirstTurn::Reply)
    }

    fn name(&self) -> &str {
        "live"
    }
}

pub fn create_first_turn(
    mode: FirstTurnMode,
    greeting: &str,
    backend: Arc<dyn ReasoningBackend>,
) -> Arc<dyn FirstTurnStrategy> {
    match mode {
        FirstTurnMode::Static => Arc::new(StaticGreeting::new(greeting)),
        FirstTurnMode::Live => Arc::new(LiveReasoning::new(backend)),
    }
}
