use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chat::ChatMessage;
use super::contact::ContactRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnKind {
    Plain,
    ContactSnapshot { contact: ContactRecord },
}

/// One message unit in a session transcript.
///
/// `text` is exactly what the reasoning service sees. `display` is the
/// user-safe rendering when it differs (sanitized replies, fallback prompts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub display: Option<String>,
    pub visible: bool,
    pub kind: TurnKind,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn new(speaker: Speaker, text: String, display: Option<String>, visible: bool, kind: TurnKind) -> Self {
        Self {
            speaker,
            text,
            display,
            visible,
            kind,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text.into(), None, true, TurnKind::Plain)
    }

    pub fn hidden_user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text.into(), None, false, TurnKind::Plain)
    }

    /// Assistant text authored locally (e.g. the static greeting).
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, text.into(), None, true, TurnKind::Plain)
    }

    /// A reasoning-service reply. Without a display rendering the raw reply is
    /// kept for the service-bound history only.
    pub fn assistant_reply(raw: impl Into<String>, display: Option<String>) -> Self {
        let visible = display.is_some();
        Self::new(Speaker::Assistant, raw.into(), display, visible, TurnKind::Plain)
    }

    pub fn contact_snapshot(contact: ContactRecord) -> Self {
        Self::new(
            Speaker::Assistant,
            String::new(),
            None,
            true,
            TurnKind::ContactSnapshot { contact },
        )
    }

    /// Service-bound form of this turn. Snapshots carry no text of their own;
    /// the hidden contact turn already hands the data to the service.
    pub fn to_chat_message(&self) -> Option<ChatMessage> {
        if matches!(self.kind, TurnKind::ContactSnapshot { .. }) {
            return None;
        }
        Some(match self.speaker {
            Speaker::User => ChatMessage::user(self.text.clone()),
            Speaker::Assistant => ChatMessage::assistant(self.text.clone()),
        })
    }

    pub fn render(&self) -> Option<RenderedTurn> {
        if !self.visible {
            return None;
        }
        let text = match &self.kind {
            TurnKind::ContactSnapshot { contact } => contact.to_snapshot_text(),
            TurnKind::Plain => self.display.clone().unwrap_or_else(|| self.text.clone()),
        };
        Some(RenderedTurn {
            speaker: self.speaker,
            text,
            kind: self.kind.clone(),
            created_at: self.created_at,
        })
    }
}

/// What the presentation layer gets to see of a visible turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedTurn {
    pub speaker: Speaker,
    pub text: String,
    pub kind: TurnKind,
    pub created_at: DateTime<Utc>,
}
