use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Bootstrapping,
    Interviewing,
    AwaitingContact,
    Complete,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrapping => "bootstrapping",
            Self::Interviewing => "interviewing",
            Self::AwaitingContact => "awaiting_contact",
            Self::Complete => "complete",
        }
    }

    /// Free-text input is accepted in these modes; `Complete` re-enters the interview.
    pub fn accepts_free_text(&self) -> bool {
        matches!(self, Self::Interviewing | Self::Complete)
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
