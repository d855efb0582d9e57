pub mod config;
pub mod db;
pub mod decision;
pub mod error;
pub mod extract;
pub mod ipc;
pub mod models;
pub mod prompt;
pub mod reasoning;
pub mod store;
pub mod trigger;
pub mod validate;

pub use config::TrialMatchConfig;
pub use decision::{coerce_consent, normalize_decision, Decision};
pub use error::TrialMatchError;
pub use extract::{extract_payload, is_terminal, sanitize_for_display, scan_payload, PayloadScan};
pub use ipc::{PrescreenRequest, PrescreenResponse};
pub use models::{
    ChatMessage, ChatRole, ContactForm, ContactRecord, CriteriaSet, DecisionPayload,
    RenderedTurn, ResultRecord, SessionMode, Speaker, Turn, TurnKind,
};
pub use reasoning::{
    create_backend, OpenAiChatClient, ReasoningBackend, ReasoningConfig, ReasoningError,
};
pub use store::{
    create_store, PgResultStore, ResultStore, StoreError, StoreSettings, SupabaseResultStore,
};
pub use trigger::ContactTrigger;
pub use validate::{validate_contact_form, ContactFieldErrors};
