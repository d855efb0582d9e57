pub mod chat;
pub mod contact;
pub mod criteria;
pub mod payload;
pub mod record;
pub mod session;
pub mod turn;

pub use chat::{ChatMessage, ChatRole};
pub use contact::{ContactForm, ContactRecord};
pub use criteria::CriteriaSet;
pub use payload::{ContactInfo, DecisionPayload, PAYLOAD_KEYS};
pub use record::ResultRecord;
pub use session::SessionMode;
pub use turn::{RenderedTurn, Speaker, Turn, TurnKind};
