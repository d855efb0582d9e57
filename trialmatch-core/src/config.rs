use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::models::CriteriaSet;

pub const DEFAULT_CONTACT_TOKEN: &str = "[CONTACT_INFO_FORM]";
pub const DEFAULT_TABLE: &str = "prescreen_contacts";

#[derive(Debug, Deserialize, Clone)]
pub struct TrialMatchConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub reasoning: ReasoningSettings,
    #[serde(default)]
    pub conversation: ConversationConfig,
    pub criteria: CriteriaSet,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Postgres,
    Supabase,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub table: String,
    pub supabase_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            table: DEFAULT_TABLE.to_string(),
            supabase_url: None,
        }
    }
}

/// `[reasoning]` section. The API key is read from `OPENAI_API_KEY`, never from the file.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReasoningSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub stream: bool,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.4,
            timeout_seconds: 120,
            max_retries: 3,
            retry_delay_ms: 1000,
            stream: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FirstTurnMode {
    /// Canned greeting, no reasoning-service call at session start.
    Static,
    /// Send the hidden criteria seed and use the reply as the first turn.
    Live,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    pub first_turn: FirstTurnMode,
    pub greeting: String,
    pub contact_fallback: String,
    pub contact_token: String,
    pub session_idle_minutes: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            first_turn: FirstTurnMode::Static,
            greeting: "Hi! I'll ask just a few quick questions to see if you may be a fit.\n\n\
                       First up: **How old are you?**"
                .to_string(),
            contact_fallback:
                "Great, you appear to qualify. Please complete the contact form below.".to_string(),
            contact_token: DEFAULT_CONTACT_TOKEN.to_string(),
            session_idle_minutes: 60,
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl TrialMatchConfig {
    /// Load from a TOML file, with `TRIALMATCH__SECTION__KEY` env overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("TRIALMATCH").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}
