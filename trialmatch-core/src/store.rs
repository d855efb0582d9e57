//! Durable stores for pre-screen results.
//!
//! Provides a `ResultStore` trait with implementations for:
//! - **Postgres** via `sqlx`, JSONB columns for the structured fields
//! - **Supabase** via its REST interface (`/rest/v1/{table}`)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};
use crate::models::ResultRecord;

// ============================================================================
// ResultStore trait
// ============================================================================

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write one record. No retry; the caller decides what to report.
    async fn insert(&self, record: &ResultRecord) -> Result<(), StoreError>;

    /// Cheap connectivity probe used by `/health`.
    async fn health_check(&self) -> Result<String, StoreError>;

    /// Prepare the destination at startup. Most backends have nothing to do.
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing store configuration: {0}")]
    MissingConfig(String),
}

/// Everything a store implementation may need.
pub struct StoreSettings {
    pub config: StoreConfig,
    pub pool: Option<PgPool>,
    pub supabase_key: Option<String>,
}

/// Create the configured store. Postgres needs a pool; Supabase needs a URL
/// and a service key (falls back to `SUPABASE_SERVICE_KEY`).
pub fn create_store(settings: StoreSettings) -> Result<Box<dyn ResultStore>, StoreError> {
    match settings.config.backend {
        StoreBackend::Postgres => {
            let pool = settings
                .pool
                .ok_or_else(|| StoreError::MissingConfig("database pool".to_string()))?;
            Ok(Box::new(PgResultStore::new(pool, settings.config.table)))
        }
        StoreBackend::Supabase => {
            let url = settings
                .config
                .supabase_url
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| StoreError::MissingConfig("store.supabase_url".to_string()))?;
            let key = settings
                .supabase_key
                .or_else(|| std::env::var("SUPABASE_SERVICE_KEY").ok())
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| StoreError::MissingConfig("SUPABASE_SERVICE_KEY".to_string()))?;
            Ok(Box::new(SupabaseResultStore::new(url, key, settings.config.table)?))
        }
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && table.len() <= 63
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit())
}

// ============================================================================
// PgResultStore
// ============================================================================

pub struct PgResultStore {
    pool: PgPool,
    table: String,
}

impl PgResultStore {
    pub fn new(pool: PgPool, table: String) -> Self {
        Self { pool, table }
    }

    fn checked_table(&self) -> Result<&str, StoreError> {
        if valid_table_name(&self.table) {
            Ok(&self.table)
        } else {
            Err(StoreError::MissingConfig(format!(
                "invalid table name '{}'",
                self.table
            )))
        }
    }

    /// Create the results table when it does not exist yet.
    pub async fn create_table(&self) -> Result<(), StoreError> {
        let table = self.checked_table()?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                trial_title TEXT,
                decision TEXT NOT NULL,
                rationale TEXT,
                asked_questions JSONB,
                answers JSONB,
                parsed_rules JSONB,
                contact_email TEXT,
                contact_phone TEXT,
                consent BOOLEAN NOT NULL DEFAULT false,
                session_id TEXT NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_session ON {table} (session_id)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of rows written for one session.
    pub async fn count_for_session(&self, session_id: &str) -> Result<i64, StoreError> {
        let table = self.checked_table()?;
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {table} WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn insert(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let table = self.checked_table()?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {table}
                (created_at, trial_title, decision, rationale, asked_questions, answers,
                 parsed_rules, contact_email, contact_phone, consent, session_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#
        ))
        .bind(record.created_at)
        .bind(&record.trial_title)
        .bind(record.decision.as_str())
        .bind(&record.rationale)
        .bind(&record.asked_questions)
        .bind(&record.answers)
        .bind(&record.parsed_rules)
        .bind(&record.contact_email)
        .bind(&record.contact_phone)
        .bind(record.consent)
        .bind(&record.session_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(table, session_id = %record.session_id, decision = %record.decision, "Result row inserted");
        Ok(())
    }

    async fn health_check(&self) -> Result<String, StoreError> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.create_table().await
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// SupabaseResultStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct SupabaseResultStore {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
}

impl SupabaseResultStore {
    pub fn new(base_url: String, api_key: String, table: String) -> Result<Self, StoreError> {
        if api_key.is_empty() {
            return Err(StoreError::MissingConfig("SUPABASE_SERVICE_KEY".to_string()));
        }

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            table,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(body);

        tracing::error!(code = status.as_u16(), message = %message, "Supabase API error");
        Err(StoreError::Api {
            code: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ResultStore for SupabaseResultStore {
    async fn insert(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let row = json!({
            "created_at": record.created_at.to_rfc3339(),
            "trial_title": record.trial_title,
            "decision": record.decision.as_str(),
            "rationale": record.rationale,
            "asked_questions": record.asked_questions,
            "answers": record.answers,
            "parsed_rules": record.parsed_rules,
            "contact_email": record.contact_email,
            "contact_phone": record.contact_phone,
            "consent": record.consent,
            "session_id": record.session_id,
        });

        let response = self
            .client
            .post(self.table_url())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;

        Self::check_status(response).await?;
        tracing::debug!(table = %self.table, session_id = %record.session_id, "Result row posted");
        Ok(())
    }

    async fn health_check(&self) -> Result<String, StoreError> {
        let response = self
            .client
            .get(self.table_url())
            .query(&[("select", "session_id"), ("limit", "1")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(format!("supabase table {}", self.table))
    }

    fn name(&self) -> &str {
        "supabase"
    }
}

// ============================================================================
// TESTS
// ============================================================================
