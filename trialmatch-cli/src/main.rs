//! trialmatch-cli: terminal pre-screen chat against the TrialMatch HTTP API
//!
//! # Subcommands
//! - `chat`              interactive pre-screen session
//! - `status`            show server health
//! - `transcript <id>`   print a session's visible transcript

use std::io::{self, BufRead, Write};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "trialmatch-cli",
    version,
    about = "TrialMatch clinical-trial pre-screen chat"
)]
struct Cli {
    /// TrialMatch HTTP server URL (overrides TRIALMATCH_HTTP_URL env var)
    #[arg(long, env = "TRIALMATCH_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start an interactive pre-screen session
    Chat,

    /// Show TrialMatch server status
    Status,

    /// Print the visible transcript of a session
    Transcript {
        /// Session id returned when the chat started
        session_id: String,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RenderedTurn {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub mode: String,
    pub transcript: Vec<RenderedTurn>,
}

#[derive(Debug, Deserialize)]
pub struct PersistOutcome {
    pub saved: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct TurnOutcome {
    pub mode: String,
    pub appended: Vec<RenderedTurn>,
    pub persisted: Option<PersistOutcome>,
}

#[derive(Debug, Serialize)]
pub struct ContactForm {
    pub email: String,
    pub phone: String,
    pub consent: bool,
}

/// A non-2xx reply from the server, decoded from its JSON error body.
#[derive(Debug)]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub fields: Vec<String>,
}

impl ApiError {
    pub fn from_body(status: u16, body: &Value) -> Self {
        let fields = body["fields"]
            .as_object()
            .map(|f| {
                f.values()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            status,
            code: body["code"].as_str().unwrap_or("unknown").to_string(),
            message: body["error"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {status}")),
            fields,
        }
    }
}

// ============================================================================
// HTTP Client
// ============================================================================

struct ApiClient {
    http: reqwest::blocking::Client,
    base: String,
}

impl ApiClient {
    fn new(base: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Transport failures are `Err`; server-side rejections are `Ok(Err(..))`
    /// so the chat loop can show them and carry on.
    fn send(&self, req: reqwest::blocking::RequestBuilder) -> anyhow::Result<Result<Value, ApiError>> {
        let resp = req.send()?;
        let status = resp.status();
        let body: Value = resp.json().unwrap_or(Value::Null);
        if status.is_success() {
            Ok(Ok(body))
        } else {
            Ok(Err(ApiError::from_body(status.as_u16(), &body)))
        }
    }

    fn get(&self, path: &str) -> anyhow::Result<Result<Value, ApiError>> {
        self.send(self.http.get(format!("{}{}", self.base, path)))
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<Result<Value, ApiError>> {
        self.send(self.http.post(format!("{}{}", self.base, path)).json(body))
    }
}

fn decode<T: serde::de::DeserializeOwned>(reply: Result<Value, ApiError>) -> Result<T, ApiError> {
    let body = reply?;
    serde_json::from_value(body).map_err(|e| ApiError {
        status: 200,
        code: "bad_response".to_string(),
        message: format!("failed to parse server response: {e}"),
        fields: Vec::new(),
    })
}

// ============================================================================
// Rendering helpers
// ============================================================================

pub fn format_turn(turn: &RenderedTurn) -> String {
    let label = match turn.speaker.as_str() {
        "user" => "You",
        _ => "Assistant",
    };
    format!("{label}: {}", turn.text)
}

/// Accepts the usual spellings of yes; anything else is no.
pub fn parse_yes(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "true" | "1" | "on"
    )
}

fn print_turns(turns: &[RenderedTurn], skip_user: bool) {
    for turn in turns {
        if skip_user && turn.speaker == "user" {
            continue;
        }
        println!("{}\n", format_turn(turn));
    }
}

/// `Ok(None)` on end of input.
fn read_line(input: &mut impl BufRead, prompt: &str) -> io::Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn read_contact_form(input: &mut impl BufRead) -> io::Result<Option<ContactForm>> {
    println!("Please complete the contact form.");
    let Some(email) = read_line(input, "  Email: ")? else {
        return Ok(None);
    };
    let Some(phone) = read_line(input, "  Phone: ")? else {
        return Ok(None);
    };
    let Some(consent) = read_line(input, "  May the study team contact you? [y/N]: ")? else {
        return Ok(None);
    };
    Ok(Some(ContactForm {
        email,
        phone,
        consent: parse_yes(&consent),
    }))
}

// ============================================================================
// Commands
// ============================================================================

fn do_chat(server: &str) -> anyhow::Result<()> {
    // Replies can take a while when the reasoning service retries.
    let client = ApiClient::new(server, 180)?;

    let view: SessionView = match decode(client.post("/sessions", &serde_json::json!({}))?) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("trialmatch-cli: could not start a session: {}", e.message);
            std::process::exit(1);
        }
    };
    let session_id = view.session_id;
    let mut mode = view.mode;
    print_turns(&view.transcript, false);

    let stdin = io::stdin();
    let mut input = stdin.lock();

    loop {
        let reply = if mode == "awaiting_contact" {
            let Some(form) = read_contact_form(&mut input)? else {
                break;
            };
            client.post(&format!("/sessions/{session_id}/contact"), &form)?
        } else {
            let Some(text) = read_line(&mut input, "> ")? else {
                break;
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if text == "/quit" {
                break;
            }
            client.post(
                &format!("/sessions/{session_id}/messages"),
                &serde_json::json!({ "text": text }),
            )?
        };

        match decode::<TurnOutcome>(reply) {
            Ok(outcome) => {
                println!();
                print_turns(&outcome.appended, true);
                if let Some(persisted) = &outcome.persisted {
                    let mark = if persisted.saved { "✅" } else { "❌" };
                    println!("{mark} {}\n", persisted.message);
                }
                if outcome.mode == "complete" && mode != "complete" {
                    println!("Pre-screen complete. Type /quit to leave.\n");
                }
                mode = outcome.mode;
            }
            Err(e) if e.fields.is_empty() => {
                eprintln!("trialmatch-cli: {}", e.message);
                if e.code == "unknown_session" {
                    std::process::exit(1);
                }
            }
            Err(e) => {
                for field in &e.fields {
                    eprintln!("  ✗ {field}");
                }
            }
        }
    }

    println!("Session id: {session_id}");
    Ok(())
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let client = ApiClient::new(server, 10)?;

    match client.get("/health") {
        Ok(Ok(body)) => {
            println!("TrialMatch server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:           {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:             {}", body["store"].as_str().unwrap_or("?"));
            println!("Reasoning:         {}", body["reasoning"].as_str().unwrap_or("?"));
            println!("Model:             {}", body["model"].as_str().unwrap_or("?"));
            println!("Active sessions:   {}", body["active_sessions"].as_u64().unwrap_or(0));
            println!("Socket:            {}", body["socket"].as_str().unwrap_or("?"));
        }
        Ok(Err(e)) => {
            eprintln!("trialmatch-cli: server unhealthy (HTTP {}): {}", e.status, e.message);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("trialmatch-cli: cannot reach {server}: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn do_transcript(server: &str, session_id: &str) -> anyhow::Result<()> {
    let client = ApiClient::new(server, 10)?;

    match decode::<SessionView>(client.get(&format!("/sessions/{session_id}"))?) {
        Ok(view) => {
            println!("Session {} ({})\n", view.session_id, view.mode);
            print_turns(&view.transcript, false);
        }
        Err(e) => {
            eprintln!("trialmatch-cli: {}", e.message);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat => do_chat(&server),
        Commands::Status => do_status(&server),
        Commands::Transcript { session_id } => do_transcript(&server, &session_id),
    };

    if let Err(e) = result {
        eprintln!("trialmatch-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
