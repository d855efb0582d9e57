use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};
use trialmatch_core::config::StoreBackend;
use trialmatch_core::{
    create_backend, create_store, ReasoningBackend, ReasoningConfig, ResultStore, StoreSettings,
    TrialMatchConfig,
};

use trialmatch_server::subsystems::sessions::run_session_sweeper;
use trialmatch_server::{server, PrescreenService};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "trialmatch.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match TrialMatchConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Connect to DB only when results go to Postgres
    let pool = match config.store.backend {
        StoreBackend::Postgres => match trialmatch_core::db::create_pool(&config.database).await {
            Ok(p) => Some(p),
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        },
        StoreBackend::Supabase => None,
    };

    let store: Arc<dyn ResultStore> = match create_store(StoreSettings {
        config: config.store.clone(),
        pool,
        supabase_key: None,
    }) {
        Ok(s) => Arc::from(s),
        Err(e) => {
            eprintln!("Failed to create result store: {}", e);
            std::process::exit(1);
        }
    };

    let reasoning_config = ReasoningConfig::from_settings(&config.reasoning, None);

    if args.health {
        match store.health_check().await {
            Ok(v) => println!("✅ {} store reachable: {}", store.name(), v),
            Err(e) => {
                println!("❌ {} store check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }

        if reasoning_config.api_key.is_empty() {
            println!("❌ OPENAI_API_KEY is not set");
            std::process::exit(1);
        }
        println!("✅ Reasoning service: {} ({})", reasoning_config.base_url, reasoning_config.model);

        println!("✅ TrialMatch health check passed");
        return Ok(());
    }

    if let Err(e) = store.ensure_schema().await {
        tracing::warn!(store = store.name(), error = %e, "Result table check failed; writes may fail");
    }

    let backend: Arc<dyn ReasoningBackend> = match create_backend(reasoning_config) {
        Ok(b) => Arc::from(b),
        Err(e) => {
            eprintln!("Failed to create reasoning backend: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        backend = backend.name(),
        store = store.name(),
        first_turn = ?config.conversation.first_turn,
        criteria = %config.criteria.title,
        "TrialMatch pre-screen service starting"
    );

    let service = Arc::new(PrescreenService::new(config.clone(), backend, store));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Idle-session sweeper
    tokio::spawn(run_session_sweeper(
        service.sessions(),
        config.conversation.sweep_interval_seconds,
        tx.subscribe(),
    ));

    // HTTP API, if enabled
    if config.http.enabled {
        let http_service = service.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = trialmatch_server::http::start_http_server(http_service, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, service, tx.subscribe()).await?;

    Ok(())
}
