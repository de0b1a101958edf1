use std::sync::Arc;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dashboard;
mod line;
mod llm;
mod memory;
mod server;

use config::{AppConfig, Credentials, StoreBackend};
use line::LineClient;
use llm::GeminiClient;
use memory::{InMemoryStore, MemoryManager, MemoryStore, ResponseGenerator, SqliteStore};
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,adoka=debug".into()),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        None | Some("serve") => run_serve().await,
        Some("stats") => run_stats().await,
        Some("help") | Some("--help") | Some("-h") => {
            print_help();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    }
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn MemoryStore>> {
    match config.store_backend() {
        StoreBackend::Sqlite => {
            let store = SqliteStore::init(&config.db_path()).await?;
            tracing::info!(path = %store.db_path().display(), "sqlite memory store ready");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, conversations are lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

async fn run_serve() -> Result<()> {
    let config = AppConfig::load().map_err(|e| eyre!(e.to_string()))?;

    let credentials = match Credentials::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!();
            eprintln!("Set GEMINI_API_KEY, LINE_CHANNEL_ACCESS_TOKEN and LINE_CHANNEL_SECRET,");
            eprintln!("or put them in ./.env or ~/.adoka/.env");
            std::process::exit(1);
        }
    };

    let store = open_store(&config).await.map_err(|e| eyre!(e.to_string()))?;
    let backend = GeminiClient::new(
        credentials.gemini_api_key,
        config.model_base_url(),
        config.timeout(),
    )
    .map_err(|e| eyre!(e.to_string()))?;
    let generator = Arc::new(ResponseGenerator::new(
        Arc::new(backend),
        config.models(),
        config.timeout(),
    ));
    let settings = config.memory_settings().map_err(|e| eyre!(e.to_string()))?;

    tracing::info!(
        max_turns = settings.max_turns,
        max_short_term_messages = settings.max_short_term_messages,
        summarization = settings.summarization,
        model = generator.model_for(memory::ModelVariant::from_premium_flag(config.use_premium())),
        "memory manager configured"
    );

    let state = AppState {
        manager: Arc::new(MemoryManager::new(store, generator, settings)),
        replier: Arc::new(LineClient::new(credentials.line_access_token, None)),
        channel_secret: credentials.line_channel_secret,
        mention_name: config.mention_name(),
        premium: config.use_premium(),
    };

    server::serve(&config.bind(), state)
        .await
        .map_err(|e| eyre!(e.to_string()))
}

async fn run_stats() -> Result<()> {
    let config = AppConfig::load().map_err(|e| eyre!(e.to_string()))?;
    if config.store_backend() == StoreBackend::Memory {
        println!("The in-memory store keeps nothing between runs; no stats to show.");
        return Ok(());
    }

    let store = open_store(&config).await.map_err(|e| eyre!(e.to_string()))?;
    let records = store.list().await.map_err(|e| eyre!(e.to_string()))?;

    let status = dashboard::system_status(&records);
    println!("Participants:  {}", status.total_participants);
    println!("Active:        {}", status.active_participants);
    println!("Summarized:    {}", status.summarized_participants);
    println!("Stored turns:  {}", status.total_turns);
    println!();

    for s in dashboard::memory_stats(&records) {
        println!(
            "  {}  turns={} window={} summary={} last={}",
            s.participant_id,
            s.turn_count,
            s.short_term_count,
            if s.has_long_term_summary { "yes" } else { "no" },
            s.last_activity.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn print_help() {
    println!("adoka - LINE chat relay with hierarchical memory");
    println!();
    println!("USAGE:");
    println!("    adoka [serve]    Run the webhook server");
    println!("    adoka stats      Print memory statistics from the local store");
    println!("    adoka help       Show this help message");
    println!();
    println!(
        "ENVIRONMENT:
    GEMINI_API_KEY              Generative backend key (required for serve)
    LINE_CHANNEL_ACCESS_TOKEN   LINE reply token (required for serve)
    LINE_CHANNEL_SECRET         LINE webhook signing secret (required for serve)
    BOT_MENTION_NAME            Name that wakes the bot in groups (default あだT)
    ADOKA_CONFIG                Config file (default ~/.adoka/config.toml)
    RUST_LOG                    Log filter (default info,adoka=debug)"
    );
}
