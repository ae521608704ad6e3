//! ChatGate - chat message-processing pipeline
//!
//! Operator CLI: configuration checks, persisted memory statistics and a
//! local REPL that drives the full pipeline against loopback backends.

use anyhow::Result;
use chatgate::{
    config::ChatGateConfig,
    memory::{JsonFileStore, MemoryScope, MemoryStore},
    providers::{EchoBackend, GenerationBackend},
    ChatService, InboundMessage,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatgate")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Chat message-processing pipeline with provider fallback")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CHATGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and probe storage
    Check,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },

    /// Summarize persisted conversation memory
    Stats,

    /// Interactive pipeline over stdin using loopback backends
    Repl {
        /// Caller id for every message
        #[arg(long, default_value = "local-user")]
        caller: String,

        /// Channel id for every message
        #[arg(long, default_value = "local")]
        channel: String,

        /// Optional group id
        #[arg(long)]
        group: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (stderr keeps the REPL's stdout clean)
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("chatgate={}", log_level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(
            cli.json_logs
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.json_logs)
                .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let config_path = cli.config.or_else(default_config_path);
    let config = match &config_path {
        Some(path) => ChatGateConfig::load(path)?,
        None => ChatGateConfig::default(),
    };

    match cli.command {
        Commands::Check => run_check(&config, config_path.as_ref()).await?,
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
        Commands::Stats => show_stats(&config).await?,
        Commands::Repl {
            caller,
            channel,
            group,
        } => run_repl(config, caller, channel, group).await?,
    }

    Ok(())
}

/// `<config dir>/chatgate/config.toml`, if it exists.
fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir()
        .map(|p| p.join("chatgate").join("config.toml"))
        .filter(|p| p.exists())
}

async fn run_check(config: &ChatGateConfig, path: Option<&PathBuf>) -> Result<()> {
    println!("ChatGate check");
    println!();

    match path {
        Some(path) => println!("  ✓ Configuration file: {}", path.display()),
        None => println!("  ℹ No configuration file found (using defaults)"),
    }

    config.validate()?;
    println!("  ✓ Configuration valid");
    println!(
        "  ✓ {} personalities, {} providers ({})",
        config.personalities.len(),
        config.providers.priority.len(),
        config.providers.priority.join(" → ")
    );

    if config.storage.persist {
        let store = JsonFileStore::new(&config.storage.base_dir);
        match store.create_dirs().await {
            Ok(()) => println!("  ✓ Storage writable: {}", store.base_dir().display()),
            Err(e) => println!(
                "  ✗ Storage unavailable ({}): {} (memory-only until fixed)",
                store.base_dir().display(),
                e
            ),
        }
    } else {
        println!("  ℹ Persistence disabled");
    }

    println!();
    println!("Check complete!");
    Ok(())
}

fn show_config(config: Option<&ChatGateConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}

async fn show_stats(config: &ChatGateConfig) -> Result<()> {
    let store = JsonFileStore::new(&config.storage.base_dir);
    println!("Persisted memory at {}", store.base_dir().display());
    for scope in [MemoryScope::Channel, MemoryScope::Group] {
        let items = store.load_all(scope).await?;
        let turns: usize = items.iter().map(|m| m.turns.len()).sum();
        let bytes: usize = items.iter().map(|m| m.total_bytes()).sum();
        println!(
            "  {:<8} {:>6} scopes {:>8} turns {:>10} bytes",
            scope.to_string(),
            items.len(),
            turns,
            bytes
        );
    }
    Ok(())
}

async fn run_repl(
    config: ChatGateConfig,
    caller: String,
    channel: String,
    group: Option<String>,
) -> Result<()> {
    let backends: Vec<Arc<dyn GenerationBackend>> = config
        .providers
        .priority
        .iter()
        .map(|id| Arc::new(EchoBackend::new(id.clone())) as Arc<dyn GenerationBackend>)
        .collect();
    let service = ChatService::new(&config, backends).await?;
    service
        .start_maintenance(
            Duration::from_secs(config.maintenance.interval_secs.max(1)),
            Duration::from_secs(config.rate_limiting.caller_retention_secs),
        )
        .await;

    println!("ChatGate REPL (loopback backends). /help for commands, Ctrl+D to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !repl_command(&service, &channel, command).await? {
                break;
            }
            continue;
        }

        let mut message = InboundMessage::new(caller.as_str(), channel.as_str(), line);
        if let Some(group) = &group {
            message = message.in_group(group.as_str());
        }
        match service.process(&message).await {
            Ok(reply) => println!("[{} via {}] {}", reply.personality_key, reply.provider_id, reply.text),
            Err(e) if e.is_user_visible() => println!("! {}", e),
            Err(e) => {
                tracing::debug!(error = %e, "Request failed");
                println!("! Service unavailable, try again later");
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

/// Handle a slash command. Returns `false` to quit.
async fn repl_command(service: &ChatService, channel: &str, command: &str) -> Result<bool> {
    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit"), _) | (Some("exit"), _) => return Ok(false),
        (Some("personalities"), _) => {
            let list = service.personality_summaries(Some(channel)).await;
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        (Some("personality"), Some(key)) => match service.set_personality(channel, key).await {
            Ok(p) => println!("Personality for {} set to {}", channel, p.display_name),
            Err(e) => println!("! {}", e),
        },
        (Some("providers"), _) => {
            let list = service.provider_summaries(Some(channel)).await;
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        (Some("prefer"), Some(id)) => match service.set_preferred_provider(channel, id).await {
            Ok(()) => println!("Preferred provider for {} set to {}", channel, id),
            Err(e) => println!("! {}", e),
        },
        (Some("clear"), _) => {
            if service.clear_history(channel).await {
                println!("History cleared");
            } else {
                println!("No history for {}", channel);
            }
        }
        (Some("stats"), _) => {
            let stats = service.stats_summary().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        _ => {
            println!("Commands: /personalities /personality <key> /providers /prefer <id> /clear /stats /quit");
        }
    }
    Ok(true)
}
