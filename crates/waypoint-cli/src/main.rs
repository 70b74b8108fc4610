//! Waypoint CLI - inspect agent sessions from the command line
//!
//! Drives the same session core the agent runtime uses, against the
//! conversations stored on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use waypoint_core::config::ConfigManager;
use waypoint_core::session::{ChatMode, SessionManager, SessionStatus};
use waypoint_core::store::{Conversation, JsonConversationStore};

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect agent sessions, workspaces and configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Conversation store directory (defaults to the user data dir)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Config file (defaults to the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved runtime context of a conversation
    Resolve {
        /// Conversation id
        id: String,
    },

    /// Print status, pending question and pending permissions
    Status {
        /// Conversation id
        id: String,
    },

    /// Print (and persist) the agent workspace of a conversation
    Workspace {
        /// Conversation id
        id: String,
    },

    /// List stored conversations
    List,

    /// Show configuration
    Config {
        /// Set the fallback chat mode ("agent" or "acp agent") and save
        #[arg(long)]
        chat_mode: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(absolute(path))?,
        None => ConfigManager::new()?,
    };

    let default_filter = log_filter(cli.verbose, &config_manager.config().general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&default_filter))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = Arc::new(match &cli.store_dir {
        Some(dir) => JsonConversationStore::with_dir(absolute(dir)),
        None => JsonConversationStore::new(),
    });
    debug!("Conversation store: {}", store.dir().display());

    let (manager, _events) =
        SessionManager::new(store.clone(), Arc::new(config_manager.config().clone()));

    match cli.command {
        Commands::Resolve { id } => {
            let resolved = manager.resolve_session(&id).await;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Commands::Status { id } => {
            let session = manager.get_session(&id).await;
            let output = json!({
                "sessionId": session.session_id,
                "status": session.status,
                "chatMode": session.resolved.chat_mode,
                "pendingQuestion": session.runtime.pending_question,
                "pendingPermissions": session.runtime.pending_permissions(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            if session.status == SessionStatus::WaitingQuestion {
                eprintln!("{}", style("Waiting for the user to answer a question").yellow());
            }
        }
        Commands::Workspace { id } => {
            let resolved = manager.resolve_session(&id).await;
            match resolved.workspace_path() {
                Some(path) => println!("{}", path),
                None => anyhow::bail!(
                    "Conversation {} has no workdir ({} mode); is it stored?",
                    id,
                    resolved.chat_mode
                ),
            }
        }
        Commands::List => show_conversations(&store).await?,
        Commands::Config { chat_mode } => run_config(config_manager, chat_mode)?,
    }

    Ok(())
}

/// Default log filter: `--verbose` wins over the configured level
fn log_filter(verbose: bool, configured: &str) -> String {
    if verbose {
        "info,waypoint_core=debug".to_string()
    } else if configured.trim().is_empty() {
        "warn".to_string()
    } else {
        configured.trim().to_string()
    }
}

/// Make a path absolute, avoiding the UNC prefix on Windows (\\?\)
fn absolute(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

fn display_title(conversation: &Conversation) -> &str {
    conversation
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("untitled")
}

async fn show_conversations(store: &JsonConversationStore) -> anyhow::Result<()> {
    let conversations = store.list().await?;

    println!("{}", style("Conversations:").bold());
    println!();
    if conversations.is_empty() {
        println!("  {}", style("No conversations stored").dim());
        println!("  Store: {}", style(store.dir().display()).cyan());
        return Ok(());
    }

    for conversation in conversations {
        let mode = conversation
            .settings
            .chat_mode
            .as_deref()
            .unwrap_or("default");
        println!(
            "  {} {} - {} [{}]",
            style("•").cyan(),
            style(&conversation.id).bold(),
            display_title(&conversation),
            style(mode).green()
        );
        println!(
            "    {}",
            style(format!("updated {}", conversation.updated_at.format("%Y-%m-%d %H:%M"))).dim()
        );
    }
    Ok(())
}

fn run_config(mut config_manager: ConfigManager, chat_mode: Option<String>) -> anyhow::Result<()> {
    if let Some(mode) = chat_mode {
        let parsed: ChatMode = mode.parse().map_err(anyhow::Error::msg)?;
        config_manager.set_chat_mode(parsed.as_str());
        config_manager.save()?;
        println!("{} {}", style("Saved chat mode:").green(), parsed);
        println!();
    }

    println!("{}", style("Configuration:").bold());
    println!();
    println!(
        "  Config file: {}",
        style(config_manager.config_path().display()).green()
    );
    println!();
    println!("{}", toml::to_string_pretty(config_manager.config())?);
    Ok(())
}
