//! Command-line interface parsing and session bootstrap.
//!
//! Everything that has to happen before the terminal switches into raw mode
//! lives here: argument parsing, config loading, provider resolution, and
//! launching the configured MCP servers. Failures at this stage print to
//! stderr and exit; once the chat loop starts, errors surface in the UI.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use crate::core::app::App;
use crate::core::config::Config;
use crate::core::message::Message;
use crate::core::providers::resolve_session;
use crate::mcp::{McpRegistry, ServerStatus};
use crate::ui::chat_loop::run_chat;
use crate::utils::logging::LoggingState;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_SHA"),
    ", built ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser)]
#[command(name = "confab")]
#[command(version = VERSION)]
#[command(about = "A terminal-based chat interface for LLM providers")]
#[command(
    long_about = "Confab is a full-screen terminal chat interface that streams replies from \
LLM providers and can hand tool calls to MCP servers configured in its config file.\n\n\
Model identifiers take the form provider:model, for example openai:o4-mini or \
openrouter:anthropic/claude-sonnet-4.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY        API key for the openai provider\n\
  OPENAI_BASE_URL       Custom base URL for the openai provider (optional)\n\
  OPENROUTER_API_KEY    API key for the openrouter provider\n\
  RUST_LOG              Write diagnostic traces next to the config file\n\n\
Controls:\n\
  Enter                 Send the message\n\
  Alt+Enter             Insert a newline\n\
  Esc                   Interrupt a streaming reply\n\
  PageUp/PageDown       Scroll through chat history\n\
  Ctrl+C                Quit\n\n\
Commands:\n\
  /help                 Show all slash commands\n\
  /log <filename>       Enable logging to the given file\n\
  /model <prov:model>   Switch models for this session"
)]
pub struct Args {
    /// Model to use as provider:model, overriding the configured default
    #[arg(short = 'm', long, value_name = "PROVIDER:MODEL")]
    pub model: Option<String>,

    /// Log the conversation to this file from the start of the session
    #[arg(short = 'l', long, value_name = "FILE")]
    pub log: Option<String>,

    /// Read configuration from this file instead of the default location
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path(),
    };
    let created = Config::ensure_at(&config_path)?;
    let config = Config::load_from_path(&config_path)?;
    init_tracing(config_path.parent());

    let identifier = args
        .model
        .as_deref()
        .unwrap_or(&config.model_identifier)
        .to_string();
    let provider = match resolve_session(&identifier) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("{e}");
            let fixes = e.quick_fixes();
            if !fixes.is_empty() {
                eprintln!();
                eprintln!("💡 Quick fixes:");
                for fix in fixes {
                    eprintln!("  • {fix}");
                }
            }
            std::process::exit(e.exit_code());
        }
    };

    let registry = Arc::new(McpRegistry::new());
    registry.apply(&config.mcp_servers).await;
    let statuses = registry.server_statuses().await;

    let mut logging = LoggingState::new();
    let log_notice = args.log.map(|path| match logging.set_log_file(path) {
        Ok(message) => Message::app_info(message),
        Err(e) => Message::app_warning(format!("Logfile error: {e}")),
    });

    let mut app = App::new(provider, config, config_path, registry, logging);
    if !statuses.is_empty() {
        let connected = statuses.iter().filter(|s| s.connected).count();
        app.mcp_health = Some((connected, statuses.len()));
    }
    app.greet();
    if created {
        app.session.push_notice(Message::app_info(format!(
            "Created a starter config at {}.",
            app.config_path.display()
        )));
    }
    for notice in server_notices(&statuses) {
        app.session.push_notice(notice);
    }
    if let Some(notice) = log_notice {
        app.session.push_notice(notice);
    }

    run_chat(app).await
}

fn server_notices(statuses: &[ServerStatus]) -> Vec<Message> {
    statuses
        .iter()
        .map(|status| {
            if status.connected {
                let count = status.tools.len();
                let noun = if count == 1 { "tool" } else { "tools" };
                Message::app_info(format!(
                    "MCP server '{}' connected ({count} {noun}).",
                    status.name
                ))
            } else {
                let reason = status.error.as_deref().unwrap_or("not connected");
                Message::app_warning(format!(
                    "MCP server '{}' unavailable: {}",
                    status.name, reason
                ))
            }
        })
        .collect()
}

/// Diagnostics go to a file because stderr belongs to the alternate screen
/// once the chat loop starts. Enabled only when RUST_LOG is set.
fn init_tracing(config_dir: Option<&Path>) {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    let dir = match config_dir {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let Ok(file) = std::fs::File::create(dir.join("confab-trace.log")) else {
        return;
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
}
