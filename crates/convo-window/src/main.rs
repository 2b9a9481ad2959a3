//! Inspect and compact the model context of a stored chat session.
//!
//! Sessions are JSON files in the host's camelCase shape; summaries live in
//! a directory managed by [`FileSummaryStore`]. Summarization uses the
//! `OPENROUTER_KEY` environment variable unless `--offline` is given.
//!
//! # Examples
//!
//! ```sh
//! # Keep the last 6 messages, plus whatever tool pairing requires
//! convo-window truncate --session chat.json --keep 6
//!
//! # Summarize older history if due
//! convo-window compact --session chat.json --store .convo/summaries
//!
//! # Show exactly what the model would receive
//! convo-window context --session chat.json --store .convo/summaries
//!
//! # Forget all summaries of a session
//! convo-window clear --session-id a1b2 --store .convo/summaries
//! ```

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use convo_window::api::client::OpenRouterClient;
use convo_window::prelude::*;
use convo_window::summary::engine::EngineConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Inspect and compact the model context of a stored chat session.
#[derive(Parser)]
#[command(name = "convo-window", version)]
struct Cli {
    /// JSON config file (fields not given keep their defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the retention window size.
    #[arg(long, global = true)]
    max_recent: Option<usize>,

    /// Override the per-call token ceiling.
    #[arg(long, global = true)]
    token_limit: Option<usize>,

    /// Override the headroom kept below the token ceiling.
    #[arg(long, global = true)]
    token_buffer: Option<usize>,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the messages kept when capping a session at a message count.
    Truncate {
        #[arg(long)]
        session: PathBuf,
        /// Number of most recent messages to keep.
        #[arg(long)]
        keep: usize,
    },
    /// Print the bounded model input for a session.
    Context {
        #[command(flatten)]
        target: Target,
        /// Print the token breakdown only.
        #[arg(long)]
        breakdown: bool,
    },
    /// Summarize older history if enough new messages have accumulated.
    Compact {
        #[command(flatten)]
        target: Target,
        /// Use the deterministic offline summarizer instead of a model.
        #[arg(long)]
        offline: bool,
        /// Model for summarization.
        #[arg(long)]
        model: Option<String>,
    },
    /// Delete all summaries and progress of a session.
    Clear {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        store: PathBuf,
    },
}

#[derive(Args)]
struct Target {
    /// Session JSON file.
    #[arg(long)]
    session: PathBuf,
    /// Summary store directory.
    #[arg(long, default_value = ".convo/summaries")]
    store: PathBuf,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<ContextConfig, String> {
    let mut config = match &cli.config {
        Some(path) => ContextConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => ContextConfig::default(),
    };
    if let Some(n) = cli.max_recent {
        config = config.with_max_recent_messages(n);
    }
    if cli.token_limit.is_some() || cli.token_buffer.is_some() {
        let limit = cli.token_limit.unwrap_or(config.max_token_limit);
        let buffer = cli.token_buffer.unwrap_or(config.token_buffer);
        config = config.with_token_limit(limit, buffer);
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn build_engine(offline: bool, model: Option<&str>) -> Result<Arc<dyn SummarizationEngine>, String> {
    if offline {
        return Ok(Arc::new(FallbackSummarizationEngine));
    }
    let mut config = EngineConfig::default();
    if let Some(model) = model {
        config = config.with_model(model);
    }
    let client = OpenRouterClient::from_env().map_err(|e| e.to_string())?;
    Ok(Arc::new(LlmSummarizationEngine::new(client, config)))
}

fn manager_for(
    config: ContextConfig,
    store_dir: &Path,
    engine: Arc<dyn SummarizationEngine>,
) -> Result<ContextManager, String> {
    let store = FileSummaryStore::new(store_dir).map_err(|e| e.to_string())?;
    Ok(ContextManager::new(config, Arc::new(store), engine))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize output: {e}"))
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Truncate { session, keep } => {
            let session = Session::load(&session).map_err(|e| e.to_string())?;
            let kept = limit_context_length(&session.messages, keep);
            eprintln!(
                "Kept {} of {} messages (requested {keep})",
                kept.len(),
                session.messages.len()
            );
            println!("{}", to_json(&kept)?);
        }
        Command::Context { target, breakdown } => {
            let session = Session::load(&target.session).map_err(|e| e.to_string())?;
            let manager = manager_for(config, &target.store, Arc::new(FallbackSummarizationEngine))?;
            let context = manager
                .build_conversation_context(
                    &session.id,
                    &session.messages,
                    session.system_prompt.as_deref(),
                )
                .map_err(|e| e.to_string())?;
            let report = context.breakdown(manager.config());
            eprintln!("{}", report.to_log_string());
            if !breakdown {
                let input = render(context);
                let output = serde_json::json!({
                    "systemPrompt": input.system_prompt_text,
                    "summarized": input.summarized,
                    "messages": input.messages,
                });
                println!("{}", to_json(&output)?);
            }
        }
        Command::Compact {
            target,
            offline,
            model,
        } => {
            let session = Session::load(&target.session).map_err(|e| e.to_string())?;
            let engine = build_engine(offline, model.as_deref())?;
            let manager = manager_for(config, &target.store, engine)?;
            let outcome = manager
                .process_session_messages(
                    &session.id,
                    &session.messages,
                    session.system_prompt.as_deref(),
                )
                .await;
            match outcome {
                CompactionOutcome::Failed(e) => return Err(format!("compaction failed: {e}")),
                other => println!("{other:?}"),
            }
        }
        Command::Clear { session_id, store } => {
            let manager = manager_for(config, &store, Arc::new(FallbackSummarizationEngine))?;
            manager
                .delete_session_summaries(&session_id)
                .await
                .map_err(|e| e.to_string())?;
            println!("Deleted summaries for session {session_id}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
