//! Replay a conversation transcript through the tiered context engine.
//!
//! A transcript is a JSON document:
//!
//! ```json
//! {
//!   "id": "chat-1",
//!   "created": "2025-01-01T12:00:00+00:00",
//!   "exchanges": [{ "user": "...", "assistant": "..." }]
//! }
//! ```
//!
//! # Examples
//!
//! ```sh
//! # Summarize with OpenRouter (reads OPENROUTER_KEY) and print the context
//! strata replay transcript.json --model qwen/qwen3-8b
//!
//! # No network: summaries are truncations of their input
//! strata --config context.json replay transcript.json --offline
//!
//! # Inspect what was persisted for a transcript
//! strata context transcript.json
//! strata stats transcript.json
//! ```

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use strata::context::interaction::truncate_chars;
use strata::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Offline summaries keep this many characters of their input.
const OFFLINE_DETAILED_CHARS: usize = 240;
const OFFLINE_CONDENSED_CHARS: usize = 160;

/// Tiered conversation context: raw tail, incremental summaries, cumulative digest.
#[derive(Parser)]
#[command(name = "strata")]
struct Cli {
    /// JSON config file (defaults apply to missing fields)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the directory context state is saved to
    #[arg(long, global = true)]
    save_dir: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed every exchange of a transcript through the engine and print the
    /// resulting context
    Replay {
        transcript: PathBuf,

        /// Summarization model
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,

        /// Summarize locally by truncation instead of calling OpenRouter
        #[arg(long)]
        offline: bool,
    },
    /// Print the context assembled from a transcript's persisted state
    Context { transcript: PathBuf },
    /// Print the persisted context statistics of a transcript as JSON
    Stats { transcript: PathBuf },
}

#[derive(Deserialize)]
struct Transcript {
    id: String,
    created: DateTime<Local>,
    #[serde(default)]
    exchanges: Vec<Exchange>,
}

#[derive(Deserialize)]
struct Exchange {
    user: String,
    assistant: String,
}

impl Transcript {
    fn load(path: &Path) -> Result<Self, String> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read transcript {}: {e}", path.display()))?;
        serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse transcript {}: {e}", path.display()))
    }

    fn conversation(&self) -> Conversation {
        Conversation::new(self.id.clone()).with_created(self.created)
    }

    /// History with one user and one assistant message per exchange.
    fn history(&self) -> Arc<InMemoryHistory> {
        let history = Arc::new(InMemoryHistory::new());
        for _ in &self.exchanges {
            history.push_exchange();
        }
        history
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "strata=debug" } else { "strata=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<ContextConfig, String> {
    let config = match &cli.config {
        Some(path) => ContextConfig::from_file(path)?,
        None => ContextConfig::default(),
    };
    Ok(match &cli.save_dir {
        Some(dir) => config.with_save_dir(dir),
        None => config,
    })
}

fn offline_summarizers() -> SummarizerSet {
    SummarizerSet::new(
        Arc::new(FnSummarizer::new(|text: &str| {
            Ok(truncate_chars(text, OFFLINE_DETAILED_CHARS))
        })),
        Arc::new(FnSummarizer::new(|text: &str| {
            Ok(truncate_chars(text, OFFLINE_CONDENSED_CHARS))
        })),
    )
}

fn online_summarizers(model: &str) -> Result<SummarizerSet, String> {
    let key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "OPENROUTER_KEY is not set (use --offline to summarize locally)".to_string())?;
    let client = Arc::new(OpenRouterClient::new(key)?);
    Ok(SummarizerSet::openrouter(client, model))
}

async fn replay(
    config: ContextConfig,
    transcript: &Transcript,
    summarizers: SummarizerSet,
) -> Result<String, String> {
    let registry = ContextRegistry::new(config);
    let worker = registry.spawn_worker(summarizers)?;

    let history = Arc::new(InMemoryHistory::new());
    let manager = registry.get_or_create(&transcript.conversation(), history.clone());
    for exchange in &transcript.exchanges {
        history.push_exchange();
        manager.add_interaction(&exchange.user, &exchange.assistant);
    }

    registry.queue().wait_idle().await;
    let stats = worker.stats();
    info!(
        "Worker finished {} task(s), {} failed, avg {:.2}s",
        stats.total_tasks,
        stats.failed_tasks,
        stats.avg_processing_time.as_secs_f64()
    );
    worker.shutdown().await;

    let context = manager.context_for_generation();
    registry.remove(&transcript.id);
    Ok(context)
}

fn persisted_manager(config: ContextConfig, transcript: &Transcript) -> Arc<ContextManager> {
    let registry = ContextRegistry::new(config);
    registry.get_or_create(&transcript.conversation(), transcript.history())
}

async fn run(cli: Cli) -> Result<String, String> {
    let config = load_config(&cli)?;
    match &cli.command {
        Command::Replay {
            transcript,
            model,
            offline,
        } => {
            let transcript = Transcript::load(transcript)?;
            let summarizers = if *offline {
                offline_summarizers()
            } else {
                online_summarizers(model)?
            };
            replay(config, &transcript, summarizers).await
        }
        Command::Context { transcript } => {
            let transcript = Transcript::load(transcript)?;
            Ok(persisted_manager(config, &transcript).context_for_generation())
        }
        Command::Stats { transcript } => {
            let transcript = Transcript::load(transcript)?;
            let stats = persisted_manager(config, &transcript).stats();
            serde_json::to_string_pretty(&stats)
                .map_err(|e| format!("Failed to serialize stats: {e}"))
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
