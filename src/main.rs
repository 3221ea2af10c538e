//! # carechat CLI
//!
//! The `carechat` binary manages the corpus index and runs the chat
//! service.
//!
//! ## Usage
//!
//! ```bash
//! carechat --config ./config/carechat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `carechat init` | Create the SQLite database and run schema migrations |
//! | `carechat index <dir>` | Index a directory of policy documents |
//! | `carechat ask "<question>"` | Run one question through the pipeline |
//! | `carechat serve` | Start the HTTP chat server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! carechat init --config ./config/carechat.toml
//!
//! # Index the policy corpus
//! carechat index ./docs --config ./config/carechat.toml
//!
//! # Ask a one-off question from the shell
//! carechat ask "What is the income limit for a family of 4?"
//!
//! # Start the HTTP API
//! carechat serve --config ./config/carechat.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use carechat::models::ChatRequest;
use carechat::pipeline::ChatPipeline;
use carechat::{config, corpus, db, migrate, server};

/// carechat — a retrieval-grounded chat service for childcare
/// assistance questions.
#[derive(Parser)]
#[command(
    name = "carechat",
    about = "A grounded chat service answering childcare-assistance questions from indexed policy documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/carechat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, chunks_fts, chunk_vectors). Idempotent.
    Init,

    /// Index a directory of policy documents.
    ///
    /// Walks the directory, applies the configured include/exclude
    /// globs, chunks each matching file, and writes FTS rows and (when
    /// embeddings are enabled) vectors. Unchanged documents are skipped.
    Index {
        /// Directory containing the policy corpus.
        dir: PathBuf,
    },

    /// Ask one question from the command line.
    ///
    /// Runs the full pipeline once and prints the answer with its
    /// sources. Useful for smoke-testing a fresh index.
    Ask {
        /// The question text.
        question: String,

        /// Reuse a session id so follow-up questions share context.
        #[arg(long)]
        session: Option<String>,

        /// Provider override for the LLM stages (e.g. `builtin`, `openai`).
        #[arg(long)]
        provider: Option<String>,

        /// Override whether prior turns influence query interpretation.
        #[arg(long)]
        conversational: Option<bool>,
    },

    /// Start the HTTP chat server.
    ///
    /// Binds to `[server].bind` and serves `/chat`, `/health`,
    /// `/models`, and `/sessions/{id}/clear`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { dir } => {
            migrate::run_migrations(&cfg).await?;
            let pool = db::connect(&cfg.db).await?;
            let embedder = carechat::embedding::create_backend(&cfg.embedding)?;
            let stats = corpus::index_directory(&pool, embedder.as_ref(), &cfg, &dir).await?;
            println!(
                "Indexed {} documents ({} unchanged, {} scanned): {} chunks, {} embedded.",
                stats.indexed, stats.unchanged, stats.scanned, stats.chunks, stats.embedded
            );
        }
        Commands::Ask {
            question,
            session,
            provider,
            conversational,
        } => {
            let pipeline = ChatPipeline::initialize(cfg).await?;
            let response = pipeline
                .run(ChatRequest {
                    question,
                    session_id: session,
                    provider,
                    llm_model: None,
                    reranker_model: None,
                    intent_model: None,
                    conversational_mode: conversational,
                })
                .await?;

            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &response.sources {
                    println!("  {} (section {})", source.doc, source.page);
                }
            }
            for item in &response.action_items {
                println!("  → {}: {}", item.label, item.url);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
