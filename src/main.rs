//! # RAG Harness CLI (`rag`)
//!
//! Builds and queries per-profile document indexes.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml [--profile NAME] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag ingest` | Build the profile's index (skipped if one exists) |
//! | `rag ingest --force` | Rebuild the index from scratch |
//! | `rag query "<question>"` | Retrieve context and generate an answer |
//! | `rag query` | Interactive session: one question per line from stdin |
//! | `rag eval` | Score answers against a keyword dataset |
//! | `rag profiles` | List profiles with docs and index status |
//! | `rag serve` | Start the HTTP query service |
//!
//! ## Examples
//!
//! ```bash
//! # Index the active profile's documents
//! rag ingest
//!
//! # Ask the legal profile, showing which chunks were used
//! rag --profile legal query "What is the termination notice period?" --show-chunks
//!
//! # Print retrieved context without calling the language model
//! rag query "renewal terms" --context-only --top-k 3
//!
//! # Check retrieval quality without calling the language model
//! rag eval --context-only --output results.json
//! ```
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `rag_harness=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rag_harness::config;
use rag_harness::eval::run_eval;
use rag_harness::ingest::run_ingest;
use rag_harness::profiles::list_profiles;
use rag_harness::progress::ProgressMode;
use rag_harness::query::{run_interactive, run_query, QueryOptions};
use rag_harness::server::run_server;

/// RAG Harness: profile-scoped retrieval-augmented generation over local
/// documents.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "Profile-scoped retrieval-augmented generation over local documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// Profile to use instead of the config's `active_profile`.
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the profile's index from its docs directory.
    ///
    /// An existing valid index is kept unless `--force` is given.
    Ingest {
        /// Rebuild even if a valid index exists.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr.
        /// Defaults to human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Answer a question from the profile's index.
    ///
    /// Without a question, reads one question per line from stdin until
    /// `exit`, `quit`, or end of input.
    Query {
        question: Option<String>,

        /// Number of chunks to retrieve (defaults to the profile's top_k).
        #[arg(long)]
        top_k: Option<usize>,

        /// Also print the ranked source chunks.
        #[arg(long)]
        show_chunks: bool,

        /// Print the assembled context and skip answer generation.
        #[arg(long)]
        context_only: bool,
    },

    /// Score the profile's answers against a dataset of questions and
    /// expected keywords.
    Eval {
        /// Dataset JSON file (defaults to eval.json beside the index).
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Also write the full per-case report as JSON.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Number of chunks to retrieve (defaults to the profile's top_k).
        #[arg(long)]
        top_k: Option<usize>,

        /// Match keywords against the retrieved context instead of answers.
        #[arg(long)]
        context_only: bool,
    },

    /// List configured profiles and the state of their indexes.
    Profiles,

    /// Start the HTTP query service for the profile.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rag_harness=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let profile = cfg.resolve_profile(cli.profile.as_deref())?;

    match cli.command {
        Commands::Ingest { force, progress } => {
            run_ingest(&cfg, &profile, force, ProgressMode::resolve(progress)).await?;
        }
        Commands::Query {
            question,
            top_k,
            show_chunks,
            context_only,
        } => {
            let options = QueryOptions {
                top_k,
                context_only,
            };
            match question {
                Some(question) => {
                    run_query(&cfg, &profile, &question, &options, show_chunks).await?
                }
                None => run_interactive(&cfg, &profile, &options).await?,
            }
        }
        Commands::Eval {
            dataset,
            output,
            top_k,
            context_only,
        } => {
            let options = QueryOptions {
                top_k,
                context_only,
            };
            run_eval(
                &cfg,
                &profile,
                dataset.as_deref(),
                output.as_deref(),
                &options,
            )
            .await?;
        }
        Commands::Profiles => {
            list_profiles(&cfg, &profile.name)?;
        }
        Commands::Serve => {
            run_server(&cfg, &profile).await?;
        }
    }

    Ok(())
}
