//! # Knowledge Harness CLI (`kb`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the index directory, database and schema |
//! | `kb sources` | List configured collectors |
//! | `kb refresh` | Collect from every source and update both indexes |
//! | `kb search "<query>"` | Hybrid (semantic + keyword) search |
//! | `kb stats` | Item counts by type and source |
//! | `kb get <id>` | Show one indexed item |
//! | `kb delete <id>` | Remove one item from both indexes |
//!
//! ## Examples
//!
//! ```bash
//! kb init --config ./config/kb.toml
//! kb refresh
//! kb search "queue retry" --type code --source repo
//! kb stats --json
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use knowledge_harness::{config, db, get, ingest, migrate, search, sources, stats};

/// Knowledge Harness CLI: a local-first hybrid knowledge index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "Knowledge Harness: collect, index and search project knowledge",
    version,
    long_about = "Knowledge Harness collects records from configured sources (filesystem, \
    GitHub, secret-manager metadata, containers), normalizes them, and keeps a vector index \
    and a full-text index in sync so queries can match on meaning and on exact terms."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index directory and database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List configured collectors.
    Sources,

    /// Collect from every enabled source and update both indexes.
    ///
    /// Sources are processed in parallel. A failing source is reported in
    /// the summary and does not affect the others.
    Refresh {
        /// Print the refresh summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search indexed knowledge.
    Search {
        /// Search query text.
        query: String,

        /// Maximum number of results (1-200).
        #[arg(long)]
        limit: Option<usize>,

        /// Only return this content type (repeatable).
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<String>,

        /// Only return items from this source (repeatable).
        #[arg(long = "source", value_name = "SOURCE")]
        sources: Vec<String>,

        /// Only return items carrying this tag (repeatable, any of).
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats {
        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a single item by id.
    Get {
        id: String,

        /// Print the item as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove a single item from both indexes.
    Delete { id: String },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "kb", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Index initialized at {}", cfg.db_path().display());
        }
        Commands::Sources => {
            sources::run_sources(&cfg)?;
        }
        Commands::Refresh { json } => {
            ingest::run_refresh(&cfg, json).await?;
        }
        Commands::Search {
            query,
            limit,
            types,
            sources,
            tags,
            json,
        } => {
            let opts = search::SearchOptions {
                limit,
                types,
                sources,
                tags,
            };
            search::run_search(&cfg, &query, opts, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Delete { id } => {
            get::run_delete(&cfg, &id).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
