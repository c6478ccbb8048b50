//! # Study Distill CLI (`distill`)
//!
//! ## Usage
//!
//! ```bash
//! distill --config ./config/distill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `distill init` | Create the SQLite cache database |
//! | `distill run <file>` | Summarize a text or Markdown file |
//! | `distill cache stats` | Show cache size and hit counts |
//! | `distill cache prune` | Remove expired entries and enforce the LRU cap |
//!
//! ## Examples
//!
//! ```bash
//! distill init --config ./config/distill.toml
//! distill run chapter3.md --language de --instruction "focus on proofs"
//! distill run chapter3.md --json > summary.json
//! distill -vv run chapter3.md --no-cache --log-format json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use study_distill::logging::{self, LogFormat};
use study_distill::summarize_cmd::{self, RunArgs};
use study_distill::{cache_cmd, config, migrate};

/// Study Distill CLI: dense, cited, quality-checked study summaries.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/distill.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "distill",
    about = "Study Distill — dense, cited, quality-checked study summaries",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/distill.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the cache database. Idempotent.
    Init,

    /// Summarize a UTF-8 text or Markdown file.
    Run {
        /// Input file.
        file: PathBuf,

        /// Language of the summary.
        #[arg(long, default_value = "en")]
        language: String,

        /// Free-form instruction forwarded to the generator.
        #[arg(long)]
        instruction: Option<String>,

        /// Skip the result cache for this run.
        #[arg(long)]
        no_cache: bool,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,

        /// Show fingerprint, chunking, domain and density policy without
        /// calling the generator.
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or maintain the result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry count, total hits, oldest and newest access.
    Stats,
    /// Remove entries past retention, then enforce the LRU cap.
    Prune,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run {
            file,
            language,
            instruction,
            no_cache,
            json,
            dry_run,
        } => {
            summarize_cmd::run_summarize(
                cfg,
                RunArgs {
                    file,
                    language,
                    instruction,
                    no_cache,
                    json,
                    dry_run,
                },
            )
            .await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => cache_cmd::run_stats(&cfg).await?,
            CacheAction::Prune => cache_cmd::run_prune(&cfg).await?,
        },
    }

    Ok(())
}
