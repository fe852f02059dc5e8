//! # askbase CLI
//!
//! ```bash
//! askbase --config ./config/askbase.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askbase init` | Create the SQLite database and run schema migrations |
//! | `askbase ingest <file>` | Ingest a PDF, DOCX, TXT or Markdown file as a new version |
//! | `askbase ingest-dir <dir>` | Ingest every matching file under a directory |
//! | `askbase documents` | List ingested documents |
//! | `askbase search "<query>"` | Show fused retrieval results |
//! | `askbase ask "<question>"` | Answer a question with citations |
//! | `askbase digest` | Summarise yesterday's kept community messages |
//! | `askbase record-message` | Capture a community chat message |
//! | `askbase purge-messages` | Delete old discarded messages |
//! | `askbase stats` | Row counts and database size |

use std::path::PathBuf;

use anyhow::Result;
use askbase::config::{self, Config};
use askbase::engine::Engine;
use askbase::{commands, migrate, stats};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// askbase: question answering over a private knowledge base with hybrid
/// (BM25 + vector) retrieval.
#[derive(Parser)]
#[command(name = "askbase", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest one file as a new document version.
    ///
    /// Re-ingesting an unchanged file is a no-op. Changed content becomes
    /// version n+1 and replaces the active version once fully stored.
    Ingest {
        path: PathBuf,

        /// Document title. Defaults to the file name without extension.
        #[arg(long)]
        title: Option<String>,
    },

    /// Ingest every file under a directory matching `[ingest]` globs.
    IngestDir { dir: PathBuf },

    /// List documents.
    Documents {
        /// Include inactive (superseded) versions.
        #[arg(long)]
        all: bool,
    },

    /// Run hybrid retrieval and print the fused ranking.
    Search {
        query: String,

        /// Show per-index scores.
        #[arg(long)]
        explain: bool,
    },

    /// Answer a question from the knowledge base.
    Ask {
        question: String,

        /// Who is asking, recorded in the Q&A log.
        #[arg(long)]
        user: Option<String>,
    },

    /// Generate the daily digest of kept community messages.
    Digest {
        /// Day to summarise (YYYY-MM-DD). Defaults to yesterday (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Capture a community chat message.
    RecordMessage {
        #[arg(long)]
        chat: i64,

        #[arg(long)]
        sender: i64,

        /// Category label (INFORMATION, QUESTION, ANSWER, JOKE, USELESS).
        /// Classified by the generation model when omitted.
        #[arg(long)]
        label: Option<String>,

        text: String,
    },

    /// Delete discarded messages older than the given number of days.
    PurgeMessages {
        #[arg(long, default_value_t = 14)]
        days: u32,
    },

    /// Show database statistics.
    Stats,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = Engine::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Ingest { path, title } => {
            commands::run_ingest(&engine, &path, title.as_deref()).await?;
        }
        Commands::IngestDir { dir } => {
            commands::run_ingest_dir(&engine, &dir).await?;
        }
        Commands::Documents { all } => {
            commands::run_documents(&engine, all).await?;
        }
        Commands::Search { query, explain } => {
            commands::run_search(&engine, &query, explain).await?;
        }
        Commands::Ask { question, user } => {
            commands::run_ask(&engine, &question, user.as_deref()).await?;
        }
        Commands::Digest { date } => {
            commands::run_digest(&engine, date).await?;
        }
        Commands::RecordMessage {
            chat,
            sender,
            label,
            text,
        } => {
            commands::run_record_message(&engine, chat, sender, &text, label.as_deref()).await?;
        }
        Commands::PurgeMessages { days } => {
            commands::run_purge_messages(&engine, days).await?;
        }
        Commands::Stats => {
            stats::run_stats(&engine).await?;
        }
    }

    Ok(())
}
