//! # docflow CLI
//!
//! ## Usage
//!
//! ```bash
//! docflow --config ./config/docflow.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docflow init` | Create the SQLite database and run schema migrations |
//! | `docflow register <url>` | Register a URL and run its pipeline inline |
//! | `docflow tasks` | List task rows |
//! | `docflow documents` | List registered documents |
//! | `docflow summary <hash>` | Print a stored summary |
//! | `docflow entities <hash>` | Print stored entity relations |
//! | `docflow retry <hash> <task>` | Re-run one finished task inline |
//! | `docflow purge <hash>` | Delete stored content and artifacts |
//! | `docflow stats` | Registry statistics |
//! | `docflow serve` | Start the HTTP server and worker pool |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docflow::config::{self, Config};
use docflow::orchestrator::TaskReport;
use docflow::tasks::TaskQuery;
use docflow::workflow::Workflow;
use docflow::{get, migrate, server, stats};

/// docflow: fetch documents, summarize them, and extract entity relations.
#[derive(Parser)]
#[command(name = "docflow", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Register a URL and run fetch, summarize, and extract-relations.
    Register {
        url: String,

        /// Re-run every task even if the document is already registered.
        #[arg(long)]
        force: bool,
    },

    /// List task rows, newest first.
    Tasks {
        /// Comma-separated status classes: pending, complete, failed, cancelled.
        #[arg(long)]
        filter: Option<String>,

        /// Include rows superseded by a retry.
        #[arg(long)]
        include_retried: bool,

        #[arg(long)]
        json: bool,
    },

    /// List registered documents.
    Documents {
        #[arg(long)]
        json: bool,
    },

    /// Print the stored summary of a document.
    Summary {
        hash: String,

        #[arg(long)]
        json: bool,
    },

    /// Print the stored entity relations of a document.
    Entities {
        hash: String,

        #[arg(long)]
        json: bool,
    },

    /// Re-run one finished task (fetch-content, summarize, extract-relations).
    Retry { hash: String, task: String },

    /// Delete stored content and artifacts for a document.
    Purge { hash: String },

    /// Show registry statistics.
    Stats,

    /// Start the HTTP server with a background worker pool.
    Serve,
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.logging.level.as_str()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_reports(reports: &[TaskReport]) {
    for r in reports {
        match &r.reason {
            Some(reason) => println!("{:<18} {:<10} {}", r.task_name, r.status, reason),
            None => println!("{:<18} {}", r.task_name, r.status),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.store.root)?;
            println!("Database initialized successfully.");
        }
        Commands::Register { url, force } => {
            let workflow = Workflow::from_config(&cfg).await?;
            let (registration, job) = workflow.register_url(&url, force).await?;
            println!("hash: {}", registration.hash);
            println!("url:  {}", registration.url);
            match job {
                Some(job) => {
                    let reports = workflow.execute(job).await?;
                    print_reports(&reports);
                }
                None => println!("Already registered. Use --force to process again."),
            }
        }
        Commands::Tasks {
            filter,
            include_retried,
            json,
        } => {
            let classes = server::parse_filter(filter.as_deref()).map_err(anyhow::Error::msg)?;
            let workflow = Workflow::from_config(&cfg).await?;
            let query = TaskQuery {
                classes,
                include_retried,
                hash: None,
            };
            get::run_tasks(&workflow, &query, json).await?;
        }
        Commands::Documents { json } => {
            let workflow = Workflow::from_config(&cfg).await?;
            get::run_documents(&workflow, json).await?;
        }
        Commands::Summary { hash, json } => {
            let workflow = Workflow::from_config(&cfg).await?;
            get::run_summary(&workflow, &hash, json).await?;
        }
        Commands::Entities { hash, json } => {
            let workflow = Workflow::from_config(&cfg).await?;
            get::run_entities(&workflow, &hash, json).await?;
        }
        Commands::Retry { hash, task } => {
            let workflow = Workflow::from_config(&cfg).await?;
            let job = workflow.schedule_retry(&hash, &task).await?;
            let reports = workflow.execute(job).await?;
            print_reports(&reports);
        }
        Commands::Purge { hash } => {
            let workflow = Workflow::from_config(&cfg).await?;
            workflow.purge(&hash).await?;
            println!("Purged stored content for {}.", hash);
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
