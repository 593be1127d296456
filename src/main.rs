use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proofgate::commands::{evidence, load_config, report, run, validate};
use proofgate::process::CancellationToken;
use proofgate::validation::clap_id_validator;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configured log filter
const LOG_ENV: &str = "PROOFGATE_LOG";

#[derive(Parser)]
#[command(name = "proofgate")]
#[command(about = "Evidence-backed quality gates for agent-completed coding tasks", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to proofgate.toml (default: ./proofgate.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every quality gate for a task descriptor
    Run {
        /// Path to the task descriptor (YAML or JSON)
        task_file: PathBuf,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// Directory for stored evidence and results
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },

    /// Parse and validate a task descriptor without running it
    Validate {
        /// Path to the task descriptor
        task_file: PathBuf,
    },

    /// Replay the stored evidence of a task, verifying its integrity
    Evidence {
        /// Task ID (alphanumeric, dash, underscore only; max 128 characters)
        #[arg(value_parser = clap_id_validator)]
        task_id: String,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        store_dir: Option<PathBuf>,
    },

    /// Show the stored result of the last run of a task
    Report {
        /// Task ID (alphanumeric, dash, underscore only; max 128 characters)
        #[arg(value_parser = clap_id_validator)]
        task_id: String,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        store_dir: Option<PathBuf>,
    },
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.log.filter);

    let passed = match cli.command {
        Commands::Run {
            task_file,
            json,
            store_dir,
        } => {
            let cancel = CancellationToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || {
                tracing::warn!("interrupt received, cancelling verification");
                handler_token.cancel();
            })
            .context("Failed to set Ctrl+C handler")?;

            run::execute(&task_file, json, store_dir, config, &cancel)?
        }
        Commands::Validate { task_file } => {
            validate::execute(&task_file)?;
            true
        }
        Commands::Evidence {
            task_id,
            json,
            store_dir,
        } => {
            evidence::execute(&task_id, json, store_dir, &config)?;
            true
        }
        Commands::Report {
            task_id,
            json,
            store_dir,
        } => report::execute(&task_id, json, store_dir, &config)?,
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}
