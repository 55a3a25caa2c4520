//! PSW Sync - market data synchronization jobs

use anyhow::Result;
use clap::Parser;
use psw_common::logging::{init_logging, LogConfig, LogLevel};
use psw_sync::config::SyncConfig;
use psw_sync::engine::MemoryStore;
use psw_sync::runner::{JobRunner, RunSummary, StoreMode};
use psw_sync::sources::JobKind;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "psw-sync")]
#[command(author, version, about = "Synchronize market reference data into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep rows in memory instead of writing to the database
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print run summaries as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// List available jobs
    List,

    /// Run the given jobs in order
    Run {
        #[arg(required = true, value_enum)]
        jobs: Vec<JobKind>,
    },

    /// Run every job
    All,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("psw-sync")
        .build()
        .with_env_overrides()?;
    let _guard = init_logging(&log_config)?;

    let jobs = match cli.command {
        Command::List => {
            for job in JobKind::ALL {
                println!("{:<22} {}", job.name(), job.description());
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Run { jobs } => jobs,
        Command::All => JobKind::ALL.to_vec(),
    };

    let summary = match SyncConfig::load() {
        Ok(config) => {
            let store = if cli.dry_run {
                info!("Dry run: rows are kept in memory only");
                StoreMode::Memory(MemoryStore::new())
            } else {
                StoreMode::Postgres
            };
            JobRunner::new(config, store).run_all(&jobs).await
        }
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            RunSummary::aborted(&jobs, &e)
        }
    };

    let rendered = summary.render(cli.json)?;
    if cli.json {
        println!("{}", rendered);
    } else {
        print!("{}", rendered);
    }

    Ok(ExitCode::from(summary.exit_code() as u8))
}
