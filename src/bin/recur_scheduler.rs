use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::{error, info};

use recur_scheduler::{init, resolve_settings, run_once, start, AppError};

/// Materializes recurring ledger obligations on a fixed interval.
#[derive(Parser)]
#[command(name = "recur_scheduler", version)]
struct Args {
    /// Path to the scheduler settings file.
    #[arg(long, env = "RECUR_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding rules, entries and lock files.
    #[arg(long, env = "RECUR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Run a single pass and exit instead of looping.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "recur scheduler failed");
            eprintln!("recur_scheduler: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let resolved = resolve_settings(args.config, args.data_dir)?;

    if args.once {
        match run_once(&resolved).await? {
            Some(summary) => info!(
                created = summary.entries_created,
                failed = summary.entries_failed,
                "single pass complete"
            ),
            None => info!("another instance holds the scheduler lock; nothing done"),
        }
        return Ok(());
    }

    let handle = start(&resolved)?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested; waiting for the current run to finish");
    handle.shutdown().await?;
    Ok(())
}
