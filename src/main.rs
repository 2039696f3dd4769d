use clap::Parser;
use dayplan::application::bootstrap::workspace_logs_dir;
use dayplan::cli::Cli;
use dayplan::resolve_workspace;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::ExitCode;
use tracing::info;

fn setup_logging(workspace_root: &Path, verbose: bool) -> Result<(), String> {
    let log_dir = workspace_logs_dir(workspace_root);
    fs::create_dir_all(&log_dir)
        .map_err(|error| format!("failed to create log directory: {error}"))?;

    // Log to a file so stdout stays pure JSON.
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("dayplan.log"))
        .map_err(|error| format!("failed to open log file: {error}"))?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(verbose, "logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let workspace_root = match resolve_workspace(cli.workspace.clone()) {
        Ok(root) => root,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error) = setup_logging(&workspace_root, cli.verbose) {
        eprintln!("error: {error}");
        return ExitCode::FAILURE;
    }

    match dayplan::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
