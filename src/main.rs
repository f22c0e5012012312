//! Daemon entrypoint: parses the CLI, initializes logging and reports the
//! service exit codes.

use std::process::ExitCode;

use clap::Parser as _;
use tracing::error;
use tracing_subscriber::EnvFilter;

use overseer::app;
use overseer::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let invocation = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match invocation.command {
        Command::Serve(args) => match app::run(&args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::from(e.exit_code())
            }
        },
    }
}
