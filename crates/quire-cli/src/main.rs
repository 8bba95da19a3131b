//! quire CLI - turn a short topic into a long-form document
//!
//! Entry point for the `quire` command-line interface. Command
//! implementations live in [`commands`]; this file parses arguments,
//! sets up logging and maps failures to exit codes.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

mod cli;
mod commands;
mod output;
mod utils;

use cli::{Cli, Commands};
use commands::GenerateArgs;
use utils::logging::initialize_logging;

/// Exit code when a full document finished with failed or interrupted sections.
const EXIT_INCOMPLETE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(&cli) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match execute_command(cli.clone()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_INCOMPLETE),
        Err(e) => {
            report_error(&cli, &e);
            ExitCode::FAILURE
        },
    }
}

async fn execute_command(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Generate {
            topic,
            session_token,
            full,
            document_id,
            grace,
            format,
        } => {
            commands::generate::execute(GenerateArgs {
                topic,
                session_token,
                full,
                document_id,
                grace: Duration::from_secs(grace),
                format,
            })
            .await
        },
        Commands::Show {
            id,
            content,
            format,
        } => commands::show::execute(&id, content, format).await.map(|()| true),
        Commands::Classify { topic, format } => {
            commands::classify::execute(&topic, format).map(|()| true)
        },
        Commands::Config { path, init, format } => {
            commands::config::execute(path, init, format).map(|()| true)
        },
    }
}

/// Print a failure to stderr.
///
/// Pipeline errors are shown with their user-facing message; the diagnostic
/// form is added with `--verbose` or `--debug`.
fn report_error(cli: &Cli, error: &anyhow::Error) {
    let detailed = cli.verbose || cli.debug;
    match error.downcast_ref::<quire_core::Error>() {
        Some(core) => {
            eprintln!("{} {}", "Error:".red().bold(), core.user_message());
            if detailed {
                eprintln!("  {} {core}", format!("[{}]", core.category()).dimmed());
            }
        },
        None if detailed => eprintln!("{} {error:?}", "Error:".red().bold()),
        None => eprintln!("{} {error:#}", "Error:".red().bold()),
    }
}
