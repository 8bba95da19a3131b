//! # CLI Structure and Argument Parsing
//!
//! Command-line interface for `quire`, built with `clap` derive macros.
//!
//! ```bash
//! # Preview: shell only
//! quire generate "Sourdough Baking" --session-token my-session-01
//!
//! # Full document, waiting for the background sections
//! quire generate "Sourdough Baking" --session-token my-session-01 --full
//!
//! # Resume a document whose sections failed or were interrupted
//! quire generate "Sourdough Baking" --session-token my-session-01 --full --document-id doc_1a2b3c4d5e6f
//!
//! # Inspect stored state
//! quire show doc_1a2b3c4d5e6f --format json
//!
//! # Offline helpers
//! quire classify "Linear Algebra for Beginners"
//! quire config
//! ```

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

/// Main CLI structure for the `quire` command.
#[derive(Parser, Clone, Debug)]
#[command(name = "quire")]
#[command(version)]
#[command(about = "quire - turn a short topic into a long-form document", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress informational messages (only show errors)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Disable all ANSI colors in output (also respects `NO_COLOR` env)
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Generate a document shell, optionally followed by every remaining section
    Generate {
        /// Topic to write about (at most 200 characters)
        topic: String,

        /// Caller session token (at least 10 characters)
        #[arg(long, env = "QUIRE_SESSION_TOKEN")]
        session_token: String,

        /// Generate the full document and wait for the background sections
        #[arg(long)]
        full: bool,

        /// Resume or upgrade an existing document
        #[arg(long, value_name = "ID")]
        document_id: Option<String>,

        /// Seconds to wait for in-flight sections after Ctrl-C
        #[arg(long, default_value_t = 10, value_name = "SECS")]
        grace: u64,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a stored document and the state of each section
    Show {
        /// Document id
        id: String,

        /// Print section bodies, not just their status
        #[arg(long)]
        content: bool,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Classify a topic without calling the backend
    Classify {
        /// Topic to classify
        topic: String,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the effective configuration (secrets redacted)
    Config {
        /// Print the config file path instead of its contents
        #[arg(long)]
        path: bool,

        /// Write the effective configuration to the config file
        #[arg(long, conflicts_with = "path")]
        init: bool,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl Commands {
    /// Output format selected for the command.
    pub const fn format(&self) -> OutputFormat {
        match self {
            Self::Generate { format, .. }
            | Self::Show { format, .. }
            | Self::Classify { format, .. }
            | Self::Config { format, .. } => *format,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_generate_parses_flags() {
        let cli = Cli::try_parse_from([
            "quire",
            "generate",
            "Sourdough Baking",
            "--session-token",
            "session-0123456789",
            "--full",
            "--document-id",
            "doc_abc",
            "-f",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Generate {
                topic,
                full,
                document_id,
                format,
                grace,
                ..
            } => {
                assert_eq!(topic, "Sourdough Baking");
                assert!(full);
                assert_eq!(document_id.as_deref(), Some("doc_abc"));
                assert_eq!(format, OutputFormat::Json);
                assert_eq!(grace, 10);
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_config_path_conflicts_with_init() {
        assert!(Cli::try_parse_from(["quire", "config", "--path", "--init"]).is_err());
    }
}
