//! CLI argument definitions for Parley.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Parley -- a conversational dispatch engine.
#[derive(Parser)]
#[command(
    name = "parley",
    version,
    about = "Parley -- conversational dispatch engine",
    long_about = "Classifies chat messages, resolves follow-ups against the conversation \
                  state and enriches requests with task, project and finance analysis."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Default log level when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Use the keyword classifier only, never the LLM.
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Chat interactively as one user.
    Chat {
        /// User id whose conversation state is used.
        #[arg(long, short, default_value = "local")]
        user: String,
    },

    /// Process a single message and print the reply.
    Send {
        /// User id whose conversation state is used.
        #[arg(long, short, default_value = "local")]
        user: String,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,

        /// The message text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Reset every expired conversation context.
    Sweep,

    /// Show registered enrichers and stored contexts.
    Stats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}
