//! CLI entry point for Parley.
//!
//! This binary provides the `parley` command: an interactive chat, one-shot
//! message processing, the expiry sweep and registry/store statistics.

mod cli;
mod config;
mod helpers;
mod repl;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use crate::cli::{Cli, Commands};
use crate::config::load_config;
use crate::helpers::{FALLBACK_REPLY, build_dispatcher, init_tracing, render_response};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env before anything reads the environment.
    let _ = dotenvy::dotenv();
    init_tracing(&cli.log_level, cli.log_format);

    let config = load_config(&cli.config);
    let dispatcher = build_dispatcher(&config, cli.offline).await?;

    match cli.command {
        Commands::Chat { user } => repl::cmd_chat(&dispatcher, &user).await,
        Commands::Send { user, json, text } => {
            let text = text.join(" ");
            match dispatcher.process(&user, &text).await {
                Ok(response) if json => {
                    let out = serde_json::to_string_pretty(&response)
                        .context("failed to serialize response")?;
                    println!("{out}");
                }
                Ok(response) => println!("{}", render_response(&response)),
                Err(e) => {
                    error!(error = %e, "turn failed");
                    println!("{FALLBACK_REPLY}");
                }
            }
            Ok(())
        }
        Commands::Sweep => {
            let reset = dispatcher
                .cleanup_expired()
                .await
                .context("expiry sweep failed")?;
            println!("reset {reset} expired context(s)");
            Ok(())
        }
        Commands::Stats => {
            let stats = dispatcher.registry().stats();
            println!("enrichers:  {}", stats.enrichers.join(", "));
            println!("intents:    {}", stats.total_intents);
            println!("contexts:   {}", dispatcher.store().len().await);
            Ok(())
        }
    }
}
