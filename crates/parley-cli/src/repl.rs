//! Subcommand: `parley chat` -- interactive line REPL.
//!
//! Every line is one turn for the chosen user. `quit` or `exit` ends the
//! session; conversation state persists in the store between runs.

use std::io::{self, BufRead, Write as _};

use anyhow::{Context, Result};
use parley_kernel::Dispatcher;
use tracing::{error, info};

use crate::helpers::{FALLBACK_REPLY, render_response};

pub async fn cmd_chat(dispatcher: &Dispatcher, user: &str) -> Result<()> {
    info!(user, "chat session started");

    println!();
    println!("  Parley v{}", env!("CARGO_PKG_VERSION"));
    println!("  Chatting as '{user}'. Type 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        io::stdout().flush().context("failed to flush stdout")?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read input")?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "quit" || trimmed == "exit" {
            info!("user requested exit");
            break;
        }

        match dispatcher.process(user, trimmed).await {
            Ok(response) => println!("{}\n", render_response(&response)),
            Err(e) => {
                error!(error = %e, "turn failed");
                println!("{FALLBACK_REPLY}\n");
            }
        }
    }

    Ok(())
}
