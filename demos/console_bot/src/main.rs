//! Console Bot Example
//!
//! Chat with a chatflow bot from the terminal. Every line typed on stdin is
//! a direct message from `--user`; replies are printed with their message
//! number so prompts can be answered.
//!
//! ```text
//! > /add 2 3
//! [3] chatflow> 2 + 3 = 5
//! > ~share hello
//! [5] chatflow> Preparing your note
//! [6] chatflow> Share it?
//!       #6 yes
//!       #6 no
//! > #6 yes
//! [8] chatflow> Shared.
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --config demos/console_bot/chatflow.toml
//! ```

mod bot;
mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chatflow::runtime::ChatflowRuntime;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::bot::DemoBot;
use crate::console::{ConsoleAction, ConsoleAdapter, PLATFORM, parse_line};

#[derive(Debug, Parser)]
#[command(name = "console-bot", about = "Chat with a chatflow bot from the terminal")]
struct Args {
    /// Configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `development`.
    #[arg(short, long)]
    profile: Option<String>,

    /// User id the typed messages come from.
    #[arg(short, long, default_value = "alice")]
    user: String,
}

async fn read_stdin(runtime: &ChatflowRuntime, user: &str) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut count = 0u64;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        count += 1;
        match runtime.ingest(PLATFORM, &parse_line(user, count, line)) {
            // Wait so replies print before the next prompt is read.
            Ok(Some(handle)) => {
                if let Err(e) = handle.await {
                    error!(error = %e, "Dispatch task failed");
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Failed to ingest line"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = ChatflowRuntime::builder()
        .platform(Arc::new(ConsoleAdapter), Arc::new(ConsoleAction))
        .bot(Arc::new(DemoBot::new()));
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build()?;

    info!(user = %args.user, "Console bot ready, type 'quit' to exit");
    runtime
        .run_until(async {
            tokio::select! {
                _ = read_stdin(&runtime, &args.user) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        })
        .await?;

    Ok(())
}
