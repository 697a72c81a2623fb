//! Tracing setup.
//!
//! `WORKSPACE_LAUNCHER_LOG` takes an `EnvFilter` directive. Without it, text and
//! JSON modes log warnings to stderr; the TUI logs nothing unless `--log-file`
//! is given, since stderr shares the screen with the interface.

use crate::cli::Cli;
use anyhow::{Context, Result};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "WORKSPACE_LAUNCHER_LOG";

fn default_directive(args: &Cli) -> &'static str {
    if args.log_file.is_some() {
        "info"
    } else if args.uses_tui() || args.silent {
        "off"
    } else {
        "warn"
    }
}

pub fn init(args: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(args)));

    match args.log_file.as_deref() {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }
    }
    Ok(())
}
