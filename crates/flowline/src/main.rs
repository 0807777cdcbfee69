// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flowline - WhatsApp campaign session and flow execution engine.
//!
//! This is the binary entry point.

mod import;
mod ops;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use flowline_config::FlowlineConfig;

/// Flowline - WhatsApp campaign session and flow execution engine.
#[derive(Parser, Debug)]
#[command(name = "flowline", version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of the XDG lookup.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the webhook and operator API and run the scheduled jobs.
    Serve,
    /// Run every scheduled job once and exit.
    Jobs,
    /// Load flows, campaigns and keywords from a JSON file.
    Import {
        /// Path to the import document.
        file: PathBuf,
    },
    /// Pause, resume or cancel a session.
    Session {
        #[arg(value_enum)]
        action: SessionAction,
        /// Session id.
        id: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionAction {
    Pause,
    Resume,
    Cancel,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => flowline_config::load_and_validate_path(path),
        None => flowline_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            flowline_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    let result = match cli.command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Jobs => ops::run_jobs(&config).await,
        Commands::Import { file } => import::run_import(&config, &file).await,
        Commands::Session { action, id } => ops::run_session(&config, action, &id).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise the configured level applies to flowline crates.
fn init_tracing(config: &FlowlineConfig) {
    use tracing_subscriber::EnvFilter;

    // Target matching is by prefix, so this covers every flowline_* crate.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("flowline={},warn", config.service.log_level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
