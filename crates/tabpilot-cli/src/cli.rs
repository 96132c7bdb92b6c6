//! CLI argument definitions for tabpilot.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// tabpilot -- natural-language browser automation.
#[derive(Parser)]
#[command(
    name = "tabpilot",
    version,
    about = "tabpilot -- natural-language browser automation",
    long_about = "Turns free-form instructions into browser commands and runs them as \
                  workflows with timeouts, retries, pause/resume and cancellation."
)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, short, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Write logs as JSON lines (also `TABPILOT_LOG_FORMAT=json`).
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse an instruction and print the parsing result as JSON.
    Parse {
        /// The instruction, e.g. "click the login button".
        text: String,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Execute a workflow file against the dry-run surface.
    Run {
        /// Path to a workflow definition in JSON.
        file: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Parse an instruction and dispatch it through the orchestrator.
    Exec {
        text: String,

        #[command(flatten)]
        page: PageArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the persisted export of a workflow.
    Inspect {
        /// Workflow id.
        id: uuid::Uuid,
    },
}

/// What is known about the page an instruction targets.
#[derive(clap::Args, Default)]
pub struct PageArgs {
    /// URL of the current page.
    #[arg(long)]
    pub url: Option<String>,

    /// Title of the current page.
    #[arg(long)]
    pub title: Option<String>,
}

/// Per-run execution options.
#[derive(clap::Args, Default)]
pub struct RunArgs {
    /// Record failed steps and keep going.
    #[arg(long)]
    pub continue_on_error: bool,

    /// Default step timeout in milliseconds.
    #[arg(long)]
    pub step_timeout_ms: Option<u64>,

    /// Retries per failed step, overriding the configured policy.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Do not print progress events.
    #[arg(long, short)]
    pub quiet: bool,
}
