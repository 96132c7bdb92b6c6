//! CLI entry point for tabpilot.
//!
//! This binary provides the `tabpilot` command with subcommands for parsing
//! instructions, running workflow files, dispatching instructions end to end
//! and inspecting persisted workflows.

mod cli;
mod config;
mod helpers;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tabpilot_intent::{IntentParser, ParseContext, WorkflowDefinition};
use tabpilot_kernel::Subscription;
use tabpilot_workflow::{DryRunSurface, ExecutionOptions, Orchestrator, StateTracker};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cli::{Cli, Commands, PageArgs, RunArgs};
use crate::config::AppConfig;
use crate::helpers::{
    build_inference, env_non_empty, init_tracing, json_logs_requested, open_store, print_json,
};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Credentials may live in a local .env file.
    let _ = dotenvy::dotenv();
    init_tracing("info", cli.log_json || json_logs_requested(env_non_empty));

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Parse { text, page } => cmd_parse(&config, &text, page).await,
        Commands::Run { file, run } => cmd_run(config, &file, run).await,
        Commands::Exec { text, page, run } => cmd_exec(config, &text, page, run).await,
        Commands::Inspect { id } => cmd_inspect(&config, id).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: parse
// ---------------------------------------------------------------------------

async fn cmd_parse(config: &AppConfig, text: &str, page: PageArgs) -> Result<()> {
    let parser = build_parser(config)?;
    let result = parser.parse(text, &parse_context(page)).await;
    info!(
        commands = result.commands.len(),
        confidence = result.confidence,
        source = ?result.source,
        "instruction parsed"
    );
    print_json(&result)
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(config: AppConfig, file: &Path, run: RunArgs) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let definition: WorkflowDefinition = serde_json::from_str(&content)
        .with_context(|| format!("invalid workflow definition in {}", file.display()))?;
    info!(
        workflow_id = %definition.id,
        name = %definition.name,
        steps = definition.steps.len(),
        "workflow loaded"
    );

    let quiet = run.quiet;
    let options = execution_options(run);
    let orchestrator = build_orchestrator(config).await?;
    let progress = (!quiet).then(|| spawn_progress_printer(orchestrator.subscribe()));

    let response = orchestrator
        .execute_workflow(definition, options)
        .await
        .context("workflow could not be executed")?;
    if let Some(handle) = progress {
        handle.abort();
    }

    print_json(&response)?;
    if !response.success {
        bail!("workflow did not complete: {}", response.error_info());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: exec
// ---------------------------------------------------------------------------

async fn cmd_exec(config: AppConfig, text: &str, page: PageArgs, run: RunArgs) -> Result<()> {
    let quiet = run.quiet;
    let options = execution_options(run);
    let orchestrator = build_orchestrator(config).await?;
    let progress = (!quiet).then(|| spawn_progress_printer(orchestrator.subscribe()));

    let outcome = orchestrator
        .handle_instruction(text, &parse_context(page), options)
        .await
        .context("instruction could not be dispatched")?;
    if let Some(handle) = progress {
        handle.abort();
    }

    if !outcome.dispatched() {
        for question in &outcome.parsing.clarification_questions {
            warn!(question = %question, "clarification needed");
        }
    }
    print_json(&outcome)
}

// ---------------------------------------------------------------------------
// Subcommand: inspect
// ---------------------------------------------------------------------------

async fn cmd_inspect(config: &AppConfig, id: Uuid) -> Result<()> {
    let store = open_store(&config.store).await?;
    let tracker = StateTracker::new(config.engine.max_snapshots).with_store(store);
    let Some(export) = tracker
        .load(id)
        .await
        .context("failed to load workflow state")?
    else {
        bail!("no persisted state for workflow {id}");
    };
    print_json(&export)
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_parser(config: &AppConfig) -> Result<IntentParser> {
    let mut parser =
        IntentParser::new(config.parser.clone()).context("failed to build intent parser")?;
    if let Some(inference) = build_inference(&config.llm)? {
        parser = parser.with_inference(inference);
    }
    Ok(parser)
}

async fn build_orchestrator(config: AppConfig) -> Result<Orchestrator> {
    let parser = build_parser(&config)?;
    let store = open_store(&config.store).await?;
    Ok(Orchestrator::builder(parser, Arc::new(DryRunSurface::new()))
        .config(config.engine)
        .store(store)
        .build())
}

fn parse_context(page: PageArgs) -> ParseContext {
    ParseContext {
        current_url: page.url,
        page_title: page.title,
        ..ParseContext::default()
    }
}

fn execution_options(run: RunArgs) -> ExecutionOptions {
    ExecutionOptions {
        continue_on_error: run.continue_on_error,
        step_timeout_ms: run.step_timeout_ms,
        max_retries: run.max_retries,
        ..ExecutionOptions::default()
    }
}

/// Log progress events until the bus closes or the task is aborted.
fn spawn_progress_printer(mut subscription: Subscription) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = subscription.recv().await {
            match event.workflow_id() {
                Some(workflow_id) => info!(%workflow_id, event = event.kind(), "progress"),
                None => info!(event = event.kind(), "progress"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabpilot_intent::CommandAction;

    #[test]
    fn demo_workflow_deserializes() {
        let def: WorkflowDefinition =
            serde_json::from_str(include_str!("../../../demos/login.json")).unwrap();
        assert_eq!(def.steps.len(), 6);
        assert!(matches!(def.steps[0].action, CommandAction::Navigate { .. }));
        assert_eq!(def.steps[3].timeout_ms, Some(5000));
        assert!(def.steps[4].skip_on_failure);
        assert!(def.steps[5].precondition.is_some());
    }

    #[test]
    fn run_args_map_to_options() {
        let options = execution_options(RunArgs {
            continue_on_error: true,
            step_timeout_ms: Some(250),
            max_retries: Some(0),
            quiet: true,
        });
        assert!(options.continue_on_error);
        assert_eq!(options.step_timeout_ms, Some(250));
        assert_eq!(options.max_retries, Some(0));
        assert!(options.report_progress);
    }
}
