//! The orchestrator: one entry point from instruction text to execution.
//!
//! Wires the [`IntentParser`], the [`WorkflowExecutor`] and its
//! [`StateTracker`], error recovery and the progress bus.  Collaborators are
//! injected through [`OrchestratorBuilder`].

use std::sync::Arc;

use serde::Serialize;
use tabpilot_intent::{
    Command, CommandAction, IntentParser, ParseContext, ParsingResult, WorkflowDefinition,
};
use tabpilot_kernel::{ProgressBus, Subscription};
use tabpilot_store::KvStore;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{EngineConfig, ExecutionOptions};
use crate::error::{Result, WorkflowError};
use crate::executor::{WorkflowExecutor, WorkflowHandle};
use crate::progress::ProgressReporter;
use crate::recovery::{ErrorRecovery, RetryRecovery};
use crate::state::{StateTracker, WorkflowExport, WorkflowState};
use crate::surface::{ExecutionResponse, ExecutionSurface};

/// What happened to an instruction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionOutcome {
    pub parsing: ParsingResult,
    /// Absent when the instruction needed clarification or yielded nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ExecutionResponse>,
}

impl InstructionOutcome {
    pub fn dispatched(&self) -> bool {
        self.response.is_some()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    parser: IntentParser,
    surface: Arc<dyn ExecutionSurface>,
    config: EngineConfig,
    store: Option<Arc<dyn KvStore>>,
    recovery: Option<Arc<dyn ErrorRecovery>>,
    bus: Option<ProgressBus>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist workflow state through `store`.
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the default retry policy.
    pub fn recovery(mut self, recovery: Arc<dyn ErrorRecovery>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Publish progress on an existing bus.
    pub fn bus(mut self, bus: ProgressBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Orchestrator {
        let mut tracker = StateTracker::new(self.config.max_snapshots);
        if let Some(store) = self.store {
            tracker = tracker.with_store(store);
        }
        let recovery = self.recovery.unwrap_or_else(|| {
            Arc::new(RetryRecovery::new(
                Arc::clone(&self.surface),
                self.config.retry.clone(),
            ))
        });
        let bus = self
            .bus
            .unwrap_or_else(|| ProgressBus::new(self.config.progress_capacity));

        let executor = WorkflowExecutor::new(
            self.config,
            self.surface,
            Arc::new(tracker),
            recovery,
            ProgressReporter::new(bus),
        );

        Orchestrator {
            parser: self.parser,
            executor: Arc::new(executor),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Parses instructions and runs the resulting commands and workflows.
pub struct Orchestrator {
    parser: IntentParser,
    executor: Arc<WorkflowExecutor>,
}

impl Orchestrator {
    pub fn builder(parser: IntentParser, surface: Arc<dyn ExecutionSurface>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            parser,
            surface,
            config: EngineConfig::default(),
            store: None,
            recovery: None,
            bus: None,
        }
    }

    pub fn parser(&self) -> &IntentParser {
        &self.parser
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    /// Listen to workflow and command progress.
    pub fn subscribe(&self) -> Subscription {
        self.executor.progress().subscribe()
    }

    // -- Parsing ------------------------------------------------------------

    pub async fn parse(&self, text: &str, context: &ParseContext) -> ParsingResult {
        self.parser.parse(text, context).await
    }

    /// Parse `text` and dispatch it when it is unambiguous.
    ///
    /// A single command is executed directly; several run as a workflow.
    /// Nothing is executed while clarification is required.
    pub async fn handle_instruction(
        &self,
        text: &str,
        context: &ParseContext,
        options: ExecutionOptions,
    ) -> Result<InstructionOutcome> {
        let parsing = self.parse(text, context).await;
        if !parsing.is_actionable() {
            info!(
                confidence = parsing.confidence,
                questions = parsing.clarification_questions.len(),
                "instruction needs clarification, nothing dispatched"
            );
            return Ok(InstructionOutcome {
                parsing,
                response: None,
            });
        }

        let mut commands = parsing.command_list();
        let response = if commands.len() == 1 {
            let command = commands.remove(0);
            self.execute_command(&command).await?
        } else {
            let definition = parsing
                .workflows
                .first()
                .cloned()
                .unwrap_or_else(|| WorkflowDefinition::new(text, commands));
            self.execute_workflow(definition, options).await?
        };

        Ok(InstructionOutcome {
            parsing,
            response: Some(response),
        })
    }

    // -- Execution ----------------------------------------------------------

    /// Execute one command.  A nested `workflow` command runs as a workflow.
    pub async fn execute_command(&self, command: &Command) -> Result<ExecutionResponse> {
        if let CommandAction::Workflow { name, .. } = &command.action {
            debug!(command_id = %command.id, name = %name, "expanding workflow command");
            // The executor inlines the steps, applying the command's own options.
            let definition = WorkflowDefinition::new(name.clone(), vec![command.clone()]);
            return self
                .execute_workflow(definition, ExecutionOptions::default())
                .await;
        }
        Ok(self.executor.run_command(command).await)
    }

    /// Run `definition` to completion, queueing it if every slot is busy.
    pub async fn execute_workflow(
        &self,
        definition: WorkflowDefinition,
        options: ExecutionOptions,
    ) -> Result<ExecutionResponse> {
        self.submit_workflow(definition, options)?.wait().await
    }

    /// Start or queue `definition` without waiting for it.
    pub fn submit_workflow(
        &self,
        definition: WorkflowDefinition,
        options: ExecutionOptions,
    ) -> Result<WorkflowHandle> {
        self.executor.submit(definition, options)
    }

    /// Run commands concurrently, outside any workflow.
    pub async fn execute_parallel(
        &self,
        commands: &[Command],
        options: &ExecutionOptions,
    ) -> Vec<ExecutionResponse> {
        self.executor.execute_parallel_steps(commands, options).await
    }

    // -- Control and inspection ---------------------------------------------

    pub async fn cancel_workflow(&self, id: Uuid) -> Result<WorkflowState> {
        self.executor.cancel(id).await
    }

    pub fn resume_workflow(&self, id: Uuid) -> Result<()> {
        self.executor.resume(id)
    }

    /// State of a live or remembered workflow, falling back to the store.
    pub async fn get_workflow_state(&self, id: Uuid) -> Result<Option<WorkflowState>> {
        if let Some(state) = self.executor.state(id) {
            return Ok(Some(state));
        }
        Ok(self
            .executor
            .tracker()
            .load(id)
            .await?
            .map(|export| export.state))
    }

    pub fn get_active_workflows(&self) -> Vec<WorkflowState> {
        self.executor.active_workflows()
    }

    /// Export a tracked workflow, or one kept in the store.
    pub async fn export_workflow(&self, id: Uuid) -> Result<WorkflowExport> {
        let tracker = self.executor.tracker();
        match tracker.export(id) {
            Ok(export) => Ok(export),
            Err(WorkflowError::NotFound { .. }) => tracker
                .load(id)
                .await?
                .ok_or(WorkflowError::NotFound { id }),
            Err(e) => Err(e),
        }
    }

    /// Track an exported workflow under a fresh id.
    pub async fn import_workflow(&self, export: WorkflowExport) -> Result<Uuid> {
        self.executor.tracker().import(export).await
    }
}
