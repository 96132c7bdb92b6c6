//! Workflow execution for tabpilot.
//!
//! - [`executor`] -- ordered step execution with timeouts, a concurrency
//!   limit with FIFO queueing, pause/resume and cooperative cancellation.
//! - [`state`] -- per-workflow state, context, history and bounded snapshots,
//!   optionally persisted through a [`tabpilot_store::KvStore`].
//! - [`recovery`] -- the [`ErrorRecovery`] seam and the retry policy.
//! - [`surface`] -- the [`ExecutionSurface`] seam that performs browser
//!   actions.
//! - [`orchestrator`] -- instruction text in, execution responses out.

pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod progress;
pub mod recovery;
pub mod state;
pub mod surface;

pub use config::{EngineConfig, ExecutionOptions, RetryConfig};
pub use error::{Result, WorkflowError};
pub use executor::{WorkflowExecutor, WorkflowHandle};
pub use orchestrator::{InstructionOutcome, Orchestrator, OrchestratorBuilder};
pub use progress::ProgressReporter;
pub use recovery::{ErrorRecovery, NoRecovery, RecoveryOutcome, RecoveryRequest, RetryRecovery};
pub use state::{
    EXPORT_VERSION, StateSnapshot, StateTracker, StateUpdate, StepContext, StepResult, StepStatus,
    WorkflowExport, WorkflowState, WorkflowStatus,
};
pub use surface::{DryRunSurface, ExecutionErrorInfo, ExecutionResponse, ExecutionSurface, codes};
