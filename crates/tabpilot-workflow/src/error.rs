//! Workflow engine error types.
//!
//! Step failures are not errors at this level: they are recorded in the
//! workflow's results and surface as an unsuccessful
//! [`ExecutionResponse`](crate::ExecutionResponse).  [`WorkflowError`] covers
//! rejected submissions, invalid state transitions and lookups, and
//! import/export problems.

use uuid::Uuid;

use crate::state::WorkflowStatus;

/// Unified error type for the workflow crate.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// No workflow with this id is known.
    #[error("workflow not found: {id}")]
    NotFound { id: Uuid },

    /// The requested transition is not allowed from the current status.
    #[error("workflow {id} is {status}; cannot {action}")]
    InvalidState {
        id: Uuid,
        status: WorkflowStatus,
        action: &'static str,
    },

    /// The direct-run API was called with every execution slot taken.
    #[error("concurrency limit reached ({limit} active workflows)")]
    ConcurrencyLimitExceeded { limit: usize },

    /// A workflow with no steps was submitted.
    #[error("workflow {id} has no steps")]
    EmptyWorkflow { id: Uuid },

    /// A workflow has more steps than a step number can address.
    #[error("workflow {id} has {count} steps; at most {max} are supported", max = u32::MAX)]
    TooManySteps { id: Uuid, count: usize },

    /// A workflow with this id is already running or queued.
    #[error("workflow {id} is already submitted")]
    AlreadySubmitted { id: Uuid },

    /// A state update would break a workflow state invariant.
    #[error("invalid state update for {id}: {reason}")]
    InvalidUpdate { id: Uuid, reason: String },

    /// The requested snapshot does not exist.
    #[error("workflow {id} has no snapshot at index {index}")]
    SnapshotOutOfRange { id: Uuid, index: usize },

    /// An export blob carries a format version this build cannot read.
    #[error("unsupported export version {found} (expected {expected})")]
    UnsupportedExportVersion { found: u32, expected: u32 },

    /// A configuration value is outside its valid range.
    #[error("invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A workflow handle was dropped before its workflow finished.
    #[error("workflow {id} finished without reporting a result")]
    ResultUnavailable { id: Uuid },

    // -- Upstream crate errors -----------------------------------------------
    #[error("store error: {0}")]
    Store(#[from] tabpilot_store::StoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the workflow crate.
pub type Result<T> = std::result::Result<T, WorkflowError>;
