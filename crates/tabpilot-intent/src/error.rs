//! Intent parser error types.
//!
//! Parsing itself never fails: [`crate::IntentParser::parse`] folds every
//! problem into the returned result.  These variants describe those
//! problems and the few fallible setup paths (catalog compilation).

/// Unified error type for the intent crate.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    /// The instruction could not be turned into commands.
    #[error("failed to parse instruction: {reason}")]
    ParseFailed { reason: String },

    /// The inference client did not answer within the configured bound.
    #[error("inference timed out after {timeout_ms} ms")]
    InferenceTimeout { timeout_ms: u64 },

    /// The inference reply failed validation or held unusable commands.
    #[error("invalid inference response: {reason}")]
    InvalidInference { reason: String },

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the kernel crate (pattern compilation).
    #[error("kernel error: {0}")]
    Kernel(#[from] tabpilot_kernel::KernelError),

    /// An error propagated from the inference client.
    #[error("inference failed: {0}")]
    Agent(#[from] tabpilot_agent::AgentError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;
