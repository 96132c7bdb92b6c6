//! Kernel error types.

/// Errors from the phrase router and the progress bus.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The exact-phrase automaton could not be built from the registered set.
    #[error("router build error: {reason}")]
    RouterBuildError { reason: String },

    #[error("invalid regex pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Every publisher handle is gone; the subscription will see no more events.
    #[error("progress bus closed")]
    BusClosed,
}

pub type Result<T> = std::result::Result<T, KernelError>;
