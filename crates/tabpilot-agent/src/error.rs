//! Agent error types.
//!
//! Every failure of the inference layer surfaces through [`AgentError`].
//! The intent parser never propagates these; it records them as diagnostics
//! and continues with zero inference confidence.

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Transport -----------------------------------------------------------
    /// The HTTP request failed or the provider answered with an error status.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The provider's reply did not have the documented wire shape.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Inference -----------------------------------------------------------
    /// The model answered, but not with a usable command list.
    #[error("invalid inference response: {reason}")]
    InvalidResponse { reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}
