//! Language inference for tabpilot.
//!
//! The intent parser falls back to a remote language model when its pattern
//! catalog is not confident enough.  This crate owns that collaborator:
//!
//! - [`llm`] -- provider-agnostic chat types and a non-streaming HTTP client
//!   for the Anthropic Messages API and OpenAI-compatible endpoints.
//! - [`inference`] -- the [`InferenceClient`] seam consumed by the parser,
//!   the prompt context it receives, response validation, and
//!   [`LlmInferenceClient`], which implements the seam over [`LlmClient`].

pub mod error;
pub mod inference;
pub mod llm;

pub use error::{AgentError, Result};
pub use inference::{
    InferenceClient, InferenceResult, LlmInferenceClient, PromptContext, strip_code_fences,
};
pub use llm::{ChatRequest, LlmClient, LlmClientConfig, LlmProvider, LlmResponse, Message, Role};
