//! LLM integration layer.
//!
//! - [`types`] -- Core data types (roles, messages, requests, responses).
//! - [`client`] -- HTTP client for Anthropic and OpenAI-compatible APIs.

pub mod client;
pub mod types;

pub use client::{LlmClient, LlmClientConfig, LlmProvider};
pub use types::{ChatRequest, LlmResponse, Message, Role, Usage};
