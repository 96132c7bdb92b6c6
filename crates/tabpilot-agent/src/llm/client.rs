//! HTTP client for the chat endpoints used by command inference.
//!
//! Two wire formats are spoken: Anthropic Messages and OpenAI Chat
//! Completions.  The latter also covers self-hosted endpoints (Ollama, vLLM)
//! that mimic it.  Requests are never streamed; inference needs the whole
//! JSON document before it can validate anything.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::{ChatRequest, LlmResponse, Message, Role, Usage};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire format a client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    /// OpenAI and anything exposing the same `/chat/completions` route.
    OpenAI,
}

impl LlmProvider {
    /// Lower-case provider name, as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
        }
    }

    fn endpoint(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::Anthropic => format!("{base}/v1/messages"),
            Self::OpenAI => format!("{base}/chat/completions"),
        }
    }

    fn auth_headers(&self, api_key: &str) -> Result<HeaderMap> {
        let (name, value) = match self {
            Self::Anthropic => (HeaderName::from_static("x-api-key"), api_key.to_owned()),
            Self::OpenAI => (AUTHORIZATION, format!("Bearer {api_key}")),
        };
        let value = HeaderValue::from_str(&value).map_err(|e| AgentError::LlmRequestFailed {
            reason: format!("api key is not a valid header value: {e}"),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if *self == Self::Anthropic {
            headers.insert(
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_static(ANTHROPIC_VERSION),
            );
        }
        Ok(headers)
    }

    fn encode(&self, model: &str, max_tokens: u32, request: &ChatRequest) -> Result<Value> {
        let body = match self {
            Self::Anthropic => {
                let (system, messages) = split_system(&request.messages);
                serde_json::to_value(AnthropicBody {
                    model,
                    max_tokens,
                    system,
                    messages,
                    temperature: request.temperature,
                })?
            }
            Self::OpenAI => serde_json::to_value(OpenAiBody {
                model,
                max_tokens,
                messages: request.messages.iter().map(WireMessage::from).collect(),
                temperature: request.temperature,
            })?,
        };
        Ok(body)
    }

    fn decode(&self, raw: &str) -> Result<LlmResponse> {
        match self {
            Self::Anthropic => from_reply::<AnthropicReply>(raw).map(LlmResponse::from),
            Self::OpenAI => from_reply::<OpenAiReply>(raw)?.try_into(),
        }
    }
}

/// Endpoint, credentials and defaults for one provider.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    /// Root of the API, without the route (`https://api.anthropic.com`).
    pub base_url: String,
    /// Model used when a request leaves `model` empty.
    pub default_model: String,
    /// Token ceiling used when a request does not set one.
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl LlmClientConfig {
    fn for_provider(
        provider: LlmProvider,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: &str,
    ) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: base_url.to_owned(),
            default_model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::for_provider(LlmProvider::Anthropic, api_key, model, ANTHROPIC_BASE_URL)
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::for_provider(LlmProvider::OpenAI, api_key, model, OPENAI_BASE_URL)
    }

    /// An OpenAI-format endpoint at `base_url`.
    pub fn openai_compatible(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self::openai(api_key, model).with_base_url(base_url)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Chat client bound to one provider endpoint.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Fails when the API key is empty or the HTTP client cannot be built.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingApiKey {
                provider: config.provider.as_str().into(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Send `request` and wait for the complete reply.
    pub async fn chat(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let provider = self.config.provider;
        let url = provider.endpoint(&self.config.base_url);
        let model = self.model_for(request);
        let body = self.body_for(request)?;

        tracing::debug!(%url, model, provider = provider.as_str(), "sending LLM request");

        let resp = self
            .http
            .post(&url)
            .headers(provider.auth_headers(&self.config.api_key)?)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(AgentError::LlmRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }
        provider.decode(&text)
    }

    fn body_for(&self, request: &ChatRequest) -> Result<Value> {
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        self.config
            .provider
            .encode(self.model_for(request), max_tokens, request)
    }

    fn model_for<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        if request.model.is_empty() {
            &self.config.default_model
        } else {
            &request.model
        }
    }
}

// ---------------------------------------------------------------------------
// Wire formats
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(msg: &'a Message) -> Self {
        Self {
            role: msg.role,
            content: &msg.content,
        }
    }
}

#[derive(Serialize)]
struct AnthropicBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct OpenAiBody<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Anthropic takes system prompts as a top-level field.  Several system
/// messages are joined with newlines.
fn split_system(messages: &[Message]) -> (Option<String>, Vec<WireMessage<'_>>) {
    let (system, rest): (Vec<&Message>, Vec<&Message>) =
        messages.iter().partition(|m| m.role == Role::System);
    let system = (!system.is_empty()).then(|| {
        system
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    });
    (system, rest.into_iter().map(WireMessage::from).collect())
}

fn from_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| AgentError::LlmParseFailed {
        reason: format!("unexpected response shape: {e}"),
    })
}

#[derive(Deserialize)]
struct AnthropicReply {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl From<AnthropicReply> for LlmResponse {
    fn from(reply: AnthropicReply) -> Self {
        let text = reply
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        Self {
            text,
            stop_reason: reply.stop_reason,
            usage: reply.usage,
        }
    }
}

#[derive(Deserialize)]
struct OpenAiReply {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<OpenAiReply> for LlmResponse {
    type Error = AgentError;

    fn try_from(reply: OpenAiReply) -> Result<Self> {
        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::LlmParseFailed {
                reason: "response has no choices".into(),
            })?;
        let usage = reply.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        Ok(Self {
            text: choice.message.content.unwrap_or_default(),
            stop_reason: choice.finish_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: String::new(),
            messages,
            temperature: Some(0.0),
            max_tokens: Some(512),
        }
    }

    fn client(config: LlmClientConfig) -> LlmClient {
        LlmClient::new(config).unwrap()
    }

    #[test]
    fn anthropic_body_lifts_system_prompt() {
        let client = client(LlmClientConfig::anthropic("test-key", "claude-sonnet-4-20250514"));
        let body = client
            .body_for(&request(vec![
                Message::system("You translate instructions."),
                Message::user("go back"),
            ]))
            .unwrap();

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["system"], "You translate instructions.");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["messages"], json!([{"role": "user", "content": "go back"}]));
    }

    #[test]
    fn system_messages_are_joined() {
        let messages = [
            Message::system("one"),
            Message::system("two"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("one\ntwo"));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].role, Role::Assistant);
    }

    #[test]
    fn request_model_wins_over_default() {
        let client = client(LlmClientConfig::openai("k", "gpt-4o-mini"));
        let mut req = request(vec![Message::user("x")]);
        req.model = "gpt-4o".into();
        assert_eq!(client.body_for(&req).unwrap()["model"], "gpt-4o");
    }

    #[test]
    fn openai_body_keeps_system_inline() {
        let client = client(LlmClientConfig::openai("k", "gpt-4o-mini"));
        let mut req = request(vec![Message::system("rules"), Message::user("scroll down")]);
        req.temperature = None;
        req.max_tokens = None;
        let body = client.body_for(&req).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "scroll down");
        assert!(body.get("system").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = LlmClient::new(LlmClientConfig::anthropic("", "m")).unwrap_err();
        assert!(matches!(err, AgentError::MissingApiKey { provider } if provider == "anthropic"));
    }

    #[test]
    fn endpoints_tolerate_trailing_slash() {
        assert_eq!(
            LlmProvider::OpenAI.endpoint("http://localhost:11434/v1/"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            LlmProvider::Anthropic.endpoint(ANTHROPIC_BASE_URL),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn auth_header_depends_on_provider() {
        let anthropic = LlmProvider::Anthropic.auth_headers("secret").unwrap();
        assert_eq!(anthropic["x-api-key"], "secret");
        assert_eq!(anthropic["anthropic-version"], ANTHROPIC_VERSION);

        let openai = LlmProvider::OpenAI.auth_headers("secret").unwrap();
        assert_eq!(openai[AUTHORIZATION], "Bearer secret");
        assert!(openai.get("anthropic-version").is_none());

        assert!(LlmProvider::OpenAI.auth_headers("bad\nkey").is_err());
    }

    #[test]
    fn compatible_config_points_at_custom_endpoint() {
        let config = LlmClientConfig::openai_compatible("k", "llama3", "http://localhost:11434/v1");
        assert_eq!(config.provider, LlmProvider::OpenAI);
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.default_model, "llama3");
    }

    #[test]
    fn anthropic_text_blocks_are_concatenated() {
        let raw = json!({
            "id": "msg_01",
            "type": "message",
            "content": [
                {"type": "text", "text": "{\"commands\":"},
                {"type": "tool_use", "id": "t1", "name": "noop", "input": {}},
                {"type": "text", "text": " []}"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        })
        .to_string();

        let resp = LlmProvider::Anthropic.decode(&raw).unwrap();
        assert_eq!(resp.text, "{\"commands\": []}");
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(resp.usage.output_tokens, 5);
    }

    #[test]
    fn anthropic_reply_without_content_fails() {
        let err = LlmProvider::Anthropic
            .decode(r#"{"type": "error"}"#)
            .unwrap_err();
        assert!(matches!(err, AgentError::LlmParseFailed { .. }));
    }

    #[test]
    fn openai_reply_maps_usage() {
        let raw = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        })
        .to_string();

        let resp = LlmProvider::OpenAI.decode(&raw).unwrap();
        assert_eq!(resp.text, "hello");
        assert_eq!(resp.stop_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage, Usage { input_tokens: 3, output_tokens: 1 });
    }

    #[test]
    fn openai_reply_without_choices_fails() {
        let err = LlmProvider::OpenAI.decode(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, AgentError::LlmParseFailed { .. }));
    }
}
