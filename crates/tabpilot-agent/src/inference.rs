//! Structured command inference.
//!
//! The intent parser hands a [`PromptContext`] to an [`InferenceClient`] and
//! gets back a raw JSON document.  [`InferenceResult::from_value`] is the
//! minimal schema check applied before that document is trusted: it must
//! carry a `commands` list and every command must declare a `type`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::{ChatRequest, LlmClient, Message};

/// Confidence assumed when a reply omits the field.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Upper bound on the digest lines embedded in a prompt.
const MAX_DIGEST_ITEMS: usize = 20;

const SYSTEM_PROMPT: &str = r#"You translate browser automation instructions into JSON commands.

Respond ONLY with a JSON object:
{
  "commands": [ { "type": "...", ... } ],
  "confidence": 0.0-1.0,
  "requiresClarification": true|false,
  "clarificationQuestion": "optional question for the user"
}

Command shapes (camelCase):
- {"type": "navigate", "url": "https://..."}
- {"type": "click", "selector": "css or visible text"}
- {"type": "fill", "selector": "...", "value": "..."}
- {"type": "type", "text": "...", "selector": "optional"}
- {"type": "scroll", "direction": "up|down|left|right|top|bottom", "amount": 500}
- {"type": "wait", "durationMs": 1000}
- {"type": "waitForElement", "selector": "..."}
- {"type": "extractText", "selector": "optional"}
- {"type": "screenshot", "fullPage": false}
- {"type": "createTab", "url": "optional"}
- {"type": "closeTab"}
- {"type": "switchTab", "to": "next" | "previous" | {"index": 0}}

If the instruction is ambiguous, return your best guess with a low
confidence, set requiresClarification to true and ask one short question."#;

// ---------------------------------------------------------------------------
// Prompt context
// ---------------------------------------------------------------------------

/// Everything the model sees about the instruction and the page it targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    /// The instruction after normalization.
    pub normalized_text: String,
    /// ISO 639-1 code of the detected language.
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    /// Short descriptions of interactive elements on the page.
    #[serde(default)]
    pub visible_elements: Vec<String>,
    /// Most recent commands, oldest first, as human-readable summaries.
    #[serde(default)]
    pub recent_commands: Vec<String>,
}

impl PromptContext {
    /// Render the user message sent alongside the system prompt.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Instruction ({}): {}\n",
            self.language, self.normalized_text
        );

        if let Some(url) = &self.current_url {
            out.push_str(&format!("Current page: {url}\n"));
        }
        if let Some(title) = &self.page_title {
            out.push_str(&format!("Page title: {title}\n"));
        }
        push_digest(&mut out, "Visible elements", &self.visible_elements);
        push_digest(&mut out, "Recent commands", &self.recent_commands);

        out
    }
}

fn push_digest(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(heading);
    out.push_str(":\n");
    let skip = items.len().saturating_sub(MAX_DIGEST_ITEMS);
    for item in items.iter().skip(skip) {
        out.push_str("- ");
        out.push_str(item);
        out.push('\n');
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// A validated inference reply.
///
/// Commands stay as JSON objects here; the intent crate owns the command
/// model and converts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResult {
    pub commands: Vec<Value>,
    pub confidence: f64,
    #[serde(default)]
    pub requires_clarification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_question: Option<String>,
}

impl InferenceResult {
    /// Validate a raw reply.
    ///
    /// Confidence is clamped into `[0, 1]`; a missing confidence defaults to
    /// 0.5.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(AgentError::InvalidResponse {
                reason: "response is not a JSON object".into(),
            });
        };

        let commands = match obj.remove("commands") {
            Some(Value::Array(commands)) => commands,
            Some(_) => {
                return Err(AgentError::InvalidResponse {
                    reason: "`commands` is not a list".into(),
                });
            }
            None => {
                return Err(AgentError::InvalidResponse {
                    reason: "missing `commands` list".into(),
                });
            }
        };

        for (i, command) in commands.iter().enumerate() {
            if command.get("type").and_then(Value::as_str).is_none() {
                return Err(AgentError::InvalidResponse {
                    reason: format!("command {i} does not declare a `type`"),
                });
            }
        }

        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0);

        let requires_clarification = obj
            .get("requiresClarification")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let clarification_question = obj
            .get("clarificationQuestion")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_owned);

        Ok(Self {
            commands,
            confidence,
            requires_clarification,
            clarification_question,
        })
    }
}

// ---------------------------------------------------------------------------
// Client seam
// ---------------------------------------------------------------------------

/// Something that turns a prompt context into a raw command document.
///
/// Timeouts are imposed by the caller.  Caching, rate limiting and backoff
/// are the implementation's concern.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, context: &PromptContext) -> Result<Value>;
}

/// [`InferenceClient`] backed by a chat-completion model.
#[derive(Debug, Clone)]
pub struct LlmInferenceClient {
    client: LlmClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmInferenceClient {
    /// Wrap `client`, using its default model.
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            model: String::new(),
            temperature: 0.0,
            max_tokens: 1024,
        }
    }

    /// Use a specific model instead of the client's default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, context: &PromptContext) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(context.render())],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        }
    }
}

#[async_trait]
impl InferenceClient for LlmInferenceClient {
    async fn infer(&self, context: &PromptContext) -> Result<Value> {
        let request = self.build_request(context);
        let response = self.client.chat(&request).await?;

        tracing::debug!(
            output_tokens = response.usage.output_tokens,
            "inference reply received"
        );

        serde_json::from_str(strip_code_fences(&response.text)).map_err(|e| {
            AgentError::LlmParseFailed {
                reason: format!("failed to parse LLM response as JSON: {e}"),
            }
        })
    }
}

/// Strip optional markdown code fences around a JSON reply.
pub fn strip_code_fences(text: &str) -> &str {
    let cleaned = text.trim();
    let cleaned = cleaned.strip_prefix("```json").unwrap_or(cleaned);
    let cleaned = cleaned.strip_prefix("```").unwrap_or(cleaned);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);
    cleaned.trim()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClientConfig;
    use serde_json::json;

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {\"b\":2} "), "{\"b\":2}");
    }

    #[test]
    fn from_value_accepts_minimal_reply() {
        let result = InferenceResult::from_value(json!({
            "commands": [{"type": "click", "selector": "#buy"}],
            "confidence": 0.85
        }))
        .unwrap();

        assert_eq!(result.commands.len(), 1);
        assert!((result.confidence - 0.85).abs() < f64::EPSILON);
        assert!(!result.requires_clarification);
        assert!(result.clarification_question.is_none());
    }

    #[test]
    fn from_value_clamps_and_defaults_confidence() {
        let high = InferenceResult::from_value(json!({"commands": [], "confidence": 3.0})).unwrap();
        assert_eq!(high.confidence, 1.0);

        let missing = InferenceResult::from_value(json!({"commands": []})).unwrap();
        assert_eq!(missing.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn from_value_reads_clarification() {
        let result = InferenceResult::from_value(json!({
            "commands": [],
            "confidence": 0.3,
            "requiresClarification": true,
            "clarificationQuestion": "  Which button?  "
        }))
        .unwrap();
        assert!(result.requires_clarification);
        assert_eq!(result.clarification_question.as_deref(), Some("Which button?"));
    }

    #[test]
    fn from_value_rejects_malformed_replies() {
        for bad in [
            json!([]),
            json!({"confidence": 0.9}),
            json!({"commands": "click"}),
            json!({"commands": [{"selector": "#x"}]}),
        ] {
            let err = InferenceResult::from_value(bad).unwrap_err();
            assert!(matches!(err, AgentError::InvalidResponse { .. }));
        }
    }

    #[test]
    fn render_includes_page_context() {
        let ctx = PromptContext {
            normalized_text: "click on the login button".into(),
            language: "en".into(),
            current_url: Some("https://example.com".into()),
            page_title: Some("Example".into()),
            visible_elements: vec!["button#login \"Log in\"".into()],
            recent_commands: vec!["navigate https://example.com".into()],
        };
        let text = ctx.render();
        assert!(text.starts_with("Instruction (en): click on the login button"));
        assert!(text.contains("Current page: https://example.com"));
        assert!(text.contains("Visible elements:\n- button#login"));
        assert!(text.contains("Recent commands:\n- navigate"));
    }

    #[test]
    fn render_keeps_only_latest_digest_items() {
        let ctx = PromptContext {
            normalized_text: "x".into(),
            language: "en".into(),
            recent_commands: (0..30).map(|i| format!("cmd{i}")).collect(),
            ..Default::default()
        };
        let text = ctx.render();
        assert!(!text.contains("- cmd9\n"));
        assert!(text.contains("- cmd10\n"));
        assert!(text.contains("- cmd29\n"));
    }

    #[test]
    fn build_request_uses_system_prompt() {
        let client = LlmClient::new(LlmClientConfig::anthropic("k", "m")).unwrap();
        let inference = LlmInferenceClient::new(client).with_model("other");
        let req = inference.build_request(&PromptContext {
            normalized_text: "scroll down".into(),
            language: "en".into(),
            ..Default::default()
        });
        assert_eq!(req.model, "other");
        assert_eq!(req.messages.len(), 2);
        assert!(req.messages[0].content.contains("\"commands\""));
        assert!(req.messages[1].content.contains("scroll down"));
    }
}
