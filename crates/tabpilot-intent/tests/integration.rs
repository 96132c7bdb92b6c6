//! Integration tests for the tabpilot-intent crate.
//!
//! These drive [`IntentParser`] end to end through its public API, with a
//! scripted inference client standing in for the language model.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tabpilot_agent::{InferenceClient, PromptContext};
use tabpilot_intent::{
    Capability, CommandAction, IntentParser, Language, ParseContext, ParseSource, ParserConfig,
    RiskLevel, TabTarget,
};

struct ScriptedInference {
    reply: Value,
    calls: AtomicUsize,
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn infer(&self, _context: &PromptContext) -> tabpilot_agent::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

fn scripted(reply: Value) -> Arc<ScriptedInference> {
    Arc::new(ScriptedInference {
        reply,
        calls: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn confident_navigation_needs_no_clarification() {
    let parser = IntentParser::new(ParserConfig::default()).unwrap();
    let result = parser
        .parse("Go to https://example.com", &ParseContext::default())
        .await;

    assert!(result.is_actionable());
    assert!(result.confidence >= 0.9);
    assert_eq!(result.language.language, Language::En);
    assert_eq!(
        result.command_list()[0].action,
        CommandAction::Navigate {
            url: "https://example.com".into()
        }
    );
    assert_eq!(result.commands[0].annotations.capabilities, vec![Capability::Navigation]);
}

#[tokio::test]
async fn vague_instruction_consults_inference_and_asks() {
    let inference = scripted(json!({
        "commands": [{"type": "click", "selector": "button.primary"}],
        "confidence": 0.5
    }));
    let parser = IntentParser::new(ParserConfig::default())
        .unwrap()
        .with_inference(inference.clone());

    let result = parser.parse("click the thing", &ParseContext::default()).await;

    assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
    assert!(result.requires_clarification);
    assert!(!result.clarification_questions.is_empty());
    assert!(result.confidence < 0.7);
}

#[tokio::test]
async fn spanish_instruction_is_understood() {
    let parser = IntentParser::new(ParserConfig::default()).unwrap();
    let result = parser
        .parse("haz clic en el botón Aceptar", &ParseContext::default())
        .await;

    assert_eq!(result.language.language, Language::Es);
    assert_eq!(result.source, ParseSource::Pattern);
    assert_eq!(
        result.command_list()[0].action,
        CommandAction::Click {
            selector: "el botón Aceptar".into()
        }
    );
}

#[tokio::test]
async fn login_sequence_becomes_a_workflow() {
    let parser = IntentParser::new(ParserConfig::default()).unwrap();
    let result = parser
        .parse(
            "open example.com/login, then fill the password field with hunter2 and then \
             switch to the next tab",
            &ParseContext::default(),
        )
        .await;

    assert_eq!(result.commands.len(), 3, "{result:#?}");
    assert_eq!(result.workflows.len(), 1);
    assert_eq!(result.commands[1].annotations.risk, RiskLevel::High);
    assert_eq!(
        result.commands[2].command.action,
        CommandAction::SwitchTab { to: TabTarget::Next }
    );
}

#[tokio::test]
async fn parsing_result_serializes_camel_case() {
    let parser = IntentParser::new(ParserConfig::default()).unwrap();
    let result = parser.parse("take a screenshot", &ParseContext::default()).await;
    let v = serde_json::to_value(&result).unwrap();

    assert_eq!(v["requiresClarification"], json!(false));
    assert_eq!(v["commands"][0]["command"]["type"], json!("screenshot"));
    assert_eq!(v["commands"][0]["complexity"], json!("simple"));
    assert_eq!(v["source"], json!("pattern"));
}
