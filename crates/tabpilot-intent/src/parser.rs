//! Intent parser: transforms an instruction into browser commands.
//!
//! The parser uses a two-tier approach:
//!
//! 1. **Fast path**: the scored [`PatternCatalog`], clause by clause.
//! 2. **Slow path**: when the best pattern confidence is at or below the
//!    inference threshold, an [`InferenceClient`] is consulted under a
//!    timeout and the two interpretations are merged:
//!
//!    - inference beats pattern by more than the margin: take inference;
//!    - pattern above the threshold: take pattern;
//!    - otherwise: union of both (pattern first), confidence is the max,
//!      clarification requested below the clarification threshold.
//!
//! [`IntentParser::parse`] never fails.  Problems surface as `errors` and a
//! clarification request on the returned [`ParsingResult`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tabpilot_agent::{InferenceClient, InferenceResult, PromptContext};

use crate::annotate::{CommandAnnotations, annotate};
use crate::command::{Command, WorkflowDefinition};
use crate::error::{IntentError, Result};
use crate::language::{self, Language, LanguageDetection};
use crate::normalize::{Normalized, normalize};
use crate::patterns::{IntentKind, PatternCatalog};

/// Longest derived workflow name, in characters.
const MAX_WORKFLOW_NAME_CHARS: usize = 60;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for [`IntentParser`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Language assumed when detection is inconclusive.
    pub fallback_language: Language,
    /// Pattern confidence at or below which inference is consulted.
    pub inference_threshold: f64,
    /// How far inference must beat the pattern result to replace it.
    pub inference_margin: f64,
    /// Combined confidence below which clarification is requested.
    pub clarification_threshold: f64,
    /// Upper bound on a single inference call.
    pub inference_timeout_ms: u64,
    /// How many recent commands are summarized in the inference prompt.
    pub max_recent_commands: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            fallback_language: Language::En,
            inference_threshold: 0.8,
            inference_margin: 0.2,
            clarification_threshold: 0.7,
            inference_timeout_ms: 5_000,
            max_recent_commands: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Input and output types
// ---------------------------------------------------------------------------

/// What the caller knows about the page the instruction targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParseContext {
    pub current_url: Option<String>,
    pub page_title: Option<String>,
    /// Short descriptions of interactive elements.
    pub visible_elements: Vec<String>,
    /// Commands executed recently, oldest first.
    pub recent_commands: Vec<Command>,
}

impl ParseContext {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            current_url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// Which interpretation produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseSource {
    Pattern,
    Inference,
    Combined,
    None,
}

/// A command together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedCommand {
    pub command: Command,
    pub confidence: f64,
    pub source: ParseSource,
    #[serde(flatten)]
    pub annotations: CommandAnnotations,
}

impl ParsedCommand {
    fn new(command: Command, confidence: f64, source: ParseSource) -> Self {
        let annotations = annotate(&command);
        Self {
            command,
            confidence,
            source,
            annotations,
        }
    }
}

/// The outcome of parsing one instruction.
///
/// When `requires_clarification` is set, `clarification_questions` holds at
/// least one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsingResult {
    pub commands: Vec<ParsedCommand>,
    /// Sequences derived from multi-command instructions.
    pub workflows: Vec<WorkflowDefinition>,
    pub confidence: f64,
    pub requires_clarification: bool,
    pub clarification_questions: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub language: LanguageDetection,
    pub source: ParseSource,
}

impl ParsingResult {
    fn empty(language: LanguageDetection) -> Self {
        Self {
            commands: Vec::new(),
            workflows: Vec::new(),
            confidence: 0.0,
            requires_clarification: false,
            clarification_questions: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            language,
            source: ParseSource::None,
        }
    }

    /// A zero-confidence result carrying `error` and a clarification request.
    pub fn failure(language: LanguageDetection, error: &IntentError) -> Self {
        let mut result = Self::empty(language);
        result.errors.push(error.to_string());
        result.requires_clarification = true;
        result
            .clarification_questions
            .push("Could you describe the browser action you want me to take?".into());
        result
    }

    /// The bare commands, in order.
    pub fn command_list(&self) -> Vec<Command> {
        self.commands.iter().map(|c| c.command.clone()).collect()
    }

    /// Whether the result can be acted on without asking the user.
    pub fn is_actionable(&self) -> bool {
        !self.requires_clarification && !self.commands.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Intermediate interpretations
// ---------------------------------------------------------------------------

/// The pattern catalog's reading of an instruction.
struct PatternReading {
    commands: Vec<(Command, f64)>,
    /// Minimum clause confidence; 0 when any clause matched nothing.
    confidence: f64,
    /// First intent whose required entity was missing.
    missing: Option<IntentKind>,
}

/// A validated inference reply converted to commands.
struct InferenceReading {
    commands: Vec<Command>,
    confidence: f64,
    requires_clarification: bool,
    question: Option<String>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// The intent parser.
pub struct IntentParser {
    config: ParserConfig,
    catalog: PatternCatalog,
    inference: Option<Arc<dyn InferenceClient>>,
}

impl IntentParser {
    /// Create a pattern-only parser.
    pub fn new(config: ParserConfig) -> Result<Self> {
        Ok(Self {
            config,
            catalog: PatternCatalog::new()?,
            inference: None,
        })
    }

    /// Attach an inference client for low-confidence instructions.
    pub fn with_inference(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.inference = Some(client);
        self
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn has_inference(&self) -> bool {
        self.inference.is_some()
    }

    /// Parse `text` in `context`.
    pub async fn parse(&self, text: &str, context: &ParseContext) -> ParsingResult {
        let text = text.trim();
        let detection = language::detect(text, self.config.fallback_language);

        if text.is_empty() {
            return ParsingResult::failure(
                detection,
                &IntentError::ParseFailed {
                    reason: "empty instruction".into(),
                },
            );
        }

        debug!(text = %text, language = %detection.language, "parsing instruction");

        let normalized = normalize(text, detection.language);
        let pattern = self.read_patterns(&normalized, context.current_url.is_some());
        let mut result = ParsingResult::empty(detection);

        let inference = if pattern.confidence <= self.config.inference_threshold {
            let language = result.language.language;
            self.read_inference(&normalized, language, context, &mut result)
                .await
        } else {
            None
        };

        self.merge(&mut result, pattern, inference);
        self.finish(&mut result, &normalized);

        info!(
            commands = result.commands.len(),
            confidence = result.confidence,
            source = ?result.source,
            clarification = result.requires_clarification,
            "instruction parsed"
        );
        result
    }

    // -- Fast path ----------------------------------------------------------

    fn read_patterns(&self, normalized: &Normalized, has_current_page: bool) -> PatternReading {
        let clauses = normalized.clauses();
        let mut reading = PatternReading {
            commands: Vec::new(),
            confidence: if clauses.is_empty() { 0.0 } else { 1.0 },
            missing: None,
        };

        for clause in &clauses {
            let Some(m) = self
                .catalog
                .best_match(clause, normalized, has_current_page)
            else {
                debug!(clause = %clause, "clause matched no pattern");
                reading.confidence = 0.0;
                continue;
            };

            debug!(
                clause = %clause,
                pattern = m.pattern_id,
                confidence = m.confidence,
                "clause matched"
            );
            reading.confidence = reading.confidence.min(m.confidence);
            match m.command {
                Some(command) => reading.commands.push((command, m.confidence)),
                None => {
                    reading.missing.get_or_insert(m.intent);
                }
            }
        }

        reading
    }

    // -- Slow path ----------------------------------------------------------

    async fn read_inference(
        &self,
        normalized: &Normalized,
        language: Language,
        context: &ParseContext,
        result: &mut ParsingResult,
    ) -> Option<InferenceReading> {
        let Some(client) = &self.inference else {
            result
                .warnings
                .push("no inference client configured; pattern result only".into());
            return None;
        };

        let prompt = self.prompt_context(normalized, language, context);
        let timeout_ms = self.config.inference_timeout_ms;

        let outcome = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            client.infer(&prompt),
        )
        .await
        {
            Err(_) => Err(IntentError::InferenceTimeout { timeout_ms }),
            Ok(Err(e)) => Err(IntentError::from(e)),
            Ok(Ok(raw)) => to_reading(raw),
        };

        match outcome {
            Ok(reading) => {
                debug!(
                    commands = reading.commands.len(),
                    confidence = reading.confidence,
                    "inference reading accepted"
                );
                Some(reading)
            }
            Err(e) => {
                warn!(error = %e, "inference unavailable, continuing with patterns");
                result.errors.push(e.to_string());
                None
            }
        }
    }

    fn prompt_context(
        &self,
        normalized: &Normalized,
        language: Language,
        context: &ParseContext,
    ) -> PromptContext {
        let skip = context
            .recent_commands
            .len()
            .saturating_sub(self.config.max_recent_commands);

        PromptContext {
            normalized_text: normalized.text.clone(),
            language: language.code().to_string(),
            current_url: context.current_url.clone(),
            page_title: context.page_title.clone(),
            visible_elements: context.visible_elements.clone(),
            recent_commands: context
                .recent_commands
                .iter()
                .skip(skip)
                .map(Command::summary)
                .collect(),
        }
    }

    // -- Merge --------------------------------------------------------------

    fn merge(
        &self,
        result: &mut ParsingResult,
        pattern: PatternReading,
        inference: Option<InferenceReading>,
    ) {
        let p = pattern.confidence;
        let a = inference.as_ref().map_or(0.0, |i| i.confidence);

        if let Some(ai) = inference.as_ref().filter(|_| a > p + self.config.inference_margin) {
            result.source = ParseSource::Inference;
            result.confidence = a;
            result.commands = ai
                .commands
                .iter()
                .map(|c| ParsedCommand::new(c.clone(), a, ParseSource::Inference))
                .collect();
            result.requires_clarification = ai.requires_clarification
                || a < self.config.clarification_threshold
                || ai.commands.is_empty();
            result.clarification_questions.extend(ai.question.clone());
            return;
        }

        let pattern_commands: Vec<ParsedCommand> = pattern
            .commands
            .into_iter()
            .map(|(c, conf)| ParsedCommand::new(c, conf, ParseSource::Pattern))
            .collect();

        if p > self.config.inference_threshold {
            result.source = ParseSource::Pattern;
            result.confidence = p;
            result.commands = pattern_commands;
            return;
        }

        // Combine: union of both lists, pattern commands first.
        let mut commands = pattern_commands;
        let from_pattern = commands.len();
        if let Some(ai) = &inference {
            for c in &ai.commands {
                if !commands.iter().any(|pc| pc.command.action == c.action) {
                    commands.push(ParsedCommand::new(c.clone(), a, ParseSource::Inference));
                }
            }
            result.clarification_questions.extend(ai.question.clone());
        }
        let from_inference = commands.len() - from_pattern;

        result.source = match (from_pattern > 0, from_inference > 0) {
            (true, true) => ParseSource::Combined,
            (true, false) => ParseSource::Pattern,
            (false, true) => ParseSource::Inference,
            (false, false) => ParseSource::None,
        };
        result.confidence = p.max(a);
        result.requires_clarification = result.confidence < self.config.clarification_threshold;
        result.commands = commands;

        if result.requires_clarification
            && let Some(intent) = pattern.missing
        {
            result.clarification_questions.push(missing_entity_question(intent).into());
        }
    }

    /// Enforce result invariants and derive the workflow.
    fn finish(&self, result: &mut ParsingResult, normalized: &Normalized) {
        if result.commands.is_empty() {
            result.requires_clarification = true;
        }

        if result.requires_clarification && result.clarification_questions.is_empty() {
            result.clarification_questions.push(format!(
                "I'm not sure what to do with \"{}\". Could you rephrase it as a browser action, \
                 for example \"go to example.com\" or \"click on Sign in\"?",
                normalized.original
            ));
        }
        result.clarification_questions.dedup();

        if result.commands.len() > 1 {
            let name: String = normalized
                .original
                .chars()
                .take(MAX_WORKFLOW_NAME_CHARS)
                .collect();
            result
                .workflows
                .push(WorkflowDefinition::new(name, result.command_list()));
        }
    }
}

fn to_reading(raw: serde_json::Value) -> Result<InferenceReading> {
    let validated = InferenceResult::from_value(raw).map_err(|e| IntentError::InvalidInference {
        reason: e.to_string(),
    })?;

    let commands = validated
        .commands
        .into_iter()
        .map(serde_json::from_value::<Command>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| IntentError::InvalidInference {
            reason: format!("unusable command: {e}"),
        })?;

    Ok(InferenceReading {
        commands,
        confidence: validated.confidence,
        requires_clarification: validated.requires_clarification,
        question: validated.clarification_question,
    })
}

fn missing_entity_question(intent: IntentKind) -> &'static str {
    match intent {
        IntentKind::Navigate => "Which page or URL should I open?",
        IntentKind::Click => "Which element should I click?",
        IntentKind::Fill => "Which field should I fill in, and with what value?",
        IntentKind::Type => "What text should I type?",
        IntentKind::Scroll => "Which direction should I scroll?",
        IntentKind::Wait => "How long should I wait?",
        IntentKind::WaitForElement => "Which element should I wait for?",
        IntentKind::SwitchTab => "Which tab should I switch to?",
        IntentKind::CreateTab => "Which page should the new tab open?",
        IntentKind::ExtractText | IntentKind::Screenshot | IntentKind::CloseTab => {
            "Could you describe what you want in more detail?"
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
