//! Intent parsing for tabpilot.
//!
//! Turns a free-form instruction into browser [`Command`]s:
//!
//! 1. [`language`] -- stop-word language detection.
//! 2. [`normalize`] -- lower-casing, whitespace and abbreviation cleanup,
//!    clause splitting.
//! 3. [`patterns`] -- the scored pattern catalog over the kernel router.
//! 4. [`parser`] -- inference fallback and merging into a [`ParsingResult`].
//!
//! [`command`] defines the command model shared with the workflow engine and
//! [`annotate`] derives complexity, capability and risk metadata.

pub mod annotate;
pub mod command;
pub mod error;
pub mod language;
pub mod normalize;
pub mod parser;
pub mod patterns;

pub use annotate::{Capability, CommandAnnotations, Complexity, RiskLevel, annotate};
pub use command::{
    Command, CommandAction, ContextMap, Precondition, ScrollDirection, TabTarget,
    WorkflowDefinition,
};
pub use error::{IntentError, Result};
pub use language::{Language, LanguageDetection};
pub use parser::{
    IntentParser, ParseContext, ParseSource, ParsedCommand, ParserConfig, ParsingResult,
};
pub use patterns::{EntityKind, IntentKind, PatternCatalog, PatternMatch};
