//! The browser command model.
//!
//! A [`Command`] is one concrete browser action plus the execution knobs the
//! workflow engine honours (tab, timeout, skip-on-failure, precondition).
//! The action itself is a closed tagged union so every consumer matches it
//! exhaustively.  On the wire the action's fields sit next to the envelope
//! fields, discriminated by `"type"`:
//!
//! ```json
//! {"id": "…", "type": "fill", "selector": "#email", "value": "a@b.c", "timeoutMs": 2000}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Workflow context: named values shared between steps.
pub type ContextMap = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Tabs and directions
// ---------------------------------------------------------------------------

/// Which tab a command applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TabTarget {
    /// The tab that currently has focus.
    #[default]
    Active,
    /// Zero-based position in the tab strip.
    Index(u32),
    /// Surface-assigned tab identifier.
    Id(String),
    Next,
    Previous,
}

impl TabTarget {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Scroll direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
    Top,
    Bottom,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// What a command does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CommandAction {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Fill {
        selector: String,
        value: String,
    },
    /// Type into `selector`, or into whatever has focus.
    Type {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Scroll {
        direction: ScrollDirection,
        /// Pixels; the surface picks a page-sized default when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<u32>,
    },
    Wait {
        duration_ms: u64,
    },
    WaitForElement {
        selector: String,
    },
    /// Extract visible text from `selector`, or the whole page.
    ExtractText {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Screenshot {
        #[serde(default)]
        full_page: bool,
    },
    CreateTab {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    CloseTab,
    SwitchTab {
        to: TabTarget,
    },
    /// A nested sequence.  The workflow engine inlines its steps into the
    /// enclosing workflow, so each inner step gets its own step number.
    Workflow {
        name: String,
        steps: Vec<Command>,
    },
}

impl CommandAction {
    /// The wire tag of this action.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Fill { .. } => "fill",
            Self::Type { .. } => "type",
            Self::Scroll { .. } => "scroll",
            Self::Wait { .. } => "wait",
            Self::WaitForElement { .. } => "waitForElement",
            Self::ExtractText { .. } => "extractText",
            Self::Screenshot { .. } => "screenshot",
            Self::CreateTab { .. } => "createTab",
            Self::CloseTab => "closeTab",
            Self::SwitchTab { .. } => "switchTab",
            Self::Workflow { .. } => "workflow",
        }
    }

    /// Number of populated parameters.
    pub fn parameter_count(&self) -> usize {
        match self {
            Self::Navigate { .. }
            | Self::Click { .. }
            | Self::Wait { .. }
            | Self::WaitForElement { .. }
            | Self::SwitchTab { .. } => 1,
            Self::Fill { .. } => 2,
            Self::Type { selector, .. } => 1 + usize::from(selector.is_some()),
            Self::Scroll { amount, .. } => 1 + usize::from(amount.is_some()),
            Self::ExtractText { selector } => usize::from(selector.is_some()),
            Self::Screenshot { full_page } => usize::from(*full_page),
            Self::CreateTab { url } => usize::from(url.is_some()),
            Self::CloseTab => 0,
            Self::Workflow { steps, .. } => 1 + steps.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

/// A serializable predicate checked before a step runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Precondition {
    Always,
    Never,
    /// The context holds a non-null value under `key`.
    ContextPresent { key: String },
    ContextEquals { key: String, value: Value },
    /// Step `step` (1-based) ran and succeeded.
    StepSucceeded { step: u32 },
    Not { condition: Box<Precondition> },
    All { conditions: Vec<Precondition> },
    Any { conditions: Vec<Precondition> },
}

impl Precondition {
    /// Evaluate against a workflow's context and the outcome of earlier steps.
    pub fn evaluate(&self, context: &ContextMap, step_succeeded: &dyn Fn(u32) -> bool) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::ContextPresent { key } => context.get(key).is_some_and(|v| !v.is_null()),
            Self::ContextEquals { key, value } => context.get(key) == Some(value),
            Self::StepSucceeded { step } => step_succeeded(*step),
            Self::Not { condition } => !condition.evaluate(context, step_succeeded),
            Self::All { conditions } => conditions
                .iter()
                .all(|c| c.evaluate(context, step_succeeded)),
            Self::Any { conditions } => conditions
                .iter()
                .any(|c| c.evaluate(context, step_succeeded)),
        }
    }
}

// ---------------------------------------------------------------------------
// Command envelope
// ---------------------------------------------------------------------------

fn new_command_id() -> String {
    Uuid::now_v7().to_string()
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A browser action together with its execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Unique identifier.  Generated when absent from the input.
    #[serde(default = "new_command_id")]
    pub id: String,

    #[serde(flatten)]
    pub action: CommandAction,

    #[serde(default, skip_serializing_if = "TabTarget::is_active")]
    pub tab: TabTarget,

    /// Per-step timeout overriding the workflow default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Record a failure of this step and move on instead of recovering.
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_on_failure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Precondition>,
}

impl Command {
    /// Create a command for the active tab with a fresh id.
    pub fn new(action: CommandAction) -> Self {
        Self {
            id: new_command_id(),
            action,
            tab: TabTarget::Active,
            timeout_ms: None,
            skip_on_failure: false,
            precondition: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_skip_on_failure(mut self, skip: bool) -> Self {
        self.skip_on_failure = skip;
        self
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }

    pub fn on_tab(mut self, tab: TabTarget) -> Self {
        self.tab = tab;
        self
    }

    /// The wire tag of the action.
    pub fn kind(&self) -> &'static str {
        self.action.kind()
    }

    /// One-line human-readable description, used in prompts and logs.
    pub fn summary(&self) -> String {
        match &self.action {
            CommandAction::Navigate { url } => format!("navigate {url}"),
            CommandAction::Click { selector } => format!("click {selector}"),
            CommandAction::Fill { selector, .. } => format!("fill {selector}"),
            CommandAction::Type { text, .. } => format!("type {} chars", text.chars().count()),
            CommandAction::Scroll { direction, .. } => format!("scroll {direction:?}").to_lowercase(),
            CommandAction::Wait { duration_ms } => format!("wait {duration_ms}ms"),
            CommandAction::WaitForElement { selector } => format!("wait for {selector}"),
            CommandAction::ExtractText { selector } => match selector {
                Some(s) => format!("extract text from {s}"),
                None => "extract page text".into(),
            },
            CommandAction::Screenshot { .. } => "screenshot".into(),
            CommandAction::CreateTab { url } => match url {
                Some(u) => format!("new tab {u}"),
                None => "new tab".into(),
            },
            CommandAction::CloseTab => "close tab".into(),
            CommandAction::SwitchTab { to } => format!("switch tab {to:?}").to_lowercase(),
            CommandAction::Workflow { name, steps } => {
                format!("workflow {name} ({} steps)", steps.len())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow definition
// ---------------------------------------------------------------------------

/// A named, ordered sequence of commands sharing one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<Command>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub initial_context: ContextMap,
}

impl WorkflowDefinition {
    /// Create a definition with a fresh time-ordered id.
    pub fn new(name: impl Into<String>, steps: Vec<Command>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            steps,
            initial_context: ContextMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.initial_context.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_wire_format_is_flat_and_camel_case() {
        let cmd = Command::new(CommandAction::WaitForElement {
            selector: "#results".into(),
        })
        .with_id("c1")
        .with_timeout_ms(2000)
        .with_skip_on_failure(true);

        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            v,
            json!({
                "id": "c1",
                "type": "waitForElement",
                "selector": "#results",
                "timeoutMs": 2000,
                "skipOnFailure": true
            })
        );
    }

    #[test]
    fn command_without_id_gets_one() {
        let cmd: Command =
            serde_json::from_value(json!({"type": "navigate", "url": "https://example.com"}))
                .unwrap();
        assert!(!cmd.id.is_empty());
        assert_eq!(cmd.tab, TabTarget::Active);
        assert_eq!(cmd.kind(), "navigate");
    }

    #[test]
    fn unit_and_nested_variants_parse() {
        let close: Command = serde_json::from_value(json!({"type": "closeTab"})).unwrap();
        assert_eq!(close.action, CommandAction::CloseTab);

        let switch: Command =
            serde_json::from_value(json!({"type": "switchTab", "to": {"index": 2}})).unwrap();
        assert_eq!(switch.action, CommandAction::SwitchTab { to: TabTarget::Index(2) });

        let wf: Command = serde_json::from_value(json!({
            "type": "workflow",
            "name": "login",
            "steps": [{"type": "click", "selector": "#login"}]
        }))
        .unwrap();
        assert_eq!(wf.action.parameter_count(), 2);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_value::<Command>(json!({"type": "teleport"}));
        assert!(err.is_err());
    }

    #[test]
    fn precondition_tree_evaluates() {
        let mut ctx = ContextMap::new();
        ctx.insert("user".into(), json!("alice"));
        let succeeded = |step: u32| step == 1;

        let cond = Precondition::All {
            conditions: vec![
                Precondition::ContextEquals {
                    key: "user".into(),
                    value: json!("alice"),
                },
                Precondition::StepSucceeded { step: 1 },
                Precondition::Not {
                    condition: Box::new(Precondition::ContextPresent {
                        key: "error".into(),
                    }),
                },
            ],
        };
        assert!(cond.evaluate(&ctx, &succeeded));

        let any = Precondition::Any {
            conditions: vec![Precondition::Never, Precondition::StepSucceeded { step: 2 }],
        };
        assert!(!any.evaluate(&ctx, &succeeded));
    }

    #[test]
    fn precondition_round_trips_as_json() {
        let cond = Precondition::Not {
            condition: Box::new(Precondition::StepSucceeded { step: 3 }),
        };
        let v = serde_json::to_value(&cond).unwrap();
        assert_eq!(v, json!({"type": "not", "condition": {"type": "stepSucceeded", "step": 3}}));
        let back: Precondition = serde_json::from_value(v).unwrap();
        assert_eq!(back, cond);
    }

    #[test]
    fn workflow_definition_defaults() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "name": "checkout",
            "steps": [{"type": "screenshot"}]
        }))
        .unwrap();
        assert!(def.initial_context.is_empty());
        assert_eq!(def.steps[0].action, CommandAction::Screenshot { full_page: false });
    }
}
