//! The execution surface: the collaborator that performs one browser action.
//!
//! Concrete DOM and tab primitives live outside this crate.  The engine only
//! sees [`ExecutionSurface::execute`], which must always answer with an
//! [`ExecutionResponse`]; failures are reported in the response, not as a
//! Rust error.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tabpilot_intent::{Command, CommandAction};

/// Error codes carried by [`ExecutionErrorInfo::code`].
pub mod codes {
    pub const EXECUTION_FAILED: &str = "EXECUTION_FAILED";
    pub const EXECUTION_TIMEOUT: &str = "EXECUTION_TIMEOUT";
    pub const RECOVERY_EXHAUSTED: &str = "RECOVERY_EXHAUSTED";
    pub const CANCELLED: &str = "CANCELLED";
}

/// Structured failure detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ExecutionErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.code == codes::EXECUTION_TIMEOUT
    }
}

impl std::fmt::Display for ExecutionErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Outcome of executing one command or one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub command_id: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionErrorInfo>,
}

impl ExecutionResponse {
    pub fn ok(command_id: impl Into<String>, result: Value) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            timestamp: Utc::now(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(command_id: impl Into<String>, error: ExecutionErrorInfo) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            timestamp: Utc::now(),
            result: None,
            error: Some(error),
        }
    }

    /// The error, or a generic one for a failed response without detail.
    pub fn error_info(&self) -> ExecutionErrorInfo {
        self.error.clone().unwrap_or_else(|| {
            ExecutionErrorInfo::new(codes::EXECUTION_FAILED, "execution surface reported failure")
        })
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Performs concrete browser actions.
#[async_trait]
pub trait ExecutionSurface: Send + Sync {
    async fn execute(&self, command: &Command) -> ExecutionResponse;
}

// ---------------------------------------------------------------------------
// Dry-run surface
// ---------------------------------------------------------------------------

/// Logs and acknowledges every command without touching a browser.
#[derive(Debug, Default)]
pub struct DryRunSurface {
    log: Mutex<Vec<String>>,
}

impl DryRunSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summaries of the commands seen so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionSurface for DryRunSurface {
    async fn execute(&self, command: &Command) -> ExecutionResponse {
        tracing::info!(
            command_id = %command.id,
            command_type = command.kind(),
            summary = %command.summary(),
            "dry run"
        );
        if let Ok(mut log) = self.log.lock() {
            log.push(command.summary());
        }

        let payload = match &command.action {
            CommandAction::ExtractText { .. } => json!({"dryRun": true, "text": ""}),
            CommandAction::Screenshot { full_page } => {
                json!({"dryRun": true, "fullPage": full_page})
            }
            _ => json!({"dryRun": true}),
        };
        ExecutionResponse::ok(&command.id, payload)
    }
}
