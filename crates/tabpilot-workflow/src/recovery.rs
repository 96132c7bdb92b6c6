//! Error recovery hooks.
//!
//! When a step fails and neither the run nor the step tolerates the failure,
//! the executor asks an [`ErrorRecovery`] policy whether the step can be made
//! good.  A declined recovery terminates the workflow.
//!
//! Recovery never renumbers steps: retries reuse the failing step's ordinal
//! and the executor records exactly one result for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tabpilot_intent::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ExecutionOptions, RetryConfig};
use crate::surface::{ExecutionErrorInfo, ExecutionResponse, ExecutionSurface, codes};

/// What the executor knows about a failed step.
#[derive(Debug)]
pub struct RecoveryRequest<'a> {
    pub workflow_id: Uuid,
    pub step: u32,
    pub command: &'a Command,
    pub error: &'a ExecutionErrorInfo,
    pub options: &'a ExecutionOptions,
    /// Timeout that applied to the failed attempt.
    pub step_timeout: Duration,
}

/// The verdict of a recovery policy.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// The step now counts as done with `output`.
    Recovered { output: Option<Value>, attempts: u32 },
    /// The policy gave up; `error` is the most recent failure.
    Declined {
        error: ExecutionErrorInfo,
        attempts: u32,
    },
}

impl RecoveryOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

/// A policy for making failed steps good.
#[async_trait]
pub trait ErrorRecovery: Send + Sync {
    async fn attempt_recovery(&self, request: &RecoveryRequest<'_>) -> RecoveryOutcome;
}

// ---------------------------------------------------------------------------
// NoRecovery
// ---------------------------------------------------------------------------

/// Declines every recovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecovery;

#[async_trait]
impl ErrorRecovery for NoRecovery {
    async fn attempt_recovery(&self, request: &RecoveryRequest<'_>) -> RecoveryOutcome {
        RecoveryOutcome::Declined {
            error: request.error.clone(),
            attempts: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryRecovery
// ---------------------------------------------------------------------------

/// Re-executes the failing step with exponential backoff.
///
/// Each retry is raced against the step timeout; timeouts are retried like
/// any other failure.  When every retry fails, a fallback result registered
/// for the command type is substituted if one exists.
pub struct RetryRecovery {
    surface: Arc<dyn ExecutionSurface>,
    config: RetryConfig,
    fallbacks: HashMap<String, Value>,
}

impl RetryRecovery {
    pub fn new(surface: Arc<dyn ExecutionSurface>, config: RetryConfig) -> Self {
        Self {
            surface,
            config,
            fallbacks: HashMap::new(),
        }
    }

    /// Substitute `result` when a `command_type` step exhausts its retries.
    pub fn with_fallback(mut self, command_type: impl Into<String>, result: Value) -> Self {
        self.fallbacks.insert(command_type.into(), result);
        self
    }

    /// The delay before the next retry, capped at `max_delay_ms`.  A factor
    /// that yields no representable duration falls back to the cap.
    fn next_delay(&self, delay: Duration) -> Duration {
        let max = Duration::from_millis(self.config.max_delay_ms);
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.config.backoff_factor)
            .map_or(max, |next| next.min(max))
    }
}

#[async_trait]
impl ErrorRecovery for RetryRecovery {
    async fn attempt_recovery(&self, request: &RecoveryRequest<'_>) -> RecoveryOutcome {
        let max_retries = request.options.max_retries.unwrap_or(self.config.max_retries);
        let mut delay = Duration::from_millis(
            request
                .options
                .retry_delay_ms
                .unwrap_or(self.config.initial_delay_ms),
        );
        let mut last_error = request.error.clone();
        let command = request.command;

        for retry in 1..=max_retries {
            debug!(
                workflow_id = %request.workflow_id,
                step = request.step,
                retry,
                max_retries,
                delay = ?delay,
                "retrying step"
            );
            tokio::time::sleep(delay).await;
            delay = self.next_delay(delay);

            let response = run_with_timeout(self.surface.as_ref(), command, request.step_timeout).await;
            if response.success {
                info!(
                    workflow_id = %request.workflow_id,
                    step = request.step,
                    retry,
                    "step recovered by retry"
                );
                return RecoveryOutcome::Recovered {
                    output: response.result,
                    attempts: retry + 1,
                };
            }

            last_error = response.error_info();
            warn!(
                workflow_id = %request.workflow_id,
                step = request.step,
                retry,
                error = %last_error,
                "retry failed"
            );
        }

        if let Some(fallback) = self.fallbacks.get(command.kind()) {
            info!(
                workflow_id = %request.workflow_id,
                step = request.step,
                command_type = command.kind(),
                "substituting fallback result"
            );
            return RecoveryOutcome::Recovered {
                output: Some(fallback.clone()),
                attempts: max_retries + 1,
            };
        }

        RecoveryOutcome::Declined {
            error: last_error,
            attempts: max_retries + 1,
        }
    }
}

/// Execute `command` on `surface`, failing with a timeout error when
/// `timeout` elapses first.
pub async fn run_with_timeout(
    surface: &dyn ExecutionSurface,
    command: &Command,
    timeout: Duration,
) -> ExecutionResponse {
    match tokio::time::timeout(timeout, surface.execute(command)).await {
        Ok(response) => response,
        Err(_) => ExecutionResponse::failure(
            &command.id,
            ExecutionErrorInfo::new(
                codes::EXECUTION_TIMEOUT,
                format!("{} timed out after {} ms", command.kind(), timeout.as_millis()),
            ),
        ),
    }
}
