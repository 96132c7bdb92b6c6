//! Engine and per-run configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Engine-wide settings, read from the `[engine]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Workflows allowed to execute at once; the rest are queued.
    pub max_concurrent_workflows: usize,
    /// Step timeout used when neither the step nor the run sets one.
    pub default_step_timeout_ms: u64,
    /// Snapshots retained per workflow.
    pub max_snapshots: usize,
    /// Keep durable state of finished workflows instead of clearing it.
    pub retain_finished: bool,
    /// Terminal workflow states remembered in memory for lookups.
    pub finished_capacity: usize,
    /// Progress bus buffer per subscriber.
    pub progress_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 5,
            default_step_timeout_ms: 30_000,
            max_snapshots: 10,
            retain_finished: false,
            finished_capacity: 100,
            progress_capacity: 256,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_workflows == 0 {
            return Err(invalid("max_concurrent_workflows must be at least 1"));
        }
        if self.default_step_timeout_ms == 0 {
            return Err(invalid("default_step_timeout_ms must be positive"));
        }
        self.retry.validate()
    }
}

fn invalid(reason: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidConfig {
        reason: reason.into(),
    }
}

/// Retry policy for [`RetryRecovery`](crate::RetryRecovery).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry attempts after the original failure (0 = no retries).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Upper bound on the delay between retries.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// The backoff factor must be a finite number no smaller than 1 and the
    /// delay cap must be positive.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(invalid(format!(
                "retry.backoff_factor must be a finite number >= 1, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay_ms == 0 {
            return Err(invalid("retry.max_delay_ms must be positive"));
        }
        Ok(())
    }
}

/// Options for a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// Record step failures and keep going instead of invoking recovery.
    pub continue_on_error: bool,
    /// Default step timeout for this run; a step's own timeout wins.
    pub step_timeout_ms: Option<u64>,
    /// Wait for an explicit resume after every successful step but the last.
    pub pause_on_step: bool,
    /// Overrides the engine's retry count for this run.
    pub max_retries: Option<u32>,
    /// Overrides the engine's initial retry delay for this run.
    pub retry_delay_ms: Option<u64>,
    /// Publish progress events for this run.
    pub report_progress: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            step_timeout_ms: None,
            pause_on_step: false,
            max_retries: None,
            retry_delay_ms: None,
            report_progress: true,
        }
    }
}

impl ExecutionOptions {
    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn pause_on_step(mut self) -> Self {
        self.pause_on_step = true;
        self
    }

    pub fn with_step_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.step_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay_ms = Some(retry_delay_ms);
        self
    }

    pub fn silent(mut self) -> Self {
        self.report_progress = false;
        self
    }
}
