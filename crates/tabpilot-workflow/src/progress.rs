//! Typed progress reporting on top of the kernel [`ProgressBus`].

use chrono::Utc;
use tabpilot_intent::Command;
use tabpilot_kernel::{ProgressBus, ProgressEvent, Subscription};
use uuid::Uuid;

/// Publishes workflow lifecycle events.  Fire-and-forget.
#[derive(Clone)]
pub struct ProgressReporter {
    bus: ProgressBus,
    enabled: bool,
}

impl ProgressReporter {
    pub fn new(bus: ProgressBus) -> Self {
        Self { bus, enabled: true }
    }

    /// A reporter on the same bus that publishes only when `enabled`.
    pub fn scoped(&self, enabled: bool) -> Self {
        Self {
            bus: self.bus.clone(),
            enabled,
        }
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    fn publish(&self, event: ProgressEvent) {
        if self.enabled {
            let delivered = self.bus.publish(event);
            tracing::trace!(delivered, "progress event published");
        }
    }

    pub fn workflow_queued(&self, workflow_id: Uuid, name: &str, position: usize) {
        self.publish(ProgressEvent::WorkflowQueued {
            workflow_id,
            name: name.to_string(),
            position,
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_started(&self, workflow_id: Uuid, name: &str, total_steps: usize) {
        self.publish(ProgressEvent::WorkflowStarted {
            workflow_id,
            name: name.to_string(),
            total_steps,
            timestamp: Utc::now(),
        });
    }

    pub fn step_started(&self, workflow_id: Uuid, step: u32, command: &Command) {
        self.publish(ProgressEvent::StepStarted {
            workflow_id,
            step,
            command_id: command.id.clone(),
            command_type: command.kind().to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn step_completed(&self, workflow_id: Uuid, step: u32, command: &Command, duration_ms: u64) {
        self.publish(ProgressEvent::StepCompleted {
            workflow_id,
            step,
            command_id: command.id.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn step_skipped(&self, workflow_id: Uuid, step: u32, command: &Command, reason: &str) {
        self.publish(ProgressEvent::StepSkipped {
            workflow_id,
            step,
            command_id: command.id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn step_failed(&self, workflow_id: Uuid, step: u32, command: &Command, error: &str) {
        self.publish(ProgressEvent::StepFailed {
            workflow_id,
            step,
            command_id: command.id.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_paused(&self, workflow_id: Uuid, step: u32) {
        self.publish(ProgressEvent::WorkflowPaused {
            workflow_id,
            step,
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_resumed(&self, workflow_id: Uuid, step: u32) {
        self.publish(ProgressEvent::WorkflowResumed {
            workflow_id,
            step,
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_completed(&self, workflow_id: Uuid, duration_ms: u64) {
        self.publish(ProgressEvent::WorkflowCompleted {
            workflow_id,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_failed(&self, workflow_id: Uuid, step: Option<u32>, error: &str) {
        self.publish(ProgressEvent::WorkflowFailed {
            workflow_id,
            step,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_cancelled(&self, workflow_id: Uuid) {
        self.publish(ProgressEvent::WorkflowCancelled {
            workflow_id,
            timestamp: Utc::now(),
        });
    }

    pub fn command_executed(&self, command: &Command, success: bool) {
        self.publish(ProgressEvent::CommandExecuted {
            command_id: command.id.clone(),
            command_type: command.kind().to_string(),
            success,
            timestamp: Utc::now(),
        });
    }
}
