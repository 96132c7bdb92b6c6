//! Progress bus.
//!
//! The progress bus is a lightweight publish/subscribe channel built on top
//! of [`tokio::sync::broadcast`].  The workflow engine publishes one typed
//! [`ProgressEvent`] per lifecycle transition; UI and automation layers
//! subscribe and consume them at their own pace.
//!
//! Publishing is fire-and-forget: the publisher never waits on a subscriber,
//! and a bus with no subscribers silently drops events.  Events are wrapped in
//! [`Arc`] so that broadcasting to multiple subscribers does not clone the
//! payload.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use tabpilot_kernel::ipc::{ProgressBus, ProgressEvent};
//! # async fn example() {
//! let bus = ProgressBus::new(256);
//! let mut sub = bus.subscribe();
//!
//! bus.publish(ProgressEvent::WorkflowCancelled {
//!     workflow_id: uuid::Uuid::now_v7(),
//!     timestamp: chrono::Utc::now(),
//! });
//!
//! let event = sub.recv().await.unwrap();
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use uuid::Uuid;

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A discrete progress notification emitted by the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A workflow was accepted but is waiting for a free execution slot.
    WorkflowQueued {
        workflow_id: Uuid,
        name: String,
        /// 1-based position in the submission queue.
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// A workflow started executing.
    WorkflowStarted {
        workflow_id: Uuid,
        name: String,
        total_steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// A step is about to be sent to the execution surface.
    StepStarted {
        workflow_id: Uuid,
        step: u32,
        command_id: String,
        command_type: String,
        timestamp: DateTime<Utc>,
    },

    /// A step finished successfully.
    StepCompleted {
        workflow_id: Uuid,
        step: u32,
        command_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A step was not executed because its precondition did not hold.
    StepSkipped {
        workflow_id: Uuid,
        step: u32,
        command_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A step failed (it may still be recovered or tolerated).
    StepFailed {
        workflow_id: Uuid,
        step: u32,
        command_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A workflow is blocked waiting for an external resume signal.
    WorkflowPaused {
        workflow_id: Uuid,
        step: u32,
        timestamp: DateTime<Utc>,
    },

    /// A paused workflow was released.
    WorkflowResumed {
        workflow_id: Uuid,
        step: u32,
        timestamp: DateTime<Utc>,
    },

    /// A workflow completed all of its steps.
    WorkflowCompleted {
        workflow_id: Uuid,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A workflow terminated with an unrecovered failure.
    WorkflowFailed {
        workflow_id: Uuid,
        step: Option<u32>,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A workflow was cancelled by a caller.
    WorkflowCancelled {
        workflow_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A standalone command (outside any workflow) was executed.
    CommandExecuted {
        command_id: String,
        command_type: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    /// The workflow this event belongs to, if any.
    pub fn workflow_id(&self) -> Option<Uuid> {
        match self {
            Self::WorkflowQueued { workflow_id, .. }
            | Self::WorkflowStarted { workflow_id, .. }
            | Self::StepStarted { workflow_id, .. }
            | Self::StepCompleted { workflow_id, .. }
            | Self::StepSkipped { workflow_id, .. }
            | Self::StepFailed { workflow_id, .. }
            | Self::WorkflowPaused { workflow_id, .. }
            | Self::WorkflowResumed { workflow_id, .. }
            | Self::WorkflowCompleted { workflow_id, .. }
            | Self::WorkflowFailed { workflow_id, .. }
            | Self::WorkflowCancelled { workflow_id, .. } => Some(*workflow_id),
            Self::CommandExecuted { .. } => None,
        }
    }

    /// Short machine-readable event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkflowQueued { .. } => "workflow_queued",
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepSkipped { .. } => "step_skipped",
            Self::StepFailed { .. } => "step_failed",
            Self::WorkflowPaused { .. } => "workflow_paused",
            Self::WorkflowResumed { .. } => "workflow_resumed",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::WorkflowCancelled { .. } => "workflow_cancelled",
            Self::CommandExecuted { .. } => "command_executed",
        }
    }

    /// Whether this event marks the end of a workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. } | Self::WorkflowCancelled { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Progress bus
// ---------------------------------------------------------------------------

/// Publish/subscribe progress bus backed by [`tokio::sync::broadcast`].
///
/// The bus is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<ProgressBusInner>,
}

struct ProgressBusInner {
    sender: broadcast::Sender<Arc<ProgressEvent>>,
    next_subscription: AtomicU64,
}

impl ProgressBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// A subscriber that falls behind by more than `capacity` events skips the
    /// oldest ones (see [`Subscription::recv`]).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(ProgressBusInner {
                sender,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers that will observe it.  Publishing
    /// never blocks and never fails; with no subscribers the event is dropped.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let kind = event.kind();
        match self.inner.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(event = kind, receivers = n, "progress event published");
                n
            }
            Err(_) => {
                tracing::trace!(event = kind, "progress event dropped, no subscribers");
                0
            }
        }
    }

    /// Create a new subscription that receives all future events.
    ///
    /// Events published *before* this call are **not** replayed.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(subscription = id, "progress subscription created");
        Subscription {
            id,
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Return the current number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// An explicit subscriber to the [`ProgressBus`].
///
/// Dropping the subscription (or calling [`Subscription::cancel`]) detaches
/// it from the bus.
pub struct Subscription {
    id: u64,
    receiver: broadcast::Receiver<Arc<ProgressEvent>>,
}

impl Subscription {
    /// Identifier of this subscription, unique per bus.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Lagged events are skipped with a warning.  Returns
    /// [`KernelError::BusClosed`] once every bus handle has been dropped.
    pub async fn recv(&mut self) -> Result<Arc<ProgressEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(subscription = self.id, missed, "progress subscriber lagged");
                }
                Err(RecvError::Closed) => return Err(KernelError::BusClosed),
            }
        }
    }

    /// Return the next already-published event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<ProgressEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(subscription = self.id, missed, "progress subscriber lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Detach from the bus.
    pub fn cancel(self) {
        tracing::trace!(subscription = self.id, "progress subscription cancelled");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
