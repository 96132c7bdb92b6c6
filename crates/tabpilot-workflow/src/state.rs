//! Per-workflow state tracking.
//!
//! The [`StateTracker`] owns, for every live workflow, its [`WorkflowState`],
//! the shared context map, the append-only step history and a bounded FIFO of
//! [`StateSnapshot`]s.  Entries live in a [`DashMap`] keyed by workflow id so
//! distinct workflows never contend.
//!
//! When a [`KvStore`] is attached every mutation is written through under
//!
//! ```text
//! workflow:<id>:state
//! workflow:<id>:context
//! workflow:<id>:history
//! workflow:<id>:snapshots
//! ```
//!
//! Persistence failures are logged and never fail the in-memory operation.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabpilot_intent::{Command, ContextMap};
use tabpilot_store::KvStore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::surface::{ExecutionErrorInfo, ExecutionResponse};

/// Current export blob format.
pub const EXPORT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Queued,
    Running,
    /// Blocked between steps by `pause_on_step`.  The workflow keeps its
    /// execution slot and stays in the active set; resuming returns it to
    /// `Running` and cancelling it ends the run before the next step.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Failed, then made good by error recovery.
    Recovered,
    Failed,
    /// Not executed because its precondition did not hold.
    Skipped,
}

/// The recorded result of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionErrorInfo>,
    /// Surface calls made for this step (0 when skipped).
    pub attempts: u32,
}

impl StepResult {
    pub fn succeeded(output: Option<Value>, attempts: u32) -> Self {
        Self {
            status: StepStatus::Succeeded,
            output,
            error: None,
            attempts,
        }
    }

    pub fn recovered(output: Option<Value>, attempts: u32) -> Self {
        Self {
            status: StepStatus::Recovered,
            output,
            error: None,
            attempts,
        }
    }

    pub fn failed(error: ExecutionErrorInfo, attempts: u32) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            attempts,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: StepStatus::Skipped,
            output: None,
            error: None,
            attempts: 0,
        }
    }

    /// Whether the step produced a usable outcome.
    pub fn is_success(&self) -> bool {
        matches!(self.status, StepStatus::Succeeded | StepStatus::Recovered)
    }
}

/// Point-in-time view of a workflow.
///
/// `current_step` never exceeds `total_steps`; a terminal `status` always
/// comes with `ended_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub id: Uuid,
    pub name: String,
    /// 1-based index of the step in progress; 0 before the first step.
    pub current_step: u32,
    pub total_steps: u32,
    pub status: WorkflowStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: ContextMap,
    /// Step results in step order.
    pub results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowState {
    fn new(id: Uuid, name: String, context: ContextMap) -> Self {
        Self {
            id,
            name,
            current_step: 0,
            total_steps: 0,
            status: WorkflowStatus::Running,
            started_at: Some(Utc::now()),
            ended_at: None,
            context,
            results: Vec::new(),
            error: None,
        }
    }

    /// The state a queued workflow reports before it starts.
    pub fn queued(id: Uuid, name: impl Into<String>, total_steps: u32) -> Self {
        Self {
            id,
            name: name.into(),
            current_step: 0,
            total_steps,
            status: WorkflowStatus::Queued,
            started_at: None,
            ended_at: None,
            context: ContextMap::new(),
            results: Vec::new(),
            error: None,
        }
    }

    /// Recover the final workflow state attached to a workflow response.
    pub fn from_response(response: &ExecutionResponse) -> Option<Self> {
        let value = response.result.as_ref().or_else(|| {
            response
                .error
                .as_ref()
                .and_then(|e| e.details.as_ref())
                .and_then(|d| d.get("state"))
        })?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// One entry of the append-only step history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepContext {
    /// 1-based ordinal in execution order.
    pub step: u32,
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Immutable copy of a workflow's state and context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub taken_at: DateTime<Utc>,
    pub state: WorkflowState,
    pub context: ContextMap,
}

/// A partial update merged by [`StateTracker::update_state`].
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub status: Option<WorkflowStatus>,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StateUpdate {
    pub fn status(status: WorkflowStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn step(current_step: u32) -> Self {
        Self {
            current_step: Some(current_step),
            ..Default::default()
        }
    }

    pub fn total(total_steps: u32) -> Self {
        Self {
            total_steps: Some(total_steps),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(WorkflowStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Everything known about one workflow, as exported and imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub state: WorkflowState,
    pub context: ContextMap,
    pub history: Vec<StepContext>,
    pub snapshots: Vec<StateSnapshot>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

struct TrackedWorkflow {
    state: WorkflowState,
    context: ContextMap,
    history: Vec<StepContext>,
    snapshots: VecDeque<StateSnapshot>,
}

impl TrackedWorkflow {
    fn take_snapshot(&mut self, max: usize) {
        self.snapshots.push_back(StateSnapshot {
            taken_at: Utc::now(),
            state: self.state.clone(),
            context: self.context.clone(),
        });
        while self.snapshots.len() > max {
            self.snapshots.pop_front();
        }
    }

    fn recompute_results(&mut self) {
        self.state.results = self
            .history
            .iter()
            .filter_map(|s| s.result.clone())
            .collect();
    }

    fn to_export(&self) -> WorkflowExport {
        WorkflowExport {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            state: self.state.clone(),
            context: self.context.clone(),
            history: self.history.clone(),
            snapshots: self.snapshots.iter().cloned().collect(),
        }
    }
}

/// Tracks state, context, history and snapshots for every live workflow.
pub struct StateTracker {
    workflows: DashMap<Uuid, TrackedWorkflow>,
    store: Option<Arc<dyn KvStore>>,
    max_snapshots: usize,
}

impl StateTracker {
    /// Create an in-memory tracker keeping at most `max_snapshots` per workflow.
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            workflows: DashMap::new(),
            store: None,
            max_snapshots: max_snapshots.max(1),
        }
    }

    /// Write every mutation through to `store`.
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// Ids of every workflow currently tracked in memory.
    pub fn tracked(&self) -> Vec<Uuid> {
        self.workflows.iter().map(|e| *e.key()).collect()
    }

    // -- CRUD ---------------------------------------------------------------

    /// Start tracking `id` as running at step 0 of 0, with a first snapshot.
    pub async fn initialize(
        &self,
        id: Uuid,
        name: impl Into<String>,
        initial_context: ContextMap,
    ) -> WorkflowState {
        let mut tracked = TrackedWorkflow {
            state: WorkflowState::new(id, name.into(), initial_context.clone()),
            context: initial_context,
            history: Vec::new(),
            snapshots: VecDeque::new(),
        };
        tracked.take_snapshot(self.max_snapshots);
        let state = tracked.state.clone();
        self.workflows.insert(id, tracked);

        debug!(workflow_id = %id, "workflow state initialized");
        self.persist(id).await;
        state
    }

    /// Merge `update` into the state, snapshotting when the status or the
    /// current step changes.
    pub async fn update_state(&self, id: Uuid, update: StateUpdate) -> Result<WorkflowState> {
        let state = {
            let mut entry = self.entry_mut(id)?;
            let tracked = entry.value_mut();
            let current = tracked.state.status;
            if current.is_terminal() && update.status.is_some_and(|s| s != current) {
                return Err(WorkflowError::InvalidState {
                    id,
                    status: current,
                    action: "change status",
                });
            }
            let mut next = tracked.state.clone();

            if let Some(total) = update.total_steps {
                next.total_steps = total;
            }
            if let Some(step) = update.current_step {
                next.current_step = step;
            }
            if next.current_step > next.total_steps {
                return Err(WorkflowError::InvalidUpdate {
                    id,
                    reason: format!(
                        "current step {} exceeds total {}",
                        next.current_step, next.total_steps
                    ),
                });
            }
            if let Some(started) = update.started_at {
                next.started_at = Some(started);
            }
            if let Some(ended) = update.ended_at {
                next.ended_at = Some(ended);
            }
            if let Some(error) = update.error {
                next.error = Some(error);
            }
            if let Some(status) = update.status {
                next.status = status;
                if status.is_terminal() && next.ended_at.is_none() {
                    next.ended_at = Some(Utc::now());
                }
            }

            let changed = next.status != tracked.state.status
                || next.current_step != tracked.state.current_step;
            tracked.state = next;
            if changed {
                tracked.take_snapshot(self.max_snapshots);
            }
            tracked.state.clone()
        };

        self.persist(id).await;
        Ok(state)
    }

    /// Append `command` to the history as step `step`.
    ///
    /// Recording the same step number again replaces that entry.
    pub async fn record_step(&self, id: Uuid, step: u32, command: &Command) -> Result<()> {
        {
            let mut entry = self.entry_mut(id)?;
            let tracked = entry.value_mut();
            let record = StepContext {
                step,
                command: command.clone(),
                result: None,
                started_at: Utc::now(),
                duration_ms: None,
            };
            match tracked.history.iter_mut().find(|s| s.step == step) {
                Some(existing) => *existing = record,
                None => tracked.history.push(record),
            }
            tracked.recompute_results();
        }
        self.persist(id).await;
        Ok(())
    }

    /// Attach `result` to step `step` and recompute the state's results.
    pub async fn record_step_result(
        &self,
        id: Uuid,
        step: u32,
        result: StepResult,
        duration_ms: u64,
    ) -> Result<()> {
        {
            let mut entry = self.entry_mut(id)?;
            let tracked = entry.value_mut();
            let record = tracked
                .history
                .iter_mut()
                .find(|s| s.step == step)
                .ok_or_else(|| WorkflowError::InvalidUpdate {
                    id,
                    reason: format!("step {step} was never recorded"),
                })?;
            record.result = Some(result);
            record.duration_ms = Some(duration_ms);
            tracked.recompute_results();
        }
        self.persist(id).await;
        Ok(())
    }

    /// Set `key` in the workflow context.
    pub async fn set_context(&self, id: Uuid, key: impl Into<String>, value: Value) -> Result<()> {
        {
            let mut entry = self.entry_mut(id)?;
            let tracked = entry.value_mut();
            tracked.context.insert(key.into(), value);
            tracked.state.context = tracked.context.clone();
        }
        self.persist(id).await;
        Ok(())
    }

    pub fn get_state(&self, id: Uuid) -> Option<WorkflowState> {
        self.workflows.get(&id).map(|t| t.state.clone())
    }

    pub fn get_context(&self, id: Uuid) -> Option<ContextMap> {
        self.workflows.get(&id).map(|t| t.context.clone())
    }

    pub fn history(&self, id: Uuid) -> Option<Vec<StepContext>> {
        self.workflows.get(&id).map(|t| t.history.clone())
    }

    pub fn snapshots(&self, id: Uuid) -> Option<Vec<StateSnapshot>> {
        self.workflows
            .get(&id)
            .map(|t| t.snapshots.iter().cloned().collect())
    }

    /// Whether step `step` has a successful result.
    pub fn step_succeeded(&self, id: Uuid, step: u32) -> bool {
        self.workflows.get(&id).is_some_and(|t| {
            t.history
                .iter()
                .any(|s| s.step == step && s.result.as_ref().is_some_and(StepResult::is_success))
        })
    }

    // -- Snapshots ----------------------------------------------------------

    /// Copy the current state and context into the snapshot history.
    ///
    /// Returns the number of retained snapshots.
    pub async fn snapshot(&self, id: Uuid) -> Result<usize> {
        let count = {
            let mut entry = self.entry_mut(id)?;
            entry.value_mut().take_snapshot(self.max_snapshots);
            entry.snapshots.len()
        };
        self.persist(id).await;
        Ok(count)
    }

    /// Replace the live state and context with a snapshot.
    ///
    /// `index` counts from the oldest retained snapshot; `None` selects the
    /// most recent.  Returns `false` when no snapshot exists.
    pub async fn restore(&self, id: Uuid, index: Option<usize>) -> Result<bool> {
        {
            let mut entry = self.entry_mut(id)?;
            let tracked = entry.value_mut();
            if tracked.snapshots.is_empty() {
                return Ok(false);
            }
            let index = index.unwrap_or(tracked.snapshots.len() - 1);
            let snapshot = tracked
                .snapshots
                .get(index)
                .cloned()
                .ok_or(WorkflowError::SnapshotOutOfRange { id, index })?;
            tracked.state = snapshot.state;
            tracked.context = snapshot.context;
            tracked.state.context = tracked.context.clone();
        }

        debug!(workflow_id = %id, "workflow state restored from snapshot");
        self.persist(id).await;
        Ok(true)
    }

    // -- Export / import ----------------------------------------------------

    /// Serialize everything known about `id`.
    pub fn export(&self, id: Uuid) -> Result<WorkflowExport> {
        self.workflows
            .get(&id)
            .map(|t| t.to_export())
            .ok_or(WorkflowError::NotFound { id })
    }

    /// Track an exported workflow under a fresh id.
    pub async fn import(&self, export: WorkflowExport) -> Result<Uuid> {
        if export.version != EXPORT_VERSION {
            return Err(WorkflowError::UnsupportedExportVersion {
                found: export.version,
                expected: EXPORT_VERSION,
            });
        }

        let id = Uuid::now_v7();
        let mut state = export.state;
        state.id = id;
        let snapshots = export
            .snapshots
            .into_iter()
            .map(|mut s| {
                s.state.id = id;
                s
            })
            .collect();

        self.workflows.insert(
            id,
            TrackedWorkflow {
                state,
                context: export.context,
                history: export.history,
                snapshots,
            },
        );

        debug!(workflow_id = %id, "workflow imported");
        self.persist(id).await;
        Ok(id)
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Finalize `id`, drop it from memory and clear its durable keys.
    pub async fn cleanup(&self, id: Uuid) -> Result<WorkflowState> {
        let state = self.finalize(id)?;
        if let Some(store) = &self.store {
            for key in durable_keys(id) {
                if let Err(e) = store.delete(&key).await {
                    warn!(workflow_id = %id, key = %key, error = %e, "failed to clear workflow key");
                }
            }
        }
        Ok(state)
    }

    /// Finalize `id` and drop it from memory, keeping its durable keys.
    pub async fn evict(&self, id: Uuid) -> Result<WorkflowState> {
        let finalized = {
            let mut entry = self.entry_mut(id)?;
            finalize_tracked(entry.value_mut(), self.max_snapshots);
            entry.to_export()
        };
        self.write(id, &finalized).await;
        self.workflows.remove(&id);
        Ok(finalized.state)
    }

    /// Rehydrate `id` from durable storage into memory.
    ///
    /// Returns `Ok(None)` when no store is attached or nothing is stored.
    pub async fn load(&self, id: Uuid) -> Result<Option<WorkflowExport>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let [state_key, context_key, history_key, snapshots_key] = durable_keys(id);

        let Some(state) = store.get(&state_key).await? else {
            return Ok(None);
        };
        let state: WorkflowState = serde_json::from_value(state)?;
        let context: ContextMap = match store.get(&context_key).await? {
            Some(v) => serde_json::from_value(v)?,
            None => state.context.clone(),
        };
        let history: Vec<StepContext> = match store.get(&history_key).await? {
            Some(v) => serde_json::from_value(v)?,
            None => Vec::new(),
        };
        let snapshots: Vec<StateSnapshot> = match store.get(&snapshots_key).await? {
            Some(v) => serde_json::from_value(v)?,
            None => Vec::new(),
        };

        let tracked = TrackedWorkflow {
            state,
            context,
            history,
            snapshots: snapshots.into(),
        };
        let export = tracked.to_export();
        self.workflows.insert(id, tracked);

        debug!(workflow_id = %id, "workflow loaded from store");
        Ok(Some(export))
    }

    // -- Private helpers ----------------------------------------------------

    fn entry_mut(
        &self,
        id: Uuid,
    ) -> Result<dashmap::mapref::one::RefMut<'_, Uuid, TrackedWorkflow>> {
        self.workflows
            .get_mut(&id)
            .ok_or(WorkflowError::NotFound { id })
    }

    fn finalize(&self, id: Uuid) -> Result<WorkflowState> {
        let (_, mut tracked) = self
            .workflows
            .remove(&id)
            .ok_or(WorkflowError::NotFound { id })?;
        finalize_tracked(&mut tracked, self.max_snapshots);
        debug!(workflow_id = %id, status = %tracked.state.status, "workflow cleaned up");
        Ok(tracked.state)
    }

    /// Write the current durable form of `id`, if tracked and a store is set.
    async fn persist(&self, id: Uuid) {
        if self.store.is_none() {
            return;
        }
        // Clone under the shard guard; never hold it across an await.
        let Some(export) = self.workflows.get(&id).map(|t| t.to_export()) else {
            return;
        };
        self.write(id, &export).await;
    }

    async fn write(&self, id: Uuid, export: &WorkflowExport) {
        let Some(store) = &self.store else {
            return;
        };
        let [state_key, context_key, history_key, snapshots_key] = durable_keys(id);
        let parts = [
            (state_key, serde_json::to_value(&export.state)),
            (context_key, serde_json::to_value(&export.context)),
            (history_key, serde_json::to_value(&export.history)),
            (snapshots_key, serde_json::to_value(&export.snapshots)),
        ];
        for (key, value) in parts {
            let result = match value {
                Ok(v) => store.set(&key, v).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(error) = result {
                warn!(workflow_id = %id, key = %key, error = %error, "failed to persist workflow state");
            }
        }
    }
}

fn finalize_tracked(tracked: &mut TrackedWorkflow, max_snapshots: usize) {
    if matches!(
        tracked.state.status,
        WorkflowStatus::Running | WorkflowStatus::Paused
    ) {
        tracked.state.status = WorkflowStatus::Completed;
        tracked.state.ended_at.get_or_insert_with(Utc::now);
    }
    tracked.take_snapshot(max_snapshots);
}

/// The durable keys of one workflow: state, context, history, snapshots.
pub fn durable_keys(id: Uuid) -> [String; 4] {
    ["state", "context", "history", "snapshots"].map(|part| format!("workflow:{id}:{part}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabpilot_intent::CommandAction;
    use tabpilot_store::MemoryKvStore;

    fn click(selector: &str) -> Command {
        Command::new(CommandAction::Click {
            selector: selector.into(),
        })
    }

    async fn tracker_with_workflow(max_snapshots: usize) -> (StateTracker, Uuid) {
        let tracker = StateTracker::new(max_snapshots);
        let id = Uuid::now_v7();
        tracker.initialize(id, "test", ContextMap::new()).await;
        (tracker, id)
    }

    #[tokio::test]
    async fn initialize_starts_running_with_one_snapshot() {
        let (tracker, id) = tracker_with_workflow(10).await;
        let state = tracker.get_state(id).unwrap();
        assert_eq!(state.status, WorkflowStatus::Running);
        assert_eq!((state.current_step, state.total_steps), (0, 0));
        assert_eq!(tracker.snapshots(id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_snapshots_only_on_status_or_step_change() {
        let (tracker, id) = tracker_with_workflow(10).await;
        tracker.update_state(id, StateUpdate::total(3)).await.unwrap();
        assert_eq!(tracker.snapshots(id).unwrap().len(), 1);

        tracker.update_state(id, StateUpdate::step(1)).await.unwrap();
        assert_eq!(tracker.snapshots(id).unwrap().len(), 2);

        tracker
            .update_state(id, StateUpdate::status(WorkflowStatus::Paused))
            .await
            .unwrap();
        assert_eq!(tracker.snapshots(id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn step_cannot_exceed_total() {
        let (tracker, id) = tracker_with_workflow(10).await;
        tracker.update_state(id, StateUpdate::total(1)).await.unwrap();
        let err = tracker.update_state(id, StateUpdate::step(2)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidUpdate { .. }));
        assert_eq!(tracker.get_state(id).unwrap().current_step, 0);
    }

    #[tokio::test]
    async fn terminal_status_sets_end_time() {
        let (tracker, id) = tracker_with_workflow(10).await;
        let state = tracker
            .update_state(id, StateUpdate::failed("boom"))
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.ended_at.is_some());
        assert_eq!(state.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let (tracker, id) = tracker_with_workflow(10).await;
        tracker
            .update_state(id, StateUpdate::status(WorkflowStatus::Completed))
            .await
            .unwrap();

        let err = tracker
            .update_state(id, StateUpdate::status(WorkflowStatus::Cancelled))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidState {
                status: WorkflowStatus::Completed,
                ..
            }
        ));
        assert_eq!(tracker.get_state(id).unwrap().status, WorkflowStatus::Completed);

        // Re-applying the same terminal status is a no-op.
        let state = tracker
            .update_state(id, StateUpdate::status(WorkflowStatus::Completed))
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn results_follow_history_order() {
        let (tracker, id) = tracker_with_workflow(10).await;
        tracker.update_state(id, StateUpdate::total(2)).await.unwrap();
        tracker.record_step(id, 1, &click("#a")).await.unwrap();
        tracker.record_step(id, 2, &click("#b")).await.unwrap();
        tracker
            .record_step_result(id, 2, StepResult::skipped(), 0)
            .await
            .unwrap();
        tracker
            .record_step_result(id, 1, StepResult::succeeded(Some(json!(1)), 1), 5)
            .await
            .unwrap();

        let state = tracker.get_state(id).unwrap();
        assert_eq!(state.results.len(), 2);
        assert_eq!(state.results[0].status, StepStatus::Succeeded);
        assert_eq!(state.results[1].status, StepStatus::Skipped);
        assert!(tracker.step_succeeded(id, 1));
        assert!(!tracker.step_succeeded(id, 2));
    }

    #[tokio::test]
    async fn result_for_unknown_step_is_rejected() {
        let (tracker, id) = tracker_with_workflow(10).await;
        let err = tracker
            .record_step_result(id, 4, StepResult::skipped(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidUpdate { .. }));
    }

    #[tokio::test]
    async fn context_is_mirrored_into_state() {
        let (tracker, id) = tracker_with_workflow(10).await;
        tracker.set_context(id, "user", json!("ada")).await.unwrap();
        assert_eq!(tracker.get_context(id).unwrap()["user"], json!("ada"));
        assert_eq!(tracker.get_state(id).unwrap().context["user"], json!("ada"));
    }

    #[tokio::test]
    async fn snapshots_are_bounded_fifo() {
        let (tracker, id) = tracker_with_workflow(3).await;
        for i in 0..5 {
            tracker.set_context(id, "i", json!(i)).await.unwrap();
            tracker.snapshot(id).await.unwrap();
        }
        let snaps = tracker.snapshots(id).unwrap();
        assert_eq!(snaps.len(), 3);
        assert_eq!(snaps[0].context["i"], json!(2));
        assert_eq!(snaps[2].context["i"], json!(4));
    }

    #[tokio::test]
    async fn restore_defaults_to_latest() {
        let (tracker, id) = tracker_with_workflow(10).await;
        tracker.set_context(id, "k", json!("saved")).await.unwrap();
        tracker.snapshot(id).await.unwrap();
        tracker.set_context(id, "k", json!("changed")).await.unwrap();

        assert!(tracker.restore(id, None).await.unwrap());
        assert_eq!(tracker.get_context(id).unwrap()["k"], json!("saved"));

        assert!(tracker.restore(id, Some(0)).await.unwrap());
        assert!(tracker.get_context(id).unwrap().get("k").is_none());

        let err = tracker.restore(id, Some(99)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::SnapshotOutOfRange { index: 99, .. }));
    }

    #[tokio::test]
    async fn restore_without_snapshots_returns_false() {
        let tracker = StateTracker::new(10);
        let export = WorkflowExport {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            state: WorkflowState::queued(Uuid::now_v7(), "bare", 0),
            context: ContextMap::new(),
            history: Vec::new(),
            snapshots: Vec::new(),
        };
        let id = tracker.import(export).await.unwrap();
        assert!(!tracker.restore(id, None).await.unwrap());
    }

    #[tokio::test]
    async fn import_rejects_unknown_version() {
        let (tracker, id) = tracker_with_workflow(10).await;
        let mut export = tracker.export(id).unwrap();
        export.version = 7;
        let err = tracker.import(export).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::UnsupportedExportVersion { found: 7, .. }
        ));
    }

    #[tokio::test]
    async fn cleanup_completes_running_workflow_and_forgets_it() {
        let store = Arc::new(MemoryKvStore::new());
        let tracker = StateTracker::new(10).with_store(store.clone());
        let id = Uuid::now_v7();
        tracker.initialize(id, "t", ContextMap::new()).await;
        assert_eq!(store.list(&format!("workflow:{id}:")).await.unwrap().len(), 4);

        let state = tracker.cleanup(id).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert!(state.ended_at.is_some());
        assert!(tracker.get_state(id).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn evict_keeps_durable_copy_for_load() {
        let store = Arc::new(MemoryKvStore::new());
        let tracker = StateTracker::new(10).with_store(store.clone());
        let id = Uuid::now_v7();
        tracker.initialize(id, "kept", ContextMap::new()).await;
        tracker.set_context(id, "x", json!(1)).await.unwrap();

        tracker.evict(id).await.unwrap();
        assert!(tracker.get_state(id).is_none());

        let loaded = tracker.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.state.status, WorkflowStatus::Completed);
        assert_eq!(loaded.context["x"], json!(1));
        assert!(tracker.get_state(id).is_some());
    }

    #[tokio::test]
    async fn load_without_store_is_none() {
        let tracker = StateTracker::new(10);
        assert!(tracker.load(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let tracker = StateTracker::new(10);
        let err = tracker.snapshot(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }
}
