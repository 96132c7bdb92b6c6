//! Workflow executor.
//!
//! Runs [`WorkflowDefinition`]s step by step against the execution surface:
//!
//! ```text
//! queued  -->  running  -->  completed
//!                |  ^   \->  failed
//!                v  |    \-> cancelled
//!               paused
//! ```
//!
//! - At most `max_concurrent_workflows` workflows execute at once.  The
//!   direct [`WorkflowExecutor::run`] API rejects work beyond the limit;
//!   [`WorkflowExecutor::submit`] queues it FIFO.  The queue is drained
//!   whenever a slot frees, under a single "is draining" flag.
//! - Steps of one workflow run strictly in order, numbered `1..=N`.  A step
//!   whose precondition does not hold still takes its number, with a
//!   skipped result.  Nested `workflow` commands are inlined before the
//!   workflow is accepted, so every inner step is numbered and reported on
//!   its own.
//! - Each surface call is raced against the step timeout (step override,
//!   then run option, then engine default).
//! - Cancellation is cooperative: it flips the status immediately and is
//!   observed between steps.  An in-flight surface call is never interrupted.
//!   A terminal status is final, so a workflow that completed or failed
//!   cannot be cancelled afterwards.
//! - Every run executes on its own task.  Dropping the caller's future does
//!   not stop the run, and a run whose task dies still gives its slot back.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Value, json};
use tabpilot_intent::{Command, CommandAction, Precondition, WorkflowDefinition};
use tokio::sync::{Notify, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, ExecutionOptions};
use crate::error::{Result, WorkflowError};
use crate::progress::ProgressReporter;
use crate::recovery::{ErrorRecovery, RecoveryOutcome, RecoveryRequest, run_with_timeout};
use crate::state::{StateTracker, StateUpdate, StepResult, WorkflowState, WorkflowStatus};
use crate::surface::{ExecutionErrorInfo, ExecutionResponse, ExecutionSurface, codes};

// ---------------------------------------------------------------------------
// Handles and internal bookkeeping
// ---------------------------------------------------------------------------

/// A submitted workflow.  Await [`WorkflowHandle::wait`] for its outcome.
#[derive(Debug)]
pub struct WorkflowHandle {
    id: Uuid,
    queued: bool,
    reply: oneshot::Receiver<ExecutionResponse>,
}

impl WorkflowHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the workflow had to wait for a free slot.
    pub fn was_queued(&self) -> bool {
        self.queued
    }

    /// Wait for the workflow to reach a terminal status.
    pub async fn wait(self) -> Result<ExecutionResponse> {
        self.reply
            .await
            .map_err(|_| WorkflowError::ResultUnavailable { id: self.id })
    }
}

/// Control block shared between a running workflow and its callers.
struct RunControl {
    name: String,
    total_steps: u32,
    report_progress: bool,
    cancelled: AtomicBool,
    paused: AtomicBool,
    resume: Notify,
    slot_held: AtomicBool,
}

struct QueuedWorkflow {
    definition: WorkflowDefinition,
    options: ExecutionOptions,
    reply: oneshot::Sender<ExecutionResponse>,
}

/// Terminal states kept for lookups after cleanup, oldest evicted first.
struct FinishedLog {
    order: VecDeque<Uuid>,
    states: HashMap<Uuid, WorkflowState>,
    capacity: usize,
}

impl FinishedLog {
    fn insert(&mut self, state: WorkflowState) {
        if self.states.insert(state.id, state.clone()).is_none() {
            self.order.push_back(state.id);
        }
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.states.remove(&old);
            }
        }
    }
}

/// The step that ended a workflow.
struct StepFailure {
    step: u32,
    command: Command,
    error: ExecutionErrorInfo,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn note<T>(workflow_id: Uuid, operation: &'static str, result: Result<T>) {
    if let Err(e) = result {
        warn!(workflow_id = %workflow_id, operation, error = %e, "state tracker operation failed");
    }
}

fn step_timeout(command: &Command, options: &ExecutionOptions, config: &EngineConfig) -> Duration {
    Duration::from_millis(
        command
            .timeout_ms
            .or(options.step_timeout_ms)
            .unwrap_or(config.default_step_timeout_ms),
    )
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Step count of an accepted workflow.  [`WorkflowExecutor::validate`]
/// rejects definitions whose count does not fit.
fn step_count(definition: &WorkflowDefinition) -> u32 {
    u32::try_from(definition.steps.len()).unwrap_or(u32::MAX)
}

/// Inline nested `workflow` commands.
fn expand_nested(mut definition: WorkflowDefinition) -> WorkflowDefinition {
    let nested = definition
        .steps
        .iter()
        .any(|c| matches!(c.action, CommandAction::Workflow { .. }));
    if nested {
        definition.steps = flatten_steps(std::mem::take(&mut definition.steps));
    }
    definition
}

/// Replace every nested `workflow` command with its steps, depth first.
///
/// Each inner step inherits the nested command's tab, timeout and
/// `skip_on_failure` unless it sets its own, and runs only when both the
/// nested command's precondition and its own hold.
fn flatten_steps(steps: Vec<Command>) -> Vec<Command> {
    let mut flat = Vec::with_capacity(steps.len());
    for mut command in steps {
        let inner = match &mut command.action {
            CommandAction::Workflow { steps, .. } => std::mem::take(steps),
            _ => {
                flat.push(command);
                continue;
            }
        };
        for mut step in flatten_steps(inner) {
            if step.tab.is_active() {
                step.tab = command.tab.clone();
            }
            step.timeout_ms = step.timeout_ms.or(command.timeout_ms);
            step.skip_on_failure |= command.skip_on_failure;
            step.precondition = match (command.precondition.clone(), step.precondition.take()) {
                (Some(outer), Some(own)) => Some(Precondition::All {
                    conditions: vec![outer, own],
                }),
                (outer, own) => outer.or(own),
            };
            flat.push(step);
        }
    }
    flat
}

/// Settles a run whose task ended before [`WorkflowExecutor::finish`], for
/// example because the surface panicked.
struct RunGuard {
    executor: Arc<WorkflowExecutor>,
    id: Uuid,
    control: Arc<RunControl>,
    armed: bool,
}

impl RunGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(workflow_id = %self.id, "workflow task ended before finishing");
        let executor = Arc::clone(&self.executor);
        let control = Arc::clone(&self.control);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { executor.abandon(id, &control).await });
            }
            Err(_) => {
                executor
                    .active
                    .remove_if(&id, |_, current| Arc::ptr_eq(current, &control));
                executor.release_slot(&control);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Sequences workflow steps with timeouts, recovery, pause and cancel.
///
/// Methods that may start work take `self: &Arc<Self>` because queued
/// workflows are spawned onto the runtime.
pub struct WorkflowExecutor {
    config: EngineConfig,
    surface: Arc<dyn ExecutionSurface>,
    tracker: Arc<StateTracker>,
    recovery: Arc<dyn ErrorRecovery>,
    progress: ProgressReporter,
    active: DashMap<Uuid, Arc<RunControl>>,
    queue: Mutex<VecDeque<QueuedWorkflow>>,
    running: AtomicUsize,
    draining: AtomicBool,
    finished: Mutex<FinishedLog>,
}

impl WorkflowExecutor {
    pub fn new(
        config: EngineConfig,
        surface: Arc<dyn ExecutionSurface>,
        tracker: Arc<StateTracker>,
        recovery: Arc<dyn ErrorRecovery>,
        progress: ProgressReporter,
    ) -> Self {
        let finished = FinishedLog {
            order: VecDeque::new(),
            states: HashMap::new(),
            capacity: config.finished_capacity.max(1),
        };
        Self {
            config,
            surface,
            tracker,
            recovery,
            progress,
            active: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            running: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            finished: Mutex::new(finished),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    // -- Submission ---------------------------------------------------------

    /// Execute `definition` now and wait for it to finish.
    ///
    /// Fails with [`WorkflowError::ConcurrencyLimitExceeded`] when every slot
    /// is taken.  Step failures do not fail this call; they are reported in
    /// the returned response.  Dropping the returned future leaves the
    /// workflow running; it can still be cancelled by id.
    pub async fn run(
        self: &Arc<Self>,
        definition: WorkflowDefinition,
        options: ExecutionOptions,
    ) -> Result<ExecutionResponse> {
        let definition = expand_nested(definition);
        self.validate(&definition)?;
        if !self.try_acquire_slot() {
            return Err(WorkflowError::ConcurrencyLimitExceeded {
                limit: self.config.max_concurrent_workflows,
            });
        }
        let id = definition.id;
        let control = self.activate(&definition, &options);
        let (reply, rx) = oneshot::channel();
        self.spawn_run(definition, options, control, reply);
        rx.await.map_err(|_| WorkflowError::ResultUnavailable { id })
    }

    /// Start `definition`, or queue it when every slot is taken.
    pub fn submit(
        self: &Arc<Self>,
        definition: WorkflowDefinition,
        options: ExecutionOptions,
    ) -> Result<WorkflowHandle> {
        let definition = expand_nested(definition);
        self.validate(&definition)?;
        let id = definition.id;
        let (reply, rx) = oneshot::channel();

        if self.try_acquire_slot() {
            let control = self.activate(&definition, &options);
            self.spawn_run(definition, options, control, reply);
            return Ok(WorkflowHandle {
                id,
                queued: false,
                reply: rx,
            });
        }

        let name = definition.name.clone();
        let progress = self.progress.scoped(options.report_progress);
        let position = {
            let mut queue = lock(&self.queue);
            queue.push_back(QueuedWorkflow {
                definition,
                options,
                reply,
            });
            queue.len()
        };
        info!(workflow_id = %id, name = %name, position, "workflow queued");
        progress.workflow_queued(id, &name, position);

        // A slot may have freed between the check and the push.
        self.drain_queue();

        Ok(WorkflowHandle {
            id,
            queued: true,
            reply: rx,
        })
    }

    /// Execute a single command outside any workflow.
    pub async fn run_command(&self, command: &Command) -> ExecutionResponse {
        let timeout = step_timeout(command, &ExecutionOptions::default(), &self.config);
        let response = run_with_timeout(self.surface.as_ref(), command, timeout).await;
        info!(
            command_id = %command.id,
            command_type = command.kind(),
            success = response.success,
            "command executed"
        );
        self.progress.command_executed(command, response.success);
        response
    }

    /// Run an unordered batch of commands concurrently and wait for all.
    ///
    /// Nested `workflow` commands are inlined first, so the batch yields one
    /// response per inner step.
    pub async fn execute_parallel_steps(
        &self,
        steps: &[Command],
        options: &ExecutionOptions,
    ) -> Vec<ExecutionResponse> {
        let steps = flatten_steps(steps.to_vec());
        debug!(count = steps.len(), "executing parallel steps");
        let calls = steps.iter().map(|command| {
            let timeout = step_timeout(command, options, &self.config);
            run_with_timeout(self.surface.as_ref(), command, timeout)
        });
        futures::future::join_all(calls).await
    }

    // -- Control ------------------------------------------------------------

    /// Cancel a running, paused or queued workflow.
    ///
    /// A running workflow is marked cancelled and leaves the active set at
    /// once; its in-flight step finishes but no further step starts.  A
    /// workflow that already reached a terminal status is left untouched and
    /// the call fails with [`WorkflowError::InvalidState`].
    pub async fn cancel(self: &Arc<Self>, id: Uuid) -> Result<WorkflowState> {
        if let Some(control) = self.active.get(&id).map(|c| Arc::clone(c.value())) {
            let state = match self
                .tracker
                .update_state(id, StateUpdate::status(WorkflowStatus::Cancelled))
                .await
            {
                Ok(state) => state,
                // The run has not initialized its state yet.
                Err(WorkflowError::NotFound { .. }) if self.holds(id, &control) => {
                    let mut state = WorkflowState::queued(id, &control.name, control.total_steps);
                    mark_cancelled(&mut state);
                    state
                }
                Err(WorkflowError::NotFound { .. }) => return Err(self.cancel_rejected(id)),
                Err(e) => return Err(e),
            };

            control.cancelled.store(true, Ordering::Release);
            control.resume.notify_one();
            self.active
                .remove_if(&id, |_, current| Arc::ptr_eq(current, &control));
            info!(workflow_id = %id, "workflow cancelled");

            self.progress
                .scoped(control.report_progress)
                .workflow_cancelled(id);
            self.release_slot(&control);
            self.drain_queue();
            return Ok(state);
        }

        if let Some(queued) = self.take_queued(id) {
            let def = &queued.definition;
            let mut state = WorkflowState::queued(id, &def.name, step_count(def));
            mark_cancelled(&mut state);
            info!(workflow_id = %id, "queued workflow cancelled");

            lock(&self.finished).insert(state.clone());
            self.progress
                .scoped(queued.options.report_progress)
                .workflow_cancelled(id);
            let _ = queued.reply.send(workflow_response(&state, None));
            return Ok(state);
        }

        Err(self.cancel_rejected(id))
    }

    fn cancel_rejected(&self, id: Uuid) -> WorkflowError {
        match self.state(id) {
            Some(state) if state.status.is_terminal() => WorkflowError::InvalidState {
                id,
                status: state.status,
                action: "cancel",
            },
            _ => WorkflowError::NotFound { id },
        }
    }

    /// Release a workflow blocked after a step by `pause_on_step`.
    pub fn resume(&self, id: Uuid) -> Result<()> {
        let Some(control) = self.active.get(&id).map(|c| Arc::clone(c.value())) else {
            return match self.state(id) {
                Some(state) => Err(WorkflowError::InvalidState {
                    id,
                    status: state.status,
                    action: "resume",
                }),
                None => Err(WorkflowError::NotFound { id }),
            };
        };

        if !control.paused.load(Ordering::Acquire) {
            return Err(WorkflowError::InvalidState {
                id,
                status: WorkflowStatus::Running,
                action: "resume",
            });
        }
        debug!(workflow_id = %id, "resume signalled");
        control.resume.notify_one();
        Ok(())
    }

    // -- Queries ------------------------------------------------------------

    /// Current state of a running, queued, or recently finished workflow.
    pub fn state(&self, id: Uuid) -> Option<WorkflowState> {
        if let Some(state) = self.tracker.get_state(id) {
            return Some(state);
        }
        if let Some(control) = self.active.get(&id) {
            let mut state = WorkflowState::queued(id, &control.name, control.total_steps);
            state.status = WorkflowStatus::Running;
            return Some(state);
        }
        let queued = lock(&self.queue)
            .iter()
            .find(|q| q.definition.id == id)
            .map(|q| WorkflowState::queued(id, &q.definition.name, step_count(&q.definition)));
        queued.or_else(|| lock(&self.finished).states.get(&id).cloned())
    }

    /// States of the workflows currently holding an execution slot.
    pub fn active_workflows(&self) -> Vec<WorkflowState> {
        let ids: Vec<Uuid> = self.active.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.state(id)).collect()
    }

    /// Ids of queued workflows, in dequeue order.
    pub fn queued_workflows(&self) -> Vec<Uuid> {
        lock(&self.queue).iter().map(|q| q.definition.id).collect()
    }

    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    // -- Slots and queue ----------------------------------------------------

    fn validate(&self, definition: &WorkflowDefinition) -> Result<()> {
        let id = definition.id;
        if definition.steps.is_empty() {
            return Err(WorkflowError::EmptyWorkflow { id });
        }
        if u32::try_from(definition.steps.len()).is_err() {
            return Err(WorkflowError::TooManySteps {
                id,
                count: definition.steps.len(),
            });
        }
        if self.active.contains_key(&id) || lock(&self.queue).iter().any(|q| q.definition.id == id)
        {
            return Err(WorkflowError::AlreadySubmitted { id });
        }
        Ok(())
    }

    fn try_acquire_slot(&self) -> bool {
        let limit = self.config.max_concurrent_workflows.max(1);
        self.running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn has_free_slot(&self) -> bool {
        self.running.load(Ordering::Acquire) < self.config.max_concurrent_workflows.max(1)
    }

    /// Whether `control` is still the active run registered under `id`.
    fn holds(&self, id: Uuid, control: &Arc<RunControl>) -> bool {
        self.active
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), control))
    }

    fn release_slot(&self, control: &RunControl) {
        if control.slot_held.swap(false, Ordering::AcqRel) {
            self.running.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn activate(&self, definition: &WorkflowDefinition, options: &ExecutionOptions) -> Arc<RunControl> {
        let control = Arc::new(RunControl {
            name: definition.name.clone(),
            total_steps: step_count(definition),
            report_progress: options.report_progress,
            cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            slot_held: AtomicBool::new(true),
        });
        self.active.insert(definition.id, Arc::clone(&control));
        control
    }

    fn take_queued(&self, id: Uuid) -> Option<QueuedWorkflow> {
        let mut queue = lock(&self.queue);
        let index = queue.iter().position(|q| q.definition.id == id)?;
        queue.remove(index)
    }

    fn spawn_run(
        self: &Arc<Self>,
        definition: WorkflowDefinition,
        options: ExecutionOptions,
        control: Arc<RunControl>,
        reply: oneshot::Sender<ExecutionResponse>,
    ) {
        let guard = RunGuard {
            executor: Arc::clone(self),
            id: definition.id,
            control: Arc::clone(&control),
            armed: true,
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let response = this.execute(definition, options, control).await;
            guard.disarm();
            let _ = reply.send(response);
        });
    }

    /// Start queued workflows while slots are free.
    fn drain_queue(self: &Arc<Self>) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            while self.try_acquire_slot() {
                let next = lock(&self.queue).pop_front();
                let Some(queued) = next else {
                    self.running.fetch_sub(1, Ordering::AcqRel);
                    break;
                };
                debug!(workflow_id = %queued.definition.id, "workflow dequeued");
                let control = self.activate(&queued.definition, &queued.options);
                self.spawn_run(queued.definition, queued.options, control, queued.reply);
            }

            self.draining.store(false, Ordering::Release);

            // Work queued while the flag was held would otherwise wait for
            // the next release.
            let pending = !lock(&self.queue).is_empty();
            if !(pending && self.has_free_slot()) {
                return;
            }
        }
    }

    // -- Execution ----------------------------------------------------------

    async fn execute(
        self: &Arc<Self>,
        definition: WorkflowDefinition,
        options: ExecutionOptions,
        control: Arc<RunControl>,
    ) -> ExecutionResponse {
        let id = definition.id;
        let progress = self.progress.scoped(options.report_progress);
        let started = Instant::now();

        self.tracker
            .initialize(id, &definition.name, definition.initial_context.clone())
            .await;
        note(
            id,
            "set total steps",
            self.tracker
                .update_state(id, StateUpdate::total(control.total_steps))
                .await,
        );
        info!(
            workflow_id = %id,
            name = %definition.name,
            steps = control.total_steps,
            "workflow started"
        );
        progress.workflow_started(id, &definition.name, definition.steps.len());

        let failure = self
            .run_steps(id, &definition, &options, &control, &progress)
            .await;
        let duration_ms = as_millis(started.elapsed());

        if !control.cancelled.load(Ordering::Acquire) {
            match &failure {
                None => {
                    let update = StateUpdate::status(WorkflowStatus::Completed);
                    if self.settle(id, update).await {
                        info!(workflow_id = %id, duration_ms, "workflow completed");
                        progress.workflow_completed(id, duration_ms);
                    }
                }
                Some(f) => {
                    let message = format!("step {} ({}) failed: {}", f.step, f.command.kind(), f.error);
                    if self.settle(id, StateUpdate::failed(message.clone())).await {
                        warn!(workflow_id = %id, step = f.step, error = %f.error, "workflow failed");
                        progress.workflow_failed(id, Some(f.step), &message);
                    }
                }
            }
        }

        let state = self.finish(id, &control).await;
        workflow_response(&state, failure)
    }

    /// Run every step; returns the failure that ended the run, if any.
    async fn run_steps(
        &self,
        id: Uuid,
        definition: &WorkflowDefinition,
        options: &ExecutionOptions,
        control: &RunControl,
        progress: &ProgressReporter,
    ) -> Option<StepFailure> {
        let total = control.total_steps;

        for (step, command) in (1u32..).zip(&definition.steps) {
            if control.cancelled.load(Ordering::Acquire) {
                debug!(workflow_id = %id, step, "cancellation observed");
                return None;
            }
            note(id, "advance", self.tracker.update_state(id, StateUpdate::step(step)).await);
            note(id, "record step", self.tracker.record_step(id, step, command).await);

            if let Some(precondition) = &command.precondition {
                let context = self.tracker.get_context(id).unwrap_or_default();
                let holds =
                    precondition.evaluate(&context, &|n| self.tracker.step_succeeded(id, n));
                if !holds {
                    debug!(workflow_id = %id, step, "precondition not met, skipping");
                    note(
                        id,
                        "record skip",
                        self.tracker
                            .record_step_result(id, step, StepResult::skipped(), 0)
                            .await,
                    );
                    progress.step_skipped(id, step, command, "precondition not met");
                    continue;
                }
            }

            progress.step_started(id, step, command);
            let timeout = step_timeout(command, options, &self.config);
            let began = Instant::now();
            let response = run_with_timeout(self.surface.as_ref(), command, timeout).await;

            if response.success {
                let result = StepResult::succeeded(response.result, 1);
                self.complete_step(id, step, command, result, began, progress)
                    .await;
            } else {
                let error = response.error_info();
                warn!(
                    workflow_id = %id,
                    step,
                    command_type = command.kind(),
                    error = %error,
                    "step failed"
                );
                progress.step_failed(id, step, command, &error.to_string());

                if options.continue_on_error || command.skip_on_failure {
                    note(
                        id,
                        "record failure",
                        self.tracker
                            .record_step_result(
                                id,
                                step,
                                StepResult::failed(error, 1),
                                as_millis(began.elapsed()),
                            )
                            .await,
                    );
                    continue;
                }

                let request = RecoveryRequest {
                    workflow_id: id,
                    step,
                    command,
                    error: &error,
                    options,
                    step_timeout: timeout,
                };
                match self.recovery.attempt_recovery(&request).await {
                    RecoveryOutcome::Recovered { output, attempts } => {
                        let result = StepResult::recovered(output, attempts);
                        self.complete_step(id, step, command, result, began, progress)
                            .await;
                    }
                    RecoveryOutcome::Declined { error, attempts } => {
                        note(
                            id,
                            "record failure",
                            self.tracker
                                .record_step_result(
                                    id,
                                    step,
                                    StepResult::failed(error.clone(), attempts.max(1)),
                                    as_millis(began.elapsed()),
                                )
                                .await,
                        );
                        return Some(StepFailure {
                            step,
                            command: command.clone(),
                            error,
                        });
                    }
                }
            }

            if options.pause_on_step && step < total {
                self.pause(id, step, control, progress).await;
            }
        }

        None
    }

    async fn complete_step(
        &self,
        id: Uuid,
        step: u32,
        command: &Command,
        result: StepResult,
        began: Instant,
        progress: &ProgressReporter,
    ) {
        let duration_ms = as_millis(began.elapsed());
        let output = result.output.clone().unwrap_or(Value::Null);
        note(
            id,
            "record result",
            self.tracker
                .record_step_result(id, step, result, duration_ms)
                .await,
        );
        note(
            id,
            "store step result",
            self.tracker
                .set_context(id, format!("step_{step}_result"), output)
                .await,
        );
        debug!(workflow_id = %id, step, duration_ms, "step completed");
        progress.step_completed(id, step, command, duration_ms);
    }

    async fn pause(&self, id: Uuid, step: u32, control: &RunControl, progress: &ProgressReporter) {
        if control.cancelled.load(Ordering::Acquire) {
            return;
        }
        control.paused.store(true, Ordering::Release);
        note(
            id,
            "pause",
            self.tracker
                .update_state(id, StateUpdate::status(WorkflowStatus::Paused))
                .await,
        );
        info!(workflow_id = %id, step, "workflow paused");
        progress.workflow_paused(id, step);

        control.resume.notified().await;
        control.paused.store(false, Ordering::Release);
        if control.cancelled.load(Ordering::Acquire) {
            return;
        }

        note(
            id,
            "resume",
            self.tracker
                .update_state(id, StateUpdate::status(WorkflowStatus::Running))
                .await,
        );
        info!(workflow_id = %id, step, "workflow resumed");
        progress.workflow_resumed(id, step);
    }

    /// Apply a terminal update.  False when a cancel settled the workflow
    /// first.
    async fn settle(&self, id: Uuid, update: StateUpdate) -> bool {
        match self.tracker.update_state(id, update).await {
            Ok(_) => true,
            Err(WorkflowError::InvalidState { status, .. }) => {
                debug!(workflow_id = %id, status = %status, "workflow already settled");
                false
            }
            Err(e) => {
                warn!(workflow_id = %id, error = %e, "state tracker operation failed");
                true
            }
        }
    }

    /// Settle and finish a run whose task died mid-flight.
    async fn abandon(self: &Arc<Self>, id: Uuid, control: &Arc<RunControl>) {
        if !control.cancelled.load(Ordering::Acquire) {
            let message = "workflow run aborted";
            if self.settle(id, StateUpdate::failed(message)).await {
                self.progress
                    .scoped(control.report_progress)
                    .workflow_failed(id, None, message);
            }
        }
        self.finish(id, control).await;
    }

    /// Leave the active set, hand state to the tracker for cleanup, free the
    /// slot and start queued work.
    async fn finish(self: &Arc<Self>, id: Uuid, control: &Arc<RunControl>) -> WorkflowState {
        if control.cancelled.load(Ordering::Acquire) {
            note(
                id,
                "cancel",
                self.tracker
                    .update_state(id, StateUpdate::status(WorkflowStatus::Cancelled))
                    .await,
            );
        }
        self.active
            .remove_if(&id, |_, current| Arc::ptr_eq(current, control));

        let finalized = if self.config.retain_finished {
            self.tracker.evict(id).await
        } else {
            self.tracker.cleanup(id).await
        };
        let state = finalized.unwrap_or_else(|e| {
            warn!(workflow_id = %id, error = %e, "workflow state missing at cleanup");
            let mut state = WorkflowState::queued(id, &control.name, control.total_steps);
            state.status = WorkflowStatus::Failed;
            state.ended_at = Some(chrono::Utc::now());
            state.error = Some(e.to_string());
            state
        });

        lock(&self.finished).insert(state.clone());
        self.release_slot(control);
        self.drain_queue();
        state
    }
}

fn mark_cancelled(state: &mut WorkflowState) {
    state.status = WorkflowStatus::Cancelled;
    state.ended_at.get_or_insert_with(chrono::Utc::now);
}

/// The response reported for a finished workflow.
///
/// Successful responses carry the final [`WorkflowState`] as `result`;
/// failures carry it under `error.details.state`.
fn workflow_response(state: &WorkflowState, failure: Option<StepFailure>) -> ExecutionResponse {
    let command_id = state.id.to_string();
    let state_json = serde_json::to_value(state).unwrap_or(Value::Null);

    match (state.status, failure) {
        (WorkflowStatus::Completed, _) => ExecutionResponse::ok(command_id, state_json),
        (WorkflowStatus::Cancelled, _) => ExecutionResponse::failure(
            command_id,
            ExecutionErrorInfo::new(codes::CANCELLED, "workflow was cancelled")
                .with_details(json!({ "state": state_json })),
        ),
        (_, Some(f)) => ExecutionResponse::failure(
            command_id,
            ExecutionErrorInfo::new(
                codes::RECOVERY_EXHAUSTED,
                format!("step {} ({}) failed: {}", f.step, f.command.kind(), f.error.message),
            )
            .with_details(json!({
                "step": f.step,
                "commandId": f.command.id,
                "commandType": f.command.kind(),
                "cause": f.error,
                "state": state_json,
            })),
        ),
        (_, None) => ExecutionResponse::failure(
            command_id,
            ExecutionErrorInfo::new(
                codes::EXECUTION_FAILED,
                state.error.clone().unwrap_or_else(|| "workflow failed".into()),
            )
            .with_details(json!({ "state": state_json })),
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
