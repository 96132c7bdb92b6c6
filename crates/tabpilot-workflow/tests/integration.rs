//! Integration tests for the tabpilot-workflow crate.
//!
//! These drive the executor and orchestrator through their public API with a
//! recording execution surface and real state tracking.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tabpilot_intent::{Command, CommandAction, IntentParser, ParserConfig, WorkflowDefinition};
use tabpilot_kernel::{ProgressBus, Subscription};
use tabpilot_store::{Database, KvStore, SqliteKvStore};
use tabpilot_workflow::{
    EngineConfig, ExecutionErrorInfo, ExecutionOptions, ExecutionResponse, ExecutionSurface,
    NoRecovery, Orchestrator, ProgressReporter, StateTracker, StepStatus, WorkflowError,
    WorkflowExecutor, WorkflowState, WorkflowStatus, codes,
};

/// Records every click selector.  `fail*` selectors fail and `slow*`
/// selectors take 500 ms.
#[derive(Default)]
struct RecordingSurface {
    calls: Mutex<Vec<String>>,
}

impl RecordingSurface {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionSurface for RecordingSurface {
    async fn execute(&self, command: &Command) -> ExecutionResponse {
        let selector = match &command.action {
            CommandAction::Click { selector } => selector.clone(),
            other => other.kind().to_string(),
        };
        self.calls.lock().unwrap().push(selector.clone());

        if selector.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        if selector.starts_with("fail") {
            return ExecutionResponse::failure(
                &command.id,
                ExecutionErrorInfo::new(codes::EXECUTION_FAILED, format!("{selector} not found")),
            );
        }
        ExecutionResponse::ok(&command.id, json!({"clicked": selector}))
    }
}

fn click(selector: &str) -> Command {
    Command::new(CommandAction::Click {
        selector: selector.into(),
    })
}

fn workflow(name: &str, selectors: &[&str]) -> WorkflowDefinition {
    WorkflowDefinition::new(name, selectors.iter().map(|s| click(s)).collect())
}

fn executor(config: EngineConfig) -> (Arc<WorkflowExecutor>, Arc<RecordingSurface>) {
    let surface = Arc::new(RecordingSurface::default());
    let exec = WorkflowExecutor::new(
        config.clone(),
        surface.clone(),
        Arc::new(StateTracker::new(config.max_snapshots)),
        Arc::new(NoRecovery),
        ProgressReporter::new(ProgressBus::new(64)),
    );
    (Arc::new(exec), surface)
}

async fn wait_for(sub: &mut Subscription, kind: &str) {
    loop {
        let event = sub.recv().await.unwrap();
        if event.kind() == kind {
            return;
        }
    }
}

#[tokio::test]
async fn failing_step_ends_the_workflow() {
    let (exec, surface) = executor(EngineConfig::default());
    let resp = exec
        .run(
            workflow("checkout", &["#cart", "fail-pay", "#confirm"]),
            ExecutionOptions::default(),
        )
        .await
        .unwrap();

    assert!(!resp.success);
    assert_eq!(resp.error_code(), Some(codes::RECOVERY_EXHAUSTED));

    let state = WorkflowState::from_response(&resp).unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.results.len(), 2);
    assert_eq!(state.results[0].status, StepStatus::Succeeded);
    assert_eq!(state.results[1].status, StepStatus::Failed);
    assert_eq!(surface.calls(), vec!["#cart", "fail-pay"]);
}

#[tokio::test]
async fn queued_workflow_starts_when_slot_frees() {
    let (exec, surface) = executor(EngineConfig {
        max_concurrent_workflows: 1,
        ..EngineConfig::default()
    });
    let mut sub = exec.progress().subscribe();

    let a = workflow("a", &["#a1", "#a2"]);
    let b = workflow("b", &["#b1"]);
    let b_id = b.id;

    let a_handle = exec
        .submit(a, ExecutionOptions::default().pause_on_step())
        .unwrap();
    let b_handle = exec.submit(b, ExecutionOptions::default()).unwrap();
    assert!(!a_handle.was_queued());
    assert!(b_handle.was_queued());
    assert_eq!(exec.queued_workflows(), vec![b_id]);

    wait_for(&mut sub, "workflow_paused").await;
    assert_eq!(exec.active_workflows().len(), 1);
    assert_eq!(exec.active_workflows()[0].status, WorkflowStatus::Paused);
    exec.resume(a_handle.id()).unwrap();

    assert!(a_handle.wait().await.unwrap().success);
    assert!(b_handle.wait().await.unwrap().success);
    assert_eq!(surface.calls(), vec!["#a1", "#a2", "#b1"]);
    assert!(exec.queued_workflows().is_empty());
    assert_eq!(exec.running_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_step_is_skipped_when_tolerated() {
    let (exec, surface) = executor(EngineConfig::default());
    let def = WorkflowDefinition::new(
        "timeouts",
        vec![
            click("slow-widget")
                .with_timeout_ms(100)
                .with_skip_on_failure(true),
            click("#after"),
        ],
    );

    let resp = exec.run(def, ExecutionOptions::default()).await.unwrap();
    assert!(resp.success);

    let state = WorkflowState::from_response(&resp).unwrap();
    let first = &state.results[0];
    assert_eq!(first.status, StepStatus::Failed);
    assert_eq!(first.error.as_ref().unwrap().code, codes::EXECUTION_TIMEOUT);
    assert_eq!(state.results[1].status, StepStatus::Succeeded);
    assert_eq!(surface.calls(), vec!["slow-widget", "#after"]);
}

#[tokio::test]
async fn cancelling_a_paused_workflow_stops_further_steps() {
    let (exec, surface) = executor(EngineConfig::default());
    let mut sub = exec.progress().subscribe();
    let def = workflow("long", &["#one", "#two", "#three"]);
    let id = def.id;

    let handle = exec
        .submit(def, ExecutionOptions::default().pause_on_step())
        .unwrap();
    wait_for(&mut sub, "workflow_paused").await;

    let state = exec.cancel(id).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert!(exec.active_workflows().is_empty());

    let resp = handle.wait().await.unwrap();
    assert_eq!(resp.error_code(), Some(codes::CANCELLED));
    assert_eq!(surface.calls(), vec!["#one"]);

    let err = exec.cancel(id).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidState {
            status: WorkflowStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn cancelling_a_queued_workflow_never_runs_it() {
    let (exec, surface) = executor(EngineConfig {
        max_concurrent_workflows: 1,
        ..EngineConfig::default()
    });
    let mut sub = exec.progress().subscribe();

    let blocker = workflow("blocker", &["#x", "#y"]);
    let blocker_id = blocker.id;
    let waiting = workflow("waiting", &["#never"]);
    let waiting_id = waiting.id;

    let blocker_handle = exec
        .submit(blocker, ExecutionOptions::default().pause_on_step())
        .unwrap();
    let waiting_handle = exec.submit(waiting, ExecutionOptions::default()).unwrap();
    wait_for(&mut sub, "workflow_paused").await;

    let state = exec.cancel(waiting_id).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Cancelled);
    let resp = waiting_handle.wait().await.unwrap();
    assert_eq!(resp.error_code(), Some(codes::CANCELLED));

    exec.resume(blocker_id).unwrap();
    assert!(blocker_handle.wait().await.unwrap().success);
    assert_eq!(surface.calls(), vec!["#x", "#y"]);
}

#[tokio::test]
async fn resume_requires_a_paused_workflow() {
    let (exec, _) = executor(EngineConfig::default());
    let def = workflow("quick", &["#go"]);
    let id = def.id;
    exec.run(def, ExecutionOptions::default()).await.unwrap();

    assert!(matches!(
        exec.resume(id).unwrap_err(),
        WorkflowError::InvalidState { .. }
    ));
    assert!(matches!(
        exec.resume(uuid::Uuid::now_v7()).unwrap_err(),
        WorkflowError::NotFound { .. }
    ));
}

#[tokio::test]
async fn duplicate_submission_is_rejected() {
    let (exec, _) = executor(EngineConfig::default());
    let mut sub = exec.progress().subscribe();
    let def = workflow("twice", &["#a", "#b"]);

    let handle = exec
        .submit(def.clone(), ExecutionOptions::default().pause_on_step())
        .unwrap();
    wait_for(&mut sub, "workflow_paused").await;

    let err = exec.submit(def.clone(), ExecutionOptions::default()).unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadySubmitted { .. }));

    exec.resume(def.id).unwrap();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn finished_workflow_is_persisted_when_retained() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_and_migrate(dir.path().join("state.db"))
        .await
        .unwrap();
    let store: Arc<dyn KvStore> = Arc::new(SqliteKvStore::new(db));

    let surface = Arc::new(RecordingSurface::default());
    let parser = IntentParser::new(ParserConfig::default()).unwrap();
    let orch = Orchestrator::builder(parser, surface)
        .config(EngineConfig {
            retain_finished: true,
            ..EngineConfig::default()
        })
        .store(Arc::clone(&store))
        .build();

    let def = workflow("persisted", &["#one", "#two"]);
    let id = def.id;
    let resp = orch
        .execute_workflow(def, ExecutionOptions::default())
        .await
        .unwrap();
    assert!(resp.success);

    let fresh = StateTracker::new(10).with_store(store);
    let export = fresh.load(id).await.unwrap().unwrap();
    assert_eq!(export.state.status, WorkflowStatus::Completed);
    assert_eq!(export.history.len(), 2);
    assert_eq!(export.context["step_2_result"], json!({"clicked": "#two"}));

    let imported = orch.import_workflow(export.clone()).await.unwrap();
    assert_ne!(imported, id);
    let again = orch.export_workflow(imported).await.unwrap();

    let mut expected = export.state.clone();
    expected.id = imported;
    assert_eq!(again.state, expected);
    assert_eq!(again.context, export.context);
    assert_eq!(again.history, export.history);

    let mut snapshots = export.snapshots.clone();
    for snapshot in &mut snapshots {
        snapshot.state.id = imported;
    }
    assert_eq!(again.snapshots, snapshots);
}

#[tokio::test]
async fn failed_workflow_cannot_be_cancelled() {
    let (exec, _) = executor(EngineConfig::default());
    let def = workflow("broken", &["fail-first"]);
    let id = def.id;
    let resp = exec.run(def, ExecutionOptions::default()).await.unwrap();
    assert!(!resp.success);

    let err = exec.cancel(id).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidState {
            status: WorkflowStatus::Failed,
            ..
        }
    ));
    assert_eq!(exec.state(id).unwrap().status, WorkflowStatus::Failed);
}

#[tokio::test]
async fn nested_workflow_runs_each_inner_step_on_the_surface() {
    let (exec, surface) = executor(EngineConfig::default());
    let mut sub = exec.progress().subscribe();
    let inner = Command::new(CommandAction::Workflow {
        name: "login".into(),
        steps: vec![
            Command::new(CommandAction::Navigate {
                url: "https://example.com/login".into(),
            }),
            click("fail-inner"),
        ],
    });
    let def = WorkflowDefinition::new("outer", vec![click("#a"), inner, click("#b")]);

    let resp = exec.run(def, ExecutionOptions::default()).await.unwrap();
    assert_eq!(resp.error_code(), Some(codes::RECOVERY_EXHAUSTED));
    assert_eq!(surface.calls(), vec!["#a", "navigate", "fail-inner"]);

    let mut started = 0;
    while let Some(event) = sub.try_recv() {
        if event.kind() == "step_started" {
            started += 1;
        }
    }
    assert_eq!(started, 3);
}

#[tokio::test]
async fn progress_reports_each_step_in_order() {
    let (exec, _) = executor(EngineConfig::default());
    let mut sub = exec.progress().subscribe();

    exec.run(workflow("events", &["#a", "#b"]), ExecutionOptions::default())
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Some(event) = sub.try_recv() {
        kinds.push(event.kind());
    }
    assert_eq!(
        kinds,
        vec![
            "workflow_started",
            "step_started",
            "step_completed",
            "step_started",
            "step_completed",
            "workflow_completed",
        ]
    );
}
