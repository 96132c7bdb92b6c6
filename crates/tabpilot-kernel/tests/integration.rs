//! Integration tests for the tabpilot-kernel crate.

use chrono::Utc;
use tabpilot_kernel::{IntentRouter, MatchLevel, ProgressBus, ProgressEvent};
use uuid::Uuid;

#[test]
fn router_reports_exact_then_pattern_matches() {
    let mut router = IntentRouter::new();
    router.add_exact("new tab", "new_tab").unwrap();
    router
        .add_pattern(r"\bopen\s+(?P<what>.+)", "open")
        .unwrap();

    let found = router.matches("Open a NEW TAB");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].handler, "new_tab");
    assert_eq!(found[0].level, MatchLevel::Exact);
    assert_eq!(found[1].handler, "open");
    assert_eq!(found[1].captures["what"], "a new tab");
    assert!((found[1].coverage("open a new tab".len()) - 1.0).abs() < 1e-9);
}

#[test]
fn router_rejects_invalid_regex() {
    let mut router = IntentRouter::new();
    assert!(router.add_pattern("(unclosed", "broken").is_err());
    assert_eq!(router.pattern_count(), 0);
}

#[tokio::test]
async fn progress_bus_fans_out_in_order() {
    let bus = ProgressBus::new(16);
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();
    let id = Uuid::now_v7();

    bus.publish(ProgressEvent::WorkflowStarted {
        workflow_id: id,
        name: "demo".into(),
        total_steps: 2,
        timestamp: Utc::now(),
    });
    let delivered = bus.publish(ProgressEvent::WorkflowCompleted {
        workflow_id: id,
        duration_ms: 10,
        timestamp: Utc::now(),
    });
    assert_eq!(delivered, 2);

    for sub in [&mut a, &mut b] {
        assert_eq!(sub.recv().await.unwrap().kind(), "workflow_started");
        let last = sub.recv().await.unwrap();
        assert!(last.is_terminal());
        assert_eq!(last.workflow_id(), Some(id));
    }
}

#[tokio::test]
async fn cancelled_subscription_stops_receiving() {
    let bus = ProgressBus::default();
    let sub = bus.subscribe();
    let mut other = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 2);

    sub.cancel();
    assert_eq!(bus.subscriber_count(), 1);

    bus.publish(ProgressEvent::WorkflowCancelled {
        workflow_id: Uuid::now_v7(),
        timestamp: Utc::now(),
    });
    assert_eq!(other.recv().await.unwrap().kind(), "workflow_cancelled");
}
