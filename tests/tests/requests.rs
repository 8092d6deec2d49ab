//! `run`, `reset`, `cancel` and unknown commands through the router.

use std::time::Duration;
use vlm_kernel::{ErrorStage, HostCommand, InferenceRequest, StatusEvent, WorkerEvent};
use vlm_testing::{MockRuntime, UNREACHABLE_PREFIX, WorkerHarness, assert_model_loads, request};
use vlm_worker::{LastRequest, WorkerState};

async fn loaded(runtime: MockRuntime) -> WorkerHarness {
    let mut h = WorkerHarness::new(runtime);
    h.router.load().await;
    h.drain();
    h
}

#[tokio::test]
async fn test_prompt_is_task_space_text() {
    let mut h = loaded(MockRuntime::new().with_image_size(40, 30)).await;
    h.send_run(request("caption en", "a red car"));
    h.next_status().await;

    let encoded = h.runtime.encoded();
    assert_eq!(
        encoded.last(),
        Some(&((40, 30), "caption en a red car".to_string()))
    );
}

#[tokio::test]
async fn test_result_holds_only_generated_text() {
    let mut h = loaded(MockRuntime::new().with_reply("two cats on a sofa")).await;
    h.send_run(request("caption en", "describe"));

    match h.next_status().await {
        StatusEvent::Complete { result, time } => {
            assert_eq!(result, vec!["two cats on a sofa"]);
            assert!(time >= 0.0);
        }
        other => panic!("expected complete, got {other:?}"),
    }
}

#[tokio::test]
async fn test_generation_budget_is_100_tokens() {
    let mut h = loaded(MockRuntime::new()).await;
    h.send_run(request("caption en", ""));
    h.next_status().await;
    assert_eq!(h.runtime.max_new_tokens(), vec![1, 100]);
}

#[tokio::test]
async fn test_run_before_load_triggers_the_load() {
    let mut h = WorkerHarness::new(MockRuntime::new());
    h.send_run(request("caption en", "x"));

    assert!(matches!(h.next_status().await, StatusEvent::Complete { .. }));
    assert_model_loads!(h.runtime, 1);
    assert_eq!(h.router.state(), WorkerState::Idle);

    // The later load reuses the handles and still warms up
    h.router.load().await;
    assert_eq!(h.drain().last(), Some(&WorkerEvent::ready()));
    assert_model_loads!(h.runtime, 1);
}

#[tokio::test]
async fn test_run_during_load_waits_for_it() {
    let mut h = WorkerHarness::new(MockRuntime::new().with_load_delay(Duration::from_millis(60)));
    h.send(HostCommand::Load);
    h.send_run(request("caption en", "x"));

    let statuses: Vec<_> = h
        .events_until(|e| matches!(e, WorkerEvent::Status(StatusEvent::Complete { .. })))
        .await
        .into_iter()
        .filter_map(|e| match e {
            WorkerEvent::Status(s) => Some(s),
            WorkerEvent::Progress(_) => None,
        })
        .collect();
    assert!(matches!(statuses.last(), Some(StatusEvent::Complete { .. })));
    assert_model_loads!(h.runtime, 1);
}

#[tokio::test]
async fn test_unreachable_image_reports_run_error() {
    let mut h = loaded(MockRuntime::new()).await;
    let url = format!("{UNREACHABLE_PREFIX}cat.png");
    h.send_run(InferenceRequest::new("caption en", "", url.as_str()));

    match h.next_status().await {
        StatusEvent::Error { stage, message } => {
            assert_eq!(stage, ErrorStage::Run);
            assert!(message.contains(&url));
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(h.router.state(), WorkerState::Ready);

    // The worker keeps serving
    h.send_run(request("caption en", ""));
    assert!(matches!(h.next_status().await, StatusEvent::Complete { .. }));
}

#[tokio::test]
async fn test_reset_is_idempotent_and_keeps_the_model() {
    let mut h = loaded(MockRuntime::new().with_image_size(8, 6)).await;
    h.send_run(request("caption en", "hello"));
    h.next_status().await;

    assert_eq!(
        h.router.last_request(),
        Some(LastRequest {
            prompt: "caption en hello".into(),
            image_size: (8, 6),
        })
    );

    for _ in 0..3 {
        assert!(h.send(HostCommand::Reset).is_none());
    }
    assert_eq!(h.router.last_request(), None);
    assert!(h.drain().is_empty());
    assert!(h.router.cache().is_ready());

    h.send_run(request("caption en", "again"));
    assert!(matches!(h.next_status().await, StatusEvent::Complete { .. }));
    assert_model_loads!(h.runtime, 1);
}

#[tokio::test]
async fn test_reset_never_changes_the_load_state() {
    let mut h = WorkerHarness::new(MockRuntime::new().with_load_delay(Duration::from_millis(60)));

    for _ in 0..3 {
        assert!(h.send(HostCommand::Reset).is_none());
    }
    assert_eq!(h.router.state(), WorkerState::Idle);
    assert!(h.drain().is_empty());

    let load = h.send(HostCommand::Load).expect("load task");
    assert_eq!(h.router.state(), WorkerState::Loading);
    tokio::time::sleep(Duration::from_millis(20)).await;
    for _ in 0..3 {
        assert!(h.send(HostCommand::Reset).is_none());
        assert_eq!(h.router.state(), WorkerState::Loading);
    }
    load.await.unwrap();

    let ready = h.drain().iter().filter(|e| e.is_ready()).count();
    assert_eq!(ready, 1);
    assert_eq!(h.router.state(), WorkerState::Ready);

    h.send(HostCommand::Reset);
    assert_eq!(h.router.state(), WorkerState::Ready);
    assert!(h.drain().is_empty());
    assert_model_loads!(h.runtime, 1);
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_run() {
    let mut h = loaded(MockRuntime::new().with_generate_delay(Duration::from_millis(300))).await;

    let task = h.send_run(request("caption en", "")).expect("run task");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.send(HostCommand::Cancel).is_none());
    task.await.unwrap();
    assert_eq!(h.next_status().await, StatusEvent::Cancelled);

    // Cancellation does not stick to later runs
    h.send_run(request("caption en", ""));
    assert!(matches!(h.next_status().await, StatusEvent::Complete { .. }));
}

#[tokio::test]
async fn test_cancel_with_nothing_running_is_harmless() {
    let mut h = loaded(MockRuntime::new()).await;
    h.send(HostCommand::Cancel);
    h.send_run(request("caption en", ""));
    assert!(matches!(h.next_status().await, StatusEvent::Complete { .. }));
}

#[tokio::test]
async fn test_unknown_command_emits_nothing() {
    let mut h = loaded(MockRuntime::new()).await;
    let command = HostCommand::from_json(r#"{"type":"self_destruct","data":1}"#).unwrap();
    assert_eq!(command, HostCommand::Unknown);
    assert!(h.send(command).is_none());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.drain().is_empty());
    assert_eq!(h.router.state(), WorkerState::Ready);
}
