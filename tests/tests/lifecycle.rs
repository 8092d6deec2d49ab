//! Load / warm-up / ready sequencing through the router.

use std::time::Duration;
use vlm_kernel::config::WarmupSection;
use vlm_kernel::protocol::{LOADING_MESSAGE, WARMUP_MESSAGE};
use vlm_kernel::{ErrorStage, HostCommand, StatusEvent, WorkerConfig, WorkerEvent};
use vlm_testing::{MockRuntime, WorkerHarness, assert_model_loads, request};
use vlm_worker::{CapabilityProbe, WorkerState};

fn is_terminal(event: &WorkerEvent) -> bool {
    matches!(
        event,
        WorkerEvent::Status(StatusEvent::Ready | StatusEvent::Error { .. })
    )
}

#[tokio::test]
async fn test_load_emits_full_sequence() {
    let mut h = WorkerHarness::new(MockRuntime::new());
    h.send(HostCommand::Load);

    let events = h.events_until(is_terminal).await;
    assert_eq!(events[0], WorkerEvent::loading(LOADING_MESSAGE));
    assert!(matches!(events[1], WorkerEvent::Progress(_)));
    assert!(matches!(events[2], WorkerEvent::Progress(_)));
    assert_eq!(events[3], WorkerEvent::loading(WARMUP_MESSAGE));
    assert_eq!(events[4], WorkerEvent::ready());
    assert_eq!(events.len(), 5);

    match &events[1] {
        WorkerEvent::Progress(p) => assert_eq!(p.as_map()["status"], "initiate"),
        other => panic!("expected progress, got {other:?}"),
    }
    assert_eq!(h.router.state(), WorkerState::Ready);
}

#[tokio::test]
async fn test_warm_up_finishes_before_ready() {
    let mut h = WorkerHarness::new(MockRuntime::new());
    h.send(HostCommand::Load);

    h.events_until(|e| e == &WorkerEvent::loading(WARMUP_MESSAGE))
        .await;
    assert_eq!(h.next_status().await, StatusEvent::Ready);

    // The warm-up pass ran exactly once, on a blank square image, one token
    assert_eq!(h.runtime.generations(), 1);
    assert_eq!(h.runtime.max_new_tokens(), vec![1]);
    assert_eq!(h.runtime.encoded(), vec![((16, 16), "a".to_string())]);
}

#[tokio::test]
async fn test_load_while_loading_and_after_ready() {
    let mut h = WorkerHarness::new(MockRuntime::new().with_load_delay(Duration::from_millis(80)));

    let first = h.send(HostCommand::Load).expect("load task");
    assert_eq!(h.router.state(), WorkerState::Loading);
    assert!(h.send(HostCommand::Load).is_none());
    first.await.unwrap();

    let ready = h.drain().iter().filter(|e| e.is_ready()).count();
    assert_eq!(ready, 1);

    // A later load only confirms readiness
    assert!(h.send(HostCommand::Load).is_none());
    assert_eq!(h.drain(), vec![WorkerEvent::ready()]);
    assert_model_loads!(h.runtime, 1);
    assert_eq!(h.runtime.generations(), 1);
}

#[tokio::test]
async fn test_failed_load_reports_and_can_be_retried() {
    let mut h = WorkerHarness::new(MockRuntime::new().failing_model_loads(1));

    h.send(HostCommand::Load);
    match h.events_until(is_terminal).await.pop() {
        Some(WorkerEvent::Status(StatusEvent::Error { stage, message })) => {
            assert_eq!(stage, ErrorStage::Load);
            assert!(message.contains("mock download failed"));
        }
        other => panic!("expected load error, got {other:?}"),
    }
    assert_eq!(h.router.state(), WorkerState::Failed);

    h.send(HostCommand::Load);
    assert_eq!(
        h.events_until(is_terminal).await.pop(),
        Some(WorkerEvent::ready())
    );
    assert_model_loads!(h.runtime, 2);
    assert_eq!(h.runtime.processor_loads(), 1);
    assert_eq!(h.router.state(), WorkerState::Ready);
}

#[tokio::test]
async fn test_run_waiting_on_a_failed_load_shares_the_failure() {
    let mut h = WorkerHarness::new(
        MockRuntime::new()
            .with_load_delay(Duration::from_millis(40))
            .failing_model_loads(1),
    );

    let load = h.send(HostCommand::Load).expect("load task");
    let run = h.send_run(request("caption en", "x")).expect("run task");
    load.await.unwrap();
    run.await.unwrap();

    let events = h.drain();
    assert!(!events.iter().any(|e| e.is_ready()));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, WorkerEvent::Status(StatusEvent::Complete { .. })))
    );
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::Status(StatusEvent::Error { stage, .. }) => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![ErrorStage::Load, ErrorStage::Load]);

    assert_model_loads!(h.runtime, 1);
    assert_eq!(h.router.state(), WorkerState::Failed);
    assert!(!h.router.cache().is_ready());

    // Retrying afterwards loads for real
    h.send(HostCommand::Load);
    assert_eq!(
        h.events_until(is_terminal).await.pop(),
        Some(WorkerEvent::ready())
    );
    assert_model_loads!(h.runtime, 2);
}

#[tokio::test]
async fn test_warm_up_failure_is_absorbed_by_default() {
    let mut h = WorkerHarness::new(MockRuntime::new().failing_generations(1));
    h.send(HostCommand::Load);
    assert_eq!(
        h.events_until(is_terminal).await.pop(),
        Some(WorkerEvent::ready())
    );
}

#[tokio::test]
async fn test_strict_warm_up_failure_fails_the_load() {
    let config = WorkerConfig {
        warmup: WarmupSection {
            strict: true,
            image_size: 16,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut h = WorkerHarness::with_config(
        MockRuntime::new().failing_generations(1),
        &config,
        CapabilityProbe::fixed(false),
    );

    h.send(HostCommand::Load);
    match h.next_status().await {
        StatusEvent::Loading { .. } => {}
        other => panic!("expected loading, got {other:?}"),
    }
    h.events_until(is_terminal).await;
    assert_eq!(h.router.state(), WorkerState::Failed);
}

#[tokio::test]
async fn test_disabled_warm_up_goes_straight_to_ready() {
    let config = WorkerConfig::default().without_warmup();
    let mut h =
        WorkerHarness::with_config(MockRuntime::new(), &config, CapabilityProbe::fixed(false));

    h.send(HostCommand::Load);
    assert_eq!(
        h.events_until(is_terminal).await.pop(),
        Some(WorkerEvent::ready())
    );
    assert_eq!(h.runtime.generations(), 0);
}

#[tokio::test]
async fn test_state_subscribers_see_transitions() {
    let h = WorkerHarness::new(MockRuntime::new().with_load_delay(Duration::from_millis(20)));
    let mut state = h.router.subscribe_state();
    assert_eq!(*state.borrow(), WorkerState::Idle);

    h.send(HostCommand::Load);
    state
        .wait_for(|s| *s == WorkerState::Ready)
        .await
        .expect("router alive");
}
