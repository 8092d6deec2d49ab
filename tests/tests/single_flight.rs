//! One model, one processor, one probe: no matter how callers interleave.

use std::sync::Arc;
use std::time::{Duration, Instant};
use vlm_kernel::{HostCommand, ModelId, PrecisionConfig, PrecisionPolicy, Quantization};
use vlm_kernel::{StatusEvent, WorkerConfig, WorkerEvent};
use vlm_testing::{MockRuntime, WorkerHarness, assert_model_loads, request};
use vlm_worker::probe::{FixedAdapterSource, GpuAdapterInfo, SHADER_F16};
use vlm_worker::{CapabilityProbe, ModelCache};

fn cache(runtime: &MockRuntime, policy: PrecisionPolicy, source: Arc<FixedAdapterSource>) -> Arc<ModelCache> {
    Arc::new(ModelCache::new(
        Arc::new(runtime.clone()),
        ModelId::default(),
        PrecisionConfig::default(),
        policy,
        CapabilityProbe::new(source),
    ))
}

fn fp16_source(fp16: bool) -> Arc<FixedAdapterSource> {
    let mut adapter = GpuAdapterInfo::new("mock-gpu");
    if fp16 {
        adapter = adapter.with_feature(SHADER_F16);
    }
    Arc::new(FixedAdapterSource::new(Some(adapter)))
}

#[tokio::test]
async fn test_concurrent_get_instance_loads_once() {
    let runtime = MockRuntime::new().with_load_delay(Duration::from_millis(50));
    let source = fp16_source(true);
    let cache = cache(&runtime, PrecisionPolicy::CapabilityAware, source.clone());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_instance(None).await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert!(handles.iter().all(|h| h.same_as(&handles[0])));
    assert_model_loads!(runtime, 1);
    assert_eq!(runtime.processor_loads(), 1);
    assert_eq!(source.queries(), 1);
}

#[tokio::test]
async fn test_loads_and_runs_interleaved_share_one_model() {
    let mut h = WorkerHarness::new(MockRuntime::new().with_load_delay(Duration::from_millis(40)));

    let mut tasks = Vec::new();
    for i in 0..4 {
        tasks.extend(h.send(HostCommand::Load));
        tasks.extend(h.send_run(request("caption en", &format!("#{i}"))));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let events = h.drain();
    let completes = events
        .iter()
        .filter(|e| matches!(e, WorkerEvent::Status(StatusEvent::Complete { .. })))
        .count();
    assert_eq!(completes, 4);
    assert!(events.iter().any(|e| e.is_ready()));
    assert_model_loads!(h.runtime, 1);
    assert_eq!(h.runtime.processor_loads(), 1);
}

#[tokio::test]
async fn test_probe_runs_once_across_loads_and_runs() {
    let runtime = MockRuntime::new();
    let source = fp16_source(false);
    let config = WorkerConfig::default()
        .with_warmup_size(8)
        .unwrap()
        .with_precision_policy(PrecisionPolicy::CapabilityAware);
    let mut h =
        WorkerHarness::with_config(runtime, &config, CapabilityProbe::new(source.clone()));

    h.router.load().await;
    h.send_run(request("caption en", ""));
    h.next_status().await;
    h.router.load().await;

    assert_eq!(source.queries(), 1);
    assert_eq!(h.router.cache().probe().cached(), Some(false));
}

#[tokio::test]
async fn test_capability_aware_policy_picks_q4f16_only_with_fp16() {
    let with_fp16 = MockRuntime::new();
    cache(&with_fp16, PrecisionPolicy::CapabilityAware, fp16_source(true))
        .get_instance(None)
        .await
        .unwrap();
    assert_eq!(
        with_fp16.precisions()[0].decoder_model_merged,
        Quantization::Q4f16
    );

    let without = MockRuntime::new();
    cache(&without, PrecisionPolicy::CapabilityAware, fp16_source(false))
        .get_instance(None)
        .await
        .unwrap();
    assert_eq!(without.precisions()[0].decoder_model_merged, Quantization::Q4);
}

#[tokio::test]
async fn test_static_policy_ignores_capability() {
    let runtime = MockRuntime::new();
    cache(&runtime, PrecisionPolicy::Static, fp16_source(true))
        .get_instance(None)
        .await
        .unwrap();
    assert_eq!(runtime.precisions(), vec![PrecisionConfig::default()]);
}

#[tokio::test]
async fn test_failed_load_reaches_every_concurrent_waiter() {
    let runtime = MockRuntime::new()
        .with_load_delay(Duration::from_millis(100))
        .failing_model_loads(1);
    let cache = cache(&runtime, PrecisionPolicy::Static, fp16_source(false));

    let started = Instant::now();
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_instance(None).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_err());
    }

    // One shared attempt, not four back to back
    assert_model_loads!(runtime, 1);
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(!cache.is_ready());

    assert!(cache.get_instance(None).await.is_ok());
    assert_model_loads!(runtime, 2);
}

#[tokio::test]
async fn test_persistent_failure_is_not_loaded_once_per_waiter() {
    let runtime = MockRuntime::new()
        .with_load_delay(Duration::from_millis(50))
        .failing_model_loads(100);
    let cache = cache(&runtime, PrecisionPolicy::Static, fp16_source(false));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_instance(None).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_err());
    }
    assert_model_loads!(runtime, 1);
}
