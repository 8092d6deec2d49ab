use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vlm_kernel::{HostCommand, InferenceRequest, StatusEvent, WorkerConfig, WorkerEvent};
use vlm_worker::{CapabilityProbe, EventSink, Router};

use crate::runtime::MockRuntime;

/// How long to wait for an event before failing the test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A router wired to a [`MockRuntime`], with the host side of the channel.
pub struct WorkerHarness {
    pub router: Router,
    pub runtime: MockRuntime,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl WorkerHarness {
    /// Default config with a small warm-up image and no GPU.
    pub fn new(runtime: MockRuntime) -> Self {
        let config = WorkerConfig::default()
            .with_warmup_size(16)
            .expect("valid warm-up size");
        Self::with_config(runtime, &config, CapabilityProbe::fixed(false))
    }

    pub fn with_config(runtime: MockRuntime, config: &WorkerConfig, probe: CapabilityProbe) -> Self {
        let (sink, events) = EventSink::channel();
        let router = Router::from_config(config, Arc::new(runtime.clone()), probe, sink);
        Self {
            router,
            runtime,
            events,
        }
    }

    /// Dispatch a command as the host would.
    pub fn send(&self, command: HostCommand) -> Option<tokio::task::JoinHandle<()>> {
        self.router.dispatch(command)
    }

    pub fn send_run(&self, request: InferenceRequest) -> Option<tokio::task::JoinHandle<()>> {
        self.send(HostCommand::Run { data: request })
    }

    /// Next event of any kind.
    pub async fn next_event(&mut self) -> WorkerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for a worker event")
            .expect("event channel closed")
    }

    /// Next status event, skipping progress reports.
    pub async fn next_status(&mut self) -> StatusEvent {
        loop {
            if let WorkerEvent::Status(status) = self.next_event().await {
                return status;
            }
        }
    }

    /// Events until (and including) the first one matching `done`.
    pub async fn events_until(&mut self, done: impl Fn(&WorkerEvent) -> bool) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await;
            let stop = done(&event);
            events.push(event);
            if stop {
                return events;
            }
        }
    }

    /// Whatever is queued right now.
    pub fn drain(&mut self) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A request the mock runtime will serve.
pub fn request(task: &str, text: &str) -> InferenceRequest {
    InferenceRequest::new(task, text, "https://example.com/cat.jpg")
}
