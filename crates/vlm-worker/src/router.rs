//! Message router
//!
//! Receives host commands, drives the cache, warm-up and request handler,
//! and is the only component that emits events back to the host.
//!
//! | state        | `load`                         | `run`    | `reset`     | `cancel`        |
//! |--------------|--------------------------------|----------|-------------|-----------------|
//! | Idle, Failed | start load → Loading           | handle   | clear last  | cancel runs     |
//! | Loading      | nothing (load already running) | handle   | clear last  | cancel runs     |
//! | Ready        | emit `ready` again             | handle   | clear last  | cancel runs     |
//!
//! `load` and `run` are spawned, so commands arriving while they are
//! suspended are handled immediately.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vlm_kernel::config::WarmupSection;
use vlm_kernel::protocol::{LOADING_MESSAGE, WARMUP_MESSAGE};
use vlm_kernel::{
    HostCommand, InferenceRequest, ProgressCallback, ProgressEvent, VisionRuntime, WorkerConfig,
    WorkerEvent,
};

use crate::cache::ModelCache;
use crate::handler::RequestHandler;
use crate::probe::CapabilityProbe;
use crate::warmup::{WarmupOutcome, warm_up};

/// Outgoing side of the worker → host channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the transport reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: WorkerEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver closed, dropping event");
        }
    }
}

/// Model lifecycle as seen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed,
}

/// Transient details of the most recent successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRequest {
    pub prompt: String,
    /// Image (width, height)
    pub image_size: (usize, usize),
}

enum LoadAction {
    Start,
    InFlight,
    AlreadyReady,
}

struct Inner {
    cache: Arc<ModelCache>,
    handler: RequestHandler,
    warmup: WarmupSection,
    sink: EventSink,
    state: watch::Sender<WorkerState>,
    last_request: parking_lot::Mutex<Option<LastRequest>>,
    /// Parent of every run's token; replaced on `cancel`
    cancel: parking_lot::Mutex<CancellationToken>,
}

/// Dispatches host commands. Cheap to clone.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

impl Router {
    pub fn new(handler: RequestHandler, warmup: WarmupSection, sink: EventSink) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            inner: Arc::new(Inner {
                cache: handler.cache().clone(),
                handler,
                warmup,
                sink,
                state,
                last_request: parking_lot::Mutex::new(None),
                cancel: parking_lot::Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Wire cache, handler and warm-up from a loaded config.
    pub fn from_config(
        config: &WorkerConfig,
        runtime: Arc<dyn VisionRuntime>,
        probe: CapabilityProbe,
        sink: EventSink,
    ) -> Self {
        let cache = Arc::new(ModelCache::from_config(&config.model, runtime.clone(), probe));
        let handler = RequestHandler::new(cache, runtime).with_generation(&config.generation);
        Self::new(handler, config.warmup.clone(), sink)
    }

    /// Handle one command.
    ///
    /// Returns the spawned task for commands that do async work.
    pub fn dispatch(&self, command: HostCommand) -> Option<JoinHandle<()>> {
        tracing::debug!(command = command.kind(), "command received");
        match command {
            HostCommand::Load => match self.claim_load() {
                LoadAction::Start => {
                    let router = self.clone();
                    Some(tokio::spawn(async move { router.perform_load().await }))
                }
                LoadAction::InFlight => None,
                LoadAction::AlreadyReady => {
                    self.inner.sink.emit(WorkerEvent::ready());
                    None
                }
            },
            HostCommand::Run { data } => {
                let router = self.clone();
                Some(tokio::spawn(async move { router.run(data).await }))
            }
            HostCommand::Reset => {
                self.reset();
                None
            }
            HostCommand::Cancel => {
                self.cancel_runs();
                None
            }
            HostCommand::Unknown => {
                tracing::warn!("ignoring unknown command");
                None
            }
        }
    }

    /// Load and warm up the model, emitting the load sequence.
    pub async fn load(&self) {
        match self.claim_load() {
            LoadAction::Start => self.perform_load().await,
            LoadAction::InFlight => {}
            LoadAction::AlreadyReady => self.inner.sink.emit(WorkerEvent::ready()),
        }
    }

    /// Run one request and emit its outcome.
    pub async fn run(&self, request: InferenceRequest) {
        let cancel = self.inner.cancel.lock().child_token();

        match self.inner.handler.handle(&request, &cancel).await {
            Ok(run) => {
                *self.inner.last_request.lock() = Some(LastRequest {
                    prompt: run.prompt,
                    image_size: run.image_size,
                });
                tracing::info!(
                    texts = run.result.texts.len(),
                    elapsed_ms = run.result.elapsed_ms,
                    "run complete"
                );
                self.inner.sink.emit(WorkerEvent::complete(run.result));
            }
            Err(e) => {
                if e.is_cancelled() {
                    tracing::info!("run cancelled");
                } else {
                    tracing::warn!(error = %e, "run failed");
                }
                self.inner.sink.emit(WorkerEvent::failure(&e));
            }
        }
    }

    /// Forget the last request. Never touches the model.
    pub fn reset(&self) {
        if self.inner.last_request.lock().take().is_some() {
            tracing::debug!("last request cleared");
        }
    }

    /// Cancel every run in flight. Later runs are unaffected.
    pub fn cancel_runs(&self) {
        let previous = std::mem::replace(&mut *self.inner.cancel.lock(), CancellationToken::new());
        previous.cancel();
        tracing::debug!("in-flight runs cancelled");
    }

    pub fn state(&self) -> WorkerState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.inner.state.subscribe()
    }

    pub fn last_request(&self) -> Option<LastRequest> {
        self.inner.last_request.lock().clone()
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.inner.cache
    }

    fn claim_load(&self) -> LoadAction {
        let mut action = LoadAction::InFlight;
        self.inner.state.send_if_modified(|state| match state {
            WorkerState::Idle | WorkerState::Failed => {
                *state = WorkerState::Loading;
                action = LoadAction::Start;
                true
            }
            WorkerState::Loading => false,
            WorkerState::Ready => {
                action = LoadAction::AlreadyReady;
                false
            }
        });
        action
    }

    async fn perform_load(&self) {
        let inner = &self.inner;
        inner.sink.emit(WorkerEvent::loading(LOADING_MESSAGE));

        let sink = inner.sink.clone();
        let on_progress: ProgressCallback =
            Arc::new(move |event: ProgressEvent| sink.emit(WorkerEvent::progress(event)));

        let result = async {
            let handles = inner.cache.get_instance(Some(on_progress)).await?;
            inner.sink.emit(WorkerEvent::loading(WARMUP_MESSAGE));
            warm_up(&handles, &inner.warmup).await
        }
        .await;

        match result {
            Ok(outcome) => {
                inner.state.send_replace(WorkerState::Ready);
                tracing::info!(
                    model = %inner.cache.model_id(),
                    warmed = matches!(outcome, WarmupOutcome::Warmed(_)),
                    "worker ready"
                );
                inner.sink.emit(WorkerEvent::ready());
            }
            Err(e) => {
                inner.state.send_replace(WorkerState::Failed);
                tracing::error!(error = %e, "load failed");
                inner.sink.emit(WorkerEvent::failure(&e));
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.state())
            .field("cache", &self.inner.cache)
            .finish()
    }
}
