//! Single-flight model cache
//!
//! Owns the one processor and the one model of the worker. The first call
//! to [`ModelCache::get_instance`] starts one acquisition that runs three
//! steps side by side: processor load, capability probe and model load.
//! Every caller arriving while that acquisition is in flight awaits the same
//! shared future and gets the same outcome, success or failure.
//!
//! Once the acquisition settles its slot is cleared. Handles that loaded stay
//! cached, so after a failure the next call retries only what is missing.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use vlm_kernel::config::ModelSection;
use vlm_kernel::{
    ModelId, PrecisionConfig, PrecisionPolicy, ProgressCallback, Processor, VisionModel,
    VisionRuntime, WorkerError, WorkerResult,
};

use crate::probe::CapabilityProbe;

/// Model and processor, shared read-only by every request.
#[derive(Clone)]
pub struct ModelHandles {
    pub model: Arc<dyn VisionModel>,
    pub processor: Arc<dyn Processor>,
}

impl ModelHandles {
    /// Whether both handles are the same instances as `other`'s.
    pub fn same_as(&self, other: &ModelHandles) -> bool {
        Arc::ptr_eq(&self.model, &other.model) && Arc::ptr_eq(&self.processor, &other.processor)
    }
}

impl std::fmt::Debug for ModelHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandles").finish_non_exhaustive()
    }
}

type Acquisition = Shared<BoxFuture<'static, WorkerResult<ModelHandles>>>;

/// Everything an acquisition needs, owned so the shared future is `'static`.
struct Loader {
    runtime: Arc<dyn VisionRuntime>,
    model_id: ModelId,
    precision: PrecisionConfig,
    policy: PrecisionPolicy,
    probe: CapabilityProbe,
    processor: OnceLock<Arc<dyn Processor>>,
    model: OnceLock<Arc<dyn VisionModel>>,
    /// Precision the model was actually loaded with
    loaded_precision: OnceLock<PrecisionConfig>,
    processor_attempts: AtomicUsize,
    model_attempts: AtomicUsize,
}

/// Process-scoped cache of the model/processor pair.
pub struct ModelCache {
    loader: Arc<Loader>,
    in_flight: parking_lot::Mutex<Option<Acquisition>>,
}

impl ModelCache {
    pub fn new(
        runtime: Arc<dyn VisionRuntime>,
        model_id: ModelId,
        precision: PrecisionConfig,
        policy: PrecisionPolicy,
        probe: CapabilityProbe,
    ) -> Self {
        Self {
            loader: Arc::new(Loader {
                runtime,
                model_id,
                precision,
                policy,
                probe,
                processor: OnceLock::new(),
                model: OnceLock::new(),
                loaded_precision: OnceLock::new(),
                processor_attempts: AtomicUsize::new(0),
                model_attempts: AtomicUsize::new(0),
            }),
            in_flight: parking_lot::Mutex::new(None),
        }
    }

    /// Build from the `model` config section.
    pub fn from_config(
        section: &ModelSection,
        runtime: Arc<dyn VisionRuntime>,
        probe: CapabilityProbe,
    ) -> Self {
        Self::new(
            runtime,
            section.id.clone(),
            section.precision,
            section.precision_policy,
            probe,
        )
    }

    /// Get the model/processor pair, loading it on first use.
    ///
    /// Concurrent callers share one acquisition and all see its result; only
    /// a call made after a failure starts a new one. `on_progress` only
    /// matters for the call that starts the acquisition.
    pub async fn get_instance(
        &self,
        on_progress: Option<ProgressCallback>,
    ) -> WorkerResult<ModelHandles> {
        if let Some(handles) = self.loader.handles() {
            return Ok(handles);
        }

        let acquisition = {
            let mut in_flight = self.in_flight.lock();
            // Re-check under the lock: an acquisition may have just settled
            if let Some(handles) = self.loader.handles() {
                return Ok(handles);
            }
            match in_flight.as_ref() {
                Some(acquisition) => acquisition.clone(),
                None => {
                    let loader = self.loader.clone();
                    let acquisition = async move { loader.acquire(on_progress).await }
                        .boxed()
                        .shared();
                    *in_flight = Some(acquisition.clone());
                    acquisition
                }
            }
        };

        let result = acquisition.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&acquisition))
        {
            *in_flight = None;
        }
        result
    }

    /// Whether both handles are loaded.
    pub fn is_ready(&self) -> bool {
        self.loader.handles().is_some()
    }

    pub fn model_id(&self) -> &ModelId {
        &self.loader.model_id
    }

    pub fn probe(&self) -> &CapabilityProbe {
        &self.loader.probe
    }

    /// Precision of the loaded model; `None` until a load succeeded.
    pub fn loaded_precision(&self) -> Option<PrecisionConfig> {
        self.loader.loaded_precision.get().copied()
    }

    /// Number of processor loads started so far.
    pub fn processor_attempts(&self) -> usize {
        self.loader.processor_attempts.load(Ordering::SeqCst)
    }

    /// Number of model loads started so far.
    pub fn model_attempts(&self) -> usize {
        self.loader.model_attempts.load(Ordering::SeqCst)
    }
}

impl Loader {
    fn handles(&self) -> Option<ModelHandles> {
        Some(ModelHandles {
            model: self.model.get()?.clone(),
            processor: self.processor.get()?.clone(),
        })
    }

    async fn acquire(&self, on_progress: Option<ProgressCallback>) -> WorkerResult<ModelHandles> {
        let processor = async {
            match self.processor.get() {
                Some(processor) => Ok(processor.clone()),
                None => {
                    let processor = self.load_processor().await?;
                    Ok::<_, WorkerError>(self.processor.get_or_init(|| processor).clone())
                }
            }
        };
        let supports_fp16 = self.probe.supports_fp16();
        let model = async {
            match self.model.get() {
                Some(model) => Ok(model.clone()),
                None => {
                    let model = self.load_model(on_progress).await?;
                    Ok::<_, WorkerError>(self.model.get_or_init(|| model).clone())
                }
            }
        };
        let (processor, _, model) = tokio::join!(processor, supports_fp16, model);

        Ok(ModelHandles {
            model: model?,
            processor: processor?,
        })
    }

    async fn load_processor(&self) -> WorkerResult<Arc<dyn Processor>> {
        self.processor_attempts.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(model = %self.model_id, runtime = self.runtime.name(), "loading processor");

        self.runtime
            .load_processor(&self.model_id)
            .await
            .map_err(|e| {
                tracing::error!(model = %self.model_id, error = %e, "processor load failed");
                WorkerError::ProcessorLoad(e)
            })
    }

    async fn load_model(
        &self,
        on_progress: Option<ProgressCallback>,
    ) -> WorkerResult<Arc<dyn VisionModel>> {
        self.model_attempts.fetch_add(1, Ordering::SeqCst);

        let precision = if self.policy.needs_probe() {
            let fp16 = self.probe.supports_fp16().await;
            self.policy.resolve(self.precision, fp16)
        } else {
            self.precision
        };

        tracing::info!(
            model = %self.model_id,
            runtime = self.runtime.name(),
            embed_tokens = %precision.embed_tokens,
            vision_encoder = %precision.vision_encoder,
            decoder = %precision.decoder_model_merged,
            "loading model"
        );
        let started = Instant::now();

        let model = self
            .runtime
            .load_model(&self.model_id, &precision, on_progress)
            .await
            .map_err(|e| {
                tracing::error!(model = %self.model_id, error = %e, "model load failed");
                WorkerError::ModelLoad(e)
            })?;

        let _ = self.loaded_precision.set(precision);
        tracing::info!(
            model = %self.model_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(model)
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("model_id", &self.loader.model_id)
            .field("runtime", &self.loader.runtime.name())
            .field("policy", &self.loader.policy)
            .field("ready", &self.is_ready())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
