//! Request handler
//!
//! Turns one `run` request into decoded text: image fetch, prompt
//! construction, encode, generate, strip the echoed prompt, decode.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use vlm_kernel::config::GenerationSection;
use vlm_kernel::{
    DecodeOptions, GenerationOptions, ImageInput, InferenceRequest, InferenceResult,
    VisionRuntime, WorkerError, WorkerResult,
};

use crate::cache::ModelCache;

/// Prompt sent to the model: task prefix, one space, user text.
pub fn build_prompt(task: &str, text: &str) -> String {
    format!("{task} {text}")
}

/// A finished run plus the transient details the router remembers.
#[derive(Debug, Clone, PartialEq)]
pub struct HandledRun {
    pub result: InferenceResult,
    pub prompt: String,
    /// Image (width, height)
    pub image_size: (usize, usize),
}

/// Executes inference requests against the cached model.
#[derive(Clone)]
pub struct RequestHandler {
    cache: Arc<ModelCache>,
    runtime: Arc<dyn VisionRuntime>,
    generation: GenerationOptions,
    decode: DecodeOptions,
}

impl RequestHandler {
    pub fn new(cache: Arc<ModelCache>, runtime: Arc<dyn VisionRuntime>) -> Self {
        Self {
            cache,
            runtime,
            generation: GenerationOptions::default(),
            decode: DecodeOptions::default(),
        }
    }

    /// Apply the `generation` config section.
    pub fn with_generation(mut self, section: &GenerationSection) -> Self {
        self.generation.max_new_tokens = section.max_new_tokens;
        self.decode.skip_special_tokens = section.skip_special_tokens;
        self
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Run one request.
    ///
    /// Never starts a second model load: if a load is in flight this awaits
    /// it. `time` covers encode through decode only, not the image fetch.
    pub async fn handle(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> WorkerResult<HandledRun> {
        let handles = self.cache.get_instance(None).await?;
        if cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        let work = async {
            let image = self
                .runtime
                .load_image(&request.url)
                .await
                .map_err(|source| WorkerError::ImageLoad {
                    url: request.url.clone(),
                    source,
                })?;
            let image = ImageInput::Image(image);
            let image_size = image.size();
            let prompt = build_prompt(&request.task, &request.text);

            let started = Instant::now();
            let inputs = handles
                .processor
                .encode(&image, &prompt)
                .await
                .map_err(WorkerError::Encode)?;
            let outputs = handles
                .model
                .generate(&inputs, self.generation)
                .await
                .map_err(WorkerError::Generation)?;
            Ok::<_, WorkerError>((inputs, outputs, prompt, image_size, started))
        };

        let (inputs, outputs, prompt, image_size, started) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
            res = work => res?,
        };

        let generated = outputs.slice_from(inputs.input_ids.seq_len());
        let texts = handles
            .processor
            .batch_decode(&generated, self.decode)
            .map_err(WorkerError::Decode)?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            task = %request.task,
            width = image_size.0,
            height = image_size.1,
            prompt_tokens = inputs.input_ids.seq_len(),
            new_tokens = generated.seq_len(),
            elapsed_ms,
            "request handled"
        );

        Ok(HandledRun {
            result: InferenceResult { texts, elapsed_ms },
            prompt,
            image_size,
        })
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("runtime", &self.runtime.name())
            .field("generation", &self.generation)
            .field("decode", &self.decode)
            .finish()
    }
}
