//! Shader warm-up pass
//!
//! The first inference on a fresh GPU runtime pays for shader compilation.
//! Running one tiny generation on a blank image right after load moves that
//! cost out of the first real request.

use std::time::{Duration, Instant};
use vlm_kernel::config::WarmupSection;
use vlm_kernel::{
    GenerationOptions, ImageInput, PixelTensor, RuntimeError, WorkerError, WorkerResult,
};

use crate::cache::ModelHandles;

/// What the warm-up pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum WarmupOutcome {
    /// Disabled in config
    Skipped,
    /// Ran to completion in the given time
    Warmed(Duration),
    /// Failed, but the failure was logged and ignored
    Absorbed(RuntimeError),
}

/// Run one encode + single-token generate on an all-zero image.
///
/// The output is discarded. Failures are absorbed unless `config.strict`
/// is set, in which case they surface as [`WorkerError::Warmup`].
pub async fn warm_up(
    handles: &ModelHandles,
    config: &WarmupSection,
) -> WorkerResult<WarmupOutcome> {
    if !config.enabled {
        tracing::debug!("warm-up disabled");
        return Ok(WarmupOutcome::Skipped);
    }

    let started = Instant::now();
    match run_pass(handles, config).await {
        Ok(()) => {
            let elapsed = started.elapsed();
            tracing::info!(
                image_size = config.image_size,
                elapsed_ms = elapsed.as_millis() as u64,
                "warm-up complete"
            );
            Ok(WarmupOutcome::Warmed(elapsed))
        }
        Err(e) if config.strict => {
            tracing::error!(error = %e, "warm-up failed");
            Err(WorkerError::Warmup(e))
        }
        Err(e) => {
            tracing::warn!(error = %e, "warm-up failed, continuing without it");
            Ok(WarmupOutcome::Absorbed(e))
        }
    }
}

async fn run_pass(handles: &ModelHandles, config: &WarmupSection) -> Result<(), RuntimeError> {
    let size = config.image_size;
    let pixels = ImageInput::Pixels(PixelTensor::zeros([1, 3, size, size]));

    let inputs = handles.processor.encode(&pixels, &config.prompt).await?;
    handles
        .model
        .generate(&inputs, GenerationOptions { max_new_tokens: 1 })
        .await?;
    Ok(())
}
