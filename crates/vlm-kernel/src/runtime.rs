//! Inference runtime traits
//!
//! The worker never touches model architecture, weights or tokenization
//! itself. It drives a runtime through these traits:
//! - `VisionRuntime`: acquires processors, models and images
//! - `Processor`: turns image + text into model inputs and tokens back into text
//! - `VisionModel`: generates tokens

use crate::error::RuntimeResult;
use crate::model::{ModelId, PrecisionConfig};
use crate::protocol::ProgressEvent;
use crate::tensor::{EncodedInputs, ImageInput, RawImage, TokenTensor};
use async_trait::async_trait;
use std::sync::Arc;

/// Callback receiving loader progress reports.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Options for [`VisionModel::generate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationOptions {
    /// Upper bound on tokens appended after the prompt
    pub max_new_tokens: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 100,
        }
    }
}

/// Options for [`Processor::batch_decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Drop BOS/EOS/PAD/image placeholder tokens from the output
    pub skip_special_tokens: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            skip_special_tokens: true,
        }
    }
}

/// Tokenizer + image preprocessor for a model.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Encode an image and a prompt into model inputs.
    async fn encode(&self, image: &ImageInput, text: &str) -> RuntimeResult<EncodedInputs>;

    /// Decode each row of `tokens` into text.
    fn batch_decode(
        &self,
        tokens: &TokenTensor,
        options: DecodeOptions,
    ) -> RuntimeResult<Vec<String>>;
}

/// A loaded generation model.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Generate a continuation of `inputs`.
    ///
    /// The returned tensor holds the prompt tokens followed by the new ones.
    async fn generate(
        &self,
        inputs: &EncodedInputs,
        options: GenerationOptions,
    ) -> RuntimeResult<TokenTensor>;
}

/// Entry point into an inference library.
///
/// Implementers are responsible for:
/// - Fetching and parsing model artifacts
/// - Placing weights on the device at the requested precision
/// - Reporting load progress through the callback, if one is given
#[async_trait]
pub trait VisionRuntime: Send + Sync {
    /// Runtime name, for logs.
    fn name(&self) -> &str;

    /// Load the processor for `model_id`.
    async fn load_processor(&self, model_id: &ModelId) -> RuntimeResult<Arc<dyn Processor>>;

    /// Load the model for `model_id` at the given precision.
    async fn load_model(
        &self,
        model_id: &ModelId,
        precision: &PrecisionConfig,
        on_progress: Option<ProgressCallback>,
    ) -> RuntimeResult<Arc<dyn VisionModel>>;

    /// Fetch and decode an image.
    async fn load_image(&self, url: &str) -> RuntimeResult<RawImage>;
}
