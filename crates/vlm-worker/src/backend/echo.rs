//! Deterministic echo runtime
//!
//! Implements the runtime traits without any model weights: the "model"
//! answers every prompt with the prompt itself followed by the image size,
//! e.g. `caption a bicycle [640x480]`. Tokenization is byte level, shifted
//! past four special ids. Useful to exercise the worker end to end and as
//! the default backend of the CLI.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vlm_kernel::{
    DecodeOptions, EncodedInputs, GenerationOptions, ImageInput, ModelId, PixelTensor,
    PrecisionConfig, ProgressCallback, ProgressEvent, Processor, RawImage, RuntimeError,
    RuntimeResult, TokenTensor, VisionModel, VisionRuntime,
};

use crate::fetch::ImageFetcher;

pub const PAD_TOKEN: i64 = 0;
pub const EOS_TOKEN: i64 = 1;
pub const BOS_TOKEN: i64 = 2;
pub const IMAGE_TOKEN: i64 = 3;
/// First id used for byte tokens.
pub const BYTE_OFFSET: i64 = 4;

/// Number of image placeholder tokens prepended to every prompt.
const IMAGE_SEQ_LEN: usize = 4;

/// Runtime producing [`EchoProcessor`] and [`EchoModel`] handles.
#[derive(Debug, Clone)]
pub struct EchoRuntime {
    fetcher: ImageFetcher,
    load_delay: Duration,
    generate_delay: Duration,
}

impl EchoRuntime {
    pub fn new(fetcher: ImageFetcher) -> Self {
        Self {
            fetcher,
            load_delay: Duration::ZERO,
            generate_delay: Duration::ZERO,
        }
    }

    /// Spread this much simulated download time over the model load.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Sleep this long inside every `generate` call.
    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }
}

#[async_trait]
impl VisionRuntime for EchoRuntime {
    fn name(&self) -> &str {
        "echo"
    }

    async fn load_processor(&self, model_id: &ModelId) -> RuntimeResult<Arc<dyn Processor>> {
        tracing::debug!(model = %model_id, "echo processor loaded");
        Ok(Arc::new(EchoProcessor))
    }

    async fn load_model(
        &self,
        model_id: &ModelId,
        precision: &PrecisionConfig,
        on_progress: Option<ProgressCallback>,
    ) -> RuntimeResult<Arc<dyn VisionModel>> {
        let report = |event: serde_json::Value| {
            if let (Some(cb), Some(event)) = (&on_progress, ProgressEvent::from_value(event)) {
                cb(event);
            }
        };
        let step = self.load_delay / (precision.entries().len() as u32 * 2);

        for (module, level) in precision.entries() {
            let file = format!("onnx/{module}_{level}.onnx");
            report(json!({"status": "initiate", "name": model_id.as_str(), "file": file}));
            tokio::time::sleep(step).await;
            report(json!({
                "status": "progress",
                "name": model_id.as_str(),
                "file": file,
                "progress": 50.0,
            }));
            tokio::time::sleep(step).await;
            report(json!({"status": "done", "name": model_id.as_str(), "file": file}));
        }

        Ok(Arc::new(EchoModel {
            generate_delay: self.generate_delay,
        }))
    }

    async fn load_image(&self, url: &str) -> RuntimeResult<RawImage> {
        self.fetcher.fetch(url).await
    }
}

/// Byte-level processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProcessor;

/// Encode text to byte tokens.
pub fn encode_text(text: &str) -> Vec<i64> {
    text.bytes().map(|b| b as i64 + BYTE_OFFSET).collect()
}

fn decode_row(row: &[i64], skip_special: bool) -> String {
    let mut bytes = Vec::with_capacity(row.len());
    for &id in row {
        if id >= BYTE_OFFSET {
            bytes.push((id - BYTE_OFFSET) as u8);
        } else if !skip_special {
            let name: &[u8] = match id {
                PAD_TOKEN => b"<pad>",
                EOS_TOKEN => b"<eos>",
                BOS_TOKEN => b"<bos>",
                _ => b"<image>",
            };
            bytes.extend_from_slice(name);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn to_pixels(image: &ImageInput) -> PixelTensor {
    match image {
        ImageInput::Pixels(t) => t.clone(),
        ImageInput::Image(img) => {
            let (w, h, c) = (img.width as usize, img.height as usize, img.channels as usize);
            let mut t = PixelTensor::zeros([1, c, h, w]);
            // HWC u8 -> CHW f32 in [0, 1]
            for (i, &v) in img.data.iter().enumerate() {
                let (pixel, channel) = (i / c, i % c);
                t.data[channel * h * w + pixel] = f32::from(v) / 255.0;
            }
            t
        }
    }
}

#[async_trait]
impl Processor for EchoProcessor {
    async fn encode(&self, image: &ImageInput, text: &str) -> RuntimeResult<EncodedInputs> {
        let mut ids = Vec::with_capacity(1 + IMAGE_SEQ_LEN + text.len());
        ids.push(BOS_TOKEN);
        ids.extend(std::iter::repeat_n(IMAGE_TOKEN, IMAGE_SEQ_LEN));
        ids.extend(encode_text(text));

        Ok(EncodedInputs {
            input_ids: TokenTensor::from_rows(vec![ids])?,
            pixel_values: Some(to_pixels(image)),
        })
    }

    fn batch_decode(
        &self,
        tokens: &TokenTensor,
        options: DecodeOptions,
    ) -> RuntimeResult<Vec<String>> {
        Ok(tokens
            .rows()
            .map(|row| decode_row(row, options.skip_special_tokens))
            .collect())
    }
}

/// Model that echoes the prompt and the image size.
#[derive(Debug, Clone)]
pub struct EchoModel {
    generate_delay: Duration,
}

#[async_trait]
impl VisionModel for EchoModel {
    async fn generate(
        &self,
        inputs: &EncodedInputs,
        options: GenerationOptions,
    ) -> RuntimeResult<TokenTensor> {
        let pixels = inputs
            .pixel_values
            .as_ref()
            .ok_or_else(|| RuntimeError::InvalidInput("missing pixel values".into()))?;
        if !self.generate_delay.is_zero() {
            tokio::time::sleep(self.generate_delay).await;
        }

        let rows = inputs
            .input_ids
            .rows()
            .map(|prompt_ids| {
                let prompt = decode_row(prompt_ids, true);
                let reply = format!("{prompt} [{}x{}]", pixels.width(), pixels.height());
                let mut new_ids = encode_text(&reply);
                new_ids.push(EOS_TOKEN);
                new_ids.truncate(options.max_new_tokens);

                let mut row = prompt_ids.to_vec();
                row.extend(new_ids);
                row
            })
            .collect();
        TokenTensor::from_rows(rows)
    }
}
