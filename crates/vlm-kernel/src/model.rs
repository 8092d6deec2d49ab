//! Model identity and precision settings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Model artifact loaded by the worker. Fixed for the worker lifetime.
pub const DEFAULT_MODEL_ID: &str = "onnx-community/paligemma2-3b-pt-224";

/// Name of the model artifact to load (hub id or local path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_ID)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Weight quantization level of a model sub-module.
///
/// Ordered roughly from highest quality (most memory) to lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    Fp32,
    Fp16,
    Q8,
    Int8,
    Uint8,
    Q4,
    Bnb4,
    /// 4-bit weights with 16-bit float activations; needs `shader-f16`
    Q4f16,
}

impl Quantization {
    /// Whether this level relies on 16-bit float shaders.
    pub fn requires_fp16(&self) -> bool {
        matches!(self, Quantization::Fp16 | Quantization::Q4f16)
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Quantization::Fp32 => "fp32",
            Quantization::Fp16 => "fp16",
            Quantization::Q8 => "q8",
            Quantization::Int8 => "int8",
            Quantization::Uint8 => "uint8",
            Quantization::Q4 => "q4",
            Quantization::Bnb4 => "bnb4",
            Quantization::Q4f16 => "q4f16",
        };
        f.write_str(s)
    }
}

/// Per sub-module quantization used when loading the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecisionConfig {
    /// Token embedding table
    pub embed_tokens: Quantization,
    /// Vision encoder
    pub vision_encoder: Quantization,
    /// Merged text decoder
    pub decoder_model_merged: Quantization,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            embed_tokens: Quantization::Q8,
            vision_encoder: Quantization::Q8,
            decoder_model_merged: Quantization::Q4,
        }
    }
}

impl PrecisionConfig {
    /// Iterate `(sub-module name, level)` pairs in load order.
    pub fn entries(&self) -> [(&'static str, Quantization); 3] {
        [
            ("embed_tokens", self.embed_tokens),
            ("vision_encoder", self.vision_encoder),
            ("decoder_model_merged", self.decoder_model_merged),
        ]
    }
}

/// How the capability probe result feeds into [`PrecisionConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionPolicy {
    /// Load with the configured levels regardless of GPU capabilities.
    #[default]
    Static,
    /// Switch the decoder to `q4f16` when `shader-f16` is available and
    /// drop any fp16-only level back to `q4` when it is not.
    CapabilityAware,
}

impl PrecisionPolicy {
    /// Whether resolving the precision needs the probe result.
    pub fn needs_probe(&self) -> bool {
        matches!(self, PrecisionPolicy::CapabilityAware)
    }

    /// Resolve the levels to load with.
    pub fn resolve(&self, base: PrecisionConfig, supports_fp16: bool) -> PrecisionConfig {
        match self {
            PrecisionPolicy::Static => base,
            PrecisionPolicy::CapabilityAware => {
                let downgrade = |q: Quantization| match q {
                    Quantization::Fp16 => Quantization::Fp32,
                    Quantization::Q4f16 => Quantization::Q4,
                    other => other,
                };
                if supports_fp16 {
                    PrecisionConfig {
                        decoder_model_merged: Quantization::Q4f16,
                        ..base
                    }
                } else {
                    PrecisionConfig {
                        embed_tokens: downgrade(base.embed_tokens),
                        vision_encoder: downgrade(base.vision_encoder),
                        decoder_model_merged: downgrade(base.decoder_model_merged),
                    }
                }
            }
        }
    }
}
