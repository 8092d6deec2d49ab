//! # vlm-kernel
//!
//! Shared vocabulary of the vision-language worker:
//!
//! - [`protocol`]: host ↔ worker messages
//! - [`runtime`]: traits an inference library implements to be driven by the worker
//! - [`tensor`]: the few tensor/image containers crossing that boundary
//! - [`model`]: model identity and quantization settings
//! - [`config`]: file + environment configuration
//! - [`error`]: runtime and worker error types

pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod runtime;
pub mod tensor;

pub use config::{ConfigError, ConfigResult, WorkerConfig};
pub use error::{ErrorStage, RuntimeError, RuntimeResult, WorkerError, WorkerResult};
pub use model::{ModelId, PrecisionConfig, PrecisionPolicy, Quantization};
pub use protocol::{
    HostCommand, InferenceRequest, InferenceResult, ProgressEvent, StatusEvent, WorkerEvent,
};
pub use runtime::{
    DecodeOptions, GenerationOptions, ProgressCallback, Processor, VisionModel, VisionRuntime,
};
pub use tensor::{EncodedInputs, ImageInput, PixelTensor, RawImage, TokenTensor};
