//! Error types for the worker.
//!
//! Two layers:
//! - [`RuntimeError`]: failures reported by the inference runtime (the
//!   collaborator that owns weights, tensors and tokenization)
//! - [`WorkerError`]: failures of a worker operation, tagged with the phase
//!   they happened in so the router can report them to the host

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Runtime errors
// ============================================================================

/// Failure reported by a [`VisionRuntime`](crate::runtime::VisionRuntime)
/// or one of the handles it produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Fetching weights, configs or images failed
    #[error("Network error: {0}")]
    Network(String),

    /// The runtime cannot run this model or input on the current device
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Allocation failed on the device or host
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Input could not be interpreted (bad URL, undecodable image, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Any other backend fault
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

// ============================================================================
// Worker errors
// ============================================================================

/// Phase of the request lifecycle an error belongs to.
///
/// Serialized into the `stage` field of `{"status":"error"}` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    /// Model/processor acquisition or warm-up
    Load,
    /// A single inference request
    Run,
}

impl std::fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorStage::Load => write!(f, "load"),
            ErrorStage::Run => write!(f, "run"),
        }
    }
}

/// Worker operation error
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// Processor (tokenizer + image preprocessor) could not be loaded
    #[error("Processor load failed: {0}")]
    ProcessorLoad(#[source] RuntimeError),

    /// Model weights could not be loaded
    #[error("Model load failed: {0}")]
    ModelLoad(#[source] RuntimeError),

    /// Warm-up pass failed while running in strict mode
    #[error("Warm-up failed: {0}")]
    Warmup(#[source] RuntimeError),

    /// Request image could not be fetched or decoded
    #[error("Image load failed for {url}: {source}")]
    ImageLoad {
        url: String,
        #[source]
        source: RuntimeError,
    },

    /// Encoding image + prompt failed
    #[error("Encoding failed: {0}")]
    Encode(#[source] RuntimeError),

    /// Generation failed
    #[error("Generation failed: {0}")]
    Generation(#[source] RuntimeError),

    /// Decoding generated tokens failed
    #[error("Decoding failed: {0}")]
    Decode(#[source] RuntimeError),

    /// The request was cancelled by the host
    #[error("Request cancelled")]
    Cancelled,
}

impl WorkerError {
    /// Lifecycle phase this error is reported under.
    pub fn stage(&self) -> ErrorStage {
        match self {
            WorkerError::ProcessorLoad(_) | WorkerError::ModelLoad(_) | WorkerError::Warmup(_) => {
                ErrorStage::Load
            }
            WorkerError::ImageLoad { .. }
            | WorkerError::Encode(_)
            | WorkerError::Generation(_)
            | WorkerError::Decode(_)
            | WorkerError::Cancelled => ErrorStage::Run,
        }
    }

    /// Returns true for [`WorkerError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
    }
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;
