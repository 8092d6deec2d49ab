//! Host ↔ worker message protocol.
//!
//! Host to worker:
//!
//! ```json
//! {"type": "load"}
//! {"type": "run", "data": {"text": "a cat", "url": "https://...", "task": "caption"}}
//! {"type": "reset"}
//! {"type": "cancel"}
//! ```
//!
//! Worker to host: `{"status": "loading" | "ready" | "complete" | "error" | "cancelled", ...}`
//! plus loader progress objects forwarded untouched.

use crate::error::{ErrorStage, WorkerError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// First status sent when a load starts.
pub const LOADING_MESSAGE: &str = "Loading model...";

/// Status sent between model acquisition and the warm-up pass.
pub const WARMUP_MESSAGE: &str = "Compiling shaders and warming up model...";

// ============================================================================
// Host → worker
// ============================================================================

/// Command sent by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostCommand {
    /// Load and warm up the model
    Load,
    /// Run one inference request
    Run { data: InferenceRequest },
    /// Clear transient per-request state
    Reset,
    /// Cancel in-flight inference requests
    Cancel,
    /// Any other `type`; ignored by the router
    #[serde(other)]
    Unknown,
}

impl HostCommand {
    /// Parse one JSON message.
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Wire name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            HostCommand::Load => "load",
            HostCommand::Run { .. } => "run",
            HostCommand::Reset => "reset",
            HostCommand::Cancel => "cancel",
            HostCommand::Unknown => "unknown",
        }
    }
}

/// Payload of a `run` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Free text appended after the task prefix
    pub text: String,
    /// Where to fetch the image from (http(s), data URI or file path)
    pub url: String,
    /// Task prefix, e.g. `caption en`
    pub task: String,
}

impl InferenceRequest {
    pub fn new(task: impl Into<String>, text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
            task: task.into(),
        }
    }
}

/// Output of one inference request.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    /// Decoded text, one entry per batch row
    pub texts: Vec<String>,
    /// Milliseconds between encode start and decode end
    pub elapsed_ms: f64,
}

// ============================================================================
// Worker → host
// ============================================================================

/// Loader progress report, forwarded to the host verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressEvent(Map<String, Value>);

impl ProgressEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON value; `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ProgressEvent {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Status message emitted by the worker itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusEvent {
    /// Load phase announcement
    Loading { data: String },
    /// Model loaded and warmed up
    Ready,
    /// Inference finished
    Complete { result: Vec<String>, time: f64 },
    /// A load or run failed
    Error { stage: ErrorStage, message: String },
    /// A run was cancelled by the host
    Cancelled,
}

/// Anything the worker sends to the host.
///
/// Serializes without a wrapper, so progress objects reach the host
/// exactly as the loader produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerEvent {
    Status(StatusEvent),
    Progress(ProgressEvent),
}

impl WorkerEvent {
    pub fn loading(data: impl Into<String>) -> Self {
        WorkerEvent::Status(StatusEvent::Loading { data: data.into() })
    }

    pub fn ready() -> Self {
        WorkerEvent::Status(StatusEvent::Ready)
    }

    pub fn complete(result: InferenceResult) -> Self {
        WorkerEvent::Status(StatusEvent::Complete {
            result: result.texts,
            time: result.elapsed_ms,
        })
    }

    /// Map an error to the message the host sees.
    ///
    /// Cancellation gets its own status instead of an `error`.
    pub fn failure(err: &WorkerError) -> Self {
        if err.is_cancelled() {
            return WorkerEvent::Status(StatusEvent::Cancelled);
        }
        WorkerEvent::Status(StatusEvent::Error {
            stage: err.stage(),
            message: err.to_string(),
        })
    }

    pub fn progress(event: ProgressEvent) -> Self {
        WorkerEvent::Progress(event)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, WorkerEvent::Status(StatusEvent::Ready))
    }
}
