//! # vlm-worker
//!
//! Loads a vision-language model once, warms it up, and serves inference
//! requests from a host over an asynchronous message protocol.
//!
//! ```text
//! host ──HostCommand──▶ Router ──▶ ModelCache ──▶ CapabilityProbe
//!  ▲                      │            │
//!  │                      │            └──▶ VisionRuntime (processor, model)
//!  │                      ├──▶ warm_up
//!  │                      └──▶ RequestHandler ──▶ load_image / encode / generate / decode
//!  └──────WorkerEvent─────┘
//! ```
//!
//! The inference library is reached only through the [`vlm_kernel`] runtime
//! traits; [`backend::EchoRuntime`] is a deterministic implementation.

pub mod backend;
pub mod cache;
pub mod fetch;
pub mod handler;
pub mod probe;
pub mod router;
pub mod transport;
pub mod warmup;

pub use backend::EchoRuntime;
pub use cache::{ModelCache, ModelHandles};
pub use fetch::ImageFetcher;
pub use handler::{HandledRun, RequestHandler, build_prompt};
pub use probe::{
    AdapterStatus, CapabilityProbe, GpuAdapterInfo, GpuAdapterSource, ProbeError, ProbeReport,
};
pub use router::{EventSink, LastRequest, Router, WorkerState};
pub use transport::serve_json_lines;
pub use warmup::{WarmupOutcome, warm_up};
