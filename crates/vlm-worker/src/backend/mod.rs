//! Built-in runtimes.
//!
//! Real inference libraries plug in by implementing
//! [`VisionRuntime`](vlm_kernel::VisionRuntime); the echo runtime here needs
//! no weights and is what the CLI runs by default.

pub mod echo;

pub use echo::{EchoModel, EchoProcessor, EchoRuntime};
