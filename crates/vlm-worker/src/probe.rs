//! GPU capability probe
//!
//! Answers one question: can the runtime use 16-bit float shaders
//! (`shader-f16`)? The answer is computed once per process and cached.
//!
//! Detection uses process probes (`vulkaninfo`) rather than linking to GPU
//! libraries, so the crate builds the same with or without a GPU stack.
//! Every failure (no binary, no device, permission denied) reads as "no".

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use vlm_kernel::config::{ProbeSection, ProbeSource};

/// Adapter feature name for 16-bit float shader support.
pub const SHADER_F16: &str = "shader-f16";

/// A GPU adapter as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuAdapterInfo {
    /// Device name
    pub name: String,
    /// Declared feature names
    pub features: BTreeSet<String>,
}

impl GpuAdapterInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: BTreeSet::new(),
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

/// Why an adapter query failed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The query mechanism itself is missing (binary not installed, ...)
    #[error("adapter query unavailable: {0}")]
    Unavailable(String),

    /// The query ran but failed
    #[error("adapter query failed: {0}")]
    Query(String),
}

/// Source of GPU adapter information.
#[async_trait]
pub trait GpuAdapterSource: Send + Sync {
    fn name(&self) -> &str;

    /// Request the default adapter; `Ok(None)` when there is none.
    async fn request_adapter(&self) -> Result<Option<GpuAdapterInfo>, ProbeError>;
}

// ============================================================================
// Adapter sources
// ============================================================================

/// Queries the first Vulkan device through `vulkaninfo`.
#[derive(Debug, Clone)]
pub struct VulkanInfoSource {
    program: String,
}

impl Default for VulkanInfoSource {
    fn default() -> Self {
        Self {
            program: "vulkaninfo".to_string(),
        }
    }
}

impl VulkanInfoSource {
    /// Use a different `vulkaninfo` binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl GpuAdapterSource for VulkanInfoSource {
    fn name(&self) -> &str {
        "vulkaninfo"
    }

    async fn request_adapter(&self) -> Result<Option<GpuAdapterInfo>, ProbeError> {
        let output = tokio::process::Command::new(&self.program)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProbeError::Unavailable(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(ProbeError::Query(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        Ok(parse_vulkaninfo(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extract the first device and its fp16 support from `vulkaninfo` output.
///
/// Looks for `deviceName = ...` and `shaderFloat16 = true` lines; returns
/// `None` when no device is listed.
pub fn parse_vulkaninfo(text: &str) -> Option<GpuAdapterInfo> {
    let mut name = None;
    let mut fp16 = false;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "deviceName" if name.is_none() => name = Some(value.trim().to_string()),
            "shaderFloat16" if value.trim() == "true" => fp16 = true,
            _ => {}
        }
    }

    let mut adapter = GpuAdapterInfo::new(name?);
    if fp16 {
        adapter.features.insert(SHADER_F16.to_string());
    }
    Some(adapter)
}

/// Reports no adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGpuSource;

#[async_trait]
impl GpuAdapterSource for NoGpuSource {
    fn name(&self) -> &str {
        "none"
    }

    async fn request_adapter(&self) -> Result<Option<GpuAdapterInfo>, ProbeError> {
        Ok(None)
    }
}

/// Reports a fixed adapter, counting how often it was asked.
#[derive(Debug, Default)]
pub struct FixedAdapterSource {
    adapter: Option<GpuAdapterInfo>,
    queries: AtomicUsize,
}

impl FixedAdapterSource {
    pub fn new(adapter: Option<GpuAdapterInfo>) -> Self {
        Self {
            adapter,
            queries: AtomicUsize::new(0),
        }
    }

    /// Number of `request_adapter` calls so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GpuAdapterSource for FixedAdapterSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn request_adapter(&self) -> Result<Option<GpuAdapterInfo>, ProbeError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.adapter.clone())
    }
}

/// The adapter source selected by `probe.source`.
pub fn adapter_source(source: ProbeSource) -> Arc<dyn GpuAdapterSource> {
    match source {
        ProbeSource::Vulkan => Arc::new(VulkanInfoSource::default()),
        ProbeSource::None => Arc::new(NoGpuSource),
    }
}

// ============================================================================
// Probe
// ============================================================================

/// What the probe found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterStatus {
    /// Answer set by config; no adapter was queried
    Forced,
    Found(GpuAdapterInfo),
    Missing,
    /// The source could not be queried
    Unavailable(String),
}

/// Memoized outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub adapter: AdapterStatus,
    pub supports_fp16: bool,
}

impl ProbeReport {
    fn forced(supports_fp16: bool) -> Self {
        Self {
            adapter: AdapterStatus::Forced,
            supports_fp16,
        }
    }
}

/// Memoized `shader-f16` check.
pub struct CapabilityProbe {
    source: Arc<dyn GpuAdapterSource>,
    report: OnceCell<ProbeReport>,
}

impl CapabilityProbe {
    pub fn new(source: Arc<dyn GpuAdapterSource>) -> Self {
        Self {
            source,
            report: OnceCell::new(),
        }
    }

    /// A probe whose answer is fixed up front; the source is never queried.
    pub fn fixed(supports_fp16: bool) -> Self {
        Self {
            source: Arc::new(NoGpuSource),
            report: OnceCell::new_with(Some(ProbeReport::forced(supports_fp16))),
        }
    }

    /// Build the probe described by the `probe` config section.
    pub fn from_config(section: &ProbeSection) -> Self {
        if let Some(forced) = section.force_fp16 {
            return Self::fixed(forced);
        }
        Self::new(adapter_source(section.source))
    }

    /// Whether 16-bit float shaders are usable. Queries the source at most once.
    pub async fn supports_fp16(&self) -> bool {
        self.report().await.supports_fp16
    }

    /// Adapter details behind the answer, probing on first use.
    pub async fn report(&self) -> &ProbeReport {
        self.report.get_or_init(|| self.query()).await
    }

    /// The memoized answer, if the probe already ran.
    pub fn cached(&self) -> Option<bool> {
        self.report.get().map(|r| r.supports_fp16)
    }

    async fn query(&self) -> ProbeReport {
        let adapter = match self.source.request_adapter().await {
            Ok(Some(adapter)) => {
                tracing::info!(
                    source = self.source.name(),
                    adapter = %adapter.name,
                    shader_f16 = adapter.has_feature(SHADER_F16),
                    "GPU adapter probed"
                );
                AdapterStatus::Found(adapter)
            }
            Ok(None) => {
                tracing::info!(source = self.source.name(), "no GPU adapter found");
                AdapterStatus::Missing
            }
            Err(e) => {
                tracing::debug!(source = self.source.name(), error = %e, "GPU probe failed");
                AdapterStatus::Unavailable(e.to_string())
            }
        };
        let supports_fp16 = matches!(&adapter, AdapterStatus::Found(a) if a.has_feature(SHADER_F16));
        ProbeReport {
            adapter,
            supports_fp16,
        }
    }
}

impl std::fmt::Debug for CapabilityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProbe")
            .field("source", &self.source.name())
            .field("supports_fp16", &self.cached())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
