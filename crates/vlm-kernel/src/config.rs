//! Worker configuration
//!
//! Settings can come from a file (YAML, TOML or JSON, picked by extension)
//! and from `VLM_WORKER__<SECTION>__<KEY>` environment variables, which win
//! over the file. `${VAR}` and `$VAR` references inside the file are
//! substituted before parsing. Every field has a default, so an empty file
//! or no file at all is valid.

use crate::model::{ModelId, PrecisionConfig, PrecisionPolicy};
use config::{Config as Cfg, Environment, File, FileFormat};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "VLM_WORKER";

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// ============================================================================
// Sections
// ============================================================================

/// Which model to load and at what precision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub id: ModelId,
    pub precision: PrecisionConfig,
    pub precision_policy: PrecisionPolicy,
}

/// Where the capability probe looks for a GPU adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeSource {
    /// Query `vulkaninfo`
    #[default]
    Vulkan,
    /// Assume no GPU
    None,
}

/// Capability probe settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub source: ProbeSource,
    /// Skip probing and report this value instead
    pub force_fp16: Option<bool>,
}

/// Warm-up pass settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupSection {
    pub enabled: bool,
    /// Side length of the square all-zero warm-up image
    pub image_size: usize,
    pub prompt: String,
    /// Fail the load when warm-up fails instead of logging and continuing
    pub strict: bool,
}

impl Default for WarmupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            image_size: 768,
            prompt: "a".to_string(),
            strict: false,
        }
    }
}

/// Per-request generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    pub max_new_tokens: usize,
    pub skip_special_tokens: bool,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            max_new_tokens: 100,
            skip_special_tokens: true,
        }
    }
}

/// Image fetching settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSection {
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
    /// Refuse images larger than this many bytes
    pub max_bytes: usize,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub model: ModelSection,
    pub probe: ProbeSection,
    pub warmup: WarmupSection,
    pub generation: GenerationSection,
    pub image: ImageSection,
}

impl WorkerConfig {
    /// Use a different model artifact.
    pub fn with_model_id(mut self, id: impl Into<String>) -> Self {
        self.model.id = ModelId::new(id);
        self
    }

    pub fn with_precision_policy(mut self, policy: PrecisionPolicy) -> Self {
        self.model.precision_policy = policy;
        self
    }

    /// Set the generation token budget.
    pub fn with_max_new_tokens(mut self, tokens: usize) -> ConfigResult<Self> {
        if tokens == 0 {
            return Err(ConfigError::Invalid("max_new_tokens must be > 0".into()));
        }
        self.generation.max_new_tokens = tokens;
        Ok(self)
    }

    /// Set the warm-up image side length.
    pub fn with_warmup_size(mut self, size: usize) -> ConfigResult<Self> {
        if size == 0 {
            return Err(ConfigError::Invalid("warmup image_size must be > 0".into()));
        }
        self.warmup.image_size = size;
        Ok(self)
    }

    pub fn without_warmup(mut self) -> Self {
        self.warmup.enabled = false;
        self
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.model.id.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid("model id must not be empty".into()));
        }
        if self.generation.max_new_tokens == 0 {
            return Err(ConfigError::Invalid("max_new_tokens must be > 0".into()));
        }
        if self.warmup.enabled && self.warmup.image_size == 0 {
            return Err(ConfigError::Invalid("warmup image_size must be > 0".into()));
        }
        if self.image.timeout_secs == 0 {
            return Err(ConfigError::Invalid("image timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Load from an optional file plus environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        tracing::debug!(path = ?path, prefix = ENV_PREFIX, "loading worker config");
        let config: WorkerConfig = match path {
            Some(p) => load_with_env(p, ENV_PREFIX)?,
            None => from_env(ENV_PREFIX)?,
        };
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Loaders
// ============================================================================

static BRACED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid braced env regex")
});
static BARE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("valid bare env regex")
});

/// Detect configuration format from file extension
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute `${VAR}` and `$VAR` references with environment values.
///
/// Unset variables are left as written.
pub fn substitute_env_vars(content: &str) -> String {
    let braced = BRACED_VAR.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });
    BARE_VAR
        .replace_all(&braced, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Parse configuration from a string with an explicit format.
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content);

    Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Load configuration from a file with environment variable overrides.
///
/// Nested keys use `__`, e.g. `VLM_WORKER__GENERATION__MAX_NEW_TOKENS=64`.
pub fn load_with_env<T>(path: &Path, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content);

    Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .add_source(env_source(env_prefix))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Build configuration from environment variables alone.
pub fn from_env<T>(env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    Cfg::builder()
        .add_source(env_source(env_prefix))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

fn env_source(prefix: &str) -> Environment {
    Environment::with_prefix(prefix)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
