//! Configuration types for matting operations

use crate::error::{MatteError, Result};
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Inference engine used to run the model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            Self::Onnx
        } else {
            Self::Tract
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl BackendType {
    /// Parse a `backend[:provider]` string such as `onnx:cuda` or `tract`
    ///
    /// # Errors
    /// - Unknown backend or provider name
    /// - A provider the backend cannot use (Tract only runs on CPU)
    pub fn parse_provider_string(value: &str) -> Result<(Self, ExecutionProvider)> {
        let value = value.trim().to_ascii_lowercase();
        let (backend, provider) = match value.split_once(':') {
            Some((backend, provider)) => (backend, Some(provider)),
            None => (value.as_str(), None),
        };

        let backend = match backend {
            "onnx" => Self::Onnx,
            "tract" => Self::Tract,
            other => {
                return Err(MatteError::invalid_config(format!(
                    "Unknown backend '{other}'. Expected 'onnx' or 'tract'"
                )))
            },
        };

        let provider = match provider {
            None | Some("auto") => ExecutionProvider::Auto,
            Some("cpu") => ExecutionProvider::Cpu,
            Some("cuda") => ExecutionProvider::Cuda,
            Some("coreml") => ExecutionProvider::CoreMl,
            Some(other) => {
                return Err(MatteError::invalid_config(format!(
                    "Unknown execution provider '{other}'. Expected auto, cpu, cuda or coreml"
                )))
            },
        };

        if backend == Self::Tract && matches!(provider, ExecutionProvider::Cuda | ExecutionProvider::CoreMl) {
            return Err(MatteError::invalid_config(format!(
                "Tract backend only supports the CPU provider, got '{provider}'"
            )));
        }

        Ok((backend, provider))
    }
}

/// Alpha value used when the predicted mask carries no contrast at all
///
/// A mask whose minimum equals its maximum cannot be min-max stretched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UniformMaskPolicy {
    /// Keep every pixel (alpha 255)
    #[default]
    Opaque,
    /// Drop every pixel (alpha 0)
    Transparent,
}

impl UniformMaskPolicy {
    /// Alpha value written for every pixel of a uniform mask
    #[must_use]
    pub fn alpha(self) -> u8 {
        match self {
            Self::Opaque => u8::MAX,
            Self::Transparent => 0,
        }
    }
}

/// Upper bound accepted for either thread count
const MAX_THREADS: usize = 1024;

/// Configuration for model loading and matting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatteConfig {
    /// Inference engine
    pub backend: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Where the model artifact comes from
    pub model: ModelSpec,

    /// Alpha policy for masks without contrast
    pub uniform_mask: UniformMaskPolicy,

    /// Record and log mask statistics for every processed image
    pub debug: bool,
}

impl Default for MatteConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            model: ModelSpec::default(),
            uniform_mask: UniformMaskPolicy::default(),
            debug: false,
        }
    }
}

impl MatteConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dis_matte::{MatteConfig, ExecutionProvider, UniformMaskPolicy};
    ///
    /// let config = MatteConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .uniform_mask(UniformMaskPolicy::Transparent)
    ///     .num_threads(4)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.intra_threads, 4);
    /// ```
    #[must_use]
    pub fn builder() -> MatteConfigBuilder {
        MatteConfigBuilder::default()
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON is malformed
    /// - Resulting configuration fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| MatteError::file_io_error("read configuration", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            MatteError::invalid_config(format!(
                "Failed to parse configuration '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Thread counts above the supported maximum
    /// - Tract backend combined with a GPU execution provider
    /// - Malformed model checksum
    pub fn validate(&self) -> Result<()> {
        if self.intra_threads > MAX_THREADS {
            return Err(MatteError::config_value_error(
                "intra threads",
                self.intra_threads,
                "0-1024",
            ));
        }

        if self.inter_threads > MAX_THREADS {
            return Err(MatteError::config_value_error(
                "inter threads",
                self.inter_threads,
                "0-1024",
            ));
        }

        if self.backend == BackendType::Tract
            && matches!(
                self.execution_provider,
                ExecutionProvider::Cuda | ExecutionProvider::CoreMl
            )
        {
            return Err(MatteError::invalid_config(format!(
                "Tract backend only supports the CPU provider, got '{}'",
                self.execution_provider
            )));
        }

        self.model.validate()
    }
}

/// Builder for `MatteConfig`
#[derive(Debug, Default)]
pub struct MatteConfigBuilder {
    config: MatteConfig,
}

impl From<MatteConfig> for MatteConfigBuilder {
    /// Start from an existing configuration, e.g. one read from a file
    fn from(config: MatteConfig) -> Self {
        Self { config }
    }
}

impl MatteConfigBuilder {
    /// Set inference backend
    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set execution provider
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    /// Set number of intra-op threads
    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Set number of inter-op threads
    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both thread counts: `threads` intra-op, `threads / 2` (minimum 1) inter-op.
    /// Zero keeps both on auto-detection.
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Set the model specification
    #[must_use]
    pub fn model(mut self, model: ModelSpec) -> Self {
        self.config.model = model;
        self
    }

    /// Set the uniform mask policy
    #[must_use]
    pub fn uniform_mask(mut self, policy: UniformMaskPolicy) -> Self {
        self.config.uniform_mask = policy;
        self
    }

    /// Record mask statistics in the result metadata
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`MatteConfig::validate`]
    pub fn build(self) -> Result<MatteConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
