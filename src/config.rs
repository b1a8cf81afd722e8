//! Configuration types for the background removal pipeline

use crate::error::{BgRemovalError, Result};
use crate::refinement::RefinementConfig;
use crate::types::SegmentationMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the general model path
pub const ENV_GENERAL_MODEL: &str = "BGREMOVE_GENERAL_MODEL";
/// Environment variable overriding the portrait model path
pub const ENV_PORTRAIT_MODEL: &str = "BGREMOVE_PORTRAIT_MODEL";
/// Environment variable overriding the concurrency limit
pub const ENV_MAX_CONCURRENT_INFERENCES: &str = "BGREMOVE_MAX_CONCURRENT_INFERENCES";
/// Environment variable toggling telemetry (`true`/`false`/`1`/`0`)
pub const ENV_TELEMETRY: &str = "BGREMOVE_TELEMETRY";

/// Default pixel ceiling (40 megapixels)
pub const DEFAULT_MAX_PIXELS: u64 = 40_000_000;
/// Default U2Net input side length
pub const DEFAULT_INPUT_SIZE: u32 = 320;
/// Default number of inferences allowed in flight
pub const DEFAULT_MAX_CONCURRENT_INFERENCES: usize = 2;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// First available of CUDA and `CoreML`, CPU otherwise
    Auto,
    /// CPU only
    Cpu,
    /// NVIDIA CUDA
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl Default for ExecutionProvider {
    fn default() -> Self {
        Self::Auto
    }
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

/// Tensor preparation parameters handed to the preprocessor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessingConfig {
    /// Side length of the square model input
    pub target_size: u32,
    /// Per-channel mean (RGB)
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation (RGB)
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_INPUT_SIZE,
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        }
    }
}

/// Configuration for the background removal pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path to the general segmentation model
    pub general_model_path: Option<PathBuf>,

    /// Path to the portrait segmentation model (optional install)
    pub portrait_model_path: Option<PathBuf>,

    /// Maximum number of inferences running at once
    pub max_concurrent_inferences: usize,

    /// Emit per-request timing telemetry
    pub telemetry_enabled: bool,

    /// Largest accepted width x height
    pub max_pixels: u64,

    /// Side length of the model's square input
    pub input_size: u32,

    /// Per-channel normalization mean (RGB)
    pub normalization_mean: [f32; 3],

    /// Per-channel normalization standard deviation (RGB)
    pub normalization_std: [f32; 3],

    /// Portrait refinement curve parameters
    pub refinement: RefinementConfig,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// ONNX Runtime intra-op threads per session, 0 picks the core count
    pub intra_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let preprocessing = PreprocessingConfig::default();
        Self {
            general_model_path: None,
            portrait_model_path: None,
            max_concurrent_inferences: DEFAULT_MAX_CONCURRENT_INFERENCES,
            telemetry_enabled: true,
            max_pixels: DEFAULT_MAX_PIXELS,
            input_size: preprocessing.target_size,
            normalization_mean: preprocessing.normalization_mean,
            normalization_std: preprocessing.normalization_std,
            refinement: RefinementConfig::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
        }
    }
}

impl PipelineConfig {
    /// Start from defaults
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_pipeline::PipelineConfig;
    ///
    /// let config = PipelineConfig::builder()
    ///     .general_model_path("models/u2net.onnx")
    ///     .max_concurrent_inferences(4)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_concurrent_inferences, 4);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Parse configuration from a JSON document
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// - Malformed JSON or wrongly typed fields
    /// - Values failing [`PipelineConfig::validate`]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            BgRemovalError::invalid_config(format!("Failed to parse pipeline configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    ///
    /// # Errors
    /// - File cannot be read
    /// - Same conditions as [`PipelineConfig::from_json_str`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BgRemovalError::invalid_config(format!(
                "Failed to read configuration file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&contents)
    }

    /// Apply `BGREMOVE_*` environment overrides on top of this configuration
    ///
    /// # Errors
    /// - Unparseable numeric or boolean override
    /// - Resulting configuration fails validation
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_GENERAL_MODEL) {
            self.general_model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(ENV_PORTRAIT_MODEL) {
            self.portrait_model_path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_INFERENCES) {
            self.max_concurrent_inferences = value.trim().parse().map_err(|_| {
                BgRemovalError::invalid_config(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_MAX_CONCURRENT_INFERENCES, value
                ))
            })?;
        }
        if let Some(value) = lookup(ENV_TELEMETRY) {
            self.telemetry_enabled = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                _ => {
                    return Err(BgRemovalError::invalid_config(format!(
                        "{} must be a boolean, got '{}'",
                        ENV_TELEMETRY, value
                    )))
                },
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the pipeline cannot run with
    ///
    /// Model paths are not checked here; a missing model only fails the requests
    /// that need it.
    ///
    /// # Errors
    /// - Zero concurrency limit, pixel ceiling or input size
    /// - Non-positive normalization standard deviation
    /// - Invalid refinement parameters
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_inferences == 0 {
            return Err(BgRemovalError::config_value_error(
                "max_concurrent_inferences",
                self.max_concurrent_inferences,
                ">= 1",
                Some(DEFAULT_MAX_CONCURRENT_INFERENCES),
            ));
        }

        if self.max_pixels == 0 {
            return Err(BgRemovalError::config_value_error(
                "max_pixels",
                self.max_pixels,
                ">= 1",
                Some(DEFAULT_MAX_PIXELS),
            ));
        }

        if self.input_size == 0 {
            return Err(BgRemovalError::config_value_error(
                "input_size",
                self.input_size,
                ">= 1",
                Some(DEFAULT_INPUT_SIZE),
            ));
        }

        if self
            .normalization_std
            .iter()
            .any(|std| !std.is_finite() || *std <= 0.0)
        {
            return Err(BgRemovalError::invalid_config(format!(
                "normalization_std values must be positive, got {:?}",
                self.normalization_std
            )));
        }

        self.refinement.validate()
    }

    /// Configured model path for a mode
    #[must_use]
    pub fn model_path(&self, mode: SegmentationMode) -> Option<&Path> {
        match mode {
            SegmentationMode::General => self.general_model_path.as_deref(),
            SegmentationMode::Portrait => self.portrait_model_path.as_deref(),
        }
    }

    /// Preprocessing parameters derived from this configuration
    #[must_use]
    pub fn preprocessing(&self) -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: self.input_size,
            normalization_mean: self.normalization_mean,
            normalization_std: self.normalization_std,
        }
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the general model path
    #[must_use]
    pub fn general_model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.general_model_path = Some(path.into());
        self
    }

    /// Set the portrait model path
    #[must_use]
    pub fn portrait_model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.portrait_model_path = Some(path.into());
        self
    }

    /// Set the concurrency limit
    #[must_use]
    pub fn max_concurrent_inferences(mut self, limit: usize) -> Self {
        self.config.max_concurrent_inferences = limit;
        self
    }

    /// Enable or disable telemetry
    #[must_use]
    pub fn telemetry_enabled(mut self, enabled: bool) -> Self {
        self.config.telemetry_enabled = enabled;
        self
    }

    /// Set the pixel ceiling
    #[must_use]
    pub fn max_pixels(mut self, max_pixels: u64) -> Self {
        self.config.max_pixels = max_pixels;
        self
    }

    /// Set the model input side length
    #[must_use]
    pub fn input_size(mut self, size: u32) -> Self {
        self.config.input_size = size;
        self
    }

    /// Set normalization mean and standard deviation
    #[must_use]
    pub fn normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.config.normalization_mean = mean;
        self.config.normalization_std = std;
        self
    }

    /// Set the portrait refinement parameters
    #[must_use]
    pub fn refinement(mut self, refinement: RefinementConfig) -> Self {
        self.config.refinement = refinement;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Same conditions as [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
