#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Background Removal Pipeline
//!
//! Server-side background removal with U2Net segmentation models on ONNX Runtime.
//!
//! The pipeline turns an uploaded image into a PNG with a transparent background:
//! letterbox the image into the model's square input, run inference, map the mask back
//! onto the original pixels and use it as the alpha channel. A portrait mode runs a human
//! segmentation model and refines the mask edges with a tunable strength.
//!
//! ## Features
//!
//! - **Bounded concurrency**: a fixed number of inferences run at once, the rest queue
//! - **Cooperative cancellation**: requests can be abandoned while queued or before inference
//! - **Lazy model loading**: each mode's session is created on first use and kept for the process
//! - **Optional portrait model**: general mode keeps working when it is not installed
//! - **Pixel ceiling**: oversized images are rejected from their header, before any decoding
//! - **Hardware acceleration**: CUDA, `CoreML` and CPU execution providers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_pipeline::{BackgroundRemover, CancellationToken, PipelineConfig, SegmentationMode};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::from_json_file("bgremove.json")?.apply_env_overrides()?;
//! let remover = BackgroundRemover::with_onnx(config)?;
//!
//! let upload = std::fs::read("portrait.jpg")?;
//! let cancel = CancellationToken::new();
//! let png = remover
//!     .remove_background(upload, SegmentationMode::Portrait, Some(60), &cancel)
//!     .await?;
//! std::fs::write("portrait.png", png)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime session loader with GPU acceleration support
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON output for [`TracingConfig`]
//!
//! Without `onnx`, supply your own [`SessionLoader`] to [`BackgroundRemover::new`].

pub mod api;
pub mod backends;
pub mod config;
pub mod error;
pub mod inference;
pub mod processor;
pub mod refinement;
pub mod registry;
pub mod services;
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use api::{ErrorResponse, HttpErrorMapping, UploadPolicy};
#[cfg(feature = "onnx")]
pub use backends::{OnnxSession, OnnxSessionLoader};
pub use config::{ExecutionProvider, PipelineConfig, PipelineConfigBuilder, PreprocessingConfig};
pub use error::{BgRemovalError, ErrorKind, Result};
pub use inference::{select_mask_output, InferenceSession, OutputTensor, SessionLoader};
pub use processor::BackgroundRemover;
pub use refinement::{RefinementConfig, RefinementCurve};
pub use registry::{ModelRegistry, RegistryStats};
pub use services::PngOutput;
pub use tracing_config::{init_library_tracing, TracingConfig, TracingFormat};
pub use types::{
    EdgeStrength, LetterboxPadding, ProcessingTimings, RemovalResult, SegmentationMode,
};
pub use utils::ImagePreprocessor;

// Re-exported so callers need not depend on tokio-util directly
pub use tokio_util::sync::CancellationToken;
