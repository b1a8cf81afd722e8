//! Pipeline error type and its caller-facing classification

use crate::types::SegmentationMode;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline result alias
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Coarse classification of a failure, used by callers to decide what to tell the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required model missing or configuration invalid
    Configuration,
    /// Decoded pixel count exceeds the configured ceiling
    InputTooLarge,
    /// Image cannot be decoded or the model produced no usable mask
    InvalidInput,
    /// Anything else raised during preprocessing, inference or encoding
    Unknown,
    /// The caller's cancellation token fired
    Cancelled,
}

/// Everything that can fail while removing a background
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// No model file is installed for the requested mode
    #[error("Model not installed for {mode} mode: {path}")]
    ModelNotInstalled {
        mode: SegmentationMode,
        path: String,
    },

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Image exceeds the pixel ceiling
    #[error("Image too large: {width}x{height} exceeds the limit of {max_pixels} pixels")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    /// Input could not be turned into a mask
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error surfaced by the `image` crate outside decoding
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Model runtime failure
    #[error("Inference error: {0}")]
    Inference(String),

    /// Pre/post-processing or encoding errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// Input/output errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Broken internal invariant, e.g. a panicked blocking task
    #[error("Internal error: {0}")]
    Internal(String),

    /// Cooperative cancellation was observed at a checkpoint
    #[error("Operation cancelled")]
    Cancelled,
}

impl BgRemovalError {
    pub fn model_not_installed(mode: SegmentationMode, path: Option<&PathBuf>) -> Self {
        Self::ModelNotInstalled {
            mode,
            path: path.map_or_else(
                || "<not configured>".to_string(),
                |p| p.display().to_string(),
            ),
        }
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Configuration error naming the parameter, its accepted range and a suggested value
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Try {rec}."),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "{parameter} = {value} is out of range (expected {valid_range}).{recommendation}"
        ))
    }

    /// Processing error tagged with the stage that failed
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" [{info}]"),
            None => String::new(),
        };

        Self::Processing(format!(
            "{stage} stage failed{input_context}: {details}"
        ))
    }

    /// Classify this error for the caller
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModelNotInstalled { .. } | Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::ImageTooLarge { .. } => ErrorKind::InputTooLarge,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Image(image::ImageError::Decoding(_) | image::ImageError::Unsupported(_)) => {
                ErrorKind::InvalidInput
            },
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Image(_)
            | Self::Inference(_)
            | Self::Processing(_)
            | Self::Io(_)
            | Self::Internal(_) => ErrorKind::Unknown,
        }
    }

    /// Whether this error only reports that the caller cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Message suitable for showing to an end user
    ///
    /// Configuration and size problems get actionable text. Decode and runtime
    /// failures collapse into a generic message so internals never reach the client.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ModelNotInstalled { mode, .. } => format!(
                "The {} background removal model is not installed on this server.",
                mode
            ),
            Self::InvalidConfig(_) => {
                "Background removal is not configured correctly on this server.".to_string()
            },
            Self::ImageTooLarge { max_pixels, .. } => format!(
                "The image is too large. Please upload an image with at most {} megapixels.",
                max_pixels / 1_000_000
            ),
            Self::Cancelled => "The request was cancelled.".to_string(),
            _ => "Processing failed, please try again.".to_string(),
        }
    }
}
