//! Core types for background removal operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which segmentation model a request should run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMode {
    /// General-purpose salient object segmentation
    General,
    /// Human segmentation, followed by edge refinement
    Portrait,
}

impl SegmentationMode {
    /// All modes, in registry order
    pub const ALL: [Self; 2] = [Self::General, Self::Portrait];
}

impl Default for SegmentationMode {
    fn default() -> Self {
        Self::General
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Portrait => write!(f, "portrait"),
        }
    }
}

impl FromStr for SegmentationMode {
    type Err = crate::error::BgRemovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "portrait" => Ok(Self::Portrait),
            other => Err(crate::error::BgRemovalError::invalid_input(format!(
                "Unknown segmentation mode '{}'. Expected 'general' or 'portrait'",
                other
            ))),
        }
    }
}

/// Portrait edge strength in `0..=100`
///
/// Out-of-range requests are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeStrength(u8);

impl EdgeStrength {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 100;
    pub const NEUTRAL: u8 = 50;

    /// Build from any integer, clamping into range
    #[must_use]
    pub fn clamped(value: i32) -> Self {
        Self(value.clamp(i32::from(Self::MIN), i32::from(Self::MAX)) as u8)
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Signed offset from neutral in `[-1.0, 1.0]`
    #[must_use]
    pub fn offset(self) -> f32 {
        (f32::from(self.0) - f32::from(Self::NEUTRAL)) / f32::from(Self::NEUTRAL)
    }
}

impl Default for EdgeStrength {
    fn default() -> Self {
        Self(Self::NEUTRAL)
    }
}

impl From<Option<i32>> for EdgeStrength {
    fn from(value: Option<i32>) -> Self {
        value.map_or_else(Self::default, Self::clamped)
    }
}

/// How the source image was placed into the model's square input
///
/// Produced by preprocessing and consumed by the inverse transform on the mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxPadding {
    /// Left offset of the scaled image inside the canvas
    pub left: u32,
    /// Top offset of the scaled image inside the canvas
    pub top: u32,
    /// Width of the scaled image
    pub scaled_width: u32,
    /// Height of the scaled image
    pub scaled_height: u32,
    /// Scale factor applied to the source
    pub scale: f32,
    /// Side length of the square canvas
    pub target_size: u32,
}

/// Detailed timing breakdown for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Time spent waiting for a concurrency slot
    pub queue_wait_ms: u64,

    /// Model loading time (first call per mode only)
    pub model_load_ms: u64,

    /// Image decoding from bytes
    pub image_decode_ms: u64,

    /// Letterbox and tensor conversion
    pub preprocessing_ms: u64,

    /// ONNX Runtime inference execution
    pub inference_ms: u64,

    /// Mask decode, inverse letterbox, refinement and compositing
    pub postprocessing_ms: u64,

    /// PNG encoding
    pub image_encode_ms: u64,

    /// Total end-to-end processing time
    pub total_ms: u64,
}

/// Result of a background removal request
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// PNG-encoded RGBA output
    pub png_bytes: Vec<u8>,
    /// Output width, always the source width
    pub width: u32,
    /// Output height, always the source height
    pub height: u32,
    /// Mode the request ran in
    pub mode: SegmentationMode,
    /// Per-stage timings
    pub timings: ProcessingTimings,
    /// Correlation id used in telemetry
    pub request_id: String,
    /// When processing finished
    pub completed_at: DateTime<Utc>,
}

impl RemovalResult {
    /// Consume the result, keeping only the encoded bytes
    #[must_use]
    pub fn into_png_bytes(self) -> Vec<u8> {
        self.png_bytes
    }
}
