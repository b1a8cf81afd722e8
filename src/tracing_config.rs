//! Tracing configuration for structured logging and request telemetry
//!
//! The library only emits spans and events. Hosts either install their own subscriber
//! or call [`TracingConfig::init`] / [`init_library_tracing`].

use crate::types::{ProcessingTimings, SegmentationMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Where and how subscriber output is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors
    Console,
    /// Compact console output for CI and container logs
    Compact,
    /// One JSON object per event, including the active span list
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Subscriber settings for hosts that let the pipeline install logging
#[derive(Debug)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    /// Output format
    pub format: TracingFormat,
    /// Explicit `EnvFilter` directive; wins over `verbosity`
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set output format
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Use an explicit directive such as `bgremove_pipeline=debug,ort=warn`
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive implied by `verbosity`
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Install a global subscriber for this configuration
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let directive = self
            .env_filter
            .as_deref()
            .unwrap_or_else(|| self.verbosity_to_filter());
        let registry = Registry::default().with(EnvFilter::try_new(directive)?);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        Ok(())
    }
}

/// Install a plain formatter driven by `RUST_LOG`, unless a subscriber is already set
pub fn init_library_tracing() {
    if tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish(),
    )
    .is_ok()
    {
        tracing::debug!("📚 Library tracing initialized");
    }
}

/// Span creation helpers for pipeline stages
pub mod spans {
    use crate::types::SegmentationMode;
    use tracing::{Level, Span};

    /// Span covering one background removal request
    pub fn request(request_id: &str, mode: SegmentationMode) -> Span {
        tracing::span!(
            Level::INFO,
            "remove_background",
            request_id = %request_id,
            mode = %mode,
            width = tracing::field::Empty,
            height = tracing::field::Empty
        )
    }

    /// Letterbox and tensor construction
    pub fn preprocessing(original_size: (u32, u32), target_size: u32) -> Span {
        tracing::span!(
            Level::DEBUG,
            "preprocessing",
            source_width = original_size.0,
            source_height = original_size.1,
            target_size = %target_size
        )
    }

    /// Model run, including mask output selection
    pub fn inference(mode: SegmentationMode, target_size: u32) -> Span {
        tracing::span!(
            Level::DEBUG,
            "inference",
            mode = %mode,
            target_size = %target_size
        )
    }

    /// Mask decoding, refinement and compositing
    pub fn postprocessing(step: &str) -> Span {
        tracing::span!(
            Level::DEBUG,
            "postprocessing",
            step = %step
        )
    }
}

/// Structured events emitted by the pipeline
pub mod events {
    use super::{ProcessingTimings, SegmentationMode};
    use tracing::{debug, info, warn};

    /// Per-request timing summary
    pub fn timing_summary(
        mode: SegmentationMode,
        dimensions: (u32, u32),
        timings: &ProcessingTimings,
    ) {
        info!(
            mode = %mode,
            width = dimensions.0,
            height = dimensions.1,
            queue_wait_ms = timings.queue_wait_ms,
            model_load_ms = timings.model_load_ms,
            decode_ms = timings.image_decode_ms,
            preprocessing_ms = timings.preprocessing_ms,
            inference_ms = timings.inference_ms,
            postprocessing_ms = timings.postprocessing_ms,
            encode_ms = timings.image_encode_ms,
            total_ms = timings.total_ms,
            "⏱️ Background removal complete"
        );
    }

    /// Stage-level performance metric
    pub fn stage_metric(stage: &str, duration_ms: u64) {
        debug!(stage = %stage, duration_ms = %duration_ms, "stage complete");
    }

    /// Request ended with an error
    pub fn request_failed(error: &crate::error::BgRemovalError) {
        if error.is_cancelled() {
            debug!(error = %error, "request cancelled");
        } else {
            warn!(error = %error, kind = ?error.kind(), "❌ Background removal failed");
        }
    }
}
