//! Bounded-concurrency background removal pipeline
//!
//! Every request waits for a slot on a shared semaphore, then runs its CPU-bound body
//! on the blocking thread pool:
//!
//! 1. probe dimensions and enforce the pixel ceiling
//! 2. resolve the model session for the mode
//! 3. decode, letterbox and encode the input tensor
//! 4. run inference and pick the mask output
//! 5. decode the mask and undo the letterbox
//! 6. refine the mask (portrait mode only)
//! 7. composite and encode as PNG
//!
//! Cancellation is observed while queued, right after acquiring a slot and right before
//! inference. A running inference is never interrupted; its slot is released only when
//! the blocking body finishes, even if the caller has gone away.

use crate::{
    config::PipelineConfig,
    error::{BgRemovalError, Result},
    inference::{select_mask_output, SessionLoader},
    refinement::RefinementCurve,
    registry::ModelRegistry,
    services::PngOutput,
    tracing_config::{events, spans},
    types::{EdgeStrength, ProcessingTimings, RemovalResult, SegmentationMode},
    utils::{composite, decode_mask, invert_letterbox, ImagePreprocessor},
};
use image::{DynamicImage, ImageReader};
use instant::Instant;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

struct RemoverInner {
    config: PipelineConfig,
    registry: ModelRegistry,
    semaphore: Arc<Semaphore>,
}

/// Background removal service
///
/// Cheap to clone; clones share the model registry and the concurrency limit.
#[derive(Clone)]
pub struct BackgroundRemover {
    inner: Arc<RemoverInner>,
}

impl std::fmt::Debug for BackgroundRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemover")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("available_permits", &self.available_permits())
            .finish()
    }
}

impl BackgroundRemover {
    /// Create a remover that loads sessions through `loader`
    ///
    /// Models are not loaded here; each mode loads on its first request.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: PipelineConfig, loader: Arc<dyn SessionLoader>) -> Result<Self> {
        config.validate()?;

        let registry = ModelRegistry::from_config(&config, loader);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_inferences));

        tracing::info!(
            max_concurrent_inferences = config.max_concurrent_inferences,
            general_installed = registry.is_installed(SegmentationMode::General),
            portrait_installed = registry.is_installed(SegmentationMode::Portrait),
            "background remover ready"
        );

        Ok(Self {
            inner: Arc::new(RemoverInner {
                config,
                registry,
                semaphore,
            }),
        })
    }

    /// Create a remover backed by ONNX Runtime
    ///
    /// Each loaded model gets one session per inference slot, so requests on the same
    /// mode run side by side up to `max_concurrent_inferences`.
    ///
    /// # Errors
    /// - Invalid configuration
    ///
    /// # Examples
    /// ```rust,no_run
    /// use bgremove_pipeline::{
    ///     BackgroundRemover, CancellationToken, PipelineConfig, SegmentationMode,
    /// };
    ///
    /// # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
    /// let config = PipelineConfig::builder()
    ///     .general_model_path("models/u2net.onnx")
    ///     .portrait_model_path("models/u2net_human_seg.onnx")
    ///     .build()?;
    /// let remover = BackgroundRemover::with_onnx(config)?;
    /// let cancel = CancellationToken::new();
    ///
    /// let png = remover
    ///     .remove_background(upload, SegmentationMode::Portrait, Some(70), &cancel)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(feature = "onnx")]
    pub fn with_onnx(config: PipelineConfig) -> Result<Self> {
        let loader = crate::backends::OnnxSessionLoader::new(
            config.execution_provider,
            config.intra_threads,
        )
        .with_sessions_per_model(config.max_concurrent_inferences);
        Self::new(config, Arc::new(loader))
    }

    /// Remove the background from an encoded image, returning PNG bytes
    ///
    /// `portrait_edge_strength` is clamped into `0..=100` and ignored in general mode.
    ///
    /// # Errors
    /// - `ImageTooLarge` when width x height exceeds the pixel ceiling
    /// - `ModelNotInstalled` when the mode's model file is missing
    /// - `InvalidInput` / `Image` for undecodable input or unusable model output
    /// - `Cancelled` when `cancel` fires before inference starts
    /// - Inference and encoding failures
    pub async fn remove_background(
        &self,
        image_bytes: impl Into<Vec<u8>>,
        mode: SegmentationMode,
        portrait_edge_strength: Option<i32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.remove_background_detailed(image_bytes, mode, portrait_edge_strength, cancel)
            .await
            .map(RemovalResult::into_png_bytes)
    }

    /// Same pipeline as [`BackgroundRemover::remove_background`], with timings and metadata
    ///
    /// # Errors
    /// - Same conditions as [`BackgroundRemover::remove_background`]
    pub async fn remove_background_detailed(
        &self,
        image_bytes: impl Into<Vec<u8>>,
        mode: SegmentationMode,
        portrait_edge_strength: Option<i32>,
        cancel: &CancellationToken,
    ) -> Result<RemovalResult> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = spans::request(&request_id, mode);
        let strength = EdgeStrength::from(portrait_edge_strength);

        let result = self
            .run_request(image_bytes.into(), mode, strength, cancel, request_id)
            .instrument(span.clone())
            .await;

        if let Err(error) = &result {
            span.in_scope(|| events::request_failed(error));
        }
        result
    }

    /// Load the session for `mode` ahead of the first request
    ///
    /// # Errors
    /// - `ModelNotInstalled` when the mode's model file is missing
    /// - Loader failures
    pub async fn preload(&self, mode: SegmentationMode) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.registry.get_or_load(mode).map(|_| ()))
            .await
            .map_err(|e| BgRemovalError::internal(format!("Model preload task failed: {e}")))?
    }

    /// Number of inference slots currently free
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    async fn run_request(
        &self,
        image_bytes: Vec<u8>,
        mode: SegmentationMode,
        strength: EdgeStrength,
        cancel: &CancellationToken,
        request_id: String,
    ) -> Result<RemovalResult> {
        let total_start = Instant::now();

        let permit = self.acquire_slot(cancel).await?;
        let queue_wait_ms = elapsed_ms(total_start);

        if cancel.is_cancelled() {
            return Err(BgRemovalError::Cancelled);
        }

        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();
        let span = Span::current();

        let (png_bytes, width, height, mut timings) = tokio::task::spawn_blocking(move || {
            // Held until the body returns, whether or not anyone still awaits it
            let _permit = permit;
            span.in_scope(|| inner.process(&image_bytes, mode, strength, &cancel))
        })
        .await
        .map_err(|e| BgRemovalError::internal(format!("Background removal task failed: {e}")))??;

        timings.queue_wait_ms = queue_wait_ms;
        timings.total_ms = elapsed_ms(total_start);

        if self.inner.config.telemetry_enabled {
            events::timing_summary(mode, (width, height), &timings);
        }

        Ok(RemovalResult {
            png_bytes,
            width,
            height,
            mode,
            timings,
            request_id,
            completed_at: chrono::Utc::now(),
        })
    }

    async fn acquire_slot(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        let semaphore = Arc::clone(&self.inner.semaphore);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BgRemovalError::Cancelled),
            permit = semaphore.acquire_owned() => {
                permit.map_err(|_| BgRemovalError::internal("Inference semaphore closed"))
            },
        }
    }
}

impl RemoverInner {
    fn process(
        &self,
        image_bytes: &[u8],
        mode: SegmentationMode,
        strength: EdgeStrength,
        cancel: &CancellationToken,
    ) -> Result<(Vec<u8>, u32, u32, ProcessingTimings)> {
        let mut timings = ProcessingTimings::default();

        let (width, height) = self.check_dimensions(image_bytes)?;
        Span::current().record("width", width);
        Span::current().record("height", height);

        let (session, load_time) = self.registry.get_or_load_timed(mode)?;
        timings.model_load_ms = load_time.map_or(0, |d| d.as_millis() as u64);

        let decode_start = Instant::now();
        let image = decode_image(image_bytes)?;
        timings.image_decode_ms = elapsed_ms(decode_start);

        let mut preprocessing = self.config.preprocessing();
        if let Some(size) = session.input_size() {
            preprocessing.target_size = size;
        }
        let target_size = preprocessing.target_size;

        let preprocess_start = Instant::now();
        let (tensor, padding) = spans::preprocessing((image.width(), image.height()), target_size)
            .in_scope(|| ImagePreprocessor::preprocess(&image, &preprocessing))?;
        timings.preprocessing_ms = elapsed_ms(preprocess_start);
        events::stage_metric("preprocessing", timings.preprocessing_ms);

        if cancel.is_cancelled() {
            return Err(BgRemovalError::Cancelled);
        }

        let inference_start = Instant::now();
        let outputs = spans::inference(mode, target_size).in_scope(|| session.run(&tensor))?;
        timings.inference_ms = elapsed_ms(inference_start);
        events::stage_metric("inference", timings.inference_ms);

        let postprocess_start = Instant::now();
        let rgba = spans::postprocessing("mask").in_scope(|| {
            let output = select_mask_output(&outputs, target_size)?;
            let values: Vec<f32> = output.data.iter().copied().collect();
            let raw_mask = decode_mask(&values, target_size)?;
            let mut mask = invert_letterbox(&raw_mask, &padding, image.width(), image.height());

            if mode == SegmentationMode::Portrait {
                let curve = RefinementCurve::from_strength(&self.config.refinement, strength);
                tracing::debug!(
                    strength = strength.value(),
                    low = curve.low,
                    high = curve.high,
                    gamma = curve.gamma,
                    "refining portrait mask"
                );
                curve.apply_to_mask(&mut mask);
            }

            composite(&image, &mask)
        })?;
        timings.postprocessing_ms = elapsed_ms(postprocess_start);
        events::stage_metric("postprocessing", timings.postprocessing_ms);

        let encode_start = Instant::now();
        let png_bytes = PngOutput::encode(&rgba)?;
        timings.image_encode_ms = elapsed_ms(encode_start);

        Ok((png_bytes, rgba.width(), rgba.height(), timings))
    }

    /// Read the header only and reject images over the pixel ceiling
    fn check_dimensions(&self, image_bytes: &[u8]) -> Result<(u32, u32)> {
        let (width, height) = ImageReader::new(Cursor::new(image_bytes))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| BgRemovalError::invalid_input(format!("Unreadable image header: {e}")))?;

        if width == 0 || height == 0 {
            return Err(BgRemovalError::invalid_input(format!(
                "Image has zero size ({}x{})",
                width, height
            )));
        }

        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.config.max_pixels {
            return Err(BgRemovalError::ImageTooLarge {
                width,
                height,
                max_pixels: self.config.max_pixels,
            });
        }

        Ok((width, height))
    }
}

fn decode_image(image_bytes: &[u8]) -> Result<DynamicImage> {
    ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()?
        .decode()
        .map_err(|e| BgRemovalError::invalid_input(format!("Failed to decode image: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceSession, OutputTensor};
    use ndarray::{Array4, ArrayD, IxDyn};
    use std::path::Path;

    struct ConstantSession;

    impl InferenceSession for ConstantSession {
        fn run(&self, input: &Array4<f32>) -> Result<Vec<OutputTensor>> {
            let size = input.shape()[2];
            Ok(vec![OutputTensor::new(
                "mask",
                ArrayD::from_elem(IxDyn(&[1, 1, size, size]), 1.0),
            )])
        }
    }

    struct ConstantLoader;

    impl SessionLoader for ConstantLoader {
        fn load(
            &self,
            _mode: SegmentationMode,
            _model_path: &Path,
        ) -> Result<Arc<dyn InferenceSession>> {
            Ok(Arc::new(ConstantSession))
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        PngOutput::encode(&image::RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([40, 80, 120, 255]),
        ))
        .unwrap()
    }

    fn remover(max_pixels: u64) -> (tempfile::TempDir, BackgroundRemover) {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("u2net.onnx");
        std::fs::write(&model, b"model").unwrap();
        let config = PipelineConfig::builder()
            .general_model_path(model)
            .max_pixels(max_pixels)
            .input_size(32)
            .build()
            .unwrap();
        let remover = BackgroundRemover::new(config, Arc::new(ConstantLoader)).unwrap();
        (dir, remover)
    }

    #[tokio::test]
    async fn test_pixel_ceiling_checked_before_model_load() {
        let (_dir, remover) = remover(100);
        let error = remover
            .remove_background(
                png_bytes(20, 10),
                SegmentationMode::General,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(error.kind(), crate::error::ErrorKind::InputTooLarge);
        assert!(!remover.registry().is_loaded(SegmentationMode::General));
    }

    #[tokio::test]
    async fn test_pixel_ceiling_is_inclusive() {
        let (_dir, remover) = remover(200);
        let result = remover
            .remove_background_detailed(
                png_bytes(20, 10),
                SegmentationMode::General,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!((result.width, result.height), (20, 10));
    }

    #[tokio::test]
    async fn test_garbage_input_is_invalid() {
        let (_dir, remover) = remover(1_000);
        let error = remover
            .remove_background(
                b"not an image".to_vec(),
                SegmentationMode::General,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(error.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_permit_released_after_request() {
        let (_dir, remover) = remover(10_000);
        assert_eq!(remover.available_permits(), 2);
        remover
            .remove_background(
                png_bytes(8, 8),
                SegmentationMode::General,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(remover.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_preload() {
        let (_dir, remover) = remover(10_000);
        remover.preload(SegmentationMode::General).await.unwrap();
        assert!(remover.registry().is_loaded(SegmentationMode::General));
        assert!(remover.preload(SegmentationMode::Portrait).await.is_err());
    }
}
