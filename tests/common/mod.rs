//! Shared mocks and fixtures for pipeline integration tests

#![allow(dead_code)]

use bgremove_pipeline::{
    BgRemovalError, CancellationToken, InferenceSession, OutputTensor, PipelineConfig, Result,
    SegmentationMode, SessionLoader,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array4, ArrayD, IxDyn};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// What the mock model writes into its mask output
#[derive(Debug, Clone, Copy)]
pub enum MaskPattern {
    /// Opaque disc in the middle with a soft rim, transparent corners
    Disc,
    /// The disc scaled into logits outside `[0, 1]`
    DiscLogits,
    /// Same value everywhere
    Constant(f32),
    /// No outputs at all
    Empty,
    /// Runtime failure
    Fail,
}

/// Blocks model runs until opened, counting how many have started
#[derive(Default)]
pub struct RunGate {
    started: AtomicUsize,
    open: Mutex<bool>,
    opened: Condvar,
}

impl RunGate {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    fn wait(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
    }

    /// Poll until `count` runs have started or the timeout elapses
    pub async fn wait_for_started(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.started() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "only {} of {} runs started",
                self.started(),
                count
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub struct MockSession {
    pattern: MaskPattern,
    side_outputs: bool,
    runs: Arc<AtomicUsize>,
    gate: Option<Arc<RunGate>>,
}

impl MockSession {
    fn mask(&self, size: usize) -> ArrayD<f32> {
        let center = size as f32 / 2.0;
        let radius = size as f32 / 3.0;
        ArrayD::from_shape_fn(IxDyn(&[1, 1, size, size]), |index| {
            let (y, x) = (index[2] as f32, index[3] as f32);
            let distance = ((x - center).powi(2) + (y - center).powi(2)).sqrt();
            let disc = ((radius - distance) / (radius * 0.3)).clamp(0.0, 1.0);
            match self.pattern {
                MaskPattern::DiscLogits => disc * 20.0 - 10.0,
                MaskPattern::Constant(value) => value,
                _ => disc,
            }
        })
    }
}

impl InferenceSession for MockSession {
    fn run(&self, input: &Array4<f32>) -> Result<Vec<OutputTensor>> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        self.runs.fetch_add(1, Ordering::SeqCst);

        let size = input.shape()[2];
        match self.pattern {
            MaskPattern::Empty => Ok(Vec::new()),
            MaskPattern::Fail => Err(BgRemovalError::inference("mock runtime failure")),
            _ => {
                let mut outputs = Vec::new();
                if self.side_outputs {
                    // U2Net-style side output at half resolution, listed first
                    outputs.push(OutputTensor::new(
                        "side1",
                        ArrayD::from_elem(IxDyn(&[1, 1, size / 2, size / 2]), 1.0),
                    ));
                }
                outputs.push(OutputTensor::new("d0", self.mask(size)));
                if self.side_outputs {
                    outputs.push(OutputTensor::new(
                        "d1",
                        ArrayD::from_elem(IxDyn(&[1, 1, size, size]), 1.0),
                    ));
                }
                Ok(outputs)
            },
        }
    }
}

/// Loader producing [`MockSession`]s and counting loads and runs
#[derive(Clone)]
pub struct MockLoader {
    pub loads: Arc<AtomicUsize>,
    pub runs: Arc<AtomicUsize>,
    pattern: MaskPattern,
    side_outputs: bool,
    gate: Option<Arc<RunGate>>,
    cancel_on_load: Option<CancellationToken>,
}

impl MockLoader {
    pub fn new(pattern: MaskPattern) -> Self {
        Self {
            loads: Arc::default(),
            runs: Arc::default(),
            pattern,
            side_outputs: false,
            gate: None,
            cancel_on_load: None,
        }
    }

    pub fn with_side_outputs(mut self) -> Self {
        self.side_outputs = true;
        self
    }

    pub fn with_gate(mut self, gate: Arc<RunGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Fire `token` while the model loads, after the first checkpoint has passed
    pub fn cancelling_on_load(mut self, token: CancellationToken) -> Self {
        self.cancel_on_load = Some(token);
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl SessionLoader for MockLoader {
    fn load(
        &self,
        _mode: SegmentationMode,
        model_path: &Path,
    ) -> Result<Arc<dyn InferenceSession>> {
        assert!(model_path.is_file(), "loader called for a missing model");
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_load {
            token.cancel();
        }
        Ok(Arc::new(MockSession {
            pattern: self.pattern,
            side_outputs: self.side_outputs,
            runs: Arc::clone(&self.runs),
            gate: self.gate.clone(),
        }))
    }
}

/// Fake model files on disk
pub struct ModelFiles {
    _dir: TempDir,
    pub general: PathBuf,
    pub portrait: PathBuf,
}

impl ModelFiles {
    /// Both models installed
    pub fn both() -> Self {
        let files = Self::general_only();
        std::fs::write(&files.portrait, b"mock human seg model").unwrap();
        files
    }

    /// Portrait model configured but not installed
    pub fn general_only() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let general = dir.path().join("u2net.onnx");
        let portrait = dir.path().join("u2net_human_seg.onnx");
        std::fs::write(&general, b"mock general model").unwrap();
        Self {
            _dir: dir,
            general,
            portrait,
        }
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::builder()
            .general_model_path(&self.general)
            .portrait_model_path(&self.portrait)
            .telemetry_enabled(false)
            .build()
            .unwrap()
    }
}

/// Colourful test photo so RGB mismatches would show
pub fn test_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    }))
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&test_image(width, height), ImageFormat::Jpeg)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&test_image(width, height), ImageFormat::Png)
}

pub fn decode_png(bytes: &[u8]) -> image::RgbaImage {
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n", "output is not a PNG");
    image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .unwrap()
        .to_rgba8()
}
