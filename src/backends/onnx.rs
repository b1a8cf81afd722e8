//! ONNX Runtime sessions for U2Net segmentation models
//!
//! `OnnxSessionLoader` builds sessions from model files with the configured execution
//! provider. `OnnxSession` runs them with positional input and returns every output.

use crate::config::ExecutionProvider;
use crate::error::{BgRemovalError, Result};
use crate::inference::{InferenceSession, OutputTensor, SessionLoader};
use crate::types::SegmentationMode;
use instant::Instant;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::{self, value::Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Builds ONNX Runtime sessions
#[derive(Debug, Clone, Copy)]
pub struct OnnxSessionLoader {
    execution_provider: ExecutionProvider,
    intra_threads: usize,
    sessions_per_model: usize,
}

impl OnnxSessionLoader {
    /// Create a loader
    ///
    /// `intra_threads == 0` splits the available parallelism across the model's sessions.
    #[must_use]
    pub fn new(execution_provider: ExecutionProvider, intra_threads: usize) -> Self {
        Self {
            execution_provider,
            intra_threads,
            sessions_per_model: 1,
        }
    }

    /// Commit `count` sessions per model so that many runs of one mode can overlap
    ///
    /// Each session holds its own copy of the weights. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_sessions_per_model(mut self, count: usize) -> Self {
        self.sessions_per_model = count.max(1);
        self
    }

    /// Execution providers this build knows about, as `(name, available, description)`
    ///
    /// # Examples
    /// ```rust,no_run
    /// use bgremove_pipeline::backends::OnnxSessionLoader;
    ///
    /// for (name, available, description) in OnnxSessionLoader::list_providers() {
    ///     println!("{name:<7} {} {description}", if available { "yes" } else { "no " });
    /// }
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "🔍 Probing execution providers on {}/{} with {} cores",
            std::env::consts::OS,
            std::env::consts::ARCH,
            available_cores()
        );

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        log::debug!("  CUDA: {cuda_available}, CoreML: {coreml_available}");

        vec![
            (
                "CPU".to_string(),
                true,
                "Portable fallback, always present".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU, needs a CUDA-enabled ONNX Runtime".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Neural Engine / GPU on macOS".to_string(),
            ),
        ]
    }

    fn configure_providers(&self, session_builder: SessionBuilder) -> Result<SessionBuilder> {
        let cuda_provider = CUDAExecutionProvider::default();
        let coreml_provider = CoreMLExecutionProvider::default().with_subgraphs(true);

        let providers = match self.execution_provider {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                    log::info!("🚀 Auto provider selection: CUDA");
                    providers.push(cuda_provider.build());
                }
                if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                    log::info!("🍎 Auto provider selection: CoreML");
                    providers.push(coreml_provider.build());
                }
                if providers.is_empty() {
                    log::info!("Auto provider selection: CPU only");
                }
                providers
            },
            ExecutionProvider::Cpu => {
                log::info!("CPU provider requested");
                Vec::new()
            },
            ExecutionProvider::Cuda => {
                if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                    log::info!("🚀 CUDA provider requested");
                    vec![cuda_provider.build()]
                } else {
                    log::warn!("⚠️ CUDA provider requested but unavailable, using CPU");
                    Vec::new()
                }
            },
            ExecutionProvider::CoreMl => {
                if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                    log::info!("🍎 CoreML provider requested");
                    vec![coreml_provider.build()]
                } else {
                    log::warn!("⚠️ CoreML provider requested but unavailable, using CPU");
                    Vec::new()
                }
            },
        };

        if providers.is_empty() {
            return Ok(session_builder);
        }
        session_builder
            .with_execution_providers(providers)
            .map_err(|e| {
                BgRemovalError::inference(format!(
                    "Failed to set {} execution provider: {e}",
                    self.execution_provider
                ))
            })
    }

    /// Explicit thread counts apply per session; the automatic count is split across them
    fn intra_threads_per_session(&self) -> usize {
        if self.intra_threads > 0 {
            self.intra_threads
        } else {
            (available_cores() / self.sessions_per_model).max(1)
        }
    }

    fn commit(&self, model_path: &Path) -> Result<Session> {
        let session_builder = Session::builder()
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to set optimization level: {e}"))
            })?;

        self.configure_providers(session_builder)?
            .with_intra_threads(self.intra_threads_per_session())
            .map_err(|e| BgRemovalError::inference(format!("Failed to set intra threads: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                BgRemovalError::inference(format!(
                    "Failed to create session from '{}': {e}",
                    model_path.display()
                ))
            })
    }
}

impl Default for OnnxSessionLoader {
    fn default() -> Self {
        Self::new(ExecutionProvider::Auto, 0)
    }
}

impl SessionLoader for OnnxSessionLoader {
    fn load(&self, mode: SegmentationMode, model_path: &Path) -> Result<Arc<dyn InferenceSession>> {
        let load_start = Instant::now();

        let sessions = (0..self.sessions_per_model)
            .map(|_| self.commit(model_path))
            .collect::<Result<Vec<_>>>()?;

        // U2Net exports declare [1, 3, S, S]; dynamic axes report -1
        let input_size = sessions
            .first()
            .and_then(|session| session.inputs.first())
            .and_then(|input| input.input_type.tensor_shape())
            .and_then(|shape| shape.get(2).copied())
            .and_then(|size| u32::try_from(size).ok())
            .filter(|size| *size > 0);

        log::debug!(
            "✅ {mode} sessions ready: count={}, provider={}, input={input_size:?}",
            sessions.len(),
            self.execution_provider
        );
        log::info!(
            "📦 Loaded {mode} model from {} in {:.0}ms",
            model_path.display(),
            load_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Arc::new(OnnxSession {
            mode,
            input_size,
            pool: SessionPool::new(sessions)?,
        }))
    }
}

/// Interchangeable values behind their own locks
///
/// A caller takes the first free slot; when every slot is busy it waits on one picked
/// round-robin.
#[derive(Debug)]
struct SessionPool<T> {
    slots: Vec<Mutex<T>>,
    next: AtomicUsize,
}

impl<T> SessionPool<T> {
    fn new(items: Vec<T>) -> Result<Self> {
        if items.is_empty() {
            return Err(BgRemovalError::internal("Session pool needs at least one session"));
        }
        Ok(Self {
            slots: items.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        })
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        for slot in &self.slots {
            if let Ok(mut guard) = slot.try_lock() {
                return f(&mut *guard);
            }
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut guard = self
            .slots
            .get(index)
            .ok_or_else(|| BgRemovalError::internal("Session pool index out of range"))?
            .lock()
            .map_err(|_| BgRemovalError::internal("ONNX session lock poisoned"))?;
        f(&mut *guard)
    }
}

/// Committed ONNX Runtime sessions for one model
///
/// `Session::run` takes `&mut self`, so each session serves one run at a time. Runs
/// overlap up to the number of sessions the loader committed.
#[derive(Debug)]
pub struct OnnxSession {
    mode: SegmentationMode,
    input_size: Option<u32>,
    pool: SessionPool<Session>,
}

impl OnnxSession {
    /// Number of runs that can execute at once
    #[must_use]
    pub fn parallel_runs(&self) -> usize {
        self.pool.len()
    }
}

impl InferenceSession for OnnxSession {
    fn run(&self, input: &Array4<f32>) -> Result<Vec<OutputTensor>> {
        let run_start = Instant::now();
        log::debug!("🚀 {} run, input {:?}", self.mode, input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        let tensors = self.pool.with(|session| {
            let outputs = session
                .run(ort::inputs![input_value])
                .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

            let keys: Vec<String> = outputs.keys().map(ToString::to_string).collect();
            let mut tensors = Vec::with_capacity(keys.len());
            for key in keys {
                let array = outputs
                    .get(key.as_str())
                    .ok_or_else(|| {
                        BgRemovalError::inference(format!("Output tensor '{key}' not found"))
                    })?
                    .try_extract_array::<f32>()
                    .map_err(|e| {
                        BgRemovalError::inference(format!(
                            "Failed to extract output tensor '{key}': {e}"
                        ))
                    })?
                    .to_owned();
                tensors.push(OutputTensor::new(key, array));
            }
            Ok(tensors)
        })?;

        log::debug!(
            "⚡ {} run finished in {:.2}ms with {} output(s)",
            self.mode,
            run_start.elapsed().as_secs_f64() * 1000.0,
            tensors.len()
        );

        Ok(tensors)
    }

    fn input_size(&self) -> Option<u32> {
        self.input_size
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
