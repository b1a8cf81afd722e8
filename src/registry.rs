//! Lazily loaded, process-lifetime model sessions
//!
//! Each segmentation mode moves through three states: not loaded, loading (creation
//! lock held) and loaded. Sessions are never unloaded. Lookups of a loaded session only
//! take the read lock, so steady-state inference never waits on a model load.

use crate::config::PipelineConfig;
use crate::error::{BgRemovalError, Result};
use crate::inference::{InferenceSession, SessionLoader};
use crate::types::SegmentationMode;
use instant::{Duration, Instant};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Sessions created by the loader
    pub loads: u64,
    /// Lookups served from an already loaded session
    pub hits: u64,
    /// Lookups that had to enter the creation path
    pub misses: u64,
}

impl RegistryStats {
    /// Fraction of lookups served without loading
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Owns one session per segmentation mode
pub struct ModelRegistry {
    model_paths: HashMap<SegmentationMode, PathBuf>,
    loader: Arc<dyn SessionLoader>,
    sessions: RwLock<HashMap<SegmentationMode, Arc<dyn InferenceSession>>>,
    creation_lock: Mutex<()>,
    loads: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("model_paths", &self.model_paths)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ModelRegistry {
    /// Create a registry with explicit model paths
    pub fn new(
        general_model_path: Option<PathBuf>,
        portrait_model_path: Option<PathBuf>,
        loader: Arc<dyn SessionLoader>,
    ) -> Self {
        let mut model_paths = HashMap::new();
        if let Some(path) = general_model_path {
            model_paths.insert(SegmentationMode::General, path);
        }
        if let Some(path) = portrait_model_path {
            model_paths.insert(SegmentationMode::Portrait, path);
        }

        Self {
            model_paths,
            loader,
            sessions: RwLock::new(HashMap::new()),
            creation_lock: Mutex::new(()),
            loads: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a registry using the model paths from a pipeline configuration
    pub fn from_config(config: &PipelineConfig, loader: Arc<dyn SessionLoader>) -> Self {
        Self::new(
            config.general_model_path.clone(),
            config.portrait_model_path.clone(),
            loader,
        )
    }

    /// Return the session for `mode`, loading it on first use
    ///
    /// # Errors
    /// - `ModelNotInstalled` when no model file exists for the mode
    /// - Loader failures
    pub fn get_or_load(&self, mode: SegmentationMode) -> Result<Arc<dyn InferenceSession>> {
        self.get_or_load_timed(mode).map(|(session, _)| session)
    }

    /// Like [`ModelRegistry::get_or_load`], also reporting load time when this call loaded
    ///
    /// # Errors
    /// - Same conditions as [`ModelRegistry::get_or_load`]
    pub fn get_or_load_timed(
        &self,
        mode: SegmentationMode,
    ) -> Result<(Arc<dyn InferenceSession>, Option<Duration>)> {
        if let Some(session) = self.lookup(mode) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((session, None));
        }

        let _creation = self
            .creation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished loading while we waited
        if let Some(session) = self.lookup(mode) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((session, None));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let path = self.model_paths.get(&mode);
        let path = match path {
            Some(path) if path.is_file() => path,
            _ => {
                tracing::warn!(%mode, path = ?path, "model file not installed");
                return Err(BgRemovalError::model_not_installed(mode, path));
            },
        };

        tracing::info!(%mode, path = %path.display(), "loading segmentation model");
        let start = Instant::now();
        let session = self.loader.load(mode, path)?;
        let elapsed = start.elapsed();
        self.loads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            %mode,
            load_ms = elapsed.as_millis() as u64,
            "segmentation model loaded"
        );

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mode, Arc::clone(&session));

        Ok((session, Some(elapsed)))
    }

    /// Whether a session for `mode` is already loaded
    #[must_use]
    pub fn is_loaded(&self, mode: SegmentationMode) -> bool {
        self.lookup(mode).is_some()
    }

    /// Whether a model file is present for `mode`
    #[must_use]
    pub fn is_installed(&self, mode: SegmentationMode) -> bool {
        self.model_paths.get(&mode).is_some_and(|p| p.is_file())
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            loads: self.loads.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, mode: SegmentationMode) -> Option<Arc<dyn InferenceSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&mode)
            .cloned()
    }
}
