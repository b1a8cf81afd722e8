//! Inference session abstraction and mask output selection

use crate::error::{BgRemovalError, Result};
use crate::types::SegmentationMode;
use ndarray::{Array4, ArrayD};
use std::path::Path;
use std::sync::Arc;

/// One named output tensor produced by a model run
#[derive(Debug, Clone)]
pub struct OutputTensor {
    /// Output name as declared by the model
    pub name: String,
    /// Output values
    pub data: ArrayD<f32>,
}

impl OutputTensor {
    pub fn new<S: Into<String>>(name: S, data: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Whether this tensor is shaped `[1, 1, size, size]`
    #[must_use]
    pub fn is_mask_shaped(&self, size: u32) -> bool {
        let size = size as usize;
        self.data.shape() == [1, 1, size, size]
    }
}

/// A loaded model that can be run concurrently from several threads
pub trait InferenceSession: Send + Sync {
    /// Run the model on one NCHW tensor
    ///
    /// Returns every output in model order.
    ///
    /// # Errors
    /// - Native runtime failures
    /// - Tensor conversion errors
    fn run(&self, input: &Array4<f32>) -> Result<Vec<OutputTensor>>;

    /// Fixed square input size declared by the model, if any
    fn input_size(&self) -> Option<u32> {
        None
    }
}

/// Creates sessions from model files
pub trait SessionLoader: Send + Sync {
    /// Load the model at `model_path` for `mode`
    ///
    /// # Errors
    /// - Unreadable or invalid model file
    /// - Runtime initialization failures
    fn load(&self, mode: SegmentationMode, model_path: &Path)
        -> Result<Arc<dyn InferenceSession>>;
}

/// Pick the output that holds the segmentation mask
///
/// U2Net exports expose several side outputs; the fused mask is the one shaped
/// `[1, 1, size, size]`. When none matches, the first output is used.
///
/// # Errors
/// - No outputs at all
/// - Fallback output whose element count does not match `size * size`
pub fn select_mask_output(outputs: &[OutputTensor], size: u32) -> Result<&OutputTensor> {
    if let Some(output) = outputs.iter().find(|o| o.is_mask_shaped(size)) {
        tracing::debug!(output = %output.name, "selected mask output");
        return Ok(output);
    }

    let first = outputs
        .first()
        .ok_or_else(|| BgRemovalError::invalid_input("Model produced no output tensor"))?;

    tracing::warn!(
        output = %first.name,
        shape = ?first.data.shape(),
        expected = size,
        "no output shaped [1, 1, {size}, {size}], falling back to first output"
    );

    let expected = (size as usize) * (size as usize);
    if first.data.len() != expected {
        return Err(BgRemovalError::invalid_input(format!(
            "Output '{}' has {} values, expected {} for a {}x{} mask",
            first.name,
            first.data.len(),
            expected,
            size,
            size
        )));
    }

    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn tensor(name: &str, shape: &[usize], fill: f32) -> OutputTensor {
        OutputTensor::new(name, ArrayD::from_elem(IxDyn(shape), fill))
    }

    #[test]
    fn test_selects_matching_shape() {
        let outputs = vec![
            tensor("side1", &[1, 1, 160, 160], 0.1),
            tensor("d0", &[1, 1, 320, 320], 0.9),
            tensor("d1", &[1, 1, 320, 320], 0.5),
        ];
        let selected = select_mask_output(&outputs, 320).unwrap();
        assert_eq!(selected.name, "d0");
    }

    #[test]
    fn test_falls_back_to_first_output() {
        let outputs = vec![
            tensor("flat", &[320, 320], 0.3),
            tensor("other", &[1, 2, 320, 320], 0.4),
        ];
        let selected = select_mask_output(&outputs, 320).unwrap();
        assert_eq!(selected.name, "flat");
    }

    #[test]
    fn test_rejects_empty_outputs() {
        let error = select_mask_output(&[], 320).unwrap_err();
        assert_eq!(error.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_rejects_wrong_sized_fallback() {
        let outputs = vec![tensor("tiny", &[1, 1, 10, 10], 0.5)];
        let error = select_mask_output(&outputs, 320).unwrap_err();
        assert_eq!(error.kind(), crate::error::ErrorKind::InvalidInput);
    }
}
