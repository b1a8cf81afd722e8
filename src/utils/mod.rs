//! Image transforms shared by the pipeline stages

pub mod postprocessing;
pub mod preprocessing;

pub use postprocessing::{composite, decode_mask, invert_letterbox};
pub use preprocessing::ImagePreprocessor;
