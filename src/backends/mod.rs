//! Inference backend implementations
//!
//! The ONNX Runtime backend is enabled by the default `onnx` feature.

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxSession, OnnxSessionLoader};
