//! Output services

pub mod encode;

pub use encode::PngOutput;
