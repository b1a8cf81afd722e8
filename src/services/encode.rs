//! PNG encoding of the composited result
//!
//! Output is always lossless RGBA8 PNG and never touches the filesystem.

use crate::error::{BgRemovalError, Result};
use image::{codecs::png::PngEncoder, ExtendedColorType, ImageEncoder, RgbaImage};

/// Service for encoding pipeline output
pub struct PngOutput;

impl PngOutput {
    /// Encode an RGBA image as PNG bytes
    ///
    /// # Errors
    /// - Encoder failures
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_pipeline::services::PngOutput;
    /// use image::RgbaImage;
    ///
    /// let bytes = PngOutput::encode(&RgbaImage::new(4, 4)).unwrap();
    /// assert_eq!(&bytes[..4], b"\x89PNG");
    /// ```
    pub fn encode(image: &RgbaImage) -> Result<Vec<u8>> {
        let (width, height) = image.dimensions();
        let mut buffer = Vec::with_capacity(image.as_raw().len() / 2);

        PngEncoder::new(&mut buffer)
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
            .map_err(|e| {
                BgRemovalError::processing_stage_error(
                    "png_encode",
                    &e.to_string(),
                    Some(&format!("{}x{} RGBA", width, height)),
                )
            })?;

        Ok(buffer)
    }
}
