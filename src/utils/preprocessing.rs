//! Letterbox preprocessing and tensor encoding
//!
//! The model takes a fixed square input. The source is scaled to fit, centred on a black
//! canvas, and the placement is returned so the mask can be mapped back later.

use crate::{
    config::PreprocessingConfig,
    error::{BgRemovalError, Result},
    types::LetterboxPadding,
};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Scale `image` to fit a `target_size` square and centre it on a black canvas
    ///
    /// # Errors
    /// - Zero-sized source image or target
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn letterbox(
        image: &DynamicImage,
        target_size: u32,
    ) -> Result<(RgbImage, LetterboxPadding)> {
        let (orig_width, orig_height) = (image.width(), image.height());
        if orig_width == 0 || orig_height == 0 {
            return Err(BgRemovalError::invalid_input(format!(
                "Image has zero size ({}x{})",
                orig_width, orig_height
            )));
        }
        if target_size == 0 {
            return Err(BgRemovalError::processing("Model input size must be positive"));
        }

        let target_size_f32 = target_size as f32;
        let scale = (target_size_f32 / orig_width as f32).min(target_size_f32 / orig_height as f32);

        // Extreme aspect ratios can round a side to 0
        let scaled_width = ((orig_width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((orig_height as f32 * scale).round() as u32).clamp(1, target_size);

        let rgb_image = image.to_rgb8();
        let resized = image::imageops::resize(
            &rgb_image,
            scaled_width,
            scaled_height,
            FilterType::Triangle,
        );

        let left = (target_size - scaled_width) / 2;
        let top = (target_size - scaled_height) / 2;

        let mut canvas = RgbImage::from_pixel(target_size, target_size, Rgb([0, 0, 0]));
        image::imageops::replace(&mut canvas, &resized, i64::from(left), i64::from(top));

        let padding = LetterboxPadding {
            left,
            top,
            scaled_width,
            scaled_height,
            scale,
            target_size,
        };

        Ok((canvas, padding))
    }

    /// Convert a canvas to a normalized NCHW tensor with batch size 1
    #[must_use]
    pub fn to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        let mean = config.normalization_mean;
        let std = config.normalization_std;

        #[allow(clippy::indexing_slicing)]
        // Tensor dimensions are allocated from the canvas dimensions
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] =
                    (f32::from(pixel[channel]) / 255.0 - mean[channel]) / std[channel];
            }
        }

        tensor
    }

    /// Letterbox and encode in one step
    ///
    /// # Errors
    /// - Same conditions as [`ImagePreprocessor::letterbox`]
    pub fn preprocess(
        image: &DynamicImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, LetterboxPadding)> {
        let (canvas, padding) = Self::letterbox(image, config.target_size)?;
        let tensor = Self::to_tensor(&canvas, config);
        Ok((tensor, padding))
    }
}
