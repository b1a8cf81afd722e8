//! Mask decoding, inverse letterbox and alpha compositing

use crate::{
    error::{BgRemovalError, Result},
    types::LetterboxPadding,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma, Rgba, RgbaImage};

/// Turn raw model output into an 8-bit `size`x`size` mask
///
/// Values already in `[0, 1]` are used as probabilities. Anything else (logits, other
/// scales, non-finite values) is min-max normalized across the whole mask first; a flat
/// mask decodes to all zeros.
///
/// # Errors
/// - `values` does not hold exactly `size * size` entries
pub fn decode_mask(values: &[f32], size: u32) -> Result<GrayImage> {
    let expected = (size as usize) * (size as usize);
    if values.len() != expected || expected == 0 {
        return Err(BgRemovalError::invalid_input(format!(
            "Mask has {} values, expected {} for a {}x{} output",
            values.len(),
            expected,
            size,
            size
        )));
    }

    let in_unit_range = values
        .iter()
        .all(|v| v.is_finite() && (0.0..=1.0).contains(v));

    let normalized: Vec<f32> = if in_unit_range {
        values.to_vec()
    } else {
        let (min, max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;
        tracing::debug!(min, max, "mask outside [0, 1], applying min-max normalization");

        if !range.is_finite() || range <= f32::EPSILON {
            vec![0.0; expected]
        } else {
            values
                .iter()
                .map(|&v| if v.is_finite() { (v - min) / range } else { 0.0 })
                .collect()
        }
    };

    let pixels = normalized
        .into_iter()
        .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();

    GrayImage::from_raw(size, size, pixels)
        .ok_or_else(|| BgRemovalError::processing("Mask buffer does not match its dimensions"))
}

/// Crop the letterboxed content region and scale it back to `width`x`height`
#[must_use]
pub fn invert_letterbox(
    mask: &GrayImage,
    padding: &LetterboxPadding,
    width: u32,
    height: u32,
) -> GrayImage {
    let (mask_width, mask_height) = mask.dimensions();
    let left = padding.left.min(mask_width.saturating_sub(1));
    let top = padding.top.min(mask_height.saturating_sub(1));
    let crop_width = padding.scaled_width.clamp(1, mask_width - left);
    let crop_height = padding.scaled_height.clamp(1, mask_height - top);

    let cropped = image::imageops::crop_imm(mask, left, top, crop_width, crop_height).to_image();
    if cropped.dimensions() == (width, height) {
        return cropped;
    }
    image::imageops::resize(&cropped, width, height, FilterType::Triangle)
}

/// Apply `mask` as alpha over `image`
///
/// Output alpha is the source alpha scaled by the mask. Fully transparent pixels are
/// written as `[0, 0, 0, 0]`.
///
/// # Errors
/// - Mask and image dimensions differ
pub fn composite(image: &DynamicImage, mask: &GrayImage) -> Result<RgbaImage> {
    let rgba_image = image.to_rgba8();
    let (width, height) = rgba_image.dimensions();
    if mask.dimensions() != (width, height) {
        return Err(BgRemovalError::processing_stage_error(
            "compositing",
            &format!(
                "mask is {}x{}, image is {}x{}",
                mask.width(),
                mask.height(),
                width,
                height
            ),
            None,
        ));
    }

    let mut result = RgbaImage::new(width, height);
    for ((source, Luma([mask_value])), target) in rgba_image
        .pixels()
        .zip(mask.pixels())
        .zip(result.pixels_mut())
    {
        let alpha = (u16::from(source[3]) * u16::from(*mask_value) + 127) / 255;
        *target = if alpha > 0 {
            Rgba([source[0], source[1], source[2], alpha as u8])
        } else {
            Rgba([0, 0, 0, 0])
        };
    }

    Ok(result)
}
