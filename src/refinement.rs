//! Portrait mask refinement
//!
//! Human segmentation models tend to leave faint "ghost" residue in the background.
//! The refinement curve remaps mask intensity in three bands:
//!
//! - at or below the low threshold: fully transparent
//! - between the thresholds: cubic smoothstep, scaled to meet the upper band
//! - at or above the high threshold: mild gamma curve
//!
//! The thresholds and gamma all move with the edge strength, by at most their configured
//! delta at strength 0 and 100.

use crate::error::{BgRemovalError, Result};
use crate::types::EdgeStrength;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Base curve parameters and how far edge strength may shift them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Low threshold at neutral strength
    pub low_threshold: f32,
    /// High threshold at neutral strength
    pub high_threshold: f32,
    /// Gamma applied above the high threshold at neutral strength
    pub gamma: f32,
    /// Maximum shift of the low threshold
    pub low_delta: f32,
    /// Maximum shift of the high threshold
    pub high_delta: f32,
    /// Maximum shift of gamma
    pub gamma_delta: f32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            low_threshold: 0.15,
            high_threshold: 0.80,
            gamma: 0.90,
            low_delta: 0.10,
            high_delta: 0.10,
            gamma_delta: 0.15,
        }
    }
}

impl RefinementConfig {
    /// Check that every strength in `0..=100` yields a usable curve
    ///
    /// # Errors
    /// - Negative deltas
    /// - Low threshold reaching below 0 or high threshold above 1
    /// - Low and high thresholds crossing at any strength
    /// - Gamma reaching 0 or below
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.low_threshold,
            self.high_threshold,
            self.gamma,
            self.low_delta,
            self.high_delta,
            self.gamma_delta,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BgRemovalError::invalid_config(
                "Refinement parameters must be finite numbers",
            ));
        }
        if self.low_delta < 0.0 || self.high_delta < 0.0 || self.gamma_delta < 0.0 {
            return Err(BgRemovalError::invalid_config(
                "Refinement deltas must not be negative",
            ));
        }

        let low_min = self.low_threshold - self.low_delta;
        let low_max = self.low_threshold + self.low_delta;
        let high_min = self.high_threshold - self.high_delta;
        let high_max = self.high_threshold + self.high_delta;
        let gamma_min = self.gamma - self.gamma_delta;

        if low_min < 0.0 {
            return Err(BgRemovalError::config_value_error(
                "refinement low threshold range start",
                low_min,
                ">= 0.0",
                None,
            ));
        }
        if high_max > 1.0 {
            return Err(BgRemovalError::config_value_error(
                "refinement high threshold range end",
                high_max,
                "<= 1.0",
                None,
            ));
        }
        if low_max >= high_min {
            return Err(BgRemovalError::invalid_config(format!(
                "Refinement thresholds overlap: low may reach {:.3} while high may drop to {:.3}",
                low_max, high_min
            )));
        }
        if gamma_min <= 0.0 {
            return Err(BgRemovalError::config_value_error(
                "refinement gamma range start",
                gamma_min,
                "> 0.0",
                None,
            ));
        }

        Ok(())
    }
}

/// Concrete curve for one edge strength
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementCurve {
    pub low: f32,
    pub high: f32,
    pub gamma: f32,
}

impl RefinementCurve {
    /// Derive thresholds and gamma for the given strength
    #[must_use]
    pub fn from_strength(config: &RefinementConfig, strength: EdgeStrength) -> Self {
        let k = strength.offset();
        Self {
            low: config.low_threshold + k * config.low_delta,
            high: config.high_threshold + k * config.high_delta,
            gamma: config.gamma + k * config.gamma_delta,
        }
    }

    /// Map one normalized mask value
    #[must_use]
    pub fn apply(&self, value: f32) -> f32 {
        let v = value.clamp(0.0, 1.0);
        if v <= self.low {
            0.0
        } else if v < self.high {
            let t = (v - self.low) / (self.high - self.low);
            let smooth = t * t * (3.0 - 2.0 * t);
            smooth * self.high.powf(self.gamma)
        } else {
            v.powf(self.gamma)
        }
    }

    /// Lookup table over all 8-bit intensities
    #[must_use]
    pub fn lookup_table(&self) -> [u8; 256] {
        let mut table = [0u8; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let refined = self.apply(i as f32 / 255.0);
            *slot = (refined * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        table
    }

    /// Refine a mask in place
    pub fn apply_to_mask(&self, mask: &mut GrayImage) {
        let table = self.lookup_table();
        for pixel in mask.pixels_mut() {
            pixel.0[0] = table[usize::from(pixel.0[0])];
        }
    }
}
