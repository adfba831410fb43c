//! Display-only exposure highlighting.
//!
//! Pixels whose brightest channel crosses a threshold are tinted with a
//! warning colour. None of this reaches the analysis path.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::uniforms::ColorModifierUniform;

/// Over/under-exposure limits on the maximum RGB channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureThresholds {
    pub over: f32,
    pub under: f32,
}

impl Default for ExposureThresholds {
    fn default() -> Self {
        Self {
            over: 0.98,
            under: 0.02,
        }
    }
}

impl ExposureThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("over-exposure threshold", self.over), ("under-exposure threshold", self.under)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { name, value });
            }
        }
        if self.under >= self.over {
            return Err(ConfigError::ThresholdOrder {
                under: self.under,
                over: self.over,
            });
        }
        Ok(())
    }
}

/// Grayscale switch and warning tints for the live preview.
///
/// A marker left unset means pixels past that threshold are shown as they
/// are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderColorModifier {
    pub grayscale: bool,
    pub overexposure_color: Option<[f32; 3]>,
    pub underexposure_color: Option<[f32; 3]>,
}

impl ShaderColorModifier {
    /// Red for clipped highlights, blue for crushed shadows.
    pub const WARNING: Self = Self {
        grayscale: false,
        overexposure_color: Some([1.0, 0.0, 0.0]),
        underexposure_color: Some([0.0, 0.0, 1.0]),
    };

    /// Unset markers are written as NaN, which the display kernel skips.
    pub fn to_uniform(&self, thresholds: &ExposureThresholds) -> ColorModifierUniform {
        ColorModifierUniform {
            grayscale: u32::from(self.grayscale),
            _pad: [0; 3],
            overexposure_color: self.overexposure_color.unwrap_or([f32::NAN; 3]),
            over_threshold: thresholds.over,
            underexposure_color: self.underexposure_color.unwrap_or([f32::NAN; 3]),
            under_threshold: thresholds.under,
        }
    }

    /// Apply grayscale and exposure tinting to one display pixel.
    ///
    /// The threshold test runs on the (possibly desaturated) colour that would
    /// otherwise be shown.
    pub fn apply(&self, rgb: [f32; 3], thresholds: &ExposureThresholds, luma_weights: [f32; 3]) -> [f32; 3] {
        let base = if self.grayscale {
            let l = luma_weights[0] * rgb[0] + luma_weights[1] * rgb[1] + luma_weights[2] * rgb[2];
            [l, l, l]
        } else {
            rgb
        };
        let peak = base[0].max(base[1]).max(base[2]);
        let marker = if peak > thresholds.over {
            self.overexposure_color
        } else if peak < thresholds.under {
            self.underexposure_color
        } else {
            None
        };
        marker.unwrap_or(base)
    }
}
