//! YCbCr → RGB conversion and gamma linearisation.
//!
//! Camera frames arrive as full-resolution luma plus 2×2-subsampled
//! interleaved chroma. The matrix and range are configurable; output is
//! clamped to `[0, 1]` with alpha fixed at 1.

use serde::{Deserialize, Serialize};

/// YCbCr → RGB matrix and quantisation range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YCbCrMatrix {
    /// ITU-R BT.601, full range (what the capture session delivers by default).
    #[default]
    Bt601Full,
    /// ITU-R BT.709, full range.
    Bt709Full,
    /// ITU-R BT.601, video range (Y in 16..235, C in 16..240).
    Bt601Video,
    /// ITU-R BT.709, video range.
    Bt709Video,
}

/// Expanded conversion constants for one [`YCbCrMatrix`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YCbCrCoefficients {
    pub y_offset: f32,
    pub y_scale: f32,
    pub c_scale: f32,
    pub cr_to_r: f32,
    pub cb_to_g: f32,
    pub cr_to_g: f32,
    pub cb_to_b: f32,
    /// `(Kr, Kg, Kb)`, also used for grayscale and luminance.
    pub luma_weights: [f32; 3],
}

impl YCbCrMatrix {
    fn kr_kb(self) -> (f32, f32) {
        match self {
            Self::Bt601Full | Self::Bt601Video => (0.299, 0.114),
            Self::Bt709Full | Self::Bt709Video => (0.2126, 0.0722),
        }
    }

    fn is_video_range(self) -> bool {
        matches!(self, Self::Bt601Video | Self::Bt709Video)
    }

    pub fn coefficients(self) -> YCbCrCoefficients {
        let (kr, kb) = self.kr_kb();
        let kg = 1.0 - kr - kb;
        let (y_offset, y_scale, c_scale) = if self.is_video_range() {
            (16.0 / 255.0, 255.0 / 219.0, 255.0 / 224.0)
        } else {
            (0.0, 1.0, 1.0)
        };
        YCbCrCoefficients {
            y_offset,
            y_scale,
            c_scale,
            cr_to_r: 2.0 * (1.0 - kr),
            cb_to_g: 2.0 * kb * (1.0 - kb) / kg,
            cr_to_g: 2.0 * kr * (1.0 - kr) / kg,
            cb_to_b: 2.0 * (1.0 - kb),
            luma_weights: [kr, kg, kb],
        }
    }
}

impl YCbCrCoefficients {
    /// Convert one luma sample and its chroma pair to clamped RGBA.
    ///
    /// Non-finite inputs propagate as NaN so the reduction can drop them.
    pub fn to_rgba(&self, y: f32, cbcr: [f32; 2]) -> [f32; 4] {
        let yv = (y - self.y_offset) * self.y_scale;
        let cb = (cbcr[0] - 0.5) * self.c_scale;
        let cr = (cbcr[1] - 0.5) * self.c_scale;
        let r = yv + self.cr_to_r * cr;
        let g = yv - self.cb_to_g * cb - self.cr_to_g * cr;
        let b = yv + self.cb_to_b * cb;
        [clamp_unit(r), clamp_unit(g), clamp_unit(b), 1.0]
    }

    pub fn to_rgb(&self, y: f32, cbcr: [f32; 2]) -> [f32; 3] {
        let [r, g, b, _] = self.to_rgba(y, cbcr);
        [r, g, b]
    }

    /// Inverse of [`to_rgb`](Self::to_rgb) for in-gamut input.
    pub fn from_rgb(&self, rgb: [f32; 3]) -> (f32, [f32; 2]) {
        let [kr, _, kb] = self.luma_weights;
        let y = self.luma(rgb);
        let cb = (rgb[2] - y) / (2.0 * (1.0 - kb));
        let cr = (rgb[0] - y) / (2.0 * (1.0 - kr));
        (
            y / self.y_scale + self.y_offset,
            [cb / self.c_scale + 0.5, cr / self.c_scale + 0.5],
        )
    }

    /// Weighted sum with the matrix's luma coefficients.
    pub fn luma(&self, rgb: [f32; 3]) -> f32 {
        let [kr, kg, kb] = self.luma_weights;
        kr * rgb[0] + kg * rgb[1] + kb * rgb[2]
    }
}

fn clamp_unit(v: f32) -> f32 {
    // f32::clamp keeps NaN as NaN.
    v.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Transfer functions
// ---------------------------------------------------------------------------

/// A transfer function that converts between linear and non-linear encodings.
pub trait TransferFunction: Send + Sync {
    /// Convert from non-linear (encoded) to linear light.
    fn to_linear(&self, encoded: f32) -> f32;

    /// Convert from linear light to non-linear (encoded).
    fn to_encoded(&self, linear: f32) -> f32;
}

/// sRGB transfer function per IEC 61966-2-1.
///
/// ```text
/// to_linear:   V <= 0.04045 → V / 12.92
///              V >  0.04045 → ((V + 0.055) / 1.055) ^ 2.4
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SrgbTransfer;

impl TransferFunction for SrgbTransfer {
    fn to_linear(&self, encoded: f32) -> f32 {
        if encoded <= 0.04045 {
            encoded / 12.92
        } else {
            ((encoded + 0.055) / 1.055).powf(2.4)
        }
    }

    fn to_encoded(&self, linear: f32) -> f32 {
        if linear <= 0.0031308 {
            linear * 12.92
        } else {
            1.055 * linear.powf(1.0 / 2.4) - 0.055
        }
    }
}

/// Identity transfer; leaves display-encoded values untouched.
#[derive(Debug, Clone, Copy)]
pub struct IdentityTransfer;

impl TransferFunction for IdentityTransfer {
    fn to_linear(&self, encoded: f32) -> f32 {
        encoded
    }

    fn to_encoded(&self, linear: f32) -> f32 {
        linear
    }
}

/// Which curve the analysis path applies after conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferCurve {
    /// Decode sRGB gamma before analysis.
    #[default]
    Srgb,
    /// Analyse display-encoded values directly.
    Encoded,
}

impl TransferCurve {
    pub fn function(self) -> &'static dyn TransferFunction {
        match self {
            Self::Srgb => &SrgbTransfer,
            Self::Encoded => &IdentityTransfer,
        }
    }

    pub fn linearizes(self) -> bool {
        matches!(self, Self::Srgb)
    }

    pub fn linearize(self, rgb: [f32; 3]) -> [f32; 3] {
        let tf = self.function();
        rgb.map(|c| tf.to_linear(c))
    }
}
