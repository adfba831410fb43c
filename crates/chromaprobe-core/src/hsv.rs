//! HSV channel extraction.
//!
//! Hue is in degrees `[0, 360)`, saturation and value in `[0, 1]`. Hue is
//! defined as 0 for achromatic pixels and saturation as 0 for black, so no
//! finite input produces NaN here.

use palette::{FromColor, Hsv, Srgb};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::uniforms::ModeHsv;

/// Which HSV component feeds the reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HsvMode {
    #[default]
    Hue,
    Saturation,
    Value,
}

impl HsvMode {
    /// Tag written into the `ModeHsv` uniform.
    pub const fn tag(self) -> f32 {
        match self {
            Self::Hue => 0.0,
            Self::Saturation => 1.0,
            Self::Value => 2.0,
        }
    }

    /// Parse an exact tag. Values other than 0, 1 or 2 are rejected.
    pub fn from_tag(tag: f32) -> Result<Self, ConfigError> {
        if tag == 0.0 {
            Ok(Self::Hue)
        } else if tag == 1.0 {
            Ok(Self::Saturation)
        } else if tag == 2.0 {
            Ok(Self::Value)
        } else {
            Err(ConfigError::UnknownHsvTag(tag))
        }
    }

    pub fn extract(self, rgb: [f32; 3]) -> f32 {
        match self {
            Self::Hue => hue(rgb),
            Self::Saturation => saturation(rgb),
            Self::Value => value(rgb),
        }
    }
}

impl From<HsvMode> for ModeHsv {
    fn from(mode: HsvMode) -> Self {
        Self {
            mode: mode.tag(),
            _pad: [0.0; 3],
        }
    }
}

impl TryFrom<f32> for HsvMode {
    type Error = ConfigError;

    fn try_from(tag: f32) -> Result<Self, Self::Error> {
        Self::from_tag(tag)
    }
}

fn max3(rgb: [f32; 3]) -> f32 {
    rgb[0].max(rgb[1]).max(rgb[2])
}

fn min3(rgb: [f32; 3]) -> f32 {
    rgb[0].min(rgb[1]).min(rgb[2])
}

/// Hue in degrees. Ties between maximal channels resolve R, then G, then B.
pub fn hue(rgb: [f32; 3]) -> f32 {
    let [r, g, b] = rgb;
    let max = max3(rgb);
    let chroma = max - min3(rgb);
    if chroma <= 0.0 {
        return 0.0;
    }
    let sector = if max == r {
        let h = (g - b) / chroma;
        if h < 0.0 { h + 6.0 } else { h }
    } else if max == g {
        (b - r) / chroma + 2.0
    } else {
        (r - g) / chroma + 4.0
    };
    let degrees = sector * 60.0;
    if degrees >= 360.0 { degrees - 360.0 } else { degrees }
}

pub fn saturation(rgb: [f32; 3]) -> f32 {
    let max = max3(rgb);
    if max <= 0.0 {
        return 0.0;
    }
    (max - min3(rgb)) / max
}

pub fn value(rgb: [f32; 3]) -> f32 {
    max3(rgb)
}

pub fn rgb_to_hsv(rgb: [f32; 3]) -> [f32; 3] {
    [hue(rgb), saturation(rgb), value(rgb)]
}

/// Inverse of [`rgb_to_hsv`], used for swatches and round-trip checks.
pub fn hsv_to_rgb(hsv: [f32; 3]) -> [f32; 3] {
    let color = Hsv::<palette::encoding::Srgb, f32>::new(hsv[0], hsv[1], hsv[2]);
    let rgb = Srgb::<f32>::from_color(color);
    [rgb.red, rgb.green, rgb.blue]
}
