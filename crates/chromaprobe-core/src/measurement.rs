//! Per-frame statistics derived from the combined reduction.

use serde::{Deserialize, Serialize};

use crate::config::Channel;
use crate::uniforms::{MinMax, TilePartial};

/// Exposure settings reported by the camera for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// APEX aperture value (Av).
    pub aperture_value: f32,
    pub iso: f32,
    pub shutter_seconds: f32,
}

impl CameraSettings {
    /// Factor turning relative luminance into a scene-referred estimate,
    /// normalised to f/√2, ISO 100 and 1/60 s.
    pub fn luminance_scale(&self) -> Option<f32> {
        if !(self.iso > 0.0 && self.shutter_seconds > 0.0) {
            return None;
        }
        let scale = 2f32.powf(self.aperture_value) / 2.0 * 100.0 / self.iso * (1.0 / 60.0) / self.shutter_seconds;
        scale.is_finite().then_some(scale)
    }
}

/// Result of one measured frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStatistics {
    pub min_max: MinMax,
    pub mean: f32,
    /// Pixels that passed matting, selection and NaN filtering.
    pub count: u32,
}

impl FrameStatistics {
    /// Interpret a combined partial for `channel`. `None` when no pixel
    /// contributed.
    pub fn from_total(total: &TilePartial, channel: Channel, settings: Option<&CameraSettings>) -> Option<Self> {
        if total.count == 0 {
            return None;
        }
        let mean = if channel.is_circular() {
            circular_mean_degrees(total.sum_sin, total.sum_cos)
        } else {
            total.sum / total.count as f32
        };
        let mut stats = Self {
            min_max: MinMax {
                min: total.min,
                max: total.max,
            },
            mean,
            count: total.count,
        };
        if channel == Channel::Luminance
            && let Some(scale) = settings.and_then(CameraSettings::luminance_scale)
        {
            stats.min_max.min *= scale;
            stats.min_max.max *= scale;
            stats.mean *= scale;
        }
        Some(stats)
    }
}

/// Mean angle in `[0, 360)` from summed unit vectors. Opposite hues that
/// cancel exactly report 0.
pub fn circular_mean_degrees(sum_sin: f32, sum_cos: f32) -> f32 {
    let deg = sum_sin.atan2(sum_cos).to_degrees();
    if deg < 0.0 { deg + 360.0 } else { deg }
}
