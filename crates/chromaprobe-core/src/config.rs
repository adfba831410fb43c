//! Analysis configuration, loadable from JSON.

use serde::{Deserialize, Serialize};

use crate::convert::{TransferCurve, YCbCrMatrix};
use crate::error::ConfigError;
use crate::exposure::ExposureThresholds;
use crate::hsv::HsvMode;
use crate::matte::DepthMatte;

/// Scalar channel fed to the reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Channel {
    /// One HSV component of the converted colour.
    Hsv { mode: HsvMode },
    /// Raw luma sample.
    Luma,
    /// Relative luminance of the converted colour.
    Luminance,
    /// Darkest and brightest RGB channel with mean luma, for exposure control.
    Exposure,
}

impl Channel {
    /// Source tag written into `FrameParams::source`.
    pub const fn source_tag(self) -> u32 {
        match self {
            Self::Hsv { .. } => 0,
            Self::Luma => 1,
            Self::Luminance => 2,
            Self::Exposure => 3,
        }
    }

    pub const fn hsv_mode(self) -> Option<HsvMode> {
        match self {
            Self::Hsv { mode } => Some(mode),
            _ => None,
        }
    }

    /// Whether the mean is taken on the circle.
    pub const fn is_circular(self) -> bool {
        matches!(self, Self::Hsv { mode: HsvMode::Hue })
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::Hsv { mode: HsvMode::Value }
    }
}

/// Everything that shapes per-frame analysis apart from the selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub matrix: YCbCrMatrix,
    pub transfer: TransferCurve,
    pub channel: Channel,
    pub thresholds: ExposureThresholds,
    pub matte: DepthMatte,
    /// Brightness factor for overlay pixels outside the selection.
    pub outside_dim: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            matrix: YCbCrMatrix::default(),
            transfer: TransferCurve::default(),
            channel: Channel::default(),
            thresholds: ExposureThresholds::default(),
            matte: DepthMatte::default(),
            outside_dim: 0.5,
        }
    }
}

impl AnalysisConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.matte.validate()?;
        if !(0.0..=1.0).contains(&self.outside_dim) {
            return Err(ConfigError::OutOfUnitRange {
                name: "outside_dim",
                value: self.outside_dim,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.matrix, YCbCrMatrix::Bt601Full);
        assert_eq!(config.transfer, TransferCurve::Srgb);
        assert_eq!(config.channel, Channel::Hsv { mode: HsvMode::Value });
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = AnalysisConfig::from_json(
            r#"{ "matrix": "bt709_video", "channel": { "kind": "hsv", "mode": "hue" } }"#,
        )
        .unwrap();
        assert_eq!(config.matrix, YCbCrMatrix::Bt709Video);
        assert!(config.channel.is_circular());
        assert_eq!(config.thresholds, ExposureThresholds::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AnalysisConfig {
            channel: Channel::Exposure,
            transfer: TransferCurve::Encoded,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(AnalysisConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_thresholds_rejected_on_load() {
        let err = AnalysisConfig::from_json(r#"{ "thresholds": { "over": 0.1, "under": 0.5 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdOrder { .. }));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(AnalysisConfig::from_json("{ nope"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_source_tags() {
        assert_eq!(Channel::Hsv { mode: HsvMode::Saturation }.source_tag(), 0);
        assert_eq!(Channel::Luma.source_tag(), 1);
        assert_eq!(Channel::Luminance.source_tag(), 2);
        assert_eq!(Channel::Exposure.source_tag(), 3);
    }
}
