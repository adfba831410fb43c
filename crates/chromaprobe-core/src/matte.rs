//! Depth matting: drop pixels whose depth sample is unusable or out of range.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FrameError};

/// Confidence levels reported alongside depth maps.
pub const CONFIDENCE_LOW: u8 = 0;
pub const CONFIDENCE_MEDIUM: u8 = 1;
pub const CONFIDENCE_HIGH: u8 = 2;

/// Depth map in metres with an optional per-sample confidence plane.
///
/// May be lower resolution than the camera frame; it is sampled at the
/// nearest normalised coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    pub depth: Vec<f32>,
    pub confidence: Option<Vec<u8>>,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, depth: Vec<f32>, confidence: Option<Vec<u8>>) -> Result<Self, FrameError> {
        let frame = Self {
            width,
            height,
            depth,
            confidence,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Constant depth at full confidence.
    pub fn uniform(width: u32, height: u32, depth: f32) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            depth: vec![depth; n],
            confidence: Some(vec![CONFIDENCE_HIGH; n]),
        }
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                plane: "depth",
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.width as usize * self.height as usize;
        if self.depth.len() != expected {
            return Err(FrameError::PlaneLength {
                plane: "depth",
                expected,
                actual: self.depth.len(),
            });
        }
        if let Some(conf) = &self.confidence
            && conf.len() != expected
        {
            return Err(FrameError::PlaneLength {
                plane: "confidence",
                expected,
                actual: conf.len(),
            });
        }
        Ok(())
    }

    /// Index of the sample nearest to normalised `(u, v)`.
    pub fn index_at(&self, u: f32, v: f32) -> usize {
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        (y * self.width + x) as usize
    }

    pub fn sample(&self, u: f32, v: f32) -> (f32, Option<u8>) {
        let idx = self.index_at(u, v);
        (self.depth[idx], self.confidence.as_ref().map(|c| c[idx]))
    }
}

/// Acceptance rule for depth samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthMatte {
    /// Samples below this confidence are rejected.
    pub min_confidence: u8,
    /// Nearest accepted depth in metres.
    pub near: f32,
    /// Farthest accepted depth in metres.
    pub far: f32,
}

impl Default for DepthMatte {
    fn default() -> Self {
        Self {
            min_confidence: CONFIDENCE_MEDIUM,
            near: 0.0,
            far: f32::MAX,
        }
    }
}

impl DepthMatte {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.near >= 0.0 && self.near < self.far) {
            return Err(ConfigError::DepthRange {
                near: self.near,
                far: self.far,
            });
        }
        Ok(())
    }

    /// Whether one depth sample survives the matte. Non-finite depth never
    /// does; a missing confidence plane counts as fully confident.
    pub fn accepts(&self, depth: f32, confidence: Option<u8>) -> bool {
        if !depth.is_finite() {
            return false;
        }
        if confidence.is_some_and(|c| c < self.min_confidence) {
            return false;
        }
        depth >= self.near && depth <= self.far
    }

    /// Matte test at normalised `(u, v)`.
    pub fn passes(&self, depth: &DepthFrame, u: f32, v: f32) -> bool {
        let (d, c) = depth.sample(u, v);
        self.accepts(d, c)
    }
}
