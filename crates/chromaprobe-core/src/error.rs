//! Error types for frame validation, configuration and per-frame processing.

use thiserror::Error;

/// A camera or depth frame whose planes disagree with its declared size.
///
/// Fatal for the frame that carried it only; the pipeline skips the frame
/// and keeps reporting the previous statistics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("{plane} frame has zero area ({width}x{height})")]
    Empty {
        plane: &'static str,
        width: u32,
        height: u32,
    },
    #[error("{plane} plane holds {actual} samples, expected {expected}")]
    PlaneLength {
        plane: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("depth matting is enabled but the frame carries no depth map")]
    MissingDepth,
}

/// Errors produced while loading or validating an [`AnalysisConfig`].
///
/// [`AnalysisConfig`]: crate::config::AnalysisConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse analysis config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{name} must lie in [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f32 },
    #[error("under-exposure threshold {under} must be below over-exposure threshold {over}")]
    ThresholdOrder { under: f32, over: f32 },
    #[error("depth range [{near}, {far}] is empty or negative")]
    DepthRange { near: f32, far: f32 },
    #[error("unknown HSV mode tag {0}")]
    UnknownHsvTag(f32),
}

/// Reasons a frame produced no fresh statistics.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("could not allocate {bytes} bytes of per-frame reduction storage")]
    Allocation { bytes: usize },
    #[error("frame was superseded or the view was torn down")]
    Cancelled,
}
