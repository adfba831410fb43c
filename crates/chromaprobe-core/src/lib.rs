//! Chromaprobe Core: reference pipeline for live camera colorimetry.
//!
//! Converts biplanar YCbCr camera frames to RGB, applies depth matting and a
//! user-adjustable selection, extracts a scalar channel per pixel and reduces
//! the selection to per-frame statistics. No GPU dependency; `chromaprobe-gpu`
//! runs the same stages as compute kernels and shares the layout records
//! defined in [`uniforms`].

pub mod config;
pub mod convert;
pub mod error;
pub mod exposure;
pub mod frame;
pub mod hsv;
pub mod matte;
pub mod measurement;
pub mod overlay;
pub mod pipeline;
pub mod reduce;
pub mod selection;
pub mod series;
pub mod uniforms;
pub mod view;

// Re-exports for convenience.
pub use config::{AnalysisConfig, Channel};
pub use error::{ConfigError, FrameError, PipelineError};
pub use frame::CameraFrame;
pub use hsv::HsvMode;
pub use matte::{DepthFrame, DepthMatte};
pub use measurement::{CameraSettings, FrameStatistics};
pub use pipeline::{AnalysisPipeline, FrameContext, FrameInput, FrameOutcome};
pub use selection::{SelectionState, SharedSelection};
pub use uniforms::MinMax;
pub use view::AnalysisView;
