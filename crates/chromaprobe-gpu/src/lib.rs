//! Chromaprobe GPU: wgpu compute implementation of the analysis pipeline.
//!
//! Runs the per-pixel stages and the two-pass tile reduction as WGSL
//! kernels, renders the exposure preview, and reads statistics back through
//! non-blocking staging slots. Layout records and reference semantics come
//! from `chromaprobe-core`.

pub mod analysis_dispatch;
pub mod buffers;
pub mod display_dispatch;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod readback;

pub use error::GpuError;
pub use pipeline::{GpuAnalysisPipeline, SubmitOutcome};

/// Features the kernels need. Plain compute only.
pub fn required_features() -> wgpu::Features {
    wgpu::Features::empty()
}
