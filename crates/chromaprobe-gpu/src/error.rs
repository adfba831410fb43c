//! GPU-side error type.

use chromaprobe_core::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("{label} needs {size} bytes but the device allows {limit}")]
    BufferTooLarge {
        label: &'static str,
        size: u64,
        limit: u64,
    },
    #[error("out of device memory allocating {label} ({size} bytes): {message}")]
    OutOfMemory {
        label: &'static str,
        size: u64,
        message: String,
    },
    #[error("device rejected {label} ({size} bytes): {message}")]
    Allocation {
        label: &'static str,
        size: u64,
        message: String,
    },
    #[error("staging buffer map failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}
