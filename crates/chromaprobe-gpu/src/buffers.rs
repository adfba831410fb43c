//! Device buffers for camera planes, reduction partials and the preview.
//!
//! Buffers are kept across frames and only reallocated when a frame needs
//! more room than the current allocation.

use chromaprobe_core::uniforms::TilePartial;
use chromaprobe_core::{CameraFrame, DepthFrame};
use wgpu::util::DeviceExt;

use crate::error::GpuError;

/// Smallest allocation for any storage binding.
const MIN_STORAGE_BYTES: u64 = 16;

const PLANE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE.union(wgpu::BufferUsages::COPY_DST);

/// Reject sizes the device cannot bind before we try to allocate them.
pub(crate) fn check_size(limits: &wgpu::Limits, label: &'static str, size: u64) -> Result<(), GpuError> {
    let limit = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
    if size > limit {
        return Err(GpuError::BufferTooLarge { label, size, limit });
    }
    Ok(())
}

fn storage_descriptor(label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::BufferDescriptor<'_> {
    wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_STORAGE_BYTES),
        usage,
        mapped_at_creation: false,
    }
}

fn create_storage(device: &wgpu::Device, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&storage_descriptor(label, size, usage))
}

/// Allocate a buffer mid-stream. Allocation failures come back as errors
/// instead of reaching the uncaptured-error handler, which panics.
pub fn create_buffer_checked(
    device: &wgpu::Device,
    label: &'static str,
    descriptor: &wgpu::BufferDescriptor<'_>,
) -> Result<wgpu::Buffer, GpuError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let buffer = device.create_buffer(descriptor);
    let invalid = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    let size = descriptor.size;
    match (out_of_memory, invalid) {
        (Some(err), _) => Err(GpuError::OutOfMemory {
            label,
            size,
            message: err.to_string(),
        }),
        (None, Some(err)) => Err(GpuError::Allocation {
            label,
            size,
            message: err.to_string(),
        }),
        (None, None) => Ok(buffer),
    }
}

/// Grow `buffer` to at least `size` bytes. Returns true if reallocated.
fn ensure_capacity(
    device: &wgpu::Device,
    buffer: &mut wgpu::Buffer,
    label: &'static str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> Result<bool, GpuError> {
    if buffer.size() >= size.max(MIN_STORAGE_BYTES) {
        return Ok(false);
    }
    *buffer = create_buffer_checked(device, label, &storage_descriptor(label, size, usage))?;
    Ok(true)
}

/// Camera and depth planes in the layout the kernels read.
pub struct PlaneBuffers {
    pub luma: wgpu::Buffer,
    pub chroma: wgpu::Buffer,
    pub depth: wgpu::Buffer,
    pub confidence: wgpu::Buffer,
    pub width: u32,
    pub height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    pub has_confidence: bool,
}

impl PlaneBuffers {
    pub fn new(device: &wgpu::Device) -> Self {
        // Placeholder depth: one far, fully confident sample.
        let depth = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("chromaprobe_depth_placeholder"),
            contents: bytemuck::cast_slice(&[0.0f32; 4]),
            usage: PLANE_USAGE,
        });
        let confidence = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("chromaprobe_confidence_placeholder"),
            contents: bytemuck::cast_slice(&[2u32; 4]),
            usage: PLANE_USAGE,
        });
        Self {
            luma: create_storage(device, "chromaprobe_luma", 0, PLANE_USAGE),
            chroma: create_storage(device, "chromaprobe_chroma", 0, PLANE_USAGE),
            depth,
            confidence,
            width: 0,
            height: 0,
            depth_width: 1,
            depth_height: 1,
            has_confidence: false,
        }
    }

    /// Upload one frame's planes. `depth` is uploaded only when given.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame: &CameraFrame,
        depth: Option<&DepthFrame>,
    ) -> Result<(), GpuError> {
        let limits = device.limits();
        let luma_bytes: &[u8] = bytemuck::cast_slice(&frame.luma);
        let chroma_bytes: &[u8] = bytemuck::cast_slice(&frame.chroma);
        check_size(&limits, "luma plane", luma_bytes.len() as u64)?;
        check_size(&limits, "chroma plane", chroma_bytes.len() as u64)?;

        ensure_capacity(device, &mut self.luma, "chromaprobe_luma", luma_bytes.len() as u64, PLANE_USAGE)?;
        ensure_capacity(device, &mut self.chroma, "chromaprobe_chroma", chroma_bytes.len() as u64, PLANE_USAGE)?;
        queue.write_buffer(&self.luma, 0, luma_bytes);
        queue.write_buffer(&self.chroma, 0, chroma_bytes);
        self.width = frame.width;
        self.height = frame.height;

        if let Some(depth) = depth {
            let depth_bytes: &[u8] = bytemuck::cast_slice(&depth.depth);
            check_size(&limits, "depth plane", depth_bytes.len() as u64)?;
            ensure_capacity(device, &mut self.depth, "chromaprobe_depth", depth_bytes.len() as u64, PLANE_USAGE)?;
            queue.write_buffer(&self.depth, 0, depth_bytes);

            if let Some(conf) = &depth.confidence {
                let widened: Vec<u32> = conf.iter().map(|&c| u32::from(c)).collect();
                let conf_bytes: &[u8] = bytemuck::cast_slice(&widened);
                check_size(&limits, "confidence plane", conf_bytes.len() as u64)?;
                ensure_capacity(
                    device,
                    &mut self.confidence,
                    "chromaprobe_confidence",
                    conf_bytes.len() as u64,
                    PLANE_USAGE,
                )?;
                queue.write_buffer(&self.confidence, 0, conf_bytes);
            }
            self.depth_width = depth.width;
            self.depth_height = depth.height;
            self.has_confidence = depth.confidence.is_some();
        }
        Ok(())
    }
}

/// Tile partials plus the combined result.
pub struct ReductionBuffers {
    pub partials: wgpu::Buffer,
    pub result: wgpu::Buffer,
    capacity: usize,
}

impl ReductionBuffers {
    pub const RESULT_BYTES: u64 = std::mem::size_of::<TilePartial>() as u64;

    pub fn new(device: &wgpu::Device) -> Self {
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        Self {
            partials: create_storage(device, "chromaprobe_tile_partials", Self::RESULT_BYTES, usage),
            result: create_storage(device, "chromaprobe_reduction_result", Self::RESULT_BYTES, usage),
            capacity: 1,
        }
    }

    /// Make room for `tiles` partials. Entries past the frame's partial
    /// length keep whatever an earlier frame wrote.
    pub fn ensure_tiles(&mut self, device: &wgpu::Device, tiles: usize) -> Result<(), GpuError> {
        let size = tiles as u64 * Self::RESULT_BYTES;
        check_size(&device.limits(), "tile partial buffer", size)?;
        if tiles > self.capacity {
            let label = "chromaprobe_tile_partials";
            self.partials = create_buffer_checked(
                device,
                label,
                &storage_descriptor(label, size, wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC),
            )?;
            self.capacity = tiles;
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Packed RGBA8 preview output, one `u32` per pixel.
pub struct ColorOutput {
    pub buffer: wgpu::Buffer,
}

impl ColorOutput {
    const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE.union(wgpu::BufferUsages::COPY_SRC);

    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            buffer: create_storage(device, "chromaprobe_color_output", 0, Self::USAGE),
        }
    }

    pub fn ensure(&mut self, device: &wgpu::Device, width: u32, height: u32) -> Result<u64, GpuError> {
        let size = u64::from(width) * u64::from(height) * 4;
        check_size(&device.limits(), "preview output", size)?;
        ensure_capacity(device, &mut self.buffer, "chromaprobe_color_output", size, Self::USAGE)?;
        Ok(size)
    }
}
