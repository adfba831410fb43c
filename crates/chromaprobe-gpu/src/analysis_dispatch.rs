//! Compute dispatch for the analysis passes: per-pixel evaluation with the
//! tile reduction, then the partial combine.

use chromaprobe_core::AnalysisConfig;
use chromaprobe_core::frame::chroma_dims;
use chromaprobe_core::reduce::{ReductionGrid, TILE_EDGE};
use chromaprobe_core::uniforms::{
    BufferIndex, FrameParams, ModeHsv, PartialBufferLength, SelectionUniform, SharedUniforms, TextureIndex,
    TilePartial,
};

use crate::buffers::{PlaneBuffers, ReductionBuffers};
use crate::layout::{
    create_compute_pipeline, create_layout, create_uniform, storage_ro_entry, storage_rw_entry, uniform_entry,
};

pub(crate) const COMMON_WGSL: &str = include_str!("../shaders/common.wgsl");
const ANALYZE_WGSL: &str = include_str!("../shaders/analyze.wgsl");
const COMBINE_WGSL: &str = include_str!("../shaders/combine.wgsl");

const TILE_PARTIAL_BYTES: u64 = std::mem::size_of::<TilePartial>() as u64;

/// Analysis bindings in group 2.
mod slot {
    pub const PARTIALS: u32 = 0;
    pub const SELECTION: u32 = 1;
    pub const PARTIAL_LENGTH: u32 = 2;
    pub const MODE: u32 = 3;
    pub const PARAMS: u32 = 4;
}

/// Fill the kernel constants for one frame.
pub fn frame_params(
    config: &AnalysisConfig,
    planes: &PlaneBuffers,
    grid: &ReductionGrid,
) -> FrameParams {
    let coeffs = config.matrix.coefficients();
    let (chroma_width, chroma_height) = chroma_dims(planes.width, planes.height);
    FrameParams {
        width: planes.width,
        height: planes.height,
        chroma_width,
        chroma_height,
        origin_x: grid.bounds.x,
        origin_y: grid.bounds.y,
        box_width: grid.bounds.width,
        box_height: grid.bounds.height,
        tiles_x: grid.tiles_x,
        source: config.channel.source_tag(),
        linearize: u32::from(config.transfer.linearizes()),
        has_confidence: u32::from(planes.has_confidence),
        depth_width: planes.depth_width,
        depth_height: planes.depth_height,
        min_confidence: u32::from(config.matte.min_confidence),
        _pad0: 0,
        depth_near: config.matte.near,
        depth_far: config.matte.far,
        y_offset: coeffs.y_offset,
        y_scale: coeffs.y_scale,
        c_scale: coeffs.c_scale,
        cr_to_r: coeffs.cr_to_r,
        cb_to_g: coeffs.cb_to_g,
        cr_to_g: coeffs.cr_to_g,
        cb_to_b: coeffs.cb_to_b,
        luma_r: coeffs.luma_weights[0],
        luma_g: coeffs.luma_weights[1],
        luma_b: coeffs.luma_weights[2],
        outside_dim: config.outside_dim,
        _pad1: [0.0; 3],
    }
}

/// Uniform state for one analysis dispatch.
pub struct AnalysisFrame {
    pub shared: SharedUniforms,
    pub selection: SelectionUniform,
    pub mode: ModeHsv,
    pub params: FrameParams,
    pub grid: ReductionGrid,
}

pub struct AnalysisDispatch {
    tile_pipeline: wgpu::ComputePipeline,
    combine_pipeline: wgpu::ComputePipeline,
    scene_layout: wgpu::BindGroupLayout,
    planes_layout: wgpu::BindGroupLayout,
    analysis_layout: wgpu::BindGroupLayout,
    combine_layout: wgpu::BindGroupLayout,
    // Cached uniform buffers (updated via queue.write_buffer each frame).
    shared_buf: wgpu::Buffer,
    selection_buf: wgpu::Buffer,
    partial_length_buf: wgpu::Buffer,
    mode_buf: wgpu::Buffer,
    params_buf: wgpu::Buffer,
}

impl AnalysisDispatch {
    pub fn new(device: &wgpu::Device) -> Self {
        let scene_layout = create_layout(
            device,
            "analysis_scene",
            &[uniform_entry(
                BufferIndex::SharedUniforms.slot(),
                std::mem::size_of::<SharedUniforms>() as u64,
            )],
        );
        let planes_layout = create_layout(
            device,
            "analysis_planes",
            &[
                storage_ro_entry(TextureIndex::Luma.slot(), 4),
                storage_ro_entry(TextureIndex::Chroma.slot(), 8),
                storage_ro_entry(TextureIndex::Depth.slot(), 4),
                storage_ro_entry(TextureIndex::Confidence.slot(), 4),
            ],
        );
        let analysis_layout = create_layout(
            device,
            "analysis",
            &[
                storage_rw_entry(slot::PARTIALS, TILE_PARTIAL_BYTES),
                uniform_entry(slot::SELECTION, std::mem::size_of::<SelectionUniform>() as u64),
                uniform_entry(slot::PARTIAL_LENGTH, std::mem::size_of::<PartialBufferLength>() as u64),
                uniform_entry(slot::MODE, std::mem::size_of::<ModeHsv>() as u64),
                uniform_entry(slot::PARAMS, std::mem::size_of::<FrameParams>() as u64),
            ],
        );
        let combine_layout = create_layout(
            device,
            "combine",
            &[
                storage_ro_entry(0, TILE_PARTIAL_BYTES),
                storage_rw_entry(1, TILE_PARTIAL_BYTES),
                uniform_entry(2, std::mem::size_of::<PartialBufferLength>() as u64),
            ],
        );

        let analyze_source = [COMMON_WGSL, ANALYZE_WGSL].concat();
        let tile_pipeline = create_compute_pipeline(
            device,
            "analyze_tiles",
            &analyze_source,
            "analyze_tiles",
            &[&scene_layout, &planes_layout, &analysis_layout],
        );
        let combine_pipeline =
            create_compute_pipeline(device, "combine_partials", COMBINE_WGSL, "combine_partials", &[&combine_layout]);

        tracing::info!("Analysis compute pipelines created");

        Self {
            tile_pipeline,
            combine_pipeline,
            scene_layout,
            planes_layout,
            analysis_layout,
            combine_layout,
            shared_buf: create_uniform::<SharedUniforms>(device, "chromaprobe_shared_uniforms"),
            selection_buf: create_uniform::<SelectionUniform>(device, "chromaprobe_selection"),
            partial_length_buf: create_uniform::<PartialBufferLength>(device, "chromaprobe_partial_length"),
            mode_buf: create_uniform::<ModeHsv>(device, "chromaprobe_mode_hsv"),
            params_buf: create_uniform::<FrameParams>(device, "chromaprobe_frame_params"),
        }
    }

    /// Record both analysis passes. The pass boundary is the barrier between
    /// tile reduction and combine.
    pub fn dispatch(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        planes: &PlaneBuffers,
        reduction: &ReductionBuffers,
        frame: &AnalysisFrame,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        let partial_length = frame.grid.partial_length();
        queue.write_buffer(&self.shared_buf, 0, bytemuck::bytes_of(&frame.shared));
        queue.write_buffer(&self.selection_buf, 0, bytemuck::bytes_of(&frame.selection));
        queue.write_buffer(&self.partial_length_buf, 0, bytemuck::bytes_of(&partial_length));
        queue.write_buffer(&self.mode_buf, 0, bytemuck::bytes_of(&frame.mode));
        queue.write_buffer(&self.params_buf, 0, bytemuck::bytes_of(&frame.params));

        let scene_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("chromaprobe_analysis_scene_bg"),
            layout: &self.scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: BufferIndex::SharedUniforms.slot(),
                resource: self.shared_buf.as_entire_binding(),
            }],
        });
        let planes_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("chromaprobe_analysis_planes_bg"),
            layout: &self.planes_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: TextureIndex::Luma.slot(),
                    resource: planes.luma.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: TextureIndex::Chroma.slot(),
                    resource: planes.chroma.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: TextureIndex::Depth.slot(),
                    resource: planes.depth.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: TextureIndex::Confidence.slot(),
                    resource: planes.confidence.as_entire_binding(),
                },
            ],
        });
        let analysis_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("chromaprobe_analysis_bg"),
            layout: &self.analysis_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: slot::PARTIALS,
                    resource: reduction.partials.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::SELECTION,
                    resource: self.selection_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::PARTIAL_LENGTH,
                    resource: self.partial_length_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::MODE,
                    resource: self.mode_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::PARAMS,
                    resource: self.params_buf.as_entire_binding(),
                },
            ],
        });
        let combine_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("chromaprobe_combine_bg"),
            layout: &self.combine_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: reduction.partials.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: reduction.result.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.partial_length_buf.as_entire_binding(),
                },
            ],
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("chromaprobe_analyze_tiles_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.tile_pipeline);
            pass.set_bind_group(0, &scene_bg, &[]);
            pass.set_bind_group(1, &planes_bg, &[]);
            pass.set_bind_group(2, &analysis_bg, &[]);
            pass.dispatch_workgroups(frame.grid.tiles_x, frame.grid.tiles_y, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("chromaprobe_combine_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.combine_pipeline);
            pass.set_bind_group(0, &combine_bg, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }
    }
}

const _: () = assert!(TILE_EDGE == 16, "analyze.wgsl hard-codes 16x16 workgroups");
