//! Compute dispatch for the live preview kernel.

use chromaprobe_core::uniforms::{
    BufferIndex, ColorModifierUniform, FrameParams, SelectionUniform, SharedUniforms, TextureIndex,
};

use crate::analysis_dispatch::COMMON_WGSL;
use crate::buffers::{ColorOutput, PlaneBuffers};
use crate::layout::{create_compute_pipeline, create_layout, create_uniform, storage_ro_entry, storage_rw_entry, uniform_entry};

const DISPLAY_WGSL: &str = include_str!("../shaders/display.wgsl");

const SELECTION_SLOT: u32 = 1;
const PARAMS_SLOT: u32 = 4;
const MODIFIER_SLOT: u32 = 5;

/// Uniform state for one preview render.
pub struct DisplayFrame {
    pub shared: SharedUniforms,
    pub selection: SelectionUniform,
    pub modifier: ColorModifierUniform,
    pub params: FrameParams,
}

pub struct DisplayDispatch {
    pipeline: wgpu::ComputePipeline,
    scene_layout: wgpu::BindGroupLayout,
    planes_layout: wgpu::BindGroupLayout,
    display_layout: wgpu::BindGroupLayout,
    shared_buf: wgpu::Buffer,
    selection_buf: wgpu::Buffer,
    params_buf: wgpu::Buffer,
    modifier_buf: wgpu::Buffer,
}

impl DisplayDispatch {
    pub fn new(device: &wgpu::Device) -> Self {
        let scene_layout = create_layout(
            device,
            "display_scene",
            &[uniform_entry(
                BufferIndex::SharedUniforms.slot(),
                std::mem::size_of::<SharedUniforms>() as u64,
            )],
        );
        let planes_layout = create_layout(
            device,
            "display_planes",
            &[
                storage_rw_entry(TextureIndex::Color.slot(), 4),
                storage_ro_entry(TextureIndex::Luma.slot(), 4),
                storage_ro_entry(TextureIndex::Chroma.slot(), 8),
                storage_ro_entry(TextureIndex::Depth.slot(), 4),
                storage_ro_entry(TextureIndex::Confidence.slot(), 4),
            ],
        );
        let display_layout = create_layout(
            device,
            "display",
            &[
                uniform_entry(SELECTION_SLOT, std::mem::size_of::<SelectionUniform>() as u64),
                uniform_entry(PARAMS_SLOT, std::mem::size_of::<FrameParams>() as u64),
                uniform_entry(MODIFIER_SLOT, std::mem::size_of::<ColorModifierUniform>() as u64),
            ],
        );

        let source = [COMMON_WGSL, DISPLAY_WGSL].concat();
        let pipeline = create_compute_pipeline(
            device,
            "render_display",
            &source,
            "render_display",
            &[&scene_layout, &planes_layout, &display_layout],
        );

        Self {
            pipeline,
            scene_layout,
            planes_layout,
            display_layout,
            shared_buf: create_uniform::<SharedUniforms>(device, "chromaprobe_display_shared_uniforms"),
            selection_buf: create_uniform::<SelectionUniform>(device, "chromaprobe_display_selection"),
            params_buf: create_uniform::<FrameParams>(device, "chromaprobe_display_params"),
            modifier_buf: create_uniform::<ColorModifierUniform>(device, "chromaprobe_color_modifier"),
        }
    }

    /// Record the preview pass into `encoder`, one invocation per pixel.
    pub fn dispatch(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        planes: &PlaneBuffers,
        output: &ColorOutput,
        frame: &DisplayFrame,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        queue.write_buffer(&self.shared_buf, 0, bytemuck::bytes_of(&frame.shared));
        queue.write_buffer(&self.selection_buf, 0, bytemuck::bytes_of(&frame.selection));
        queue.write_buffer(&self.params_buf, 0, bytemuck::bytes_of(&frame.params));
        queue.write_buffer(&self.modifier_buf, 0, bytemuck::bytes_of(&frame.modifier));

        let scene_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("chromaprobe_display_scene_bg"),
            layout: &self.scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: BufferIndex::SharedUniforms.slot(),
                resource: self.shared_buf.as_entire_binding(),
            }],
        });
        let planes_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("chromaprobe_display_planes_bg"),
            layout: &self.planes_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: TextureIndex::Color.slot(),
                    resource: output.buffer.as_entire_binding(),
                },
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
        let display_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("chromaprobe_display_bg"),
            layout: &self.display_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: SELECTION_SLOT,
                    resource: self.selection_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: PARAMS_SLOT,
                    resource: self.params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: MODIFIER_SLOT,
                    resource: self.modifier_buf.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("chromaprobe_display_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &scene_bg, &[]);
        pass.set_bind_group(1, &planes_bg, &[]);
        pass.set_bind_group(2, &display_bg, &[]);
        pass.dispatch_workgroups(frame.params.width.div_ceil(16), frame.params.height.div_ceil(16), 1);
    }
}
