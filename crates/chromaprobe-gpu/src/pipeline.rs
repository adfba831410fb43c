//! GPU analysis pipeline: upload, dispatch, non-blocking statistics.
//!
//! Mirrors [`chromaprobe_core::AnalysisPipeline`] frame for frame. Malformed
//! frames and empty selections are settled on the host without touching the
//! device; everything else is queued and collected later with
//! [`GpuAnalysisPipeline::try_collect`].

use std::sync::Arc;

use chromaprobe_core::exposure::ShaderColorModifier;
use chromaprobe_core::pipeline::FrameScheduler;
use chromaprobe_core::reduce::ReductionGrid;
use chromaprobe_core::selection::PixelRect;
use chromaprobe_core::uniforms::{ModeHsv, SharedUniforms};
use chromaprobe_core::{
    AnalysisConfig, CameraFrame, DepthFrame, FrameContext, FrameError, FrameInput, FrameOutcome, FrameStatistics,
    HsvMode,
};
use tracing::{debug, info, warn};

use crate::analysis_dispatch::{AnalysisDispatch, AnalysisFrame, frame_params};
use crate::buffers::{ColorOutput, PlaneBuffers, ReductionBuffers, create_buffer_checked};
use crate::display_dispatch::{DisplayDispatch, DisplayFrame};
use crate::error::GpuError;
use crate::readback::{CompletedReadback, ReadbackTag, StatsReadback};

/// What happened to a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubmitOutcome {
    /// Dispatched; the result arrives through `try_collect` under this
    /// generation.
    Queued(u64),
    /// Settled on the host without a dispatch.
    Immediate(FrameOutcome),
    /// Refused: torn down, too large for the device, out of device memory, or
    /// every readback slot still mapping.
    Dropped,
}

pub struct GpuAnalysisPipeline {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    analysis: AnalysisDispatch,
    display: DisplayDispatch,
    planes: PlaneBuffers,
    reduction: ReductionBuffers,
    color: ColorOutput,
    readback: StatsReadback,
    display_staging: Option<wgpu::Buffer>,
    scheduler: FrameScheduler,
    config: AnalysisConfig,
    uniforms: SharedUniforms,
    last_good: Option<FrameStatistics>,
    /// Newest generation handed to the caller.
    delivered: u64,
}

impl GpuAnalysisPipeline {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, config: AnalysisConfig) -> Self {
        let analysis = AnalysisDispatch::new(&device);
        let display = DisplayDispatch::new(&device);
        let planes = PlaneBuffers::new(&device);
        let reduction = ReductionBuffers::new(&device);
        let color = ColorOutput::new(&device);
        let readback = StatsReadback::new(&device);
        info!("GPU analysis pipeline created (channel {:?})", config.channel);
        Self {
            device,
            queue,
            analysis,
            display,
            planes,
            reduction,
            color,
            readback,
            display_staging: None,
            scheduler: FrameScheduler::new(),
            config,
            uniforms: SharedUniforms::default(),
            last_good: None,
            delivered: 0,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AnalysisConfig {
        &mut self.config
    }

    /// Camera matrices and lighting forwarded to every kernel.
    pub fn set_shared_uniforms(&mut self, uniforms: SharedUniforms) {
        self.uniforms = uniforms;
    }

    pub fn scheduler(&self) -> FrameScheduler {
        self.scheduler.clone()
    }

    pub fn last_good(&self) -> Option<FrameStatistics> {
        self.last_good
    }

    pub fn has_pending(&self) -> bool {
        self.readback.has_pending()
    }

    /// Staging slots currently allocated, spares included.
    pub fn readback_slots(&self) -> usize {
        self.readback.slot_count()
    }

    /// Upload and dispatch one frame. Never waits on the device.
    pub fn submit_frame(&mut self, input: &FrameInput<'_>, ctx: &FrameContext) -> SubmitOutcome {
        if self.scheduler.is_torn_down() {
            return SubmitOutcome::Dropped;
        }
        if let Err(err) = validate(input, ctx) {
            warn!("Skipping malformed frame at t={:.3}: {err}", input.timestamp);
            return SubmitOutcome::Immediate(match self.last_good {
                Some(stats) => FrameOutcome::Reused(stats),
                None => FrameOutcome::Skipped,
            });
        }

        let selection = ctx.selection.normalized();
        let Some(bounds) = selection.pixel_bounds(input.frame.width, input.frame.height) else {
            return SubmitOutcome::Immediate(FrameOutcome::NoData);
        };
        let grid = ReductionGrid::new(bounds);
        let depth = if ctx.use_depth { input.depth } else { None };
        let acquired = self
            .reduction
            .ensure_tiles(&self.device, grid.tile_count())
            .and_then(|()| self.planes.upload(&self.device, &self.queue, input.frame, depth))
            .and_then(|()| self.readback.acquire(&self.device));
        let slot = match acquired {
            Ok(Some(slot)) => slot,
            Ok(None) => {
                warn!(
                    "All readback slots still mapping; dropping frame at t={:.3}",
                    input.timestamp
                );
                return SubmitOutcome::Dropped;
            }
            Err(err) => {
                warn!("Dropping frame at t={:.3}: {err}", input.timestamp);
                return SubmitOutcome::Dropped;
            }
        };

        let ticket = self.scheduler.begin_frame();
        let mut shared = self.uniforms;
        shared.set_use_depth(depth.is_some());
        let frame = AnalysisFrame {
            shared,
            selection: selection.to_uniform(),
            mode: ModeHsv::from(self.config.channel.hsv_mode().unwrap_or(HsvMode::Value)),
            params: frame_params(&self.config, &self.planes, &grid),
            grid,
        };
        let tag = ReadbackTag {
            generation: ticket.generation(),
            timestamp: input.timestamp,
            channel: self.config.channel,
            camera: input.camera,
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("chromaprobe_analysis_encoder"),
        });
        self.analysis
            .dispatch(&self.device, &self.queue, &self.planes, &self.reduction, &frame, &mut encoder);
        self.readback.record_copy(slot, &mut encoder, &self.reduction, tag);
        self.queue.submit(std::iter::once(encoder.finish()));
        self.readback.begin_map(slot);

        debug!(
            "Queued generation {} ({} tiles, slot {slot})",
            ticket.generation(),
            grid.tile_count()
        );
        SubmitOutcome::Queued(ticket.generation())
    }

    /// Non-blocking: the newest finished frame as `(timestamp, outcome)`.
    ///
    /// Fails only when the device can no longer be polled.
    pub fn try_collect(&mut self) -> Result<Option<(f64, FrameOutcome)>, GpuError> {
        let Some(completed) = self.readback.try_consume(&self.device)? else {
            return Ok(None);
        };
        Ok(self.settle(completed))
    }

    fn settle(&mut self, completed: CompletedReadback) -> Option<(f64, FrameOutcome)> {
        let CompletedReadback { tag, total } = completed;
        if self.scheduler.is_torn_down() || tag.generation <= self.delivered {
            debug!("Discarding readback for generation {}", tag.generation);
            return None;
        }
        self.delivered = tag.generation;
        let outcome = match total {
            Ok(total) => match FrameStatistics::from_total(&total, tag.channel, tag.camera.as_ref()) {
                Some(stats) => {
                    self.last_good = Some(stats);
                    FrameOutcome::Measured(stats)
                }
                None => FrameOutcome::NoData,
            },
            Err(err) => {
                warn!("Dropping frame at t={:.3}: {err}", tag.timestamp);
                FrameOutcome::Dropped
            }
        };
        Some((tag.timestamp, outcome))
    }

    /// Submit one frame and wait for its statistics.
    pub fn analyze_blocking(&mut self, input: &FrameInput<'_>, ctx: &FrameContext) -> Result<FrameOutcome, GpuError> {
        match self.submit_frame(input, ctx) {
            SubmitOutcome::Immediate(outcome) => Ok(outcome),
            SubmitOutcome::Dropped => Ok(FrameOutcome::Dropped),
            SubmitOutcome::Queued(generation) => {
                self.device.poll(wgpu::PollType::wait_indefinitely())?;
                match self.try_collect()? {
                    Some((_, outcome)) if self.delivered == generation => Ok(outcome),
                    _ => Ok(FrameOutcome::Dropped),
                }
            }
        }
    }

    /// Render the live preview and read it back as RGBA8 bytes (r first).
    ///
    /// `ctx.selection` is drawn as given, so a rectangle mid-drag shows up
    /// with its edges in any order.
    pub fn render_display_blocking(
        &mut self,
        frame: &CameraFrame,
        depth: Option<&DepthFrame>,
        ctx: &FrameContext,
        modifier: &ShaderColorModifier,
    ) -> Result<Vec<u8>, GpuError> {
        frame.validate()?;
        let depth = if ctx.use_depth { depth } else { None };
        if let Some(depth) = depth {
            depth.validate()?;
        }

        self.planes.upload(&self.device, &self.queue, frame, depth)?;
        let size = self.color.ensure(&self.device, frame.width, frame.height)?;
        let grid = ReductionGrid::new(PixelRect {
            x: 0,
            y: 0,
            width: frame.width,
            height: frame.height,
        });

        let mut shared = self.uniforms;
        shared.set_use_depth(depth.is_some());
        let display_frame = DisplayFrame {
            shared,
            selection: ctx.selection.to_uniform(),
            modifier: modifier.to_uniform(&self.config.thresholds),
            params: frame_params(&self.config, &self.planes, &grid),
        };

        let needs_new_staging = match self.display_staging.as_ref() {
            Some(buf) => buf.size() < size,
            None => true,
        };
        if needs_new_staging {
            let label = "chromaprobe_display_staging";
            self.display_staging = Some(create_buffer_checked(
                &self.device,
                label,
                &wgpu::BufferDescriptor {
                    label: Some(label),
                    size,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                },
            )?);
        }
        let Some(staging) = self.display_staging.as_ref() else {
            return Err(GpuError::Map(wgpu::BufferAsyncError));
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("chromaprobe_display_encoder"),
        });
        self.display.dispatch(
            &self.device,
            &self.queue,
            &self.planes,
            &self.color,
            &display_frame,
            &mut encoder,
        );
        encoder.copy_buffer_to_buffer(&self.color.buffer, 0, staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let status = Arc::new(parking_lot::Mutex::new(None));
        let callback_status = Arc::clone(&status);
        staging.slice(..size).map_async(wgpu::MapMode::Read, move |result| {
            *callback_status.lock() = Some(result);
        });
        self.device.poll(wgpu::PollType::wait_indefinitely())?;
        match status.lock().take() {
            Some(Ok(())) => {}
            Some(Err(err)) => return Err(GpuError::Map(err)),
            None => return Err(GpuError::Map(wgpu::BufferAsyncError)),
        }

        let bytes = {
            let data = staging.slice(..size).get_mapped_range();
            data.to_vec()
        };
        staging.unmap();
        Ok(bytes)
    }

    /// Supersede every in-flight frame; their results are discarded.
    pub fn cancel(&mut self) {
        self.scheduler.supersede();
        self.delivered = self.scheduler.generation();
        self.readback.abandon_all();
    }

    /// Abandon in-flight work. Later submissions are dropped.
    pub fn teardown(&mut self) {
        self.scheduler.cancel_all();
        self.readback.abandon_all();
        self.display_staging = None;
        info!("GPU analysis pipeline torn down");
    }
}

fn validate(input: &FrameInput<'_>, ctx: &FrameContext) -> Result<(), FrameError> {
    input.frame.validate()?;
    if ctx.use_depth {
        input.depth.ok_or(FrameError::MissingDepth)?.validate()?;
    }
    Ok(())
}
