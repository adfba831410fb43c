//! Per-frame orchestration on the CPU.
//!
//! validate → snapshot selection → matte → mask → convert → linearise →
//! extract → tile pass → barrier → combine. Each call consumes one frame
//! and never blocks on anything but its own tile pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, Channel};
use crate::convert::{TransferCurve, YCbCrCoefficients};
use crate::error::{FrameError, PipelineError};
use crate::frame::CameraFrame;
use crate::hsv::{self, HsvMode};
use crate::matte::{DepthFrame, DepthMatte};
use crate::measurement::{CameraSettings, FrameStatistics};
use crate::reduce::{PixelSample, ReductionGrid, combine_partials, reduce_tiles};
use crate::selection::{SelectionState, pixel_center};
use crate::uniforms::TilePartial;

/// One delivered camera tick.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub frame: &'a CameraFrame,
    pub depth: Option<&'a DepthFrame>,
    /// Capture time in seconds.
    pub timestamp: f64,
    pub camera: Option<CameraSettings>,
}

impl<'a> FrameInput<'a> {
    pub fn new(frame: &'a CameraFrame, timestamp: f64) -> Self {
        Self {
            frame,
            depth: None,
            timestamp,
            camera: None,
        }
    }

    pub fn with_depth(mut self, depth: &'a DepthFrame) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_camera(mut self, camera: CameraSettings) -> Self {
        self.camera = Some(camera);
        self
    }
}

/// State snapshotted once per frame from the interaction surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    /// Committed selection; normalised again before use.
    pub selection: SelectionState,
    pub use_depth: bool,
}

impl Default for FrameContext {
    fn default() -> Self {
        Self {
            selection: SelectionState::FULL_FRAME,
            use_depth: false,
        }
    }
}

/// What one frame produced for the downstream series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// Fresh statistics.
    Measured(FrameStatistics),
    /// Selection empty or fully matted out. Distinct from a zero sample.
    NoData,
    /// Malformed frame; the previous good statistics stand in.
    Reused(FrameStatistics),
    /// Malformed frame with nothing to reuse yet.
    Skipped,
    /// Superseded, torn down, or out of memory.
    Dropped,
}

impl FrameOutcome {
    pub fn statistics(&self) -> Option<&FrameStatistics> {
        match self {
            Self::Measured(s) | Self::Reused(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

// ── Frame scheduling ────────────────────────────────────────────────────────

/// Generation counter shared with the capture thread.
///
/// Starting a frame bumps the generation; any frame still running under an
/// older generation gives up at its next tile boundary.
#[derive(Debug, Clone, Default)]
pub struct FrameScheduler {
    generation: Arc<AtomicU64>,
    torn_down: Arc<AtomicBool>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_frame(&self) -> FrameTicket {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        FrameTicket {
            generation,
            scheduler: self.clone(),
        }
    }

    /// Mark in-flight work stale without starting a new frame.
    pub fn supersede(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn cancel_all(&self) {
        self.torn_down.store(true, Ordering::Release);
        self.supersede();
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct FrameTicket {
    generation: u64,
    scheduler: FrameScheduler,
}

impl FrameTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.scheduler.is_torn_down() || self.scheduler.generation() != self.generation
    }
}

// ── Per-pixel stages ────────────────────────────────────────────────────────

/// Everything one pixel evaluation needs, borrowed for a single frame.
pub struct PixelEvaluator<'a> {
    frame: &'a CameraFrame,
    depth: Option<&'a DepthFrame>,
    matte: DepthMatte,
    selection: SelectionState,
    coeffs: YCbCrCoefficients,
    transfer: TransferCurve,
    channel: Channel,
}

impl<'a> PixelEvaluator<'a> {
    /// `depth` is only consulted when `use_depth` is set.
    pub fn new(config: &AnalysisConfig, input: &FrameInput<'a>, selection: SelectionState, use_depth: bool) -> Self {
        Self {
            frame: input.frame,
            depth: if use_depth { input.depth } else { None },
            matte: config.matte,
            selection: selection.normalized(),
            coeffs: config.matrix.coefficients(),
            transfer: config.transfer,
            channel: config.channel,
        }
    }

    /// Linear RGB at pixel `(x, y)`, or `None` for non-finite input.
    pub fn linear_rgb(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        let luma = self.frame.luma_at(x, y);
        let cbcr = self.frame.chroma_at(x, y);
        if !(luma.is_finite() && cbcr[0].is_finite() && cbcr[1].is_finite()) {
            return None;
        }
        Some(self.transfer.linearize(self.coeffs.to_rgb(luma, cbcr)))
    }

    pub fn sample(&self, x: u32, y: u32) -> Option<PixelSample> {
        let u = pixel_center(x, self.frame.width);
        let v = pixel_center(y, self.frame.height);
        if let Some(depth) = self.depth
            && !self.matte.passes(depth, u, v)
        {
            return None;
        }
        if !self.selection.contains(u, v) {
            return None;
        }
        let rgb = self.linear_rgb(x, y)?;
        let luma = self.frame.luma_at(x, y).clamp(0.0, 1.0);

        let sample = match self.channel {
            Channel::Hsv { mode } => {
                let value = mode.extract(rgb);
                PixelSample {
                    angle: (mode == HsvMode::Hue).then_some(value),
                    ..PixelSample::scalar(value)
                }
            }
            Channel::Luma => PixelSample::scalar(luma),
            Channel::Luminance => PixelSample::scalar(self.coeffs.luma(rgb)),
            Channel::Exposure => PixelSample {
                lo: rgb[0].min(rgb[1]).min(rgb[2]),
                hi: rgb[0].max(rgb[1]).max(rgb[2]),
                value: luma,
                angle: None,
            },
        };
        sample.is_finite().then_some(sample)
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────────

/// CPU analysis pipeline for one view.
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    scheduler: FrameScheduler,
    last_good: Option<FrameStatistics>,
    partials: Vec<TilePartial>,
}

impl AnalysisPipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        info!(
            "Analysis pipeline created (matrix {:?}, transfer {:?}, channel {:?})",
            config.matrix, config.transfer, config.channel
        );
        Self {
            config,
            scheduler: FrameScheduler::new(),
            last_good: None,
            partials: Vec::new(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AnalysisConfig {
        &mut self.config
    }

    /// Handle the capture thread uses to supersede in-flight frames.
    pub fn scheduler(&self) -> FrameScheduler {
        self.scheduler.clone()
    }

    pub fn last_good(&self) -> Option<FrameStatistics> {
        self.last_good
    }

    /// Analyse one frame.
    pub fn process(&mut self, input: &FrameInput<'_>, ctx: &FrameContext) -> FrameOutcome {
        if self.scheduler.is_torn_down() {
            return FrameOutcome::Dropped;
        }
        let ticket = self.scheduler.begin_frame();
        match self.run(input, ctx, &ticket) {
            Ok(Some(stats)) => {
                self.last_good = Some(stats);
                FrameOutcome::Measured(stats)
            }
            Ok(None) => FrameOutcome::NoData,
            Err(PipelineError::Frame(err)) => {
                warn!("Skipping malformed frame at t={:.3}: {err}", input.timestamp);
                match self.last_good {
                    Some(stats) => FrameOutcome::Reused(stats),
                    None => FrameOutcome::Skipped,
                }
            }
            Err(err @ PipelineError::Allocation { .. }) => {
                warn!("Dropping frame at t={:.3}: {err}", input.timestamp);
                FrameOutcome::Dropped
            }
            Err(PipelineError::Cancelled) => {
                debug!("Frame generation {} superseded", ticket.generation());
                FrameOutcome::Dropped
            }
        }
    }

    fn run(
        &mut self,
        input: &FrameInput<'_>,
        ctx: &FrameContext,
        ticket: &FrameTicket,
    ) -> Result<Option<FrameStatistics>, PipelineError> {
        input.frame.validate()?;
        if ctx.use_depth {
            input.depth.ok_or(FrameError::MissingDepth)?.validate()?;
        }

        let selection = ctx.selection.normalized();
        let Some(bounds) = selection.pixel_bounds(input.frame.width, input.frame.height) else {
            return Ok(None);
        };
        let grid = ReductionGrid::new(bounds);
        let tiles = grid.tile_count();

        self.partials.clear();
        self.partials
            .try_reserve_exact(tiles)
            .map_err(|_| PipelineError::Allocation {
                bytes: tiles * std::mem::size_of::<TilePartial>(),
            })?;

        let evaluator = PixelEvaluator::new(&self.config, input, selection, ctx.use_depth);
        let sample = |x: u32, y: u32| evaluator.sample(x, y);
        let cancelled = || ticket.is_stale();
        reduce_tiles(&grid, &sample, &cancelled, &mut self.partials);

        if ticket.is_stale() {
            return Err(PipelineError::Cancelled);
        }
        let total = combine_partials(&self.partials, grid.partial_length());
        Ok(FrameStatistics::from_total(&total, self.config.channel, input.camera.as_ref()))
    }

    /// Full HSV triple at normalised `(u, v)` for single-pixel probes.
    ///
    /// Ignores the selection and matte; `None` for malformed frames and
    /// non-finite samples.
    pub fn probe(&self, frame: &CameraFrame, u: f32, v: f32) -> Option<[f32; 3]> {
        frame.validate().ok()?;
        if !(u.is_finite() && v.is_finite()) {
            return None;
        }
        let x = ((u.clamp(0.0, 1.0) * frame.width as f32) as u32).min(frame.width - 1);
        let y = ((v.clamp(0.0, 1.0) * frame.height as f32) as u32).min(frame.height - 1);
        let input = FrameInput::new(frame, 0.0);
        let evaluator = PixelEvaluator::new(&self.config, &input, SelectionState::FULL_FRAME, false);
        evaluator.linear_rgb(x, y).map(hsv::rgb_to_hsv)
    }

    /// Abandon in-flight work and release per-frame storage.
    pub fn teardown(&mut self) {
        self.scheduler.cancel_all();
        self.partials = Vec::new();
        info!("Analysis pipeline torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::YCbCrMatrix;
    use crate::matte::CONFIDENCE_LOW;

    const EPSILON: f32 = 1e-4;

    fn value_config(transfer: TransferCurve) -> AnalysisConfig {
        AnalysisConfig {
            transfer,
            channel: Channel::Hsv { mode: HsvMode::Value },
            ..Default::default()
        }
    }

    fn ctx(selection: SelectionState) -> FrameContext {
        FrameContext {
            selection,
            use_depth: false,
        }
    }

    /// 8×8 frame, luma 1.0 in the centre 4×4 block and 0.0 elsewhere.
    fn centre_quadrant_frame() -> CameraFrame {
        let mut frame = CameraFrame::uniform(8, 8, 0.0, 0.5, 0.5);
        for y in 2..6 {
            for x in 2..6 {
                frame.luma[y * 8 + x] = 1.0;
            }
        }
        frame
    }

    fn measured(outcome: FrameOutcome) -> FrameStatistics {
        match outcome {
            FrameOutcome::Measured(stats) => stats,
            other => panic!("expected measurement, got {other:?}"),
        }
    }

    #[test]
    fn test_mid_gray_value_full_frame() {
        let frame = CameraFrame::uniform(32, 24, 0.5, 0.5, 0.5);
        let mut pipeline = AnalysisPipeline::new(value_config(TransferCurve::Encoded));
        let stats = measured(pipeline.process(&FrameInput::new(&frame, 0.0), &FrameContext::default()));
        let (min, max) = stats.min_max.range().unwrap();
        assert!((min - 0.5).abs() < EPSILON && (max - 0.5).abs() < EPSILON);
        assert!((stats.mean - 0.5).abs() < EPSILON);
        assert_eq!(stats.count, 32 * 24);
    }

    #[test]
    fn test_mid_gray_value_is_linearised_by_default() {
        let frame = CameraFrame::uniform(16, 16, 0.5, 0.5, 0.5);
        let mut pipeline = AnalysisPipeline::new(value_config(TransferCurve::Srgb));
        let stats = measured(pipeline.process(&FrameInput::new(&frame, 0.0), &FrameContext::default()));
        assert!((stats.min_max.max - 0.214041).abs() < 1e-3);
    }

    #[test]
    fn test_selection_matching_bright_quadrant() {
        let frame = centre_quadrant_frame();
        let mut pipeline = AnalysisPipeline::new(value_config(TransferCurve::Encoded));
        let selection = SelectionState::new(0.25, 0.75, 0.25, 0.75);
        let stats = measured(pipeline.process(&FrameInput::new(&frame, 0.0), &ctx(selection)));
        assert_eq!(stats.count, 16);
        assert!((stats.min_max.min - 1.0).abs() < EPSILON);
        assert!((stats.min_max.max - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_selection_overlapping_dark_zone() {
        let frame = centre_quadrant_frame();
        let mut pipeline = AnalysisPipeline::new(value_config(TransferCurve::Encoded));
        let selection = SelectionState::new(0.1, 0.75, 0.25, 0.75);
        let stats = measured(pipeline.process(&FrameInput::new(&frame, 0.0), &ctx(selection)));
        assert!(stats.min_max.min.abs() < EPSILON);
        assert!((stats.min_max.max - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_zero_area_selection_reports_no_data() {
        let frame = CameraFrame::uniform(8, 8, 0.5, 0.5, 0.5);
        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default());
        for selection in [
            SelectionState::new(0.5, 0.5, 0.0, 1.0),
            SelectionState::new(0.0, 1.0, 0.4375, 0.4375),
        ] {
            let outcome = pipeline.process(&FrameInput::new(&frame, 0.0), &ctx(selection));
            assert!(outcome.is_no_data(), "got {outcome:?}");
        }
    }

    #[test]
    fn test_depth_matte_excluding_everything_reports_no_data() {
        let frame = CameraFrame::uniform(8, 8, 0.9, 0.3, 0.7);
        let depth = DepthFrame::new(4, 4, vec![1.0; 16], Some(vec![CONFIDENCE_LOW; 16])).unwrap();
        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default());
        let context = FrameContext {
            use_depth: true,
            ..Default::default()
        };
        let outcome = pipeline.process(&FrameInput::new(&frame, 0.0).with_depth(&depth), &context);
        assert!(outcome.is_no_data());

        let without = pipeline.process(&FrameInput::new(&frame, 0.0).with_depth(&depth), &FrameContext::default());
        assert!(matches!(without, FrameOutcome::Measured(_)));
    }

    #[test]
    fn test_depth_range_keeps_foreground_only() {
        let mut frame = CameraFrame::uniform(4, 1, 0.2, 0.5, 0.5);
        frame.luma[0] = 0.9;
        let depth = DepthFrame::new(4, 1, vec![0.5, 3.0, f32::NAN, 3.0], None).unwrap();
        let mut config = value_config(TransferCurve::Encoded);
        config.matte = DepthMatte {
            near: 0.1,
            far: 1.0,
            ..Default::default()
        };
        let mut pipeline = AnalysisPipeline::new(config);
        let context = FrameContext {
            use_depth: true,
            ..Default::default()
        };
        let stats = measured(pipeline.process(&FrameInput::new(&frame, 0.0).with_depth(&depth), &context));
        assert_eq!(stats.count, 1);
        assert!((stats.min_max.max - 0.9).abs() < EPSILON);
    }

    #[test]
    fn test_nan_pixels_are_excluded() {
        let mut frame = CameraFrame::uniform(8, 8, 0.25, 0.5, 0.5);
        frame.luma[3] = f32::NAN;
        frame.chroma[5] = [f32::NAN, 0.5];
        let mut pipeline = AnalysisPipeline::new(value_config(TransferCurve::Encoded));
        let stats = measured(pipeline.process(&FrameInput::new(&frame, 0.0), &FrameContext::default()));
        assert_eq!(stats.count, 64 - 1 - 4);
        assert!(stats.mean.is_finite());
    }

    #[test]
    fn test_reduced_range_lies_within_inputs() {
        let img = image::RgbImage::from_fn(37, 23, |x, y| image::Rgb([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8]));
        let frame = CameraFrame::from_rgb_image(&img, YCbCrMatrix::Bt601Full);
        let config = value_config(TransferCurve::Srgb);
        let selection = SelectionState::new(0.1, 0.8, 0.2, 0.9);

        let input = FrameInput::new(&frame, 0.0);
        let evaluator = PixelEvaluator::new(&config, &input, selection, false);
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for y in 0..frame.height {
            for x in 0..frame.width {
                if let Some(s) = evaluator.sample(x, y) {
                    lo = lo.min(s.lo);
                    hi = hi.max(s.hi);
                }
            }
        }

        let mut pipeline = AnalysisPipeline::new(config);
        let stats = measured(pipeline.process(&input, &ctx(selection)));
        assert!(stats.min_max.min <= stats.min_max.max);
        assert_eq!(stats.min_max.min, lo);
        assert_eq!(stats.min_max.max, hi);
    }

    #[test]
    fn test_malformed_frame_reuses_previous_statistics() {
        let good = CameraFrame::uniform(8, 8, 0.5, 0.5, 0.5);
        let mut bad = good.clone();
        bad.chroma.truncate(3);

        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default());
        assert_eq!(pipeline.process(&FrameInput::new(&bad, 0.0), &FrameContext::default()), FrameOutcome::Skipped);

        let first = measured(pipeline.process(&FrameInput::new(&good, 1.0), &FrameContext::default()));
        let reused = pipeline.process(&FrameInput::new(&bad, 2.0), &FrameContext::default());
        assert_eq!(reused, FrameOutcome::Reused(first));
    }

    #[test]
    fn test_missing_depth_is_malformed() {
        let frame = CameraFrame::uniform(8, 8, 0.5, 0.5, 0.5);
        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default());
        let context = FrameContext {
            use_depth: true,
            ..Default::default()
        };
        assert_eq!(pipeline.process(&FrameInput::new(&frame, 0.0), &context), FrameOutcome::Skipped);
    }

    #[test]
    fn test_exposure_channel_reports_rgb_extremes_and_mean_luma() {
        let img = image::RgbImage::from_fn(4, 4, |x, _| if x < 2 { image::Rgb([255, 0, 0]) } else { image::Rgb([0, 0, 255]) });
        let frame = CameraFrame::from_rgb_image(&img, YCbCrMatrix::Bt601Full);
        let config = AnalysisConfig {
            channel: Channel::Exposure,
            transfer: TransferCurve::Encoded,
            ..Default::default()
        };
        let mut pipeline = AnalysisPipeline::new(config);
        let stats = measured(pipeline.process(&FrameInput::new(&frame, 0.0), &FrameContext::default()));
        assert!(stats.min_max.min < 0.01);
        assert!(stats.min_max.max > 0.99);
        assert!((stats.mean - (0.299 + 0.114) / 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_torn_down_pipeline_drops_frames() {
        let frame = CameraFrame::uniform(8, 8, 0.5, 0.5, 0.5);
        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default());
        pipeline.teardown();
        assert_eq!(pipeline.process(&FrameInput::new(&frame, 0.0), &FrameContext::default()), FrameOutcome::Dropped);
    }

    #[test]
    fn test_superseded_ticket_is_stale() {
        let scheduler = FrameScheduler::new();
        let first = scheduler.begin_frame();
        assert!(!first.is_stale());
        let second = scheduler.begin_frame();
        assert!(first.is_stale());
        assert!(!second.is_stale());
        scheduler.cancel_all();
        assert!(second.is_stale());
    }

    #[test]
    fn test_probe_reports_hsv_triple() {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([0, 255, 0]));
        let frame = CameraFrame::from_rgb_image(&img, YCbCrMatrix::Bt601Full);
        let pipeline = AnalysisPipeline::new(value_config(TransferCurve::Encoded));
        let [h, s, v] = pipeline.probe(&frame, 0.5, 0.5).unwrap();
        assert!((h - 120.0).abs() < 0.5);
        assert!(s > 0.99 && v > 0.99);
    }
}
