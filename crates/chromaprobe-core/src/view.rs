//! One analysis view: the mutable configuration surface plus its pipeline
//! and downstream sink.
//!
//! The interaction thread holds a [`SharedSelection`] clone and edits the
//! rectangle; the frame thread calls [`AnalysisView::process_frame`], which
//! snapshots the selection once and never holds the lock while working.

use glam::Mat4;
use image::RgbaImage;
use tracing::info;

use crate::config::{AnalysisConfig, Channel};
use crate::error::{ConfigError, FrameError};
use crate::exposure::{ExposureThresholds, ShaderColorModifier};
use crate::frame::CameraFrame;
use crate::hsv::HsvMode;
use crate::matte::DepthFrame;
use crate::overlay::{OverlayParams, render_overlay};
use crate::pipeline::{AnalysisPipeline, FrameContext, FrameInput, FrameOutcome, FrameScheduler};
use crate::selection::{SelectionState, SharedSelection};
use crate::series::MeasurementSink;
use crate::uniforms::{ColorModifierUniform, SelectionUniform, SharedUniforms};

pub struct AnalysisView<S: MeasurementSink> {
    selection: SharedSelection,
    modifier: ShaderColorModifier,
    uniforms: SharedUniforms,
    pipeline: AnalysisPipeline,
    sink: S,
}

impl<S: MeasurementSink> AnalysisView<S> {
    pub fn new(config: AnalysisConfig, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            selection: SharedSelection::default(),
            modifier: ShaderColorModifier::default(),
            uniforms: SharedUniforms::default(),
            pipeline: AnalysisPipeline::new(config),
            sink,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        self.pipeline.config()
    }

    // ── Selection ──

    /// Handle for the interaction thread.
    pub fn selection_handle(&self) -> SharedSelection {
        self.selection.clone()
    }

    pub fn selection(&self) -> SelectionState {
        self.selection.current()
    }

    pub fn set_selection(&self, selection: SelectionState) {
        self.selection.set(selection);
    }

    pub fn editable(&self) -> bool {
        self.selection.current().editable
    }

    /// Entering edit mode freezes the measured rectangle; leaving it commits
    /// the normalised rectangle.
    pub fn set_editable(&self, editable: bool) {
        if editable {
            self.selection.begin_edit();
        } else {
            self.selection.commit();
        }
    }

    // ── Channel ──

    pub fn channel(&self) -> Channel {
        self.pipeline.config().channel
    }

    pub fn set_channel(&mut self, channel: Channel) {
        self.pipeline.config_mut().channel = channel;
    }

    pub fn hsv_mode(&self) -> Option<HsvMode> {
        self.channel().hsv_mode()
    }

    pub fn set_hsv_mode(&mut self, mode: HsvMode) {
        self.set_channel(Channel::Hsv { mode });
    }

    /// Set the HSV mode from its raw tag. Unknown tags leave the view as is.
    pub fn set_hsv_mode_tag(&mut self, tag: f32) -> Result<(), ConfigError> {
        let mode = HsvMode::from_tag(tag)?;
        self.set_hsv_mode(mode);
        Ok(())
    }

    // ── Display modifiers ──

    pub fn color_modifier(&self) -> ShaderColorModifier {
        self.modifier
    }

    pub fn set_color_modifier(&mut self, modifier: ShaderColorModifier) {
        self.modifier = modifier;
    }

    pub fn thresholds(&self) -> ExposureThresholds {
        self.pipeline.config().thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: ExposureThresholds) -> Result<(), ConfigError> {
        thresholds.validate()?;
        self.pipeline.config_mut().thresholds = thresholds;
        Ok(())
    }

    // ── Shared uniforms ──

    pub fn use_depth(&self) -> bool {
        self.uniforms.use_depth()
    }

    pub fn set_use_depth(&mut self, enabled: bool) {
        self.uniforms.set_use_depth(enabled);
    }

    pub fn set_camera(&mut self, projection: Mat4, view: Mat4) {
        self.uniforms.projection_matrix = projection.to_cols_array_2d();
        self.uniforms.view_matrix = view.to_cols_array_2d();
    }

    pub fn shared_uniforms(&self) -> &SharedUniforms {
        &self.uniforms
    }

    pub fn selection_uniform(&self) -> SelectionUniform {
        self.selection.snapshot().committed.to_uniform()
    }

    pub fn color_modifier_uniform(&self) -> ColorModifierUniform {
        self.modifier.to_uniform(&self.thresholds())
    }

    // ── Frames ──

    /// Per-frame snapshot of everything the interaction surface controls.
    pub fn frame_context(&self) -> FrameContext {
        FrameContext {
            selection: self.selection.snapshot().committed,
            use_depth: self.uniforms.use_depth(),
        }
    }

    pub fn scheduler(&self) -> FrameScheduler {
        self.pipeline.scheduler()
    }

    /// Analyse one frame and forward the outcome to the sink.
    pub fn process_frame(&mut self, input: &FrameInput<'_>) -> FrameOutcome {
        let ctx = self.frame_context();
        let outcome = self.pipeline.process(input, &ctx);
        self.sink.record(input.timestamp, &outcome);
        outcome
    }

    /// Render the live preview with the in-progress selection.
    ///
    /// With depth matting on, a missing depth frame is malformed input, as it
    /// is for [`Self::process_frame`].
    pub fn render_overlay(&self, frame: &CameraFrame, depth: Option<&DepthFrame>) -> Result<RgbaImage, FrameError> {
        let depth = if self.use_depth() {
            Some(depth.ok_or(FrameError::MissingDepth)?)
        } else {
            None
        };
        let config = self.pipeline.config();
        let params = OverlayParams {
            coeffs: config.matrix.coefficients(),
            modifier: self.modifier,
            thresholds: config.thresholds,
            selection: self.selection.current(),
            matte: config.matte,
            depth,
            outside_dim: config.outside_dim,
        };
        render_overlay(frame, &params)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Cancel in-flight work, release per-frame storage and hand back the
    /// sink.
    pub fn teardown(mut self) -> S {
        self.pipeline.teardown();
        info!("Analysis view torn down");
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::TransferCurve;
    use crate::series::SeriesBuffer;

    fn view() -> AnalysisView<SeriesBuffer> {
        let config = AnalysisConfig {
            transfer: TransferCurve::Encoded,
            ..Default::default()
        };
        AnalysisView::new(config, SeriesBuffer::new(0)).unwrap()
    }

    #[test]
    fn test_process_frame_feeds_sink() {
        let mut view = view();
        let frame = CameraFrame::uniform(8, 8, 0.5, 0.5, 0.5);
        view.process_frame(&FrameInput::new(&frame, 0.5));
        view.set_selection(SelectionState::new(0.3, 0.3, 0.0, 1.0));
        view.process_frame(&FrameInput::new(&frame, 1.0));

        let series = view.teardown();
        assert_eq!(series.t, [0.5, 1.0]);
        assert!((series.max[0] - 0.5).abs() < 1e-5);
        assert!(series.max[1].is_nan());
    }

    #[test]
    fn test_editing_keeps_measuring_committed_rect() {
        let mut view = view();
        let mut frame = CameraFrame::uniform(8, 8, 0.0, 0.5, 0.5);
        frame.luma[0] = 1.0;
        view.set_selection(SelectionState::new(0.0, 0.125, 0.0, 0.125));

        let handle = view.selection_handle();
        view.set_editable(true);
        handle.update(0.5, 1.0, 0.5, 1.0);
        let during = view.process_frame(&FrameInput::new(&frame, 0.0));
        assert_eq!(during.statistics().map(|s| s.min_max.max), Some(1.0));

        view.set_editable(false);
        let after = view.process_frame(&FrameInput::new(&frame, 1.0));
        assert_eq!(after.statistics().map(|s| s.min_max.max), Some(0.0));
    }

    #[test]
    fn test_hsv_mode_tag_rejects_unknown() {
        let mut view = view();
        view.set_hsv_mode_tag(1.0).unwrap();
        assert_eq!(view.hsv_mode(), Some(HsvMode::Saturation));
        assert!(view.set_hsv_mode_tag(7.0).is_err());
        assert_eq!(view.hsv_mode(), Some(HsvMode::Saturation));
    }

    #[test]
    fn test_invalid_thresholds_are_not_applied() {
        let mut view = view();
        let bad = ExposureThresholds { over: 0.2, under: 0.4 };
        assert!(view.set_thresholds(bad).is_err());
        assert_eq!(view.thresholds(), ExposureThresholds::default());
    }

    #[test]
    fn test_use_depth_survives_camera_update() {
        let mut view = view();
        view.set_use_depth(true);
        view.set_camera(Mat4::IDENTITY, Mat4::from_scale(glam::Vec3::splat(2.0)));
        assert!(view.use_depth());
        assert_eq!(view.shared_uniforms().view(), Mat4::from_scale(glam::Vec3::splat(2.0)));
    }

    #[test]
    fn test_overlay_ignores_depth_when_disabled() {
        let view = view();
        let frame = CameraFrame::uniform(4, 4, 0.5, 0.5, 0.5);
        let depth = DepthFrame::new(1, 1, vec![f32::NAN], None).unwrap();
        let img = view.render_overlay(&frame, Some(&depth)).unwrap();
        assert_eq!(img.get_pixel(2, 2).0[3], 255);
    }

    #[test]
    fn test_overlay_without_depth_is_malformed_when_matting() {
        let mut view = view();
        view.set_use_depth(true);
        let frame = CameraFrame::uniform(4, 4, 0.5, 0.5, 0.5);
        assert_eq!(view.render_overlay(&frame, None), Err(FrameError::MissingDepth));
        assert_eq!(view.process_frame(&FrameInput::new(&frame, 0.0)), FrameOutcome::Skipped);
    }
}
