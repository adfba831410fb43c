//! GPU integration tests. Requires a real wgpu device; each test returns
//! early when no adapter is available.
//!
//! Run with: `cargo test -p chromaprobe-gpu`

use std::sync::Arc;
use std::sync::{Mutex, OnceLock};

use chromaprobe_core::convert::{TransferCurve, YCbCrMatrix};
use chromaprobe_core::exposure::ShaderColorModifier;
use chromaprobe_core::overlay::{OverlayParams, render_overlay};
use chromaprobe_core::{
    AnalysisConfig, AnalysisPipeline, CameraFrame, Channel, DepthFrame, FrameContext, FrameInput, FrameOutcome,
    HsvMode, SelectionState,
};
use chromaprobe_gpu::buffers::create_buffer_checked;
use chromaprobe_gpu::readback::MAX_SLOTS;
use chromaprobe_gpu::{GpuAnalysisPipeline, GpuError, SubmitOutcome};
use image::{Rgb, RgbImage};

const EPSILON: f32 = 1e-3;

/// Create a test wgpu device, or `None` when the host has no adapter.
fn create_test_device() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        ..Default::default()
    }))
    .ok()?;

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("chromaprobe_test_device"),
        required_features: chromaprobe_gpu::required_features(),
        required_limits: adapter.limits(),
        ..Default::default()
    }))
    .expect("Failed to create test device");

    Some((Arc::new(device), Arc::new(queue)))
}

fn gpu_test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

macro_rules! require_gpu {
    () => {
        match create_test_device() {
            Some(pair) => pair,
            None => {
                eprintln!("No GPU adapter found, skipping");
                return;
            }
        }
    };
}

/// Warm gradient whose hues stay clear of the 0/360 seam.
fn create_test_gradient(width: u32, height: u32) -> CameraFrame {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = 0.4 + 0.6 * x as f32 / (width - 1) as f32;
        let g = 0.3 + 0.7 * y as f32 / (height - 1) as f32;
        Rgb([(r * 255.0) as u8, (g * 255.0) as u8, 51])
    });
    CameraFrame::from_rgb_image(&img, YCbCrMatrix::Bt601Full)
}

fn cpu_reference(config: &AnalysisConfig, input: &FrameInput<'_>, ctx: &FrameContext) -> FrameOutcome {
    AnalysisPipeline::new(config.clone()).process(input, ctx)
}

fn assert_matches_cpu(gpu: FrameOutcome, cpu: FrameOutcome, tolerance: f32) {
    let (gpu, cpu) = match (gpu, cpu) {
        (FrameOutcome::Measured(g), FrameOutcome::Measured(c)) => (g, c),
        other => panic!("expected two measurements, got {other:?}"),
    };
    assert_eq!(gpu.count, cpu.count, "pixel counts differ");
    assert!(
        (gpu.min_max.min - cpu.min_max.min).abs() < tolerance,
        "min: gpu={} cpu={}",
        gpu.min_max.min,
        cpu.min_max.min
    );
    assert!(
        (gpu.min_max.max - cpu.min_max.max).abs() < tolerance,
        "max: gpu={} cpu={}",
        gpu.min_max.max,
        cpu.min_max.max
    );
    assert!(
        (gpu.mean - cpu.mean).abs() < tolerance,
        "mean: gpu={} cpu={}",
        gpu.mean,
        cpu.mean
    );
}

#[test]
fn test_gpu_value_matches_cpu() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let config = AnalysisConfig::default();
    let mut pipeline = GpuAnalysisPipeline::new(device, queue, config.clone());

    // Not a multiple of the tile edge in either direction.
    let frame = create_test_gradient(37, 29);
    let input = FrameInput::new(&frame, 0.0);
    let ctx = FrameContext::default();

    let gpu = pipeline.analyze_blocking(&input, &ctx).expect("gpu analysis");
    assert_matches_cpu(gpu, cpu_reference(&config, &input, &ctx), EPSILON);
}

#[test]
fn test_gpu_each_channel_matches_cpu() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let frame = create_test_gradient(64, 48);
    let input = FrameInput::new(&frame, 0.0);
    let ctx = FrameContext {
        selection: SelectionState::new(0.1, 0.8, 0.2, 0.9),
        use_depth: false,
    };

    let channels = [
        (Channel::Hsv { mode: HsvMode::Saturation }, EPSILON),
        (Channel::Hsv { mode: HsvMode::Hue }, 0.05),
        (Channel::Luma, EPSILON),
        (Channel::Luminance, EPSILON),
        (Channel::Exposure, EPSILON),
    ];
    let mut pipeline = GpuAnalysisPipeline::new(device, queue, AnalysisConfig::default());
    for (channel, tolerance) in channels {
        pipeline.config_mut().channel = channel;
        let config = pipeline.config().clone();
        let gpu = pipeline.analyze_blocking(&input, &ctx).expect("gpu analysis");
        assert_matches_cpu(gpu, cpu_reference(&config, &input, &ctx), tolerance);
    }
}

#[test]
fn test_gpu_encoded_mid_gray_value() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let config = AnalysisConfig {
        transfer: TransferCurve::Encoded,
        ..Default::default()
    };
    let mut pipeline = GpuAnalysisPipeline::new(device, queue, config);
    let frame = CameraFrame::uniform(32, 32, 0.5, 0.5, 0.5);

    let outcome = pipeline
        .analyze_blocking(&FrameInput::new(&frame, 0.0), &FrameContext::default())
        .expect("gpu analysis");
    let stats = outcome.statistics().expect("measured");
    assert_eq!(stats.count, 32 * 32);
    assert!((stats.min_max.min - 0.5).abs() < EPSILON);
    assert!((stats.min_max.max - 0.5).abs() < EPSILON);
}

#[test]
fn test_gpu_empty_selection_is_no_data() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let mut pipeline = GpuAnalysisPipeline::new(device, queue, AnalysisConfig::default());
    let frame = create_test_gradient(16, 16);
    let ctx = FrameContext {
        selection: SelectionState::new(0.4, 0.4, 0.0, 1.0),
        use_depth: false,
    };

    let outcome = pipeline.submit_frame(&FrameInput::new(&frame, 0.0), &ctx);
    assert_eq!(outcome, SubmitOutcome::Immediate(FrameOutcome::NoData));
    assert!(!pipeline.has_pending());
}

#[test]
fn test_gpu_depth_matte_matches_cpu() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let mut config = AnalysisConfig::default();
    config.matte.near = 0.5;
    config.matte.far = 2.0;
    let mut pipeline = GpuAnalysisPipeline::new(device, queue, config.clone());

    let frame = create_test_gradient(32, 32);
    // Column 0 low confidence, column 5 invalid, columns 6 and 7 too far.
    let mut depth = vec![1.0; 8 * 8];
    for row in depth.chunks_exact_mut(8) {
        row[5] = f32::NAN;
        row[6] = 3.0;
        row[7] = 3.0;
    }
    let confidence = (0..64u8).map(|i| if i % 8 == 0 { 0 } else { 2 }).collect();
    let depth = DepthFrame::new(8, 8, depth, Some(confidence)).expect("valid depth");
    let input = FrameInput::new(&frame, 0.0).with_depth(&depth);
    let ctx = FrameContext {
        selection: SelectionState::FULL_FRAME,
        use_depth: true,
    };

    let gpu = pipeline.analyze_blocking(&input, &ctx).expect("gpu analysis");
    let cpu = cpu_reference(&config, &input, &ctx);
    assert_eq!(gpu.statistics().map(|s| s.count), Some(4 * 32 * 4));
    assert_matches_cpu(gpu, cpu, EPSILON);
}

#[test]
fn test_gpu_fully_matted_frame_is_no_data() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let mut pipeline = GpuAnalysisPipeline::new(device, queue, AnalysisConfig::default());
    let frame = create_test_gradient(16, 16);
    let depth = DepthFrame::uniform(4, 4, f32::NAN);
    let input = FrameInput::new(&frame, 0.0).with_depth(&depth);
    let ctx = FrameContext {
        selection: SelectionState::FULL_FRAME,
        use_depth: true,
    };

    let outcome = pipeline.analyze_blocking(&input, &ctx).expect("gpu analysis");
    assert_eq!(outcome, FrameOutcome::NoData);
}

#[test]
fn test_gpu_missing_depth_is_skipped() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let mut pipeline = GpuAnalysisPipeline::new(device, queue, AnalysisConfig::default());
    let frame = create_test_gradient(16, 16);
    let ctx = FrameContext {
        selection: SelectionState::FULL_FRAME,
        use_depth: true,
    };

    let outcome = pipeline.submit_frame(&FrameInput::new(&frame, 0.0), &ctx);
    assert_eq!(outcome, SubmitOutcome::Immediate(FrameOutcome::Skipped));
}

#[test]
fn test_gpu_newest_frame_replaces_stale_in_flight_work() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let mut pipeline = GpuAnalysisPipeline::new(device.clone(), queue, AnalysisConfig::default());
    let frame = create_test_gradient(16, 16);
    let ctx = FrameContext::default();

    let first = pipeline.submit_frame(&FrameInput::new(&frame, 0.0), &ctx);
    let second = pipeline.submit_frame(&FrameInput::new(&frame, 1.0), &ctx);
    let third = pipeline.submit_frame(&FrameInput::new(&frame, 2.0), &ctx);
    assert!(matches!(first, SubmitOutcome::Queued(_)));
    assert!(matches!(second, SubmitOutcome::Queued(_)));
    assert!(matches!(third, SubmitOutcome::Queued(_)), "the newest frame is started, got {third:?}");
    assert!(pipeline.readback_slots() <= MAX_SLOTS);

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .expect("device poll");
    let (timestamp, outcome) = pipeline
        .try_collect()
        .expect("device poll")
        .expect("a finished frame");
    assert_eq!(timestamp, 2.0, "the newest frame wins");
    assert!(matches!(outcome, FrameOutcome::Measured(_)));
    assert!(pipeline.try_collect().expect("device poll").is_none(), "older frames are discarded");
    assert!(!pipeline.has_pending());
}

#[test]
fn test_gpu_readback_slots_are_recycled() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let mut pipeline = GpuAnalysisPipeline::new(device.clone(), queue, AnalysisConfig::default());
    let frame = create_test_gradient(16, 16);
    let ctx = FrameContext::default();

    for round in 0..4 {
        for i in 0..3 {
            let t = f64::from(round * 3 + i);
            let outcome = pipeline.submit_frame(&FrameInput::new(&frame, t), &ctx);
            assert!(matches!(outcome, SubmitOutcome::Queued(_)), "frame at t={t}: {outcome:?}");
        }
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .expect("device poll");
        let (timestamp, _) = pipeline
            .try_collect()
            .expect("device poll")
            .expect("a finished frame");
        assert_eq!(timestamp, f64::from(round * 3 + 2));
    }
    assert!(pipeline.readback_slots() <= MAX_SLOTS);
}

#[test]
fn test_gpu_failed_allocation_is_an_error() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let size = device.limits().max_buffer_size.saturating_add(4);
    let result = create_buffer_checked(
        &device,
        "oversized",
        &wgpu::BufferDescriptor {
            label: Some("oversized"),
            size,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        },
    );
    assert!(
        matches!(result, Err(GpuError::Allocation { .. } | GpuError::OutOfMemory { .. })),
        "got {result:?}"
    );

    // The device is still usable afterwards.
    let mut pipeline = GpuAnalysisPipeline::new(device, queue, AnalysisConfig::default());
    let frame = create_test_gradient(16, 16);
    let outcome = pipeline
        .analyze_blocking(&FrameInput::new(&frame, 0.0), &FrameContext::default())
        .expect("gpu analysis");
    assert!(matches!(outcome, FrameOutcome::Measured(_)));
}

#[test]
fn test_gpu_teardown_discards_in_flight_work() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let mut pipeline = GpuAnalysisPipeline::new(device.clone(), queue, AnalysisConfig::default());
    let frame = create_test_gradient(16, 16);
    let ctx = FrameContext::default();

    let queued = pipeline.submit_frame(&FrameInput::new(&frame, 0.0), &ctx);
    assert!(matches!(queued, SubmitOutcome::Queued(_)));
    pipeline.teardown();

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .expect("device poll");
    assert!(pipeline.try_collect().expect("device poll").is_none());
    assert_eq!(
        pipeline.submit_frame(&FrameInput::new(&frame, 1.0), &ctx),
        SubmitOutcome::Dropped
    );
}

#[test]
fn test_gpu_display_matches_cpu_overlay() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let (device, queue) = require_gpu!();
    let config = AnalysisConfig::default();
    let mut pipeline = GpuAnalysisPipeline::new(device, queue, config.clone());

    let frame = create_test_gradient(40, 24);
    let depth = DepthFrame::new(2, 1, vec![1.0, f32::NAN], None).expect("valid depth");
    // Swapped edges, as seen mid-drag.
    let mut selection = SelectionState::new(0.7, 0.2, 0.9, 0.1);
    selection.editable = true;
    let ctx = FrameContext {
        selection,
        use_depth: true,
    };
    let modifier = ShaderColorModifier {
        underexposure_color: None,
        ..ShaderColorModifier::WARNING
    };

    let gpu = pipeline
        .render_display_blocking(&frame, Some(&depth), &ctx, &modifier)
        .expect("gpu display");
    let cpu = render_overlay(
        &frame,
        &OverlayParams {
            coeffs: config.matrix.coefficients(),
            modifier,
            thresholds: config.thresholds,
            selection,
            matte: config.matte,
            depth: Some(&depth),
            outside_dim: config.outside_dim,
        },
    )
    .expect("cpu overlay");

    assert_eq!(gpu.len(), cpu.as_raw().len());
    for (i, (g, c)) in gpu.iter().zip(cpu.as_raw()).enumerate() {
        assert!(
            g.abs_diff(*c) <= 1,
            "byte {i} (pixel {}, channel {}): gpu={g} cpu={c}",
            i / 4,
            i % 4
        );
    }
}
