//! RGBA8 preview: converted colour with exposure tint, dimmed outside the
//! selection and transparent where the depth matte rejects a pixel.

use image::RgbaImage;
use rayon::prelude::*;

use crate::convert::YCbCrCoefficients;
use crate::error::FrameError;
use crate::exposure::{ExposureThresholds, ShaderColorModifier};
use crate::frame::CameraFrame;
use crate::matte::{DepthFrame, DepthMatte};
use crate::selection::{SelectionState, pixel_center};

/// Inputs for one overlay render.
#[derive(Debug, Clone, Copy)]
pub struct OverlayParams<'a> {
    pub coeffs: YCbCrCoefficients,
    pub modifier: ShaderColorModifier,
    pub thresholds: ExposureThresholds,
    /// Drawn as given, even mid-drag with swapped edges.
    pub selection: SelectionState,
    pub matte: DepthMatte,
    /// Matting is applied only when present.
    pub depth: Option<&'a DepthFrame>,
    pub outside_dim: f32,
}

/// Quantise a unit float to 8 bits, rounding half up.
pub fn quantize(c: f32) -> u8 {
    let c = if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) };
    (c * 255.0 + 0.5).floor() as u8
}

pub fn render_overlay(frame: &CameraFrame, params: &OverlayParams<'_>) -> Result<RgbaImage, FrameError> {
    frame.validate()?;
    if let Some(depth) = params.depth {
        depth.validate()?;
    }

    let (width, height) = (frame.width, frame.height);
    // Drawing uses ordered edges without clamping.
    let sel = &params.selection;
    let (x_lo, x_hi) = (sel.x1.min(sel.x2), sel.x1.max(sel.x2));
    let (y_lo, y_hi) = (sel.y1.min(sel.y2), sel.y1.max(sel.y2));

    let row_bytes = width as usize * 4;
    let mut buf = vec![0u8; row_bytes * height as usize];
    buf.par_chunks_exact_mut(row_bytes).enumerate().for_each(|(y, row)| {
        let y = y as u32;
        let v = pixel_center(y, height);
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let x = x as u32;
            let u = pixel_center(x, width);
            if let Some(depth) = params.depth
                && !params.matte.passes(depth, u, v)
            {
                px.copy_from_slice(&[0, 0, 0, 0]);
                continue;
            }
            let (luma, cbcr) = (frame.luma_at(x, y), frame.chroma_at(x, y));
            // Non-finite samples render as black before the modifier.
            let rgb = if luma.is_finite() && cbcr[0].is_finite() && cbcr[1].is_finite() {
                params.coeffs.to_rgb(luma, cbcr)
            } else {
                [0.0; 3]
            };
            let mut rgb = params
                .modifier
                .apply(rgb, &params.thresholds, params.coeffs.luma_weights);
            let inside = u >= x_lo && u <= x_hi && v >= y_lo && v <= y_hi;
            if !inside {
                rgb = rgb.map(|c| c * params.outside_dim);
            }
            px.copy_from_slice(&[quantize(rgb[0]), quantize(rgb[1]), quantize(rgb[2]), 255]);
        }
    });

    let len = buf.len();
    RgbaImage::from_raw(width, height, buf).ok_or(FrameError::PlaneLength {
        plane: "overlay",
        expected: row_bytes * height as usize,
        actual: len,
    })
}
