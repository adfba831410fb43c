//! Biplanar 4:2:0 camera frames.

use image::RgbImage;

use crate::convert::YCbCrMatrix;
use crate::error::FrameError;

/// Chroma plane dimensions for a luma plane of `width × height`.
pub fn chroma_dims(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(2), height.div_ceil(2))
}

/// A camera frame: full-resolution luma plus interleaved `(Cb, Cr)` at half
/// resolution in both axes. Samples are normalised to `[0, 1]`.
///
/// Fields are public so capture code can hand over planes without copying;
/// call [`validate`](Self::validate) before trusting them.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<f32>,
    pub chroma: Vec<[f32; 2]>,
}

impl CameraFrame {
    pub fn new(width: u32, height: u32, luma: Vec<f32>, chroma: Vec<[f32; 2]>) -> Result<Self, FrameError> {
        let frame = Self {
            width,
            height,
            luma,
            chroma,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Build a frame from 8-bit planes as delivered by the capture session.
    ///
    /// `chroma` holds interleaved Cb/Cr bytes.
    pub fn from_u8_planes(width: u32, height: u32, luma: &[u8], chroma: &[u8]) -> Result<Self, FrameError> {
        let (cw, ch) = chroma_dims(width, height);
        let expected = cw as usize * ch as usize * 2;
        if chroma.len() != expected {
            return Err(FrameError::PlaneLength {
                plane: "chroma",
                expected,
                actual: chroma.len(),
            });
        }
        let luma = luma.iter().map(|&v| f32::from(v) / 255.0).collect();
        let chroma = chroma
            .chunks_exact(2)
            .map(|c| [f32::from(c[0]) / 255.0, f32::from(c[1]) / 255.0])
            .collect();
        Self::new(width, height, luma, chroma)
    }

    /// Frame where every pixel carries the same `(Y, Cb, Cr)`.
    pub fn uniform(width: u32, height: u32, y: f32, cb: f32, cr: f32) -> Self {
        let (cw, ch) = chroma_dims(width, height);
        Self {
            width,
            height,
            luma: vec![y; width as usize * height as usize],
            chroma: vec![[cb, cr]; cw as usize * ch as usize],
        }
    }

    /// Encode an RGB image, averaging chroma over each 2×2 block.
    pub fn from_rgb_image(img: &RgbImage, matrix: YCbCrMatrix) -> Self {
        let coeffs = matrix.coefficients();
        let (width, height) = img.dimensions();
        let (cw, ch) = chroma_dims(width, height);

        let mut luma = Vec::with_capacity(width as usize * height as usize);
        let mut chroma_sum = vec![([0.0f32; 2], 0u32); cw as usize * ch as usize];

        for (x, y, px) in img.enumerate_pixels() {
            let rgb = px.0.map(|c| f32::from(c) / 255.0);
            let (yv, cbcr) = coeffs.from_rgb(rgb);
            luma.push(yv);
            let slot = &mut chroma_sum[(y / 2 * cw + x / 2) as usize];
            slot.0[0] += cbcr[0];
            slot.0[1] += cbcr[1];
            slot.1 += 1;
        }

        let chroma = chroma_sum
            .into_iter()
            .map(|(sum, n)| {
                let n = n.max(1) as f32;
                [sum[0] / n, sum[1] / n]
            })
            .collect();

        Self {
            width,
            height,
            luma,
            chroma,
        }
    }

    pub fn chroma_width(&self) -> u32 {
        chroma_dims(self.width, self.height).0
    }

    pub fn chroma_height(&self) -> u32 {
        chroma_dims(self.width, self.height).1
    }

    /// Check plane lengths against the declared dimensions.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                plane: "camera",
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.width as usize * self.height as usize;
        if self.luma.len() != expected {
            return Err(FrameError::PlaneLength {
                plane: "luma",
                expected,
                actual: self.luma.len(),
            });
        }
        let (cw, ch) = chroma_dims(self.width, self.height);
        let expected = cw as usize * ch as usize;
        if self.chroma.len() != expected {
            return Err(FrameError::PlaneLength {
                plane: "chroma",
                expected,
                actual: self.chroma.len(),
            });
        }
        Ok(())
    }

    /// Luma sample at pixel `(x, y)`. Caller guarantees bounds.
    pub fn luma_at(&self, x: u32, y: u32) -> f32 {
        self.luma[(y * self.width + x) as usize]
    }

    /// Chroma pair covering pixel `(x, y)`.
    pub fn chroma_at(&self, x: u32, y: u32) -> [f32; 2] {
        self.chroma[(y / 2 * self.chroma_width() + x / 2) as usize]
    }
}
