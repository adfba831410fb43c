//! Two-pass tile reduction over the selection's bounding box.
//!
//! Pass one reduces each 16×16 tile to a [`TilePartial`] with a 256-lane tree
//! reduction. Pass two folds the first `length` partials, 256 lanes striding
//! across the buffer, and skips any tile that saw no valid pixel. Both passes
//! mirror the compute kernels so the CPU path can serve as their reference.

use rayon::prelude::*;

use crate::selection::PixelRect;
use crate::uniforms::{PartialBufferLength, TilePartial};

/// Edge length of one reduction tile in pixels.
pub const TILE_EDGE: u32 = 16;
/// Lanes per tile (`TILE_EDGE²`).
pub const TILE_LANES: usize = (TILE_EDGE * TILE_EDGE) as usize;
/// Lanes of the combine pass.
pub const COMBINE_LANES: usize = 256;

/// Channel sample for one pixel.
///
/// `lo`/`hi` feed the extrema and `value` the sum; they coincide for
/// scalar channels and differ for exposure (min/max RGB, mean luma).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSample {
    pub lo: f32,
    pub hi: f32,
    pub value: f32,
    /// Hue in degrees when the circular mean is wanted.
    pub angle: Option<f32>,
}

impl PixelSample {
    pub fn scalar(value: f32) -> Self {
        Self {
            lo: value,
            hi: value,
            value,
            angle: None,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite() && self.value.is_finite()
    }
}

impl TilePartial {
    /// Neutral element. `count == 0` marks the tile as holding no data.
    pub const EMPTY: Self = Self {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
        sum: 0.0,
        count: 0,
        sum_cos: 0.0,
        sum_sin: 0.0,
        _pad: [0.0; 2],
    };

    pub fn from_sample(sample: PixelSample) -> Self {
        let (sum_cos, sum_sin) = match sample.angle {
            Some(deg) => {
                let r = deg.to_radians();
                (r.cos(), r.sin())
            }
            None => (0.0, 0.0),
        };
        Self {
            min: sample.lo,
            max: sample.hi,
            sum: sample.value,
            count: 1,
            sum_cos,
            sum_sin,
            _pad: [0.0; 2],
        }
    }

    pub fn merge(self, other: Self) -> Self {
        if other.count == 0 {
            return self;
        }
        if self.count == 0 {
            return other;
        }
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
            count: self.count + other.count,
            sum_cos: self.sum_cos + other.sum_cos,
            sum_sin: self.sum_sin + other.sum_sin,
            _pad: [0.0; 2],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for TilePartial {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Tile layout over a bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionGrid {
    pub bounds: PixelRect,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl ReductionGrid {
    pub fn new(bounds: PixelRect) -> Self {
        Self {
            bounds,
            tiles_x: bounds.width.div_ceil(TILE_EDGE),
            tiles_y: bounds.height.div_ceil(TILE_EDGE),
        }
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_x as usize * self.tiles_y as usize
    }

    /// Number of partials written by pass one.
    pub fn partial_length(&self) -> PartialBufferLength {
        PartialBufferLength::new(self.tiles_x * self.tiles_y)
    }

    /// Pixel coordinate of `lane` within tile `tile`, or `None` for lanes
    /// that fall outside the bounding box.
    pub fn lane_pixel(&self, tile: usize, lane: usize) -> Option<(u32, u32)> {
        let tx = tile as u32 % self.tiles_x;
        let ty = tile as u32 / self.tiles_x;
        let lx = tx * TILE_EDGE + lane as u32 % TILE_EDGE;
        let ly = ty * TILE_EDGE + lane as u32 / TILE_EDGE;
        (lx < self.bounds.width && ly < self.bounds.height).then_some((self.bounds.x + lx, self.bounds.y + ly))
    }
}

/// Pairwise tree reduction of a power-of-two lane array.
fn tree_reduce(lanes: &mut [TilePartial]) -> TilePartial {
    let mut stride = lanes.len() / 2;
    while stride > 0 {
        for i in 0..stride {
            lanes[i] = lanes[i].merge(lanes[i + stride]);
        }
        stride /= 2;
    }
    lanes.first().copied().unwrap_or(TilePartial::EMPTY)
}

/// Pass one for a single tile. Invalid and non-finite lanes contribute
/// the neutral element.
pub fn reduce_tile<F>(grid: &ReductionGrid, tile: usize, sample: &F) -> TilePartial
where
    F: Fn(u32, u32) -> Option<PixelSample>,
{
    let mut lanes = [TilePartial::EMPTY; TILE_LANES];
    for (lane, slot) in lanes.iter_mut().enumerate() {
        if let Some((x, y)) = grid.lane_pixel(tile, lane)
            && let Some(s) = sample(x, y)
            && s.is_finite()
        {
            *slot = TilePartial::from_sample(s);
        }
    }
    tree_reduce(&mut lanes)
}

/// Pass one over every tile in parallel.
///
/// `cancelled` is polled at tile boundaries; once it reports true the
/// remaining tiles are left empty and the caller is expected to discard the
/// result. Collecting into `partials` is the barrier before pass two.
pub fn reduce_tiles<F, C>(grid: &ReductionGrid, sample: &F, cancelled: &C, partials: &mut Vec<TilePartial>)
where
    F: Fn(u32, u32) -> Option<PixelSample> + Sync,
    C: Fn() -> bool + Sync,
{
    (0..grid.tile_count())
        .into_par_iter()
        .map(|tile| {
            if cancelled() {
                TilePartial::EMPTY
            } else {
                reduce_tile(grid, tile, sample)
            }
        })
        .collect_into_vec(partials);
}

/// Pass two: fold the first `length.length` partials.
///
/// Entries past `length` are stale storage from earlier frames and are never
/// read.
pub fn combine_partials(partials: &[TilePartial], length: PartialBufferLength) -> TilePartial {
    let valid = &partials[..(length.length as usize).min(partials.len())];
    let mut lanes = [TilePartial::EMPTY; COMBINE_LANES];
    for (lane, slot) in lanes.iter_mut().enumerate() {
        let mut acc = TilePartial::EMPTY;
        let mut i = lane;
        while i < valid.len() {
            acc = acc.merge(valid[i]);
            i += COMBINE_LANES;
        }
        *slot = acc;
    }
    tree_reduce(&mut lanes)
}
