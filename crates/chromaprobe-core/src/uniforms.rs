//! Fixed-layout records shared between the host and the analysis kernels.
//!
//! Every struct here is `#[repr(C)]` and `Pod`, with padding spelled out as
//! fields so the byte layout matches the WGSL declarations in
//! `chromaprobe-gpu/shaders/`. Any field move must bump [`LAYOUT_VERSION`]
//! and the size assertions at the bottom of this file.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Version of the record layouts below. Kernels and host must agree on it.
pub const LAYOUT_VERSION: u32 = 1;

/// Buffer slots. Stable across every stage that binds them.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferIndex {
    MeshPositions = 0,
    MeshGenerics = 1,
    InstanceUniforms = 2,
    SharedUniforms = 3,
}

impl BufferIndex {
    pub const fn slot(self) -> u32 {
        self as u32
    }
}

/// Vertex attribute locations.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttribute {
    Position = 0,
    Texcoord = 1,
    Normal = 2,
}

impl VertexAttribute {
    pub const fn location(self) -> u32 {
        self as u32
    }
}

/// Image plane slots. `Depth` and `Confidence` follow the camera planes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureIndex {
    Color = 0,
    Luma = 1,
    Chroma = 2,
    Depth = 3,
    Confidence = 4,
}

impl TextureIndex {
    pub const fn slot(self) -> u32 {
        self as u32
    }
}

// ── Scene uniforms ──────────────────────────────────────────────────────────

/// Per-frame uniforms shared by every stage.
///
/// `use_depth` toggles depth matting for both the display and analysis
/// kernels without rebuilding any pipeline.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SharedUniforms {
    pub projection_matrix: [[f32; 4]; 4],
    pub view_matrix: [[f32; 4]; 4],
    pub ambient_light_color: [f32; 3],
    pub _pad0: f32,
    pub directional_light_direction: [f32; 3],
    pub _pad1: f32,
    pub directional_light_color: [f32; 3],
    pub _pad2: f32,
    pub material_shininess: f32,
    pub use_depth: i32,
    pub _pad3: [u32; 2],
}

impl SharedUniforms {
    pub fn new(projection: Mat4, view: Mat4) -> Self {
        Self {
            projection_matrix: projection.to_cols_array_2d(),
            view_matrix: view.to_cols_array_2d(),
            ..Self::default()
        }
    }

    pub fn with_lighting(mut self, ambient: Vec3, direction: Vec3, color: Vec3, shininess: f32) -> Self {
        self.ambient_light_color = ambient.to_array();
        self.directional_light_direction = direction.normalize_or_zero().to_array();
        self.directional_light_color = color.to_array();
        self.material_shininess = shininess;
        self
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.projection_matrix)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view_matrix)
    }

    pub fn use_depth(&self) -> bool {
        self.use_depth != 0
    }

    pub fn set_use_depth(&mut self, enabled: bool) {
        self.use_depth = i32::from(enabled);
    }
}

impl Default for SharedUniforms {
    fn default() -> Self {
        Self {
            projection_matrix: Mat4::IDENTITY.to_cols_array_2d(),
            view_matrix: Mat4::IDENTITY.to_cols_array_2d(),
            ambient_light_color: [0.5, 0.5, 0.5],
            _pad0: 0.0,
            directional_light_direction: [0.0, 0.0, -1.0],
            _pad1: 0.0,
            directional_light_color: [0.6, 0.6, 0.6],
            _pad2: 0.0,
            material_shininess: 30.0,
            use_depth: 0,
            _pad3: [0; 2],
        }
    }
}

/// Per-instance model transform.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceUniforms {
    pub model_matrix: [[f32; 4]; 4],
}

impl From<Mat4> for InstanceUniforms {
    fn from(model: Mat4) -> Self {
        Self {
            model_matrix: model.to_cols_array_2d(),
        }
    }
}

impl Default for InstanceUniforms {
    fn default() -> Self {
        Mat4::IDENTITY.into()
    }
}

// ── Analysis uniforms ───────────────────────────────────────────────────────

/// Normalised selection rectangle as seen by the kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SelectionUniform {
    pub x1: f32,
    pub x2: f32,
    pub y1: f32,
    pub y2: f32,
    pub editable: u32,
    pub _pad: [u32; 3],
}

/// Display-only exposure tinting.
///
/// The two scalar slots after each colour are the exposure thresholds; they
/// would otherwise be vec3 padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorModifierUniform {
    pub grayscale: u32,
    pub _pad: [u32; 3],
    pub overexposure_color: [f32; 3],
    pub over_threshold: f32,
    pub underexposure_color: [f32; 3],
    pub under_threshold: f32,
}

/// Number of valid entries in the tile partial buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PartialBufferLength {
    pub length: u32,
    pub _pad: [u32; 3],
}

impl PartialBufferLength {
    pub const fn new(length: u32) -> Self {
        Self { length, _pad: [0; 3] }
    }
}

/// HSV channel tag (0 hue, 1 saturation, 2 value).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModeHsv {
    pub mode: f32,
    pub _pad: [f32; 3],
}

/// Per-frame geometry and conversion constants for the kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameParams {
    pub width: u32,
    pub height: u32,
    pub chroma_width: u32,
    pub chroma_height: u32,

    pub origin_x: u32,
    pub origin_y: u32,
    pub box_width: u32,
    pub box_height: u32,

    pub tiles_x: u32,
    pub source: u32,
    pub linearize: u32,
    pub has_confidence: u32,

    pub depth_width: u32,
    pub depth_height: u32,
    pub min_confidence: u32,
    pub _pad0: u32,

    pub depth_near: f32,
    pub depth_far: f32,
    pub y_offset: f32,
    pub y_scale: f32,

    pub c_scale: f32,
    pub cr_to_r: f32,
    pub cb_to_g: f32,
    pub cr_to_g: f32,

    pub cb_to_b: f32,
    pub luma_r: f32,
    pub luma_g: f32,
    pub luma_b: f32,

    pub outside_dim: f32,
    pub _pad1: [f32; 3],
}

// ── Reduction records ───────────────────────────────────────────────────────

/// Per-frame min/max pair.
///
/// [`MinMax::EMPTY`] (`+inf`, `-inf`) is the neutral element and the
/// "no data" result; it is never confused with a measured value.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MinMax {
    pub min: f32,
    pub max: f32,
}

impl MinMax {
    pub const EMPTY: Self = Self {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    pub fn is_empty(&self) -> bool {
        !(self.min <= self.max)
    }

    pub fn include(&mut self, value: f32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// `(min, max)` when at least one value was included.
    pub fn range(&self) -> Option<(f32, f32)> {
        (!self.is_empty()).then_some((self.min, self.max))
    }
}

impl Default for MinMax {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// One tile's contribution to the frame reduction.
///
/// Tiles with `count == 0` hold sentinel extrema and are skipped by the
/// combine step.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TilePartial {
    pub min: f32,
    pub max: f32,
    pub sum: f32,
    pub count: u32,
    pub sum_cos: f32,
    pub sum_sin: f32,
    pub _pad: [f32; 2],
}

const _: () = assert!(std::mem::size_of::<SharedUniforms>() == 192);
const _: () = assert!(std::mem::size_of::<InstanceUniforms>() == 64);
const _: () = assert!(std::mem::size_of::<SelectionUniform>() == 32);
const _: () = assert!(std::mem::size_of::<ColorModifierUniform>() == 48);
const _: () = assert!(std::mem::size_of::<PartialBufferLength>() == 16);
const _: () = assert!(std::mem::size_of::<ModeHsv>() == 16);
const _: () = assert!(std::mem::size_of::<FrameParams>() == 128);
const _: () = assert!(std::mem::size_of::<MinMax>() == 8);
const _: () = assert!(std::mem::size_of::<TilePartial>() == 32);
