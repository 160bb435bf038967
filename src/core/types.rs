//! Backend-neutral descriptors and render state values.

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

use super::handles::{FramebufferHandle, ProgramHandle, TextureHandle};

/// Number of texture units mirrored by the state tracker without spilling.
pub const TRACKED_TEXTURE_UNITS: usize = 16;

// ─── Textures ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgba16Float,
    Rg16Float,
    R8,
    Depth24Stencil8,
    Depth32Float,
}

impl TextureFormat {
    #[inline]
    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24Stencil8 | Self::Depth32Float)
    }

    #[inline]
    #[must_use]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24Stencil8)
    }

    #[must_use]
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rgba8 | Self::Rg16Float | Self::Depth24Stencil8 | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureKind {
    #[default]
    D2,
    Cube,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
}

impl TextureDesc {
    #[must_use]
    pub fn new_2d(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
            kind: TextureKind::D2,
        }
    }

    /// Storage footprint of the base level.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        let faces = match self.kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        };
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.bytes_per_pixel()) * faces
    }
}

// ─── Fixed-function state ─────────────────────────────────────────────────────

/// Colour blending configuration of the output merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Disabled,
    /// `src * a + dst * (1 - a)`
    Alpha,
    /// `src * a + dst`
    Additive,
    /// `src + dst * (1 - a)`
    Premultiplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Never,
    #[default]
    Less,
    Equal,
    Lequal,
    Greater,
    NotEqual,
    Gequal,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Back,
    Front,
}

/// Stencil configuration used by the deferred path to mark covered pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilMode {
    #[default]
    Disabled,
    /// Always pass and write `reference`.
    Replace { reference: u8 },
    /// Pass where the stored value equals `reference`; never writes.
    Equal { reference: u8 },
    /// Pass where the stored value differs from `reference`; never writes.
    NotEqual { reference: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[inline]
    #[must_use]
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

// ─── Tracked state snapshot ───────────────────────────────────────────────────

/// Mirror of every piece of GPU state the engine changes.
///
/// The default value equals the OpenGL initial state, which is the state a
/// freshly created backend must be in.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuState {
    pub framebuffer: Option<FramebufferHandle>,
    pub program: Option<ProgramHandle>,
    pub textures: SmallVec<[Option<TextureHandle>; TRACKED_TEXTURE_UNITS]>,
    pub blend: BlendMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunction,
    pub color_write: bool,
    pub cull: CullMode,
    pub stencil: StencilMode,
    pub viewport: Viewport,
}

impl Default for GpuState {
    fn default() -> Self {
        Self {
            framebuffer: None,
            program: None,
            textures: SmallVec::new(),
            blend: BlendMode::Disabled,
            depth_test: false,
            depth_write: true,
            depth_func: CompareFunction::Less,
            color_write: true,
            cull: CullMode::None,
            stencil: StencilMode::Disabled,
            viewport: Viewport::default(),
        }
    }
}

impl GpuState {
    /// Texture bound to `unit`, treating units never touched as empty.
    #[inline]
    #[must_use]
    pub fn texture(&self, unit: u32) -> Option<TextureHandle> {
        self.textures.get(unit as usize).copied().flatten()
    }

    pub(crate) fn set_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        let unit = unit as usize;
        if self.textures.len() <= unit {
            self.textures.resize(unit + 1, None);
        }
        self.textures[unit] = texture;
    }

    /// Units compare equal when one side is simply shorter and padded with `None`.
    #[must_use]
    pub fn matches(&self, other: &GpuState) -> bool {
        let units = self.textures.len().max(other.textures.len()) as u32;
        (0..units).all(|unit| self.texture(unit) == other.texture(unit))
            && self.framebuffer == other.framebuffer
            && self.program == other.program
            && self.blend == other.blend
            && self.depth_test == other.depth_test
            && self.depth_write == other.depth_write
            && self.depth_func == other.depth_func
            && self.color_write == other.color_write
            && self.cull == other.cull
            && self.stencil == other.stencil
            && self.viewport == other.viewport
    }
}

// ─── Uniforms ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    /// Texture unit index for a classic sampler uniform.
    Sampler(u32),
    /// 64-bit resident texture handle for bindless samplers.
    BindlessHandle(u64),
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        Self::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        Self::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        Self::Mat4(v)
    }
}

// ─── Geometry ─────────────────────────────────────────────────────────────────

/// One float vertex attribute inside an interleaved buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    /// Number of `f32` components (1..=4).
    pub components: u32,
    /// Byte offset inside one vertex.
    pub offset: u32,
}

/// Interleaved vertex data handed over by geometry collaborators.
#[derive(Debug, Clone, Default)]
pub struct GeometryData {
    pub label: String,
    pub vertices: Vec<f32>,
    /// Bytes per vertex.
    pub stride: u32,
    pub attributes: SmallVec<[VertexAttribute; 6]>,
    pub indices: Option<Vec<u32>>,
}

impl GeometryData {
    #[must_use]
    pub fn vertex_count(&self) -> u32 {
        if self.stride == 0 {
            return 0;
        }
        (self.vertices.len() * std::mem::size_of::<f32>()) as u32 / self.stride
    }

    /// Elements submitted per instance.
    #[must_use]
    pub fn element_count(&self) -> u32 {
        self.indices
            .as_ref()
            .map_or_else(|| self.vertex_count(), |indices| indices.len() as u32)
    }
}

// ─── Synchronization ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    Pending,
}
