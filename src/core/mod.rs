//! The GPU seam.
//!
//! - [`GpuBackend`]: object-safe trait implemented per graphics API
//! - [`GpuContext`]: one backend plus the tracked mirror of its state
//! - [`RenderTarget`], [`TextureBinding`], [`Fence`], [`ResourceWorkerPool`]

pub mod backend;
pub mod context;
#[cfg(feature = "gl")]
pub mod gl;
pub mod handles;
pub mod headless;
pub mod state;
pub mod target;
pub mod texture;
pub mod types;
pub mod worker;

pub use backend::GpuBackend;
pub use context::{Fence, GpuContext, GpuStats};
#[cfg(feature = "gl")]
pub use gl::GlowBackend;
pub use handles::{
    FenceHandle, FramebufferHandle, GeometryHandle, ProgramHandle, ShaderHandle, TextureHandle,
};
pub use headless::{GpuCall, HeadlessBackend, HeadlessOptions, HeadlessProbe};
pub use state::RasterState;
pub use target::{AttachmentDesc, RenderTarget};
pub use texture::TextureBinding;
pub use types::{
    BlendMode, ClearFlags, CompareFunction, CullMode, FenceStatus, GeometryData, GpuState,
    StencilMode, TextureDesc, TextureFormat, TextureKind, UniformValue, VertexAttribute, Viewport,
};
pub use worker::{ContextFactory, PrecompileReport, Residency, ResourceTicket, ResourceWorkerPool};
