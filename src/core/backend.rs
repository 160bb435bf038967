//! The backend seam: the only place where engine code meets a graphics API.
//!
//! A backend is responsible for one thing: turning engine handles and
//! descriptors into native API calls. It performs no redundancy elimination of
//! its own. Every state setter below is reached exclusively through
//! [`GpuContext`](super::GpuContext), which mirrors the current state and only
//! forwards actual changes.
//!
//! Backends are owned by exactly one thread; none of these methods may be
//! called concurrently.

use std::time::Duration;

use crate::errors::Result;
use crate::shader::stage::ShaderStage;

use super::handles::{
    FenceHandle, FramebufferHandle, GeometryHandle, ProgramHandle, ShaderHandle, TextureHandle,
};
use super::types::{
    BlendMode, ClearFlags, CompareFunction, CullMode, FenceStatus, GeometryData, GpuState,
    StencilMode, TextureDesc, UniformValue, VertexAttribute, Viewport,
};

pub trait GpuBackend {
    /// Human readable backend name used in logs.
    fn name(&self) -> &str;

    // ── Shaders ──────────────────────────────────────────────────────────────

    /// Compiles one stage. On failure returns the driver's info log.
    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> std::result::Result<ShaderHandle, String>;

    /// Links compiled stages. On failure returns the linker's info log.
    fn link_program(&mut self, stages: &[ShaderHandle]) -> std::result::Result<ProgramHandle, String>;

    fn delete_shader(&mut self, shader: ShaderHandle);

    fn delete_program(&mut self, program: ProgramHandle);

    /// Uploads a uniform into `program`, which is guaranteed to be bound.
    /// Unknown names are ignored, like an inactive uniform in GL.
    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: &UniformValue);

    // ── Textures & framebuffers ──────────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;

    /// Re-specifies storage of an existing texture, keeping its handle.
    fn reallocate_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()>;

    fn delete_texture(&mut self, texture: TextureHandle);

    /// Builds a framebuffer over existing textures. Completeness is verified.
    fn create_framebuffer(
        &mut self,
        colors: &[TextureHandle],
        depth: Option<TextureHandle>,
    ) -> Result<FramebufferHandle>;

    /// Re-validates completeness after attachments were reallocated.
    fn check_framebuffer(&mut self, framebuffer: FramebufferHandle) -> std::result::Result<(), String>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Returns a bindless handle when the backend supports bindless textures.
    fn bindless_handle(&mut self, texture: TextureHandle) -> Option<u64>;

    fn set_texture_resident(&mut self, handle: u64, resident: bool);

    // ── Raw state (via GpuContext only) ──────────────────────────────────────

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>);

    fn use_program(&mut self, program: Option<ProgramHandle>);

    fn set_blend(&mut self, mode: BlendMode);

    fn set_depth_test(&mut self, enabled: bool);

    fn set_depth_write(&mut self, enabled: bool);

    fn set_depth_func(&mut self, func: CompareFunction);

    fn set_color_write(&mut self, enabled: bool);

    fn set_cull(&mut self, mode: CullMode);

    fn set_stencil(&mut self, mode: StencilMode);

    fn set_viewport(&mut self, viewport: Viewport);

    fn clear(&mut self, flags: ClearFlags, color: [f32; 4], depth: f32, stencil: u8);

    // ── Geometry & submission ────────────────────────────────────────────────

    fn create_geometry(&mut self, data: &GeometryData) -> Result<GeometryHandle>;

    /// Replaces the per-instance attribute stream of `geometry`.
    fn upload_instances(
        &mut self,
        geometry: GeometryHandle,
        bytes: &[u8],
        stride: u32,
        layout: &[VertexAttribute],
    ) -> Result<()>;

    fn delete_geometry(&mut self, geometry: GeometryHandle);

    fn draw(&mut self, geometry: GeometryHandle, instances: u32);

    /// Draws one screen-covering triangle generated from `gl_VertexID`.
    fn draw_fullscreen(&mut self);

    // ── Synchronization ──────────────────────────────────────────────────────

    fn insert_fence(&mut self) -> Result<FenceHandle>;

    /// Waits up to `timeout`; a zero timeout is an immediate poll.
    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> FenceStatus;

    fn delete_fence(&mut self, fence: FenceHandle);

    fn flush(&mut self);

    // ── Diagnostics ──────────────────────────────────────────────────────────

    /// Reads back the real device state, when the backend can.
    fn query_state(&self) -> Option<GpuState> {
        None
    }
}
