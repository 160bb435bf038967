//! GPU context: one backend plus the mirror of its state.
//!
//! `GpuContext` is the per-context owner of everything the render core touches
//! on the device. Resource creation is forwarded to the backend directly;
//! state changes go through the tracker in [`state`](super::state), which is
//! the only code allowed to call the backend's raw state setters.

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::errors::{RenderError, Result};
use crate::shader::stage::ShaderStage;

use super::backend::GpuBackend;
use super::handles::{
    FenceHandle, FramebufferHandle, GeometryHandle, ProgramHandle, ShaderHandle, TextureHandle,
};
use super::types::{
    FenceStatus, GeometryData, GpuState, TextureDesc, UniformValue, VertexAttribute,
};

/// Counters accumulated since the last [`GpuContext::take_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    /// State setter calls forwarded to the backend.
    pub state_changes: u64,
    /// State setter calls elided because the tracked value already matched.
    pub redundant_state_skips: u64,
    pub draw_calls: u64,
    pub instances: u64,
}

/// A sync object placed in the command stream of one context.
///
/// Must be handed back through [`GpuContext::release_fence`].
#[must_use]
#[derive(Debug)]
pub struct Fence {
    handle: FenceHandle,
}

impl Fence {
    #[inline]
    #[must_use]
    pub fn handle(&self) -> FenceHandle {
        self.handle
    }
}

pub struct GpuContext {
    pub(super) backend: Box<dyn GpuBackend>,
    pub(super) tracked: GpuState,
    pub(super) stats: GpuStats,
    /// Bindless handles currently resident, by texture.
    resident: FxHashMap<TextureHandle, u64>,
}

impl GpuContext {
    /// Wraps a backend that is in the initial (default) GL state.
    #[must_use]
    pub fn new(backend: Box<dyn GpuBackend>) -> Self {
        log::info!("GPU context created on '{}' backend", backend.name());
        Self {
            backend,
            tracked: GpuState::default(),
            stats: GpuStats::default(),
            resident: FxHashMap::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// The tracked state. Equal to the device state as long as every change
    /// went through this context.
    #[inline]
    #[must_use]
    pub fn state(&self) -> &GpuState {
        &self.tracked
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> GpuStats {
        self.stats
    }

    /// Returns and resets the counters.
    pub fn take_stats(&mut self) -> GpuStats {
        std::mem::take(&mut self.stats)
    }

    // ── Shaders ──────────────────────────────────────────────────────────────

    pub(crate) fn compile_stage(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> std::result::Result<ShaderHandle, String> {
        self.backend.compile_stage(stage, source)
    }

    pub(crate) fn link_program(
        &mut self,
        stages: &[ShaderHandle],
    ) -> std::result::Result<ProgramHandle, String> {
        self.backend.link_program(stages)
    }

    pub(crate) fn delete_shader(&mut self, shader: ShaderHandle) {
        self.backend.delete_shader(shader);
    }

    pub(crate) fn delete_program(&mut self, program: ProgramHandle) {
        if self.tracked.program == Some(program) {
            self.use_program(None);
        }
        self.backend.delete_program(program);
    }

    /// Uploads a uniform into the currently bound program.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) {
        let Some(program) = self.tracked.program else {
            debug_assert!(false, "set_uniform('{name}') without a bound program");
            log::warn!("Uniform '{name}' dropped: no program bound");
            return;
        };
        self.backend.set_uniform(program, name, &value.into());
    }

    // ── Textures & framebuffers ──────────────────────────────────────────────

    pub fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        self.backend.create_texture(desc)
    }

    pub fn reallocate_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()> {
        self.backend.reallocate_texture(texture, width, height)
    }

    /// Deleting a bound texture implicitly unbinds it from every unit and
    /// releases its bindless residency.
    pub fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(handle) = self.resident.remove(&texture) {
            self.backend.set_texture_resident(handle, false);
        }
        for slot in self.tracked.textures.iter_mut() {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
        self.backend.delete_texture(texture);
    }

    pub fn create_framebuffer(
        &mut self,
        colors: &[TextureHandle],
        depth: Option<TextureHandle>,
    ) -> Result<FramebufferHandle> {
        self.backend.create_framebuffer(colors, depth)
    }

    pub fn check_framebuffer(&mut self, framebuffer: FramebufferHandle) -> std::result::Result<(), String> {
        self.backend.check_framebuffer(framebuffer)
    }

    /// Deleting the bound framebuffer reverts the binding to the default one.
    pub fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.tracked.framebuffer == Some(framebuffer) {
            self.tracked.framebuffer = None;
        }
        self.backend.delete_framebuffer(framebuffer);
    }

    pub fn bindless_handle(&mut self, texture: TextureHandle) -> Option<u64> {
        self.backend.bindless_handle(texture)
    }

    /// Changes the residency of a bindless handle. Requests matching the
    /// current residency are elided.
    pub fn set_texture_resident(&mut self, texture: TextureHandle, handle: u64, resident: bool) {
        if resident {
            if self.resident.insert(texture, handle) == Some(handle) {
                return;
            }
        } else if self.resident.remove(&texture).is_none() {
            return;
        }
        self.backend.set_texture_resident(handle, resident);
    }

    #[inline]
    #[must_use]
    pub fn is_texture_resident(&self, texture: TextureHandle) -> bool {
        self.resident.contains_key(&texture)
    }

    /// Makes every resident handle non-resident again.
    pub fn release_resident_textures(&mut self) {
        for (_, handle) in self.resident.drain() {
            self.backend.set_texture_resident(handle, false);
        }
    }

    // ── Geometry & submission ────────────────────────────────────────────────

    pub fn create_geometry(&mut self, data: &GeometryData) -> Result<GeometryHandle> {
        self.backend.create_geometry(data)
    }

    pub fn upload_instances(
        &mut self,
        geometry: GeometryHandle,
        bytes: &[u8],
        stride: u32,
        layout: &[VertexAttribute],
    ) -> Result<()> {
        self.backend.upload_instances(geometry, bytes, stride, layout)
    }

    pub fn delete_geometry(&mut self, geometry: GeometryHandle) {
        self.backend.delete_geometry(geometry);
    }

    pub fn draw(&mut self, geometry: GeometryHandle, instances: u32) {
        if instances == 0 {
            return;
        }
        self.stats.draw_calls += 1;
        self.stats.instances += u64::from(instances);
        self.backend.draw(geometry, instances);
    }

    pub fn draw_fullscreen(&mut self) {
        self.stats.draw_calls += 1;
        self.stats.instances += 1;
        self.backend.draw_fullscreen();
    }

    // ── Synchronization ──────────────────────────────────────────────────────

    /// Places a fence after every command submitted so far.
    pub fn insert_fence(&mut self) -> Result<Fence> {
        let handle = self.backend.insert_fence()?;
        self.backend.flush();
        Ok(Fence { handle })
    }

    /// Non-blocking completion check.
    pub fn poll_fence(&mut self, fence: &Fence) -> FenceStatus {
        self.backend.wait_fence(fence.handle, Duration::ZERO)
    }

    /// Blocks until the fence signals or `timeout` expires.
    pub fn wait_fence(&mut self, fence: &Fence, timeout: Duration) -> Result<()> {
        match self.backend.wait_fence(fence.handle, timeout) {
            FenceStatus::Signaled => Ok(()),
            FenceStatus::Pending => Err(RenderError::FenceTimeout { timeout }),
        }
    }

    pub fn release_fence(&mut self, fence: Fence) {
        self.backend.delete_fence(fence.handle);
    }

    pub fn flush(&mut self) {
        self.backend.flush();
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("backend", &self.backend.name())
            .field("tracked", &self.tracked)
            .field("stats", &self.stats)
            .finish()
    }
}
