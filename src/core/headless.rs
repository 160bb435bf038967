//! Headless backend.
//!
//! Implements [`GpuBackend`] without a device: objects live in slot maps, the
//! "device state" is a plain [`GpuState`], and every call is appended to a
//! trace. A [`HeadlessProbe`] shares the same device so callers can inspect
//! the trace, resource sizes and uniforms, and inject failures (rejected
//! shaders, allocation budgets, slow fences, foreign state changes).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::{Key, SlotMap};

use crate::errors::{RenderError, Result};
use crate::shader::stage::ShaderStage;

use super::backend::GpuBackend;
use super::context::GpuContext;
use super::handles::{
    FenceHandle, FramebufferHandle, GeometryHandle, ProgramHandle, ShaderHandle, TextureHandle,
};
use super::types::{
    BlendMode, ClearFlags, CompareFunction, CullMode, FenceStatus, GeometryData, GpuState,
    StencilMode, TextureDesc, TextureFormat, UniformValue, VertexAttribute, Viewport,
};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CompileStage(ShaderStage),
    LinkProgram,
    DeleteShader,
    DeleteProgram,
    CreateTexture { width: u32, height: u32 },
    ReallocateTexture { texture: TextureHandle, width: u32, height: u32 },
    DeleteTexture,
    CreateFramebuffer,
    DeleteFramebuffer,
    BindFramebuffer(Option<FramebufferHandle>),
    BindTexture { unit: u32, texture: Option<TextureHandle> },
    UseProgram(Option<ProgramHandle>),
    SetBlend(BlendMode),
    SetDepthTest(bool),
    SetDepthWrite(bool),
    SetDepthFunc(CompareFunction),
    SetColorWrite(bool),
    SetCull(CullMode),
    SetStencil(StencilMode),
    SetViewport(Viewport),
    Clear(ClearFlags),
    Draw {
        geometry: GeometryHandle,
        instances: u32,
        program: Option<ProgramHandle>,
        framebuffer: Option<FramebufferHandle>,
    },
    DrawFullscreen {
        program: Option<ProgramHandle>,
        framebuffer: Option<FramebufferHandle>,
    },
    UploadInstances { geometry: GeometryHandle, bytes: usize },
    InsertFence,
    Flush,
}

impl GpuCall {
    /// `true` for the raw state setters the tracker is meant to elide.
    #[must_use]
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            Self::BindFramebuffer(_)
                | Self::BindTexture { .. }
                | Self::UseProgram(_)
                | Self::SetBlend(_)
                | Self::SetDepthTest(_)
                | Self::SetDepthWrite(_)
                | Self::SetDepthFunc(_)
                | Self::SetColorWrite(_)
                | Self::SetCull(_)
                | Self::SetStencil(_)
                | Self::SetViewport(_)
        )
    }
}

/// Failure injection and behaviour knobs.
#[derive(Debug, Clone, Default)]
pub struct HeadlessOptions {
    /// Stage sources containing this text fail to compile.
    pub reject_marker: Option<String>,
    /// Programs with a stage containing this text fail to link.
    pub reject_link_marker: Option<String>,
    /// Largest texture (in pixels) the fake device can allocate.
    pub max_texture_pixels: Option<u64>,
    /// Number of polls a fresh fence stays pending.
    pub fence_latency: u32,
    /// Fences never signal.
    pub stall_fences: bool,
    /// Expose bindless texture handles.
    pub bindless: bool,
}

#[derive(Debug, Clone)]
struct HeadlessShader {
    stage: ShaderStage,
    source: String,
}

#[derive(Debug, Clone, Default)]
struct HeadlessProgram {
    sources: Vec<(ShaderStage, String)>,
    uniforms: FxHashMap<String, UniformValue>,
}

#[derive(Debug, Clone)]
struct HeadlessFramebuffer {
    colors: Vec<TextureHandle>,
    depth: Option<TextureHandle>,
}

#[derive(Debug, Clone)]
struct HeadlessGeometry {
    elements: u32,
    instance_bytes: usize,
}

#[derive(Default)]
struct HeadlessDevice {
    calls: Vec<GpuCall>,
    shaders: SlotMap<ShaderHandle, HeadlessShader>,
    programs: SlotMap<ProgramHandle, HeadlessProgram>,
    textures: SlotMap<TextureHandle, TextureDesc>,
    framebuffers: SlotMap<FramebufferHandle, HeadlessFramebuffer>,
    geometries: SlotMap<GeometryHandle, HeadlessGeometry>,
    fences: SlotMap<FenceHandle, u32>,
    resident: FxHashSet<u64>,
    state: GpuState,
    options: HeadlessOptions,
}

impl HeadlessDevice {
    fn framebuffer_status(&self, framebuffer: &HeadlessFramebuffer) -> std::result::Result<(), String> {
        if framebuffer.colors.is_empty() && framebuffer.depth.is_none() {
            return Err("FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT".into());
        }
        for color in &framebuffer.colors {
            let desc = self
                .textures
                .get(*color)
                .ok_or("FRAMEBUFFER_INCOMPLETE_ATTACHMENT: deleted colour texture")?;
            if desc.format.is_depth() {
                return Err(format!(
                    "FRAMEBUFFER_INCOMPLETE_ATTACHMENT: '{}' is a depth format",
                    desc.label
                ));
            }
        }
        if let Some(depth) = framebuffer.depth {
            let desc = self
                .textures
                .get(depth)
                .ok_or("FRAMEBUFFER_INCOMPLETE_ATTACHMENT: deleted depth texture")?;
            if !desc.format.is_depth() {
                return Err(format!(
                    "FRAMEBUFFER_INCOMPLETE_ATTACHMENT: '{}' is not a depth format",
                    desc.label
                ));
            }
        }
        Ok(())
    }

    fn check_budget(&self, label: &str, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::Backend(format!(
                "texture '{label}' has zero extent {width}x{height}"
            )));
        }
        if let Some(max) = self.options.max_texture_pixels
            && u64::from(width) * u64::from(height) > max
        {
            return Err(RenderError::Backend(format!(
                "GL_OUT_OF_MEMORY allocating '{label}' ({width}x{height})"
            )));
        }
        Ok(())
    }
}

/// Handle onto the device of a [`HeadlessBackend`] for inspection.
#[derive(Clone)]
pub struct HeadlessProbe {
    device: Arc<Mutex<HeadlessDevice>>,
}

impl HeadlessProbe {
    #[must_use]
    pub fn calls(&self) -> Vec<GpuCall> {
        self.device.lock().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&GpuCall) -> bool) -> usize {
        self.device.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    #[must_use]
    pub fn compile_count(&self) -> usize {
        self.count(|c| matches!(c, GpuCall::CompileStage(_)))
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.count(|c| matches!(c, GpuCall::LinkProgram))
    }

    #[must_use]
    pub fn state_calls(&self) -> usize {
        self.count(GpuCall::is_state_change)
    }

    pub fn clear_calls(&self) {
        self.device.lock().calls.clear();
    }

    pub fn configure(&self, f: impl FnOnce(&mut HeadlessOptions)) {
        f(&mut self.device.lock().options);
    }

    pub fn reject_shaders_containing(&self, marker: &str) {
        self.configure(|o| o.reject_marker = Some(marker.to_owned()));
    }

    pub fn set_max_texture_pixels(&self, max: Option<u64>) {
        self.configure(|o| o.max_texture_pixels = max);
    }

    #[must_use]
    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.device
            .lock()
            .textures
            .get(texture)
            .map(|desc| (desc.width, desc.height))
    }

    #[must_use]
    pub fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.device.lock().textures.get(texture).cloned()
    }

    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.device.lock().programs.len()
    }

    #[must_use]
    pub fn live_shaders(&self) -> usize {
        self.device.lock().shaders.len()
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.device.lock().textures.len()
    }

    #[must_use]
    pub fn live_framebuffers(&self) -> usize {
        self.device.lock().framebuffers.len()
    }

    /// Sources of every stage linked into `program`.
    #[must_use]
    pub fn program_sources(&self, program: ProgramHandle) -> Vec<(ShaderStage, String)> {
        self.device
            .lock()
            .programs
            .get(program)
            .map(|p| p.sources.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn uniform(&self, program: ProgramHandle, name: &str) -> Option<UniformValue> {
        self.device
            .lock()
            .programs
            .get(program)
            .and_then(|p| p.uniforms.get(name).copied())
    }

    #[must_use]
    pub fn is_resident(&self, handle: u64) -> bool {
        self.device.lock().resident.contains(&handle)
    }

    #[must_use]
    pub fn actual_state(&self) -> GpuState {
        self.device.lock().state.clone()
    }

    /// Mutates device state behind the tracker's back, as foreign code would.
    pub fn external_state_change(&self, f: impl FnOnce(&mut GpuState)) {
        f(&mut self.device.lock().state);
    }

    /// Allocates a small colour texture through `gpu`.
    pub fn fake_texture(&self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<TextureHandle> {
        gpu.create_texture(&TextureDesc::new_2d("probe", width, height, TextureFormat::Rgba8))
    }

    /// Registers a triangle geometry through `gpu`.
    pub fn fake_geometry(&self, gpu: &mut GpuContext) -> Result<GeometryHandle> {
        let data = GeometryData {
            label: "probe triangle".into(),
            vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            stride: 12,
            attributes: smallvec::smallvec![VertexAttribute {
                location: 0,
                components: 3,
                offset: 0,
            }],
            indices: None,
        };
        gpu.create_geometry(&data)
    }
}

/// A [`GpuBackend`] that records instead of rendering.
pub struct HeadlessBackend {
    device: Arc<Mutex<HeadlessDevice>>,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> (Self, HeadlessProbe) {
        Self::with_options(HeadlessOptions::default())
    }

    #[must_use]
    pub fn with_options(options: HeadlessOptions) -> (Self, HeadlessProbe) {
        let device = Arc::new(Mutex::new(HeadlessDevice {
            options,
            ..Default::default()
        }));
        (
            Self {
                device: device.clone(),
            },
            HeadlessProbe { device },
        )
    }

    /// A ready-to-use context over a fresh headless device.
    #[must_use]
    pub fn context() -> (GpuContext, HeadlessProbe) {
        let (backend, probe) = Self::new();
        (GpuContext::new(Box::new(backend)), probe)
    }

    fn record(&self, call: GpuCall) {
        self.device.lock().calls.push(call);
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> std::result::Result<ShaderHandle, String> {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::CompileStage(stage));
        if let Some(marker) = &device.options.reject_marker
            && source.contains(marker.as_str())
        {
            return Err(format!("0:1(1): error: rejected token '{marker}'"));
        }
        Ok(device.shaders.insert(HeadlessShader {
            stage,
            source: source.to_owned(),
        }))
    }

    fn link_program(&mut self, stages: &[ShaderHandle]) -> std::result::Result<ProgramHandle, String> {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::LinkProgram);

        let mut sources = Vec::with_capacity(stages.len());
        for handle in stages {
            let shader = device
                .shaders
                .get(*handle)
                .ok_or("error: attached shader object was deleted")?;
            if sources.iter().any(|(stage, _)| *stage == shader.stage) {
                return Err(format!("error: two {:?} shaders attached", shader.stage));
            }
            sources.push((shader.stage, shader.source.clone()));
        }

        let has_entry = sources
            .iter()
            .any(|(stage, _)| matches!(stage, ShaderStage::Vertex | ShaderStage::Compute));
        if !has_entry {
            return Err("error: program has no vertex or compute stage".into());
        }
        if let Some(marker) = &device.options.reject_link_marker
            && sources.iter().any(|(_, src)| src.contains(marker.as_str()))
        {
            return Err(format!("error: unresolved symbol near '{marker}'"));
        }

        Ok(device.programs.insert(HeadlessProgram {
            sources,
            uniforms: FxHashMap::default(),
        }))
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::DeleteShader);
        device.shaders.remove(shader);
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::DeleteProgram);
        device.programs.remove(program);
    }

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: &UniformValue) {
        if let Some(program) = self.device.lock().programs.get_mut(program) {
            program.uniforms.insert(name.to_owned(), *value);
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let mut device = self.device.lock();
        device.check_budget(&desc.label, desc.width, desc.height)?;
        device.calls.push(GpuCall::CreateTexture {
            width: desc.width,
            height: desc.height,
        });
        Ok(device.textures.insert(desc.clone()))
    }

    fn reallocate_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()> {
        let mut device = self.device.lock();
        let label = device
            .textures
            .get(texture)
            .map(|d| d.label.clone())
            .ok_or(RenderError::InvalidHandle("texture"))?;
        device.check_budget(&label, width, height)?;
        device.calls.push(GpuCall::ReallocateTexture {
            texture,
            width,
            height,
        });
        if let Some(desc) = device.textures.get_mut(texture) {
            desc.width = width;
            desc.height = height;
        }
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::DeleteTexture);
        device.textures.remove(texture);
        for slot in device.state.textures.iter_mut() {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
    }

    fn create_framebuffer(
        &mut self,
        colors: &[TextureHandle],
        depth: Option<TextureHandle>,
    ) -> Result<FramebufferHandle> {
        let mut device = self.device.lock();
        let framebuffer = HeadlessFramebuffer {
            colors: colors.to_vec(),
            depth,
        };
        device
            .framebuffer_status(&framebuffer)
            .map_err(RenderError::Backend)?;
        device.calls.push(GpuCall::CreateFramebuffer);
        Ok(device.framebuffers.insert(framebuffer))
    }

    fn check_framebuffer(&mut self, framebuffer: FramebufferHandle) -> std::result::Result<(), String> {
        let device = self.device.lock();
        let fb = device
            .framebuffers
            .get(framebuffer)
            .ok_or("invalid framebuffer handle")?;
        device.framebuffer_status(fb)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::DeleteFramebuffer);
        device.framebuffers.remove(framebuffer);
        if device.state.framebuffer == Some(framebuffer) {
            device.state.framebuffer = None;
        }
    }

    fn bindless_handle(&mut self, texture: TextureHandle) -> Option<u64> {
        let device = self.device.lock();
        (device.options.bindless && device.textures.contains_key(texture))
            .then(|| texture.data().as_ffi())
    }

    fn set_texture_resident(&mut self, handle: u64, resident: bool) {
        let mut device = self.device.lock();
        if resident {
            device.resident.insert(handle);
        } else {
            device.resident.remove(&handle);
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::BindFramebuffer(framebuffer));
        device.state.framebuffer = framebuffer;
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::BindTexture { unit, texture });
        device.state.set_texture(unit, texture);
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::UseProgram(program));
        device.state.program = program;
    }

    fn set_blend(&mut self, mode: BlendMode) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::SetBlend(mode));
        device.state.blend = mode;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::SetDepthTest(enabled));
        device.state.depth_test = enabled;
    }

    fn set_depth_write(&mut self, enabled: bool) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::SetDepthWrite(enabled));
        device.state.depth_write = enabled;
    }

    fn set_depth_func(&mut self, func: CompareFunction) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::SetDepthFunc(func));
        device.state.depth_func = func;
    }

    fn set_color_write(&mut self, enabled: bool) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::SetColorWrite(enabled));
        device.state.color_write = enabled;
    }

    fn set_cull(&mut self, mode: CullMode) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::SetCull(mode));
        device.state.cull = mode;
    }

    fn set_stencil(&mut self, mode: StencilMode) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::SetStencil(mode));
        device.state.stencil = mode;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::SetViewport(viewport));
        device.state.viewport = viewport;
    }

    fn clear(&mut self, flags: ClearFlags, _color: [f32; 4], _depth: f32, _stencil: u8) {
        self.record(GpuCall::Clear(flags));
    }

    fn create_geometry(&mut self, data: &GeometryData) -> Result<GeometryHandle> {
        let mut device = self.device.lock();
        Ok(device.geometries.insert(HeadlessGeometry {
            elements: data.element_count(),
            instance_bytes: 0,
        }))
    }

    fn upload_instances(
        &mut self,
        geometry: GeometryHandle,
        bytes: &[u8],
        _stride: u32,
        _layout: &[VertexAttribute],
    ) -> Result<()> {
        let mut device = self.device.lock();
        let entry = device
            .geometries
            .get_mut(geometry)
            .ok_or(RenderError::InvalidHandle("geometry"))?;
        entry.instance_bytes = bytes.len();
        device.calls.push(GpuCall::UploadInstances {
            geometry,
            bytes: bytes.len(),
        });
        Ok(())
    }

    fn delete_geometry(&mut self, geometry: GeometryHandle) {
        self.device.lock().geometries.remove(geometry);
    }

    fn draw(&mut self, geometry: GeometryHandle, instances: u32) {
        let mut device = self.device.lock();
        let elements = device.geometries.get(geometry).map_or(0, |g| g.elements);
        debug_assert!(elements > 0, "draw of an empty or deleted geometry");
        let call = GpuCall::Draw {
            geometry,
            instances,
            program: device.state.program,
            framebuffer: device.state.framebuffer,
        };
        device.calls.push(call);
    }

    fn draw_fullscreen(&mut self) {
        let mut device = self.device.lock();
        let call = GpuCall::DrawFullscreen {
            program: device.state.program,
            framebuffer: device.state.framebuffer,
        };
        device.calls.push(call);
    }

    fn insert_fence(&mut self) -> Result<FenceHandle> {
        let mut device = self.device.lock();
        device.calls.push(GpuCall::InsertFence);
        let latency = device.options.fence_latency;
        Ok(device.fences.insert(latency))
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> FenceStatus {
        let mut device = self.device.lock();
        if device.options.stall_fences {
            return FenceStatus::Pending;
        }
        let Some(remaining) = device.fences.get_mut(fence) else {
            return FenceStatus::Signaled;
        };
        if timeout > Duration::ZERO {
            *remaining = 0;
        }
        if *remaining == 0 {
            FenceStatus::Signaled
        } else {
            *remaining -= 1;
            FenceStatus::Pending
        }
    }

    fn delete_fence(&mut self, fence: FenceHandle) {
        self.device.lock().fences.remove(fence);
    }

    fn flush(&mut self) {
        self.record(GpuCall::Flush);
    }

    fn query_state(&self) -> Option<GpuState> {
        Some(self.device.lock().state.clone())
    }
}
