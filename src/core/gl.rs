//! OpenGL 3.3 core backend on top of `glow`.
//!
//! Engine handles are slot-map keys owned by this backend; each maps to the
//! native GL object plus whatever bookkeeping the backend needs to re-specify
//! or draw it. Resource creation must not disturb state the [`GpuContext`]
//! tracker believes is bound, so texture uploads use a scratch unit outside
//! the tracked range and framebuffer assembly restores the previous binding.
//!
//! [`GpuContext`]: super::GpuContext

use std::sync::Arc;
use std::time::Duration;

use glow::{HasContext, PixelUnpackData};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::errors::{RenderError, Result};
use crate::shader::stage::ShaderStage;

use super::backend::GpuBackend;
use super::handles::{
    FenceHandle, FramebufferHandle, GeometryHandle, ProgramHandle, ShaderHandle, TextureHandle,
};
use super::types::{
    BlendMode, ClearFlags, CompareFunction, CullMode, FenceStatus, GeometryData, StencilMode,
    TextureDesc, TextureFormat, TextureKind, UniformValue, VertexAttribute, Viewport,
    TRACKED_TEXTURE_UNITS,
};

type GlFence = <glow::Context as HasContext>::Fence;

/// Unit used for uploads; never touched by the state tracker.
const SCRATCH_UNIT: u32 = TRACKED_TEXTURE_UNITS as u32 + 15;

struct GlProgram {
    raw: glow::Program,
    locations: FxHashMap<String, Option<glow::UniformLocation>>,
}

struct GlTexture {
    raw: glow::Texture,
    desc: TextureDesc,
}

struct GlGeometry {
    vao: glow::VertexArray,
    vertices: glow::Buffer,
    indices: Option<glow::Buffer>,
    instances: Option<glow::Buffer>,
    elements: i32,
}

pub struct GlowBackend {
    gl: Arc<glow::Context>,
    shaders: SlotMap<ShaderHandle, glow::Shader>,
    programs: SlotMap<ProgramHandle, GlProgram>,
    textures: SlotMap<TextureHandle, GlTexture>,
    framebuffers: SlotMap<FramebufferHandle, glow::Framebuffer>,
    geometries: SlotMap<GeometryHandle, GlGeometry>,
    fences: SlotMap<FenceHandle, GlFence>,
    fullscreen_vao: glow::VertexArray,
    bound_framebuffer: Option<glow::Framebuffer>,
}

fn stage_enum(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::TessControl => glow::TESS_CONTROL_SHADER,
        ShaderStage::TessEval => glow::TESS_EVALUATION_SHADER,
        ShaderStage::Geometry => glow::GEOMETRY_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        ShaderStage::Compute => glow::COMPUTE_SHADER,
    }
}

/// `(internal format, format, type)`
fn format_triple(format: TextureFormat) -> (i32, u32, u32) {
    match format {
        TextureFormat::Rgba8 => (glow::RGBA8 as i32, glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba16Float => (glow::RGBA16F as i32, glow::RGBA, glow::HALF_FLOAT),
        TextureFormat::Rg16Float => (glow::RG16F as i32, glow::RG, glow::HALF_FLOAT),
        TextureFormat::R8 => (glow::R8 as i32, glow::RED, glow::UNSIGNED_BYTE),
        TextureFormat::Depth24Stencil8 => (
            glow::DEPTH24_STENCIL8 as i32,
            glow::DEPTH_STENCIL,
            glow::UNSIGNED_INT_24_8,
        ),
        TextureFormat::Depth32Float => (
            glow::DEPTH_COMPONENT32F as i32,
            glow::DEPTH_COMPONENT,
            glow::FLOAT,
        ),
    }
}

fn compare_enum(func: CompareFunction) -> u32 {
    match func {
        CompareFunction::Never => glow::NEVER,
        CompareFunction::Less => glow::LESS,
        CompareFunction::Equal => glow::EQUAL,
        CompareFunction::Lequal => glow::LEQUAL,
        CompareFunction::Greater => glow::GREATER,
        CompareFunction::NotEqual => glow::NOTEQUAL,
        CompareFunction::Gequal => glow::GEQUAL,
        CompareFunction::Always => glow::ALWAYS,
    }
}

fn texture_target(kind: TextureKind) -> u32 {
    match kind {
        TextureKind::D2 => glow::TEXTURE_2D,
        TextureKind::Cube => glow::TEXTURE_CUBE_MAP,
    }
}

impl GlowBackend {
    /// Wraps a GL 3.3+ core context in its initial state.
    ///
    /// # Safety
    ///
    /// `gl` must be current on the calling thread for the whole lifetime of
    /// the backend, and no other code may change its state afterwards except
    /// through the returned backend.
    pub unsafe fn new(gl: Arc<glow::Context>) -> Result<Self> {
        let fullscreen_vao = unsafe { gl.create_vertex_array() }.map_err(RenderError::Backend)?;
        log::info!("OpenGL backend: {:?}", gl.version());
        Ok(Self {
            gl,
            shaders: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            geometries: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            fullscreen_vao,
            bound_framebuffer: None,
        })
    }

    fn specify_storage(&self, texture: &GlTexture) -> Result<()> {
        let gl = &self.gl;
        let desc = &texture.desc;
        let target = texture_target(desc.kind);
        let (internal, format, ty) = format_triple(desc.format);
        let faces: &[u32] = match desc.kind {
            TextureKind::D2 => &[glow::TEXTURE_2D],
            TextureKind::Cube => &[
                glow::TEXTURE_CUBE_MAP_POSITIVE_X,
                glow::TEXTURE_CUBE_MAP_NEGATIVE_X,
                glow::TEXTURE_CUBE_MAP_POSITIVE_Y,
                glow::TEXTURE_CUBE_MAP_NEGATIVE_Y,
                glow::TEXTURE_CUBE_MAP_POSITIVE_Z,
                glow::TEXTURE_CUBE_MAP_NEGATIVE_Z,
            ],
        };

        unsafe {
            gl.active_texture(glow::TEXTURE0 + SCRATCH_UNIT);
            gl.bind_texture(target, Some(texture.raw));
            for face in faces {
                gl.tex_image_2d(
                    *face,
                    0,
                    internal,
                    desc.width as i32,
                    desc.height as i32,
                    0,
                    format,
                    ty,
                    PixelUnpackData::Slice(None),
                );
            }
            gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.bind_texture(target, None);

            match gl.get_error() {
                glow::NO_ERROR => Ok(()),
                glow::OUT_OF_MEMORY => Err(RenderError::Backend(format!(
                    "GL_OUT_OF_MEMORY allocating '{}' ({}x{})",
                    desc.label, desc.width, desc.height
                ))),
                code => Err(RenderError::Backend(format!(
                    "GL error 0x{code:04X} allocating '{}'",
                    desc.label
                ))),
            }
        }
    }

    fn framebuffer_status(&self, raw: glow::Framebuffer) -> std::result::Result<(), String> {
        let gl = &self.gl;
        let status = unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(raw));
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, self.bound_framebuffer);
            status
        };
        match status {
            glow::FRAMEBUFFER_COMPLETE => Ok(()),
            glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => Err("FRAMEBUFFER_INCOMPLETE_ATTACHMENT".into()),
            glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => {
                Err("FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT".into())
            }
            glow::FRAMEBUFFER_UNSUPPORTED => Err("FRAMEBUFFER_UNSUPPORTED".into()),
            other => Err(format!("framebuffer status 0x{other:04X}")),
        }
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<glow::UniformLocation> {
        let entry = self.programs.get_mut(program)?;
        if let Some(location) = entry.locations.get(name) {
            return location.clone();
        }
        let location = unsafe { self.gl.get_uniform_location(entry.raw, name) };
        entry.locations.insert(name.to_owned(), location.clone());
        location
    }

    fn enable(&self, cap: u32, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(cap);
            } else {
                self.gl.disable(cap);
            }
        }
    }

    fn bind_attributes(&self, stride: u32, attributes: &[VertexAttribute], divisor: u32) {
        for attribute in attributes {
            unsafe {
                self.gl.enable_vertex_attrib_array(attribute.location);
                self.gl.vertex_attrib_pointer_f32(
                    attribute.location,
                    attribute.components as i32,
                    glow::FLOAT,
                    false,
                    stride as i32,
                    attribute.offset as i32,
                );
                self.gl.vertex_attrib_divisor(attribute.location, divisor);
            }
        }
    }
}

impl GpuBackend for GlowBackend {
    fn name(&self) -> &str {
        "opengl"
    }

    // ─── Shaders ──────────────────────────────────────────────────────────

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> std::result::Result<ShaderHandle, String> {
        let gl = &self.gl;
        unsafe {
            let shader = gl.create_shader(stage_enum(stage))?;
            gl.shader_source(shader, source);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                let log = gl.get_shader_info_log(shader);
                gl.delete_shader(shader);
                return Err(log);
            }
            Ok(self.shaders.insert(shader))
        }
    }

    fn link_program(&mut self, stages: &[ShaderHandle]) -> std::result::Result<ProgramHandle, String> {
        let raw_stages: SmallVec<[glow::Shader; 3]> = stages
            .iter()
            .map(|h| self.shaders.get(*h).copied().ok_or("deleted shader attached"))
            .collect::<std::result::Result<_, _>>()?;

        let gl = &self.gl;
        unsafe {
            let program = gl.create_program()?;
            for shader in &raw_stages {
                gl.attach_shader(program, *shader);
            }
            gl.link_program(program);
            for shader in &raw_stages {
                gl.detach_shader(program, *shader);
            }
            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(log);
            }
            Ok(self.programs.insert(GlProgram {
                raw: program,
                locations: FxHashMap::default(),
            }))
        }
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        if let Some(raw) = self.shaders.remove(shader) {
            unsafe { self.gl.delete_shader(raw) };
        }
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if let Some(entry) = self.programs.remove(program) {
            unsafe { self.gl.delete_program(entry.raw) };
        }
    }

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: &UniformValue) {
        let Some(location) = self.uniform_location(program, name) else {
            return;
        };
        let gl = &self.gl;
        let location = Some(&location);
        unsafe {
            match *value {
                UniformValue::Int(v) => gl.uniform_1_i32(location, v),
                UniformValue::Sampler(unit) => gl.uniform_1_i32(location, unit as i32),
                UniformValue::Float(v) => gl.uniform_1_f32(location, v),
                UniformValue::Vec2(v) => gl.uniform_2_f32(location, v.x, v.y),
                UniformValue::Vec3(v) => gl.uniform_3_f32(location, v.x, v.y, v.z),
                UniformValue::Vec4(v) => gl.uniform_4_f32(location, v.x, v.y, v.z, v.w),
                UniformValue::Mat4(m) => {
                    gl.uniform_matrix_4_f32_slice(location, false, &m.to_cols_array());
                }
                UniformValue::BindlessHandle(_) => {
                    log::warn!("Bindless uniform '{name}' ignored: not supported by this backend");
                }
            }
        }
    }

    // ─── Textures & framebuffers ──────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let raw = unsafe { self.gl.create_texture() }.map_err(RenderError::Backend)?;
        let texture = GlTexture {
            raw,
            desc: desc.clone(),
        };
        if let Err(err) = self.specify_storage(&texture) {
            unsafe { self.gl.delete_texture(raw) };
            return Err(err);
        }
        Ok(self.textures.insert(texture))
    }

    fn reallocate_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()> {
        let entry = self
            .textures
            .get_mut(texture)
            .ok_or(RenderError::InvalidHandle("texture"))?;
        entry.desc.width = width;
        entry.desc.height = height;
        let entry = &self.textures[texture];
        self.specify_storage(entry)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(texture) {
            unsafe { self.gl.delete_texture(entry.raw) };
        }
    }

    fn create_framebuffer(
        &mut self,
        colors: &[TextureHandle],
        depth: Option<TextureHandle>,
    ) -> Result<FramebufferHandle> {
        let color_raw: SmallVec<[glow::Texture; 4]> = colors
            .iter()
            .map(|h| {
                self.textures
                    .get(*h)
                    .map(|t| t.raw)
                    .ok_or(RenderError::InvalidHandle("colour attachment"))
            })
            .collect::<Result<_>>()?;
        let depth_raw = depth
            .map(|h| {
                self.textures
                    .get(h)
                    .map(|t| (t.raw, t.desc.format.has_stencil()))
                    .ok_or(RenderError::InvalidHandle("depth attachment"))
            })
            .transpose()?;

        let gl = &self.gl;
        let raw = unsafe { gl.create_framebuffer() }.map_err(RenderError::Backend)?;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(raw));
            let mut draw_buffers: SmallVec<[u32; 4]> = SmallVec::new();
            for (i, texture) in color_raw.iter().enumerate() {
                let attachment = glow::COLOR_ATTACHMENT0 + i as u32;
                gl.framebuffer_texture_2d(glow::FRAMEBUFFER, attachment, glow::TEXTURE_2D, Some(*texture), 0);
                draw_buffers.push(attachment);
            }
            if let Some((texture, stencil)) = depth_raw {
                let attachment = if stencil {
                    glow::DEPTH_STENCIL_ATTACHMENT
                } else {
                    glow::DEPTH_ATTACHMENT
                };
                gl.framebuffer_texture_2d(glow::FRAMEBUFFER, attachment, glow::TEXTURE_2D, Some(texture), 0);
            }
            if draw_buffers.is_empty() {
                gl.draw_buffer(glow::NONE);
                gl.read_buffer(glow::NONE);
            } else {
                gl.draw_buffers(&draw_buffers);
            }
            gl.bind_framebuffer(glow::FRAMEBUFFER, self.bound_framebuffer);
        }

        if let Err(reason) = self.framebuffer_status(raw) {
            unsafe { self.gl.delete_framebuffer(raw) };
            return Err(RenderError::Backend(reason));
        }
        Ok(self.framebuffers.insert(raw))
    }

    fn check_framebuffer(&mut self, framebuffer: FramebufferHandle) -> std::result::Result<(), String> {
        let raw = *self
            .framebuffers
            .get(framebuffer)
            .ok_or("invalid framebuffer handle")?;
        self.framebuffer_status(raw)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(raw) = self.framebuffers.remove(framebuffer) {
            if self.bound_framebuffer == Some(raw) {
                self.bound_framebuffer = None;
            }
            unsafe { self.gl.delete_framebuffer(raw) };
        }
    }

    fn bindless_handle(&mut self, _texture: TextureHandle) -> Option<u64> {
        None
    }

    fn set_texture_resident(&mut self, _handle: u64, _resident: bool) {}

    // ─── Raw state ────────────────────────────────────────────────────────

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        let raw = framebuffer.and_then(|h| self.framebuffers.get(h).copied());
        self.bound_framebuffer = raw;
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, raw) };
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        let entry = texture.and_then(|h| self.textures.get(h));
        let target = entry.map_or(glow::TEXTURE_2D, |t| texture_target(t.desc.kind));
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(target, entry.map(|t| t.raw));
        }
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        let raw = program.and_then(|h| self.programs.get(h)).map(|p| p.raw);
        unsafe { self.gl.use_program(raw) };
    }

    fn set_blend(&mut self, mode: BlendMode) {
        let factors = match mode {
            BlendMode::Disabled => None,
            BlendMode::Alpha => Some((glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA)),
            BlendMode::Additive => Some((glow::SRC_ALPHA, glow::ONE)),
            BlendMode::Premultiplied => Some((glow::ONE, glow::ONE_MINUS_SRC_ALPHA)),
        };
        self.enable(glow::BLEND, factors.is_some());
        if let Some((src, dst)) = factors {
            unsafe { self.gl.blend_func(src, dst) };
        }
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.enable(glow::DEPTH_TEST, enabled);
    }

    fn set_depth_write(&mut self, enabled: bool) {
        unsafe { self.gl.depth_mask(enabled) };
    }

    fn set_depth_func(&mut self, func: CompareFunction) {
        unsafe { self.gl.depth_func(compare_enum(func)) };
    }

    fn set_color_write(&mut self, enabled: bool) {
        unsafe { self.gl.color_mask(enabled, enabled, enabled, enabled) };
    }

    fn set_cull(&mut self, mode: CullMode) {
        self.enable(glow::CULL_FACE, mode != CullMode::None);
        match mode {
            CullMode::None => {}
            CullMode::Back => unsafe { self.gl.cull_face(glow::BACK) },
            CullMode::Front => unsafe { self.gl.cull_face(glow::FRONT) },
        }
    }

    fn set_stencil(&mut self, mode: StencilMode) {
        let gl = &self.gl;
        self.enable(glow::STENCIL_TEST, mode != StencilMode::Disabled);
        unsafe {
            match mode {
                StencilMode::Disabled => gl.stencil_mask(0xFF),
                StencilMode::Replace { reference } => {
                    gl.stencil_func(glow::ALWAYS, i32::from(reference), 0xFF);
                    gl.stencil_op(glow::KEEP, glow::KEEP, glow::REPLACE);
                    gl.stencil_mask(0xFF);
                }
                StencilMode::Equal { reference } => {
                    gl.stencil_func(glow::EQUAL, i32::from(reference), 0xFF);
                    gl.stencil_op(glow::KEEP, glow::KEEP, glow::KEEP);
                    gl.stencil_mask(0x00);
                }
                StencilMode::NotEqual { reference } => {
                    gl.stencil_func(glow::NOTEQUAL, i32::from(reference), 0xFF);
                    gl.stencil_op(glow::KEEP, glow::KEEP, glow::KEEP);
                    gl.stencil_mask(0x00);
                }
            }
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        unsafe {
            self.gl.viewport(
                viewport.x,
                viewport.y,
                viewport.width as i32,
                viewport.height as i32,
            );
        }
    }

    fn clear(&mut self, flags: ClearFlags, color: [f32; 4], depth: f32, stencil: u8) {
        let gl = &self.gl;
        let mut mask = 0;
        unsafe {
            if flags.contains(ClearFlags::COLOR) {
                gl.clear_color(color[0], color[1], color[2], color[3]);
                mask |= glow::COLOR_BUFFER_BIT;
            }
            if flags.contains(ClearFlags::DEPTH) {
                gl.clear_depth_f32(depth);
                mask |= glow::DEPTH_BUFFER_BIT;
            }
            if flags.contains(ClearFlags::STENCIL) {
                gl.clear_stencil(i32::from(stencil));
                mask |= glow::STENCIL_BUFFER_BIT;
            }
            gl.clear(mask);
        }
    }

    // ─── Geometry & submission ────────────────────────────────────────────

    fn create_geometry(&mut self, data: &GeometryData) -> Result<GeometryHandle> {
        let gl = &self.gl;
        unsafe {
            let vao = gl.create_vertex_array().map_err(RenderError::Backend)?;
            let vertices = gl.create_buffer().map_err(RenderError::Backend)?;

            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vertices));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(&data.vertices),
                glow::STATIC_DRAW,
            );
            self.bind_attributes(data.stride, &data.attributes, 0);

            let indices = match &data.indices {
                Some(indices) => {
                    let buffer = gl.create_buffer().map_err(RenderError::Backend)?;
                    gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(buffer));
                    gl.buffer_data_u8_slice(
                        glow::ELEMENT_ARRAY_BUFFER,
                        bytemuck::cast_slice(indices),
                        glow::STATIC_DRAW,
                    );
                    Some(buffer)
                }
                None => None,
            };
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);

            Ok(self.geometries.insert(GlGeometry {
                vao,
                vertices,
                indices,
                instances: None,
                elements: data.element_count() as i32,
            }))
        }
    }

    fn upload_instances(
        &mut self,
        geometry: GeometryHandle,
        bytes: &[u8],
        stride: u32,
        layout: &[VertexAttribute],
    ) -> Result<()> {
        let entry = self
            .geometries
            .get_mut(geometry)
            .ok_or(RenderError::InvalidHandle("geometry"))?;
        let gl = &self.gl;
        unsafe {
            let buffer = match entry.instances {
                Some(buffer) => buffer,
                None => {
                    let buffer = gl.create_buffer().map_err(RenderError::Backend)?;
                    entry.instances = Some(buffer);
                    buffer
                }
            };
            gl.bind_vertex_array(Some(entry.vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STREAM_DRAW);
        }
        self.bind_attributes(stride, layout, 1);
        unsafe {
            self.gl.bind_vertex_array(None);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        Ok(())
    }

    fn delete_geometry(&mut self, geometry: GeometryHandle) {
        let Some(entry) = self.geometries.remove(geometry) else {
            return;
        };
        unsafe {
            self.gl.delete_vertex_array(entry.vao);
            self.gl.delete_buffer(entry.vertices);
            for buffer in entry.indices.into_iter().chain(entry.instances) {
                self.gl.delete_buffer(buffer);
            }
        }
    }

    fn draw(&mut self, geometry: GeometryHandle, instances: u32) {
        let Some(entry) = self.geometries.get(geometry) else {
            log::warn!("Draw of a deleted geometry skipped");
            return;
        };
        let gl = &self.gl;
        unsafe {
            gl.bind_vertex_array(Some(entry.vao));
            if entry.indices.is_some() {
                gl.draw_elements_instanced(
                    glow::TRIANGLES,
                    entry.elements,
                    glow::UNSIGNED_INT,
                    0,
                    instances as i32,
                );
            } else {
                gl.draw_arrays_instanced(glow::TRIANGLES, 0, entry.elements, instances as i32);
            }
            gl.bind_vertex_array(None);
        }
    }

    fn draw_fullscreen(&mut self) {
        unsafe {
            self.gl.bind_vertex_array(Some(self.fullscreen_vao));
            self.gl.draw_arrays(glow::TRIANGLES, 0, 3);
            self.gl.bind_vertex_array(None);
        }
    }

    // ─── Synchronization ──────────────────────────────────────────────────

    fn insert_fence(&mut self) -> Result<FenceHandle> {
        let fence = unsafe { self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
            .map_err(RenderError::Backend)?;
        Ok(self.fences.insert(fence))
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> FenceStatus {
        let Some(raw) = self.fences.get(fence).copied() else {
            return FenceStatus::Signaled;
        };
        let nanos = i32::try_from(timeout.as_nanos()).unwrap_or(i32::MAX);
        let status = unsafe {
            self.gl
                .client_wait_sync(raw, glow::SYNC_FLUSH_COMMANDS_BIT, nanos)
        };
        match status {
            glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => FenceStatus::Signaled,
            _ => FenceStatus::Pending,
        }
    }

    fn delete_fence(&mut self, fence: FenceHandle) {
        if let Some(raw) = self.fences.remove(fence) {
            unsafe { self.gl.delete_sync(raw) };
        }
    }

    fn flush(&mut self) {
        unsafe { self.gl.flush() };
    }
}

impl Drop for GlowBackend {
    fn drop(&mut self) {
        let gl = &self.gl;
        unsafe {
            for (_, fence) in self.fences.drain() {
                gl.delete_sync(fence);
            }
            for (_, framebuffer) in self.framebuffers.drain() {
                gl.delete_framebuffer(framebuffer);
            }
            for (_, texture) in self.textures.drain() {
                gl.delete_texture(texture.raw);
            }
            for (_, program) in self.programs.drain() {
                gl.delete_program(program.raw);
            }
            for (_, shader) in self.shaders.drain() {
                gl.delete_shader(shader);
            }
            gl.delete_vertex_array(self.fullscreen_vao);
        }
        let geometries: Vec<_> = self.geometries.keys().collect();
        for geometry in geometries {
            self.delete_geometry(geometry);
        }
    }
}
