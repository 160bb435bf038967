//! Deferred Lighting Pass
//!
//! Shades every covered pixel of the G-buffer in one fullscreen draw and
//! writes the lit HDR colour into a target it owns. Pixels at the far plane
//! are discarded and keep the clear colour; the skybox fills them later.
//!
//! The depth texture is sampled here, so it is not attached to
//! this pass's framebuffer.
//!
//! # State Handoff
//!
//! Leaves depth testing off (fullscreen raster state) with the G-buffer
//! textures bound to units 0–3 and the shadow map on unit 4.

use glam::Mat4;

use crate::core::{
    AttachmentDesc, ClearFlags, GpuContext, RasterState, RenderTarget, TextureBinding,
    TextureFormat, TextureHandle,
};
use crate::errors::{RenderError, Result};
use crate::settings::RenderSettings;
use crate::shader::{ProgramTemplate, ShaderDefines};

use super::gbuffer::GBufferTextures;
use super::pass::{DrawContext, RenderPass, UpdateContext};
use super::shadow::light_space_matrix;

pub struct DeferredLightingPass {
    target: RenderTarget,
    hdr: TextureHandle,
    gbuffer: GBufferTextures,
    depth: TextureHandle,
    shadow_map: Option<TextureHandle>,
    defines: ShaderDefines,
    inverse_view_projection: Mat4,
    light_space: Mat4,
}

impl DeferredLightingPass {
    pub fn new(
        gpu: &mut GpuContext,
        size: (u32, u32),
        gbuffer: GBufferTextures,
        depth: TextureHandle,
        shadow_map: Option<TextureHandle>,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let target = RenderTarget::create(
            gpu,
            "lighting",
            size,
            &[AttachmentDesc::New(TextureFormat::Rgba16Float)],
            None,
        )?;
        let hdr = target
            .color(0)
            .ok_or(RenderError::InvalidHandle("lighting output"))?;

        let mut defines = ShaderDefines::new();
        defines.set("MAX_POINT_LIGHTS", settings.max_point_lights.max(1));
        if shadow_map.is_some() {
            defines.set_flag("ENABLE_SHADOWS");
        }

        Ok(Self {
            target,
            hdr,
            gbuffer,
            depth,
            shadow_map,
            defines,
            inverse_view_projection: Mat4::IDENTITY,
            light_space: Mat4::IDENTITY,
        })
    }

    /// The lit HDR colour texture.
    #[inline]
    #[must_use]
    pub fn hdr(&self) -> TextureHandle {
        self.hdr
    }
}

impl RenderPass for DeferredLightingPass {
    fn name(&self) -> &str {
        "deferred_lighting"
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) {
        self.inverse_view_projection = ctx.camera.view_projection_matrix().inverse();
        self.light_space = ctx
            .scene
            .sun()
            .map_or(Mat4::IDENTITY, |sun| light_space_matrix(sun.direction, ctx.camera));
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        self.target.bind(ctx.gpu);
        ctx.gpu.apply_raster(&RasterState::FULLSCREEN);
        ctx.gpu
            .clear(ClearFlags::COLOR, ctx.settings.clear_color, 1.0, 0);

        let program = ctx
            .compiler
            .get_or_compile_utility(ctx.gpu, ProgramTemplate::DEFERRED_LIGHTING, &self.defines)?
            .handle();
        ctx.gpu.use_program(Some(program));
        ctx.apply_uniforms();

        let inputs = [
            ("u_gbuffer_albedo", self.gbuffer.albedo),
            ("u_gbuffer_normal", self.gbuffer.normal),
            ("u_gbuffer_material", self.gbuffer.material),
            ("u_depth", self.depth),
        ];
        for (unit, (name, texture)) in inputs.into_iter().enumerate() {
            TextureBinding::Extension { texture }.apply(ctx.gpu, name, unit as u32);
        }
        if let Some(shadow_map) = self.shadow_map {
            TextureBinding::Extension {
                texture: shadow_map,
            }
            .apply(ctx.gpu, "u_shadow_map", 4);
            ctx.gpu.set_uniform("u_light_space", self.light_space);
        }
        ctx.gpu
            .set_uniform("u_inverse_view_projection", self.inverse_view_projection);

        ctx.gpu.draw_fullscreen();
        Ok(())
    }

    fn target(&self) -> Option<&RenderTarget> {
        Some(&self.target)
    }

    fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<()> {
        self.target.resize(gpu, width, height)
    }

    fn destroy(self: Box<Self>, gpu: &mut GpuContext) {
        self.target.destroy(gpu);
    }
}
