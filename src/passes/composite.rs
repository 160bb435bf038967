//! Composite Pass
//!
//! Final pass of every pipeline: adds the blurred bloom image (when enabled),
//! applies exposure and ACES tone mapping, gamma-encodes, and writes either
//! to the default framebuffer or to an `Rgba8` target it owns
//! ([`RenderSettings::offscreen_output`]).
//!
//! # State Handoff
//!
//! Fullscreen raster state with the output framebuffer bound.

use crate::core::{
    AttachmentDesc, GpuContext, RasterState, RenderTarget, TextureBinding, TextureFormat,
    TextureHandle, Viewport,
};
use crate::errors::Result;
use crate::settings::RenderSettings;
use crate::shader::{ProgramTemplate, ShaderDefines};

use super::pass::{DrawContext, RenderPass};

pub struct CompositePass {
    scene: TextureHandle,
    bloom: Option<TextureHandle>,
    offscreen: Option<RenderTarget>,
    size: (u32, u32),
    defines: ShaderDefines,
}

impl CompositePass {
    pub fn new(
        gpu: &mut GpuContext,
        size: (u32, u32),
        scene: TextureHandle,
        bloom: Option<TextureHandle>,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let offscreen = if settings.offscreen_output {
            Some(RenderTarget::create(
                gpu,
                "composite",
                size,
                &[AttachmentDesc::New(TextureFormat::Rgba8)],
                None,
            )?)
        } else {
            None
        };

        let mut defines = ShaderDefines::new();
        if bloom.is_some() {
            defines.set_flag("ENABLE_BLOOM");
        }

        Ok(Self {
            scene,
            bloom,
            offscreen,
            size,
            defines,
        })
    }

    /// `true` when the result goes to the default framebuffer.
    #[inline]
    #[must_use]
    pub fn presents_to_screen(&self) -> bool {
        self.offscreen.is_none()
    }
}

impl RenderPass for CompositePass {
    fn name(&self) -> &str {
        "composite"
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        match &self.offscreen {
            Some(target) => target.bind(ctx.gpu),
            None => {
                ctx.gpu.bind_framebuffer(None);
                ctx.gpu
                    .set_viewport(Viewport::from_size(self.size.0, self.size.1));
            }
        }
        ctx.gpu.apply_raster(&RasterState::FULLSCREEN);

        let program = ctx
            .compiler
            .get_or_compile_utility(ctx.gpu, ProgramTemplate::COMPOSITE, &self.defines)?
            .handle();
        ctx.gpu.use_program(Some(program));
        ctx.apply_uniforms();

        TextureBinding::Extension {
            texture: self.scene,
        }
        .apply(ctx.gpu, "u_scene", 0);
        if let Some(bloom) = self.bloom {
            TextureBinding::Extension { texture: bloom }.apply(ctx.gpu, "u_bloom", 1);
            ctx.gpu
                .set_uniform("u_bloom_intensity", ctx.settings.bloom_intensity);
        }
        ctx.gpu.set_uniform("u_exposure", ctx.settings.exposure);

        ctx.gpu.draw_fullscreen();
        Ok(())
    }

    fn target(&self) -> Option<&RenderTarget> {
        self.offscreen.as_ref()
    }

    fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<()> {
        if let Some(target) = &mut self.offscreen {
            target.resize(gpu, width, height)?;
        }
        self.size = (width, height);
        Ok(())
    }

    fn destroy(self: Box<Self>, gpu: &mut GpuContext) {
        if let Some(target) = self.offscreen {
            target.destroy(gpu);
        }
    }
}
