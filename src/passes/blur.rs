//! Separable Gaussian Blur Pass
//!
//! Blurs a source texture with a 9-tap kernel, alternating a horizontal and a
//! vertical step between two owned targets. One iteration is one horizontal
//! plus one vertical step; the result always ends in the second target.
//!
//! ```text
//! source ─H→ ping ─V→ pong ─H→ ping ─V→ pong …
//! ```
//!
//! The output is an ordinary texture, so blur passes chain: a second
//! `BlurPass` built over [`BlurPass::output`] blurs the first one's result.
//!
//! # State Handoff
//!
//! Fullscreen raster state (no depth, no blending) with the `pong` target
//! bound.

use glam::Vec2;

use crate::core::{
    AttachmentDesc, GpuContext, RasterState, RenderTarget, TextureBinding, TextureFormat,
    TextureHandle,
};
use crate::errors::{RenderError, Result};
use crate::shader::{ProgramTemplate, ShaderDefines};

use super::pass::{DrawContext, RenderPass};

pub struct BlurPass {
    source: TextureHandle,
    ping: RenderTarget,
    pong: RenderTarget,
    iterations: u32,
    defines: ShaderDefines,
}

impl BlurPass {
    pub fn new(
        gpu: &mut GpuContext,
        size: (u32, u32),
        source: TextureHandle,
        iterations: u32,
    ) -> Result<Self> {
        let ping = RenderTarget::create(
            gpu,
            "blur_ping",
            size,
            &[AttachmentDesc::New(TextureFormat::Rgba16Float)],
            None,
        )?;
        let pong = match RenderTarget::create(
            gpu,
            "blur_pong",
            size,
            &[AttachmentDesc::New(TextureFormat::Rgba16Float)],
            None,
        ) {
            Ok(pong) => pong,
            Err(err) => {
                ping.destroy(gpu);
                return Err(err);
            }
        };
        Ok(Self {
            source,
            ping,
            pong,
            iterations: iterations.max(1),
            defines: ShaderDefines::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Both intermediate targets, ping first.
    #[must_use]
    pub fn targets(&self) -> [&RenderTarget; 2] {
        [&self.ping, &self.pong]
    }

    fn step(
        gpu: &mut GpuContext,
        target: &RenderTarget,
        input: TextureHandle,
        direction: Vec2,
    ) {
        target.bind(gpu);
        TextureBinding::Extension { texture: input }.apply(gpu, "u_source", 0);
        gpu.set_uniform("u_direction", direction);
        gpu.draw_fullscreen();
    }
}

impl RenderPass for BlurPass {
    fn name(&self) -> &str {
        "blur"
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        ctx.gpu.apply_raster(&RasterState::FULLSCREEN);
        let program = ctx
            .compiler
            .get_or_compile_utility(ctx.gpu, ProgramTemplate::BLUR, &self.defines)?
            .handle();
        ctx.gpu.use_program(Some(program));
        ctx.apply_uniforms();

        let ping = self
            .ping
            .color(0)
            .ok_or(RenderError::InvalidHandle("blur ping"))?;
        let pong = self
            .pong
            .color(0)
            .ok_or(RenderError::InvalidHandle("blur pong"))?;

        let mut input = self.source;
        for _ in 0..self.iterations {
            Self::step(ctx.gpu, &self.ping, input, Vec2::X);
            Self::step(ctx.gpu, &self.pong, ping, Vec2::Y);
            input = pong;
        }
        Ok(())
    }

    fn target(&self) -> Option<&RenderTarget> {
        Some(&self.pong)
    }

    fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<()> {
        self.ping.resize(gpu, width, height)?;
        self.pong.resize(gpu, width, height)
    }

    fn destroy(self: Box<Self>, gpu: &mut GpuContext) {
        let this = *self;
        this.ping.destroy(gpu);
        this.pong.destroy(gpu);
    }
}
