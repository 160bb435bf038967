//! G-Buffer Pass
//!
//! Writes the surface attributes of visible opaque meshes into three colour
//! attachments, depth-testing against the pre-pass depth buffer:
//!
//! | Attachment | Format        | Contents                                  |
//! |------------|---------------|-------------------------------------------|
//! | 0          | `Rgba8`       | albedo, light mask                        |
//! | 1          | `Rgba16Float` | world normal (packed `n * 0.5 + 0.5`)     |
//! | 2          | `Rgba8`       | metallic, roughness, emissive, model id   |
//!
//! # State Handoff
//!
//! Leaves depth writes off and the depth function at `Lequal`.

use crate::core::{
    AttachmentDesc, ClearFlags, CompareFunction, GpuContext, RasterState, RenderTarget,
    TextureFormat, TextureHandle,
};
use crate::errors::{RenderError, Result};
use crate::shader::{RenderPassKind, ShaderDefines};

use super::mesh::{DrawItem, Submission, collect, sort_front_to_back, submit};
use super::pass::{DrawContext, RenderPass, UpdateContext};

/// The G-buffer textures consumed by the lighting pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferTextures {
    pub albedo: TextureHandle,
    pub normal: TextureHandle,
    pub material: TextureHandle,
}

pub struct GBufferPass {
    target: RenderTarget,
    textures: GBufferTextures,
    items: Vec<DrawItem>,
    extra: ShaderDefines,
}

impl GBufferPass {
    pub fn new(gpu: &mut GpuContext, size: (u32, u32), depth: TextureHandle) -> Result<Self> {
        let target = RenderTarget::create(
            gpu,
            "gbuffer",
            size,
            &[
                AttachmentDesc::New(TextureFormat::Rgba8),
                AttachmentDesc::New(TextureFormat::Rgba16Float),
                AttachmentDesc::New(TextureFormat::Rgba8),
            ],
            Some(AttachmentDesc::Shared(depth)),
        )?;
        let attachment = |i: usize| target.color(i).ok_or(RenderError::InvalidHandle("g-buffer"));
        let textures = GBufferTextures {
            albedo: attachment(0)?,
            normal: attachment(1)?,
            material: attachment(2)?,
        };
        Ok(Self {
            target,
            textures,
            items: Vec::new(),
            extra: ShaderDefines::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn textures(&self) -> GBufferTextures {
        self.textures
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "gbuffer"
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) {
        self.items = collect(
            ctx.scene,
            ctx.assets,
            ctx.camera,
            Some(ctx.camera.frustum()),
            |_, material| !material.blending.is_transparent(),
        );
        sort_front_to_back(&mut self.items);
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        self.target.bind(ctx.gpu);
        ctx.gpu.apply_raster(&RasterState {
            depth_write: false,
            depth_func: CompareFunction::Lequal,
            ..RasterState::OPAQUE
        });
        ctx.gpu.clear(ClearFlags::COLOR, [0.0; 4], 1.0, 0);

        submit(
            ctx,
            &self.items,
            &Submission {
                pass: RenderPassKind::DeferredGBuffer,
                extra: &self.extra,
                first_unit: 0,
                blend: false,
            },
            &mut |_| {},
        )?;
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
