//! Depth Pre-Pass
//!
//! Fills the shared scene depth buffer with every visible opaque mesh and
//! marks covered pixels with stencil value [`COVERED_STENCIL`]. Owns the
//! `Depth24Stencil8` texture the rest of the frame depth-tests against.
//!
//! # State Handoff
//!
//! Leaves the depth buffer populated and the depth function at `Lequal`,
//! so later passes re-drawing the same surfaces pass the depth test.

use crate::core::{
    AttachmentDesc, ClearFlags, CompareFunction, GpuContext, RasterState, RenderTarget,
    StencilMode, TextureFormat, TextureHandle,
};
use crate::errors::{RenderError, Result};
use crate::shader::{RenderPassKind, ShaderDefines};

use super::mesh::{DrawItem, Submission, collect, sort_front_to_back, submit};
use super::pass::{DrawContext, RenderPass, UpdateContext};

/// Stencil value written wherever opaque geometry landed.
pub const COVERED_STENCIL: u8 = 1;

pub struct DepthPrePass {
    target: RenderTarget,
    depth: TextureHandle,
    items: Vec<DrawItem>,
    extra: ShaderDefines,
}

impl DepthPrePass {
    pub fn new(gpu: &mut GpuContext, size: (u32, u32)) -> Result<Self> {
        let target = RenderTarget::create(
            gpu,
            "scene_depth",
            size,
            &[],
            Some(AttachmentDesc::New(TextureFormat::Depth24Stencil8)),
        )?;
        let depth = target
            .depth()
            .ok_or(RenderError::InvalidHandle("scene depth"))?;
        Ok(Self {
            target,
            depth,
            items: Vec::new(),
            extra: ShaderDefines::new(),
        })
    }

    /// The shared depth-stencil texture.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> TextureHandle {
        self.depth
    }
}

impl RenderPass for DepthPrePass {
    fn name(&self) -> &str {
        "depth_prepass"
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
            color_write: false,
            stencil: StencilMode::Replace {
                reference: COVERED_STENCIL,
            },
            ..RasterState::OPAQUE
        });
        ctx.gpu
            .clear(ClearFlags::DEPTH | ClearFlags::STENCIL, [0.0; 4], 1.0, 0);

        submit(
            ctx,
            &self.items,
            &Submission {
                pass: RenderPassKind::DepthPrepass,
                extra: &self.extra,
                first_unit: 0,
                blend: false,
            },
            &mut |_| {},
        )?;

        ctx.gpu.set_depth_func(CompareFunction::Lequal);
        Ok(())
    }

    fn target(&self) -> Option<&RenderTarget> {
        Some(&self.target)
    }

    fn output(&self) -> Option<TextureHandle> {
        Some(self.depth)
    }

    fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<()> {
        self.target.resize(gpu, width, height)
    }

    fn destroy(self: Box<Self>, gpu: &mut GpuContext) {
        self.target.destroy(gpu);
    }
}
