//! Forward Colour Pass
//!
//! Shades meshes directly into the HDR colour target. One type covers both
//! halves of the forward work:
//!
//! - [`ColorPass::opaque`]: owns the HDR target, clears it and draws opaque
//!   and alpha-tested meshes against the pre-pass depth (`Lequal`, no depth
//!   writes).
//! - [`ColorPass::transparent`]: borrows an existing HDR target and draws
//!   blended meshes back to front, each with its material's blend mode.
//!
//! When shadows are enabled the shadow map occupies texture unit 0 and
//! material textures start at unit 1.
//!
//! # State Handoff
//!
//! Depth writes stay off. After the transparent pass the blend mode of the
//! last drawn material remains set.

use glam::Mat4;

use crate::core::{
    AttachmentDesc, ClearFlags, CompareFunction, GpuContext, RasterState, RenderTarget,
    TextureBinding, TextureFormat, TextureHandle,
};
use crate::errors::{RenderError, Result};
use crate::settings::RenderSettings;
use crate::shader::{RenderPassKind, ShaderDefines};

use super::mesh::{
    DrawItem, Submission, collect, sort_back_to_front, sort_front_to_back, submit,
};
use super::pass::{DrawContext, RenderPass, UpdateContext};
use super::shadow::light_space_matrix;

/// Which meshes a [`ColorPass`] draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSelection {
    Opaque,
    Transparent,
}

pub struct ColorPass {
    selection: ColorSelection,
    target: RenderTarget,
    hdr: TextureHandle,
    shadow_map: Option<TextureHandle>,
    light_space: Mat4,
    items: Vec<DrawItem>,
    extra: ShaderDefines,
}

impl ColorPass {
    /// Opaque half: allocates the HDR colour target.
    pub fn opaque(
        gpu: &mut GpuContext,
        size: (u32, u32),
        depth: TextureHandle,
        shadow_map: Option<TextureHandle>,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let target = RenderTarget::create(
            gpu,
            "forward_opaque",
            size,
            &[AttachmentDesc::New(TextureFormat::Rgba16Float)],
            Some(AttachmentDesc::Shared(depth)),
        )?;
        let hdr = target
            .color(0)
            .ok_or(RenderError::InvalidHandle("forward colour"))?;
        Ok(Self::from_target(
            ColorSelection::Opaque,
            target,
            hdr,
            shadow_map,
            settings,
        ))
    }

    /// Transparent half: draws into `hdr`, which another pass owns.
    pub fn transparent(
        gpu: &mut GpuContext,
        size: (u32, u32),
        hdr: TextureHandle,
        depth: TextureHandle,
        shadow_map: Option<TextureHandle>,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let target = RenderTarget::create(
            gpu,
            "forward_transparent",
            size,
            &[AttachmentDesc::Shared(hdr)],
            Some(AttachmentDesc::Shared(depth)),
        )?;
        Ok(Self::from_target(
            ColorSelection::Transparent,
            target,
            hdr,
            shadow_map,
            settings,
        ))
    }

    fn from_target(
        selection: ColorSelection,
        target: RenderTarget,
        hdr: TextureHandle,
        shadow_map: Option<TextureHandle>,
        settings: &RenderSettings,
    ) -> Self {
        let mut extra = ShaderDefines::new();
        extra.set("MAX_POINT_LIGHTS", settings.max_point_lights.max(1));
        if shadow_map.is_some() {
            extra.set_flag("ENABLE_SHADOWS");
        }
        Self {
            selection,
            target,
            hdr,
            shadow_map,
            light_space: Mat4::IDENTITY,
            items: Vec::new(),
            extra,
        }
    }

    #[inline]
    #[must_use]
    pub fn selection(&self) -> ColorSelection {
        self.selection
    }

    /// The HDR colour texture drawn into.
    #[inline]
    #[must_use]
    pub fn hdr(&self) -> TextureHandle {
        self.hdr
    }
}

impl RenderPass for ColorPass {
    fn name(&self) -> &str {
        match self.selection {
            ColorSelection::Opaque => "forward_opaque",
            ColorSelection::Transparent => "forward_transparent",
        }
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) {
        let transparent = self.selection == ColorSelection::Transparent;
        self.items = collect(
            ctx.scene,
            ctx.assets,
            ctx.camera,
            Some(ctx.camera.frustum()),
            |_, material| material.blending.is_transparent() == transparent,
        );
        if transparent {
            sort_back_to_front(&mut self.items);
        } else {
            sort_front_to_back(&mut self.items);
        }
        self.light_space = ctx
            .scene
            .sun()
            .map_or(Mat4::IDENTITY, |sun| light_space_matrix(sun.direction, ctx.camera));
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        self.target.bind(ctx.gpu);
        ctx.gpu.apply_raster(&RasterState {
            depth_write: false,
            depth_func: CompareFunction::Lequal,
            ..RasterState::OPAQUE
        });
        if self.selection == ColorSelection::Opaque {
            ctx.gpu
                .clear(ClearFlags::COLOR, ctx.settings.clear_color, 1.0, 0);
        }

        let shadow_map = self.shadow_map;
        let light_space = self.light_space;
        submit(
            ctx,
            &self.items,
            &Submission {
                pass: RenderPassKind::Forward,
                extra: &self.extra,
                first_unit: u32::from(shadow_map.is_some()),
                blend: self.selection == ColorSelection::Transparent,
            },
            &mut |gpu| {
                if let Some(texture) = shadow_map {
                    TextureBinding::Extension { texture }.apply(gpu, "u_shadow_map", 0);
                    gpu.set_uniform("u_light_space", light_space);
                }
            },
        )?;
        Ok(())
    }

    fn target(&self) -> Option<&RenderTarget> {
        Some(&self.target)
    }

    fn output(&self) -> Option<TextureHandle> {
        Some(self.hdr)
    }

    fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<()> {
        self.target.resize(gpu, width, height)
    }

    fn destroy(self: Box<Self>, gpu: &mut GpuContext) {
        self.target.destroy(gpu);
    }
}
