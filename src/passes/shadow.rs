//! Directional Shadow Pass
//!
//! Renders shadow casters from the sun's point of view into a depth-only
//! map of `shadow_map_size²` texels. The map size is independent of the
//! output resolution, so this pass ignores resize notifications.
//!
//! # Pipeline Position
//!
//! ```text
//! DirectionalShadowPass → DepthPrePass → … → (GBuffer → Lighting | opaque ColorPass)
//! ```
//!
//! # State Handoff
//!
//! Leaves colour writes disabled and the shadow map framebuffer bound. Every
//! later pass applies its full raster state before drawing.

use glam::{Mat4, Vec3};

use crate::core::{
    AttachmentDesc, ClearFlags, GpuContext, RasterState, RenderTarget, TextureFormat,
    TextureHandle,
};
use crate::errors::{RenderError, Result};
use crate::scene::Camera;
use crate::settings::RenderSettings;
use crate::shader::{RenderPassKind, ShaderDefines};

use super::mesh::{DrawItem, Submission, collect, submit};
use super::pass::{DrawContext, RenderPass, UpdateContext};

/// World-space radius covered by the shadow map around the view.
const SHADOW_RADIUS: f32 = 25.0;

/// View-projection of the sun's orthographic shadow camera.
///
/// The box is centred `SHADOW_RADIUS` in front of the camera. Deterministic
/// in its inputs, so every pass reading the shadow map derives the same
/// matrix the shadow pass rendered with.
#[must_use]
pub fn light_space_matrix(direction: Vec3, camera: &Camera) -> Mat4 {
    let view = camera.view_matrix();
    let forward = -Vec3::new(view.x_axis.z, view.y_axis.z, view.z_axis.z);
    let radius = SHADOW_RADIUS.min((camera.far - camera.near) * 0.5);
    let center = camera.position() + forward * radius;

    let direction = direction.normalize_or(Vec3::NEG_Y);
    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let eye = center - direction * radius * 2.0;
    let light_view = Mat4::look_at_rh(eye, center, up);
    let light_projection =
        Mat4::orthographic_rh_gl(-radius, radius, -radius, radius, 0.0, radius * 4.0);
    light_projection * light_view
}

pub struct DirectionalShadowPass {
    target: RenderTarget,
    map: TextureHandle,
    items: Vec<DrawItem>,
    light_space: Mat4,
    active: bool,
    extra: ShaderDefines,
}

impl DirectionalShadowPass {
    pub fn new(gpu: &mut GpuContext, settings: &RenderSettings) -> Result<Self> {
        let size = settings.shadow_map_size.max(1);
        let target = RenderTarget::create(
            gpu,
            "shadow_map",
            (size, size),
            &[],
            Some(AttachmentDesc::New(TextureFormat::Depth32Float)),
        )?;
        let map = target
            .depth()
            .ok_or(RenderError::InvalidHandle("shadow map"))?;
        Ok(Self {
            target,
            map,
            items: Vec::new(),
            light_space: Mat4::IDENTITY,
            active: false,
            extra: ShaderDefines::new(),
        })
    }

    /// The depth texture sampled by lit passes.
    #[inline]
    #[must_use]
    pub fn shadow_map(&self) -> TextureHandle {
        self.map
    }

    #[inline]
    #[must_use]
    pub fn light_space(&self) -> Mat4 {
        self.light_space
    }
}

impl RenderPass for DirectionalShadowPass {
    fn name(&self) -> &str {
        "shadow"
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) {
        self.items.clear();
        self.active = false;
        let Some(sun) = ctx.scene.sun() else {
            return;
        };
        if !sun.casts_shadow {
            return;
        }
        self.active = true;
        self.light_space = light_space_matrix(sun.direction, ctx.camera);
        self.items = collect(ctx.scene, ctx.assets, ctx.camera, None, |mesh, material| {
            mesh.casts_shadow && !material.blending.is_transparent()
        });
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        self.target.bind(ctx.gpu);
        ctx.gpu.apply_raster(&RasterState {
            color_write: false,
            ..RasterState::OPAQUE
        });
        ctx.gpu.clear(ClearFlags::DEPTH, [0.0; 4], 1.0, 0);
        if !self.active {
            return Ok(());
        }

        let light_space = self.light_space;
        submit(
            ctx,
            &self.items,
            &Submission {
                pass: RenderPassKind::DirectionalShadow,
                extra: &self.extra,
                first_unit: 0,
                blend: false,
            },
            &mut |gpu| gpu.set_uniform("u_light_space", light_space),
        )?;
        Ok(())
    }

    fn target(&self) -> Option<&RenderTarget> {
        Some(&self.target)
    }

    fn output(&self) -> Option<TextureHandle> {
        Some(self.map)
    }

    fn destroy(self: Box<Self>, gpu: &mut GpuContext) {
        self.target.destroy(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_space_is_deterministic() {
        let mut camera = Camera::new_perspective(60.0, 1.5, 0.1, 200.0);
        camera.look_at(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO, Vec3::Y);
        let direction = Vec3::new(-0.3, -1.0, -0.2);

        assert_eq!(
            light_space_matrix(direction, &camera),
            light_space_matrix(direction, &camera)
        );
    }

    #[test]
    fn view_center_lands_inside_the_map() {
        let mut camera = Camera::new_perspective(60.0, 1.0, 0.1, 200.0);
        camera.look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let m = light_space_matrix(Vec3::NEG_Y, &camera);

        let clip = m * Vec3::new(0.0, 0.0, -SHADOW_RADIUS).extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.abs().max_element() <= 1.0 + 1e-4);
    }
}
