//! Skybox Pass
//!
//! Draws the scene's environment cubemap behind everything else. The vertex
//! stage pins the cube to the far plane, and the stencil test skips every
//! pixel the depth pre-pass marked as covered.
//!
//! # Pipeline Position
//!
//! ```text
//! (opaque ColorPass | DeferredLightingPass) → SkyboxPass → transparent ColorPass
//! ```
//!
//! # State Handoff
//!
//! Leaves the stencil test set to `NotEqual` and depth writes off.

use crate::core::{
    AttachmentDesc, CompareFunction, CullMode, GeometryData, GeometryHandle, GpuContext,
    RasterState, RenderTarget, StencilMode, TextureBinding, TextureHandle, VertexAttribute,
};
use crate::errors::Result;
use crate::shader::{ProgramTemplate, ShaderDefines};

use super::depth::COVERED_STENCIL;
use super::pass::{DrawContext, RenderPass};

#[rustfmt::skip]
const CUBE_CORNERS: [f32; 24] = [
    -1.0, -1.0, -1.0,   1.0, -1.0, -1.0,   1.0,  1.0, -1.0,  -1.0,  1.0, -1.0,
    -1.0, -1.0,  1.0,   1.0, -1.0,  1.0,   1.0,  1.0,  1.0,  -1.0,  1.0,  1.0,
];

#[rustfmt::skip]
const CUBE_INDICES: [u32; 36] = [
    0, 2, 1, 0, 3, 2, // -z
    4, 5, 6, 4, 6, 7, // +z
    0, 1, 5, 0, 5, 4, // -y
    3, 6, 2, 3, 7, 6, // +y
    0, 4, 7, 0, 7, 3, // -x
    1, 2, 6, 1, 6, 5, // +x
];

pub struct SkyboxPass {
    target: RenderTarget,
    cube: GeometryHandle,
    intensity: f32,
    defines: ShaderDefines,
}

impl SkyboxPass {
    /// Draws into `color`, depth- and stencil-testing against `depth`.
    pub fn new(
        gpu: &mut GpuContext,
        size: (u32, u32),
        color: TextureHandle,
        depth: TextureHandle,
    ) -> Result<Self> {
        let cube = gpu.create_geometry(&GeometryData {
            label: "skybox cube".into(),
            vertices: CUBE_CORNERS.to_vec(),
            stride: 12,
            attributes: smallvec::smallvec![VertexAttribute {
                location: 0,
                components: 3,
                offset: 0,
            }],
            indices: Some(CUBE_INDICES.to_vec()),
        })?;
        let target = match RenderTarget::create(
            gpu,
            "skybox",
            size,
            &[AttachmentDesc::Shared(color)],
            Some(AttachmentDesc::Shared(depth)),
        ) {
            Ok(target) => target,
            Err(err) => {
                gpu.delete_geometry(cube);
                return Err(err);
            }
        };
        Ok(Self {
            target,
            cube,
            intensity: 1.0,
            defines: ShaderDefines::new(),
        })
    }

    /// Scales the sampled environment colour.
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity;
    }

    #[inline]
    #[must_use]
    pub fn intensity(&self) -> f32 {
        self.intensity
    }
}

impl RenderPass for SkyboxPass {
    fn name(&self) -> &str {
        "skybox"
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        let Some(environment) = ctx.scene.skybox else {
            return Ok(());
        };

        self.target.bind(ctx.gpu);
        ctx.gpu.apply_raster(&RasterState {
            depth_write: false,
            depth_func: CompareFunction::Lequal,
            cull: CullMode::None,
            stencil: StencilMode::NotEqual {
                reference: COVERED_STENCIL,
            },
            ..RasterState::OPAQUE
        });

        let program = ctx
            .compiler
            .get_or_compile_utility(ctx.gpu, ProgramTemplate::SKYBOX, &self.defines)?
            .handle();
        ctx.gpu.use_program(Some(program));
        ctx.apply_uniforms();
        TextureBinding::Extension {
            texture: environment,
        }
        .apply(ctx.gpu, "u_environment", 0);
        ctx.gpu.set_uniform("u_intensity", self.intensity);

        ctx.gpu.draw(self.cube, 1);
        Ok(())
    }

    fn target(&self) -> Option<&RenderTarget> {
        Some(&self.target)
    }

    fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<()> {
        self.target.resize(gpu, width, height)
    }

    fn destroy(self: Box<Self>, gpu: &mut GpuContext) {
        gpu.delete_geometry(self.cube);
        self.target.destroy(gpu);
    }
}
