//! Pipeline
//!
//! An ordered, fixed-at-construction list of render passes. The order is part
//! of correctness: every pass may depend on the targets written by the
//! passes before it, and those handles are wired once, when the pipeline is
//! built.
//!
//! # Frame
//!
//! ```text
//! update:  pass[0].update → pass[1].update → … → pass[n].update
//! draw:    pass[0].draw   → pass[1].draw   → … → pass[n].draw
//! ```
//!
//! Every pass is updated before any pass draws.
//!
//! # Recipes
//!
//! [`Pipeline::build`] assembles the pass list for
//! [`RenderSettings::path`]; see [`RenderPath`] for the exact sequences.
//! Arbitrary pass lists go through [`Pipeline::from_passes`].

use crate::core::{GpuContext, TextureHandle};
use crate::errors::Result;
use crate::passes::{
    BlurPass, ColorPass, CompositePass, DeferredLightingPass, DepthPrePass,
    DirectionalShadowPass, DrawContext, FrameInfo, GBufferPass, ParticlePass, RenderPass,
    SkyboxPass, UniformSetters, UpdateContext,
};
use crate::scene::{Assets, Camera, Scene};
use crate::settings::{RenderPath, RenderSettings};
use crate::shader::ShaderCompiler;

pub struct Pipeline {
    path: Option<RenderPath>,
    passes: Vec<Box<dyn RenderPass>>,
    uniforms: UniformSetters,
    size: (u32, u32),
}

impl Pipeline {
    /// Builds the pass sequence of `settings.path` at `size`.
    ///
    /// If any pass fails to allocate, the passes built so far are destroyed
    /// before the error is returned.
    pub fn build(gpu: &mut GpuContext, settings: &RenderSettings, size: (u32, u32)) -> Result<Self> {
        let mut passes: Vec<Box<dyn RenderPass>> = Vec::new();
        if let Err(err) = Self::assemble(gpu, settings, size, &mut passes) {
            log::error!("{:?} pipeline construction failed: {err}", settings.path);
            for pass in passes.into_iter().rev() {
                pass.destroy(gpu);
            }
            return Err(err);
        }

        let pipeline = Self {
            path: Some(settings.path),
            passes,
            uniforms: UniformSetters::standard(),
            size,
        };
        log::info!(
            "{:?} pipeline built at {}x{}: [{}]",
            settings.path,
            size.0,
            size.1,
            pipeline.pass_names().join(" → ")
        );
        Ok(pipeline)
    }

    /// A pipeline over caller-provided passes, run in the given order.
    #[must_use]
    pub fn from_passes(passes: Vec<Box<dyn RenderPass>>, size: (u32, u32)) -> Self {
        Self {
            path: None,
            passes,
            uniforms: UniformSetters::standard(),
            size,
        }
    }

    fn assemble(
        gpu: &mut GpuContext,
        settings: &RenderSettings,
        size: (u32, u32),
        passes: &mut Vec<Box<dyn RenderPass>>,
    ) -> Result<()> {
        let shadow_map = if settings.shadows {
            let shadow = DirectionalShadowPass::new(gpu, settings)?;
            let map = shadow.shadow_map();
            passes.push(Box::new(shadow));
            Some(map)
        } else {
            None
        };

        let prepass = DepthPrePass::new(gpu, size)?;
        let depth = prepass.depth();
        passes.push(Box::new(prepass));

        let hdr = match settings.path {
            RenderPath::Forward => {
                let opaque = ColorPass::opaque(gpu, size, depth, shadow_map, settings)?;
                let hdr = opaque.hdr();
                passes.push(Box::new(opaque));
                hdr
            }
            RenderPath::Deferred => {
                let gbuffer = GBufferPass::new(gpu, size, depth)?;
                let textures = gbuffer.textures();
                passes.push(Box::new(gbuffer));

                let lighting =
                    DeferredLightingPass::new(gpu, size, textures, depth, shadow_map, settings)?;
                let hdr = lighting.hdr();
                passes.push(Box::new(lighting));
                hdr
            }
        };

        passes.push(Box::new(SkyboxPass::new(gpu, size, hdr, depth)?));
        passes.push(Box::new(ColorPass::transparent(
            gpu, size, hdr, depth, shadow_map, settings,
        )?));
        passes.push(Box::new(ParticlePass::new(
            gpu,
            size,
            hdr,
            depth,
            settings.max_particles_per_emitter,
        )?));

        let bloom = if settings.bloom {
            let blur = BlurPass::new(gpu, size, hdr, settings.blur_iterations)?;
            let output = blur.output();
            passes.push(Box::new(blur));
            output
        } else {
            None
        };

        passes.push(Box::new(CompositePass::new(gpu, size, hdr, bloom, settings)?));
        Ok(())
    }

    // ─── Frame ─────────────────────────────────────────────────────────

    /// Runs every pass's CPU bookkeeping, in order.
    pub fn update(&mut self, scene: &Scene, assets: &Assets, camera: &Camera, frame: &FrameInfo) {
        let ctx = UpdateContext {
            scene,
            assets,
            camera,
            frame,
        };
        for pass in &mut self.passes {
            pass.update(&ctx);
        }
    }

    /// Runs every pass's GPU submission, in order. Stops at the first
    /// failing pass.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        gpu: &mut GpuContext,
        compiler: &mut ShaderCompiler,
        scene: &Scene,
        assets: &Assets,
        camera: &Camera,
        frame: &FrameInfo,
        settings: &RenderSettings,
    ) -> Result<()> {
        let mut ctx = DrawContext {
            gpu,
            compiler,
            scene,
            assets,
            camera,
            frame,
            settings,
            uniforms: &self.uniforms,
        };
        for pass in &mut self.passes {
            pass.draw(&mut ctx)?;
            if settings.validate_state && !ctx.gpu.verify_state() {
                log::warn!("GPU state desynchronized after pass '{}'", pass.name());
            }
        }
        Ok(())
    }

    /// Propagates a new output size to every pass, in order, so attachment
    /// owners are resized before the passes borrowing their textures.
    ///
    /// If a pass fails, the passes already resized are returned to the
    /// previous size and the pipeline keeps reporting it.
    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<()> {
        if (width, height) == self.size {
            return Ok(());
        }
        for index in 0..self.passes.len() {
            if let Err(e) = self.passes[index].resize(gpu, width, height) {
                let (old_width, old_height) = self.size;
                for pass in &mut self.passes[..index] {
                    if let Err(restore) = pass.resize(gpu, old_width, old_height) {
                        log::error!(
                            "Pass '{}' could not be restored to {old_width}x{old_height}: {restore}",
                            pass.name()
                        );
                    }
                }
                return Err(e);
            }
        }
        log::info!(
            "Pipeline resized {}x{} -> {width}x{height}",
            self.size.0,
            self.size.1
        );
        self.size = (width, height);
        Ok(())
    }

    /// Destroys every pass, last first.
    pub fn destroy(&mut self, gpu: &mut GpuContext) {
        for pass in self.passes.drain(..).rev() {
            pass.destroy(gpu);
        }
    }

    // ─── Accessors ─────────────────────────────────────────────────────

    /// The recipe this pipeline was built from; `None` for custom pass lists.
    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<RenderPath> {
        self.path
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn passes(&self) -> impl Iterator<Item = &dyn RenderPass> {
        self.passes.iter().map(|p| &**p)
    }

    #[must_use]
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// First pass with the given name.
    #[must_use]
    pub fn pass(&self, name: &str) -> Option<&dyn RenderPass> {
        self.passes().find(|p| p.name() == name)
    }

    /// Texture written by the last pass, if it renders offscreen.
    #[must_use]
    pub fn output(&self) -> Option<TextureHandle> {
        self.passes.last().and_then(|p| p.output())
    }

    #[inline]
    #[must_use]
    pub fn uniforms(&self) -> &UniformSetters {
        &self.uniforms
    }

    /// Setters run after every program bind; push custom ones here.
    #[inline]
    pub fn uniforms_mut(&mut self) -> &mut UniformSetters {
        &mut self.uniforms
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.passes.is_empty() {
            log::warn!(
                "Pipeline dropped with {} live passes; their GPU objects leak",
                self.passes.len()
            );
        }
    }
}
