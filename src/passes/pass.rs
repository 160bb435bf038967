//! Render pass interface.
//!
//! Every pass goes through the same per-frame lifecycle:
//!
//! 1. `update`: CPU bookkeeping only (culling, sorting, simulation). No GPU
//!    calls happen here.
//! 2. `draw`: binds the pass's target through the state tracker, binds
//!    programs, applies the frame uniform setters and submits geometry.
//!
//! A pass may read textures produced by earlier passes. It receives those
//! handles at construction and never owns them; attachment storage is
//! reallocated in place on resize, so the handles stay valid for the
//! lifetime of the pipeline.

use crate::core::{GpuContext, RenderTarget, TextureHandle};
use crate::errors::Result;
use crate::scene::{Assets, Camera, Scene};
use crate::settings::RenderSettings;
use crate::shader::ShaderCompiler;

use super::uniforms::{UniformInputs, UniformSetters};

/// Per-frame timing and output size.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameInfo {
    pub index: u64,
    /// Seconds since the previous frame.
    pub dt: f32,
    /// Seconds since the renderer started.
    pub time: f32,
    pub width: u32,
    pub height: u32,
}

/// Read-only inputs of the update phase.
pub struct UpdateContext<'a> {
    pub scene: &'a Scene,
    pub assets: &'a Assets,
    pub camera: &'a Camera,
    pub frame: &'a FrameInfo,
}

/// Everything the draw phase may touch.
pub struct DrawContext<'a> {
    pub gpu: &'a mut GpuContext,
    pub compiler: &'a mut ShaderCompiler,
    pub scene: &'a Scene,
    pub assets: &'a Assets,
    pub camera: &'a Camera,
    pub frame: &'a FrameInfo,
    pub settings: &'a RenderSettings,
    pub uniforms: &'a UniformSetters,
}

impl DrawContext<'_> {
    /// Runs the frame uniform setters against the bound program.
    pub fn apply_uniforms(&mut self) {
        let inputs = UniformInputs {
            camera: self.camera,
            scene: self.scene,
            frame: self.frame,
        };
        self.uniforms.apply(self.gpu, &inputs);
    }
}

pub trait RenderPass {
    /// Name used in logs and traces.
    fn name(&self) -> &str;

    fn update(&mut self, _ctx: &UpdateContext<'_>) {}

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()>;

    /// The framebuffer this pass renders into, if it has one.
    fn target(&self) -> Option<&RenderTarget> {
        None
    }

    /// The texture later passes consume. Defaults to the first colour
    /// attachment of [`target`](Self::target).
    fn output(&self) -> Option<TextureHandle> {
        self.target().and_then(|target| target.color(0))
    }

    /// Reallocates size-dependent attachments. Passes whose resolution does
    /// not follow the output keep the default no-op.
    fn resize(&mut self, _gpu: &mut GpuContext, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    /// Releases every GPU object the pass owns.
    fn destroy(self: Box<Self>, _gpu: &mut GpuContext) {}
}
