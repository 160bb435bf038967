//! Renderer
//!
//! Thin per-frame driver around a [`Pipeline`]. The renderer owns the GPU
//! context, the shader variant cache and the pipeline, so everything tied to
//! the context's lifetime is torn down together in [`Renderer::shutdown`].
//!
//! # Frame Pacing
//!
//! A fence is placed after each frame's commands. At most
//! [`RenderSettings::frames_in_flight`] frames may be queued on the GPU;
//! starting another one first waits for the oldest fence, bounded by
//! [`RenderSettings::fence_timeout`].
//!
//! # Example
//!
//! ```rust,ignore
//! use lumen::core::HeadlessBackend;
//! use lumen::renderer::Renderer;
//! use lumen::settings::RenderSettings;
//!
//! let (gpu, _probe) = HeadlessBackend::context();
//! let mut renderer = Renderer::new(gpu, RenderSettings::default(), (1280, 720))?;
//! let stats = renderer.render(&scene, &assets, &camera, 1.0 / 60.0)?;
//! renderer.resize(1920, 1080)?;
//! renderer.shutdown();
//! ```

use std::collections::VecDeque;

use crate::core::{Fence, FenceStatus, GpuContext, GpuStats, TextureHandle};
use crate::errors::{RenderError, Result};
use crate::passes::FrameInfo;
use crate::pipeline::Pipeline;
use crate::scene::{Assets, Camera, Scene};
use crate::settings::RenderSettings;
use crate::shader::{CompilerStats, ShaderCompiler};

/// What one call to [`Renderer::render`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    /// Device work issued during the frame.
    pub gpu: GpuStats,
    /// Cumulative cache statistics.
    pub compiler: CompilerStats,
    /// Frame fences that were still pending and had to be waited on.
    pub fence_waits: u32,
}

pub struct Renderer {
    gpu: GpuContext,
    settings: RenderSettings,
    compiler: ShaderCompiler,
    pipeline: Option<Pipeline>,
    fences: VecDeque<Fence>,
    frame: FrameInfo,
}

impl Renderer {
    /// Builds the pipeline for `settings.path` at `size`.
    pub fn new(mut gpu: GpuContext, settings: RenderSettings, size: (u32, u32)) -> Result<Self> {
        let size = (size.0.max(1), size.1.max(1));
        let mut compiler = ShaderCompiler::new();
        compiler.set_dump_shaders(settings.dump_shaders);
        let pipeline = Pipeline::build(&mut gpu, &settings, size)?;

        Ok(Self {
            gpu,
            settings,
            compiler,
            pipeline: Some(pipeline),
            fences: VecDeque::new(),
            frame: FrameInfo {
                width: size.0,
                height: size.1,
                ..FrameInfo::default()
            },
        })
    }

    /// Renders one frame: pacing, every pass's `update`, every pass's
    /// `draw`, then the frame fence.
    pub fn render(&mut self, scene: &Scene, assets: &Assets, camera: &Camera, dt: f32) -> Result<FrameStats> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Err(RenderError::Backend("renderer is shut down".into()));
        };

        let fence_waits = Self::throttle(&mut self.gpu, &mut self.fences, &self.settings)?;

        let (width, height) = pipeline.size();
        self.frame.index += 1;
        self.frame.dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.frame.time += self.frame.dt;
        self.frame.width = width;
        self.frame.height = height;

        pipeline.update(scene, assets, camera, &self.frame);
        pipeline.draw(
            &mut self.gpu,
            &mut self.compiler,
            scene,
            assets,
            camera,
            &self.frame,
            &self.settings,
        )?;

        let fence = self.gpu.insert_fence()?;
        self.fences.push_back(fence);

        Ok(FrameStats {
            frame: self.frame.index,
            gpu: self.gpu.take_stats(),
            compiler: self.compiler.stats(),
            fence_waits,
        })
    }

    /// Retires frame fences until fewer than `frames_in_flight` remain.
    fn throttle(
        gpu: &mut GpuContext,
        fences: &mut VecDeque<Fence>,
        settings: &RenderSettings,
    ) -> Result<u32> {
        let limit = settings.frames_in_flight.max(1) as usize;
        let mut waits = 0;
        while fences.len() >= limit {
            let Some(fence) = fences.pop_front() else {
                break;
            };
            let result = match gpu.poll_fence(&fence) {
                FenceStatus::Signaled => Ok(()),
                FenceStatus::Pending => {
                    waits += 1;
                    gpu.wait_fence(&fence, settings.fence_timeout())
                }
            };
            gpu.release_fence(fence);
            result?;
        }
        Ok(waits)
    }

    /// Waits for every frame still in flight.
    pub fn wait_idle(&mut self) -> Result<()> {
        let timeout = self.settings.fence_timeout();
        let mut outcome = Ok(());
        while let Some(fence) = self.fences.pop_front() {
            let result = self.gpu.wait_fence(&fence, timeout);
            self.gpu.release_fence(fence);
            if outcome.is_ok() {
                outcome = result;
            }
        }
        outcome
    }

    /// Resizes every pass. When attachments cannot be allocated at the
    /// requested size, halves it and tries again, down to
    /// `min_resize_extent`. Returns the size actually in effect.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(u32, u32)> {
        if self.pipeline.is_none() {
            return Err(RenderError::Backend("renderer is shut down".into()));
        }
        self.wait_idle()?;

        let min_extent = self.settings.min_resize_extent.max(1);
        let (mut w, mut h) = (width.max(1), height.max(1));
        loop {
            let Some(pipeline) = self.pipeline.as_mut() else {
                return Err(RenderError::Backend("renderer is shut down".into()));
            };
            match pipeline.resize(&mut self.gpu, w, h) {
                Ok(()) => {
                    self.frame.width = w;
                    self.frame.height = h;
                    return Ok((w, h));
                }
                Err(err @ RenderError::FramebufferAllocation { .. }) => {
                    let (half_w, half_h) = (w / 2, h / 2);
                    if half_w.min(half_h) < min_extent {
                        log::error!("Resize to {width}x{height} failed down to {w}x{h}: {err}");
                        return Err(err);
                    }
                    log::warn!("Resize to {w}x{h} failed ({err}); retrying at {half_w}x{half_h}");
                    (w, h) = (half_w, half_h);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Releases every pass resource, cached program and frame fence.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::warn!("Shutting down with unfinished frames: {err}");
        }
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.destroy(&mut self.gpu);
            self.compiler.destroy(&mut self.gpu);
            self.gpu.release_resident_textures();
            log::info!("Renderer shut down after {} frames", self.frame.index);
        }
    }

    // ─── Accessors ─────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    #[inline]
    pub fn gpu_mut(&mut self) -> &mut GpuContext {
        &mut self.gpu
    }

    #[inline]
    #[must_use]
    pub fn compiler(&self) -> &ShaderCompiler {
        &self.compiler
    }

    #[inline]
    pub fn compiler_mut(&mut self) -> &mut ShaderCompiler {
        &mut self.compiler
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    #[inline]
    pub fn pipeline_mut(&mut self) -> Option<&mut Pipeline> {
        self.pipeline.as_mut()
    }

    #[inline]
    #[must_use]
    pub fn frame(&self) -> &FrameInfo {
        &self.frame
    }

    /// Frames submitted but not yet retired.
    #[inline]
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    /// The composited image when rendering offscreen.
    #[must_use]
    pub fn output(&self) -> Option<TextureHandle> {
        self.pipeline.as_ref().and_then(Pipeline::output)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HeadlessBackend;
    use crate::settings::RenderPath;

    fn camera() -> Camera {
        let mut camera = Camera::new_perspective(60.0, 16.0 / 9.0, 0.1, 100.0);
        camera.look_at(glam::Vec3::new(0.0, 1.0, 5.0), glam::Vec3::ZERO, glam::Vec3::Y);
        camera
    }

    #[test]
    fn fences_are_bounded_by_frames_in_flight() {
        let (gpu, _probe) = HeadlessBackend::context();
        let settings = RenderSettings {
            path: RenderPath::Forward,
            frames_in_flight: 2,
            ..Default::default()
        };
        let scene = Scene::new(&settings);
        let mut renderer = Renderer::new(gpu, settings, (64, 64)).unwrap();

        for _ in 0..5 {
            renderer.render(&scene, &Assets::new(), &camera(), 0.016).unwrap();
            assert!(renderer.frames_in_flight() <= 2);
        }
        assert_eq!(renderer.frame().index, 5);
    }

    #[test]
    fn shutdown_releases_everything() {
        let (gpu, probe) = HeadlessBackend::context();
        let settings = RenderSettings::default();
        let scene = Scene::new(&settings);
        let mut renderer = Renderer::new(gpu, settings, (64, 64)).unwrap();
        renderer.render(&scene, &Assets::new(), &camera(), 0.016).unwrap();

        renderer.shutdown();
        renderer.shutdown();

        assert_eq!(probe.live_programs(), 0);
        assert_eq!(probe.live_shaders(), 0);
        assert_eq!(probe.live_textures(), 0);
        assert_eq!(probe.live_framebuffers(), 0);
        assert!(renderer.render(&scene, &Assets::new(), &camera(), 0.016).is_err());
    }
}
