//! Lumen: shader-variant compilation and a multi-pass render pipeline for
//! OpenGL-class renderers.
//!
//! - [`shader`]: GLSL assembly from templates + defines, and a cache keyed by
//!   the structural identity of each program variant
//! - [`passes`] / [`pipeline`]: the render passes and their fixed order
//! - [`renderer`]: the per-frame driver with frame pacing and resize recovery
//! - [`core`]: the GPU seam (state tracker, targets, fences, worker threads)
//! - [`scene`]: cameras, meshes, lights and particle emitters

pub mod core;
pub mod errors;
pub mod passes;
pub mod pipeline;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod shader;

pub use crate::core::{GpuContext, HeadlessBackend, RenderTarget};
pub use errors::{RenderError, Result};
pub use passes::RenderPass;
pub use pipeline::Pipeline;
pub use renderer::{FrameStats, Renderer};
pub use scene::{Assets, Camera, MeshInstance, Scene};
pub use settings::{EngineConfig, RenderPath, RenderSettings, VariantFailurePolicy};
pub use shader::{ShaderCompiler, ShaderDefines, VariantKey};
