//! Renderer Settings & Render Path Configuration
//!
//! This module defines the configuration consumed by the pipeline, its passes
//! and the [`Renderer`](crate::renderer::Renderer).
//!
//! The core abstraction is [`RenderPath`], which selects the fixed pass
//! sequence the [`Pipeline`](crate::pipeline::Pipeline) is built from.
//!
//! There is no process-wide settings singleton: an [`EngineConfig`] is built
//! once (in code or from JSON) and handed by reference to every constructor
//! that needs it.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lumen::settings::{RenderPath, RenderSettings};
//!
//! let settings = RenderSettings {
//!     path: RenderPath::Forward,
//!     shadows: false,
//!     ..Default::default()
//! };
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

// ---------------------------------------------------------------------------
// RenderPath
// ---------------------------------------------------------------------------

/// Defines the pipeline topology.
///
/// | Path       | Pass order                                                                   |
/// |------------|------------------------------------------------------------------------------|
/// | `Forward`  | shadow¹ → depth → opaque → skybox → transparent → particles → blur² → composite |
/// | `Deferred` | shadow¹ → depth → G-buffer → lighting → skybox → transparent → particles → blur² → composite |
///
/// ¹ when [`RenderSettings::shadows`] is set. ² when [`RenderSettings::bloom`] is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderPath {
    /// Every opaque surface is shaded in a single colour pass.
    Forward,
    /// Opaque surfaces are written to a G-buffer and lit in screen space.
    #[default]
    Deferred,
}

// ---------------------------------------------------------------------------
// VariantFailurePolicy
// ---------------------------------------------------------------------------

/// What a pass does with a draw whose shader variant cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VariantFailurePolicy {
    /// Leave the draw out.
    Skip,
    /// Draw with the flat magenta error program.
    #[default]
    Placeholder,
    /// Fail the frame with the compile error.
    Abort,
}

// ---------------------------------------------------------------------------
// RenderSettings
// ---------------------------------------------------------------------------

/// Configuration for pipeline construction and per-frame behaviour.
///
/// # Fields
///
/// | Field                       | Description                                  | Default      |
/// |-----------------------------|----------------------------------------------|--------------|
/// | `path`                      | Pipeline topology                            | `Deferred`   |
/// | `shadows`                   | Directional shadow pass                      | `true`       |
/// | `shadow_map_size`           | Shadow map resolution (resize independent)   | `2048`       |
/// | `bloom`                     | Blur chain + bloom add in composite          | `true`       |
/// | `blur_iterations`           | Ping-pong iterations of the blur pass        | `2`          |
/// | `bloom_intensity`           | Weight of the blurred image in composite     | `0.04`       |
/// | `exposure`                  | Tone mapping exposure                        | `1.0`        |
/// | `clear_color`               | Colour target clear value                    | Black        |
/// | `max_point_lights`          | Point light capacity                         | `32`         |
/// | `max_directional_lights`    | Directional light capacity                   | `4`          |
/// | `max_particles_per_emitter` | Particle capacity of one emitter             | `4096`       |
/// | `frames_in_flight`          | Frame fences kept by the renderer            | `2`          |
/// | `fence_timeout_ms`          | Blocking fence wait limit                    | `1000`       |
/// | `validate_state`            | Compare tracked vs. actual GPU state         | debug builds |
/// | `dump_shaders`              | Log assembled source of each new stage       | `false`      |
/// | `variant_failure`           | Handling of draws with an unusable variant   | `Placeholder`|
/// | `min_resize_extent`         | Smallest extent tried after allocation fails | `64`         |
/// | `offscreen_output`          | Composite into a pipeline-owned texture      | `false`      |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    // === Pipeline Topology ===
    pub path: RenderPath,
    pub shadows: bool,
    pub shadow_map_size: u32,
    pub bloom: bool,
    pub blur_iterations: u32,
    pub bloom_intensity: f32,
    pub exposure: f32,
    pub clear_color: [f32; 4],

    // === Capacities ===
    pub max_point_lights: usize,
    pub max_directional_lights: usize,
    pub max_particles_per_emitter: usize,

    // === Synchronization ===
    pub frames_in_flight: u32,
    pub fence_timeout_ms: u64,

    // === Diagnostics ===
    /// Runs [`GpuContext::verify_state`](crate::core::GpuContext::verify_state)
    /// after every pass. Only backends that can report their real state
    /// take part in the check.
    pub validate_state: bool,
    pub dump_shaders: bool,
    pub variant_failure: VariantFailurePolicy,

    // === Resize Policy ===
    pub min_resize_extent: u32,
    pub offscreen_output: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            path: RenderPath::default(),
            shadows: true,
            shadow_map_size: 2048,
            bloom: true,
            blur_iterations: 2,
            bloom_intensity: 0.04,
            exposure: 1.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_point_lights: 32,
            max_directional_lights: 4,
            max_particles_per_emitter: 4096,
            frames_in_flight: 2,
            fence_timeout_ms: 1000,
            validate_state: cfg!(debug_assertions),
            dump_shaders: false,
            variant_failure: VariantFailurePolicy::default(),
            min_resize_extent: 64,
            offscreen_output: false,
        }
    }
}

impl RenderSettings {
    /// Blocking fence wait limit as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level engine configuration.
///
/// Constructed once alongside the GPU context and passed by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub render: RenderSettings,
    /// Number of background resource-preparation threads (`0` disables the pool).
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render: RenderSettings::default(),
            worker_threads: 1,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
