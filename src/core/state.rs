//! State tracker.
//!
//! Every setter compares the requested value against the tracked one, forwards
//! the call to the backend only on change, and records the new value. The
//! tracked state therefore equals the device state for as long as nothing
//! bypasses this module; [`GpuContext::verify_state`] detects when something
//! did.

use super::context::GpuContext;
use super::handles::{FramebufferHandle, ProgramHandle, TextureHandle};
use super::types::{
    BlendMode, ClearFlags, CompareFunction, CullMode, GpuState, StencilMode, Viewport,
};

/// The fixed-function subset a pass declares up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterState {
    pub blend: BlendMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunction,
    pub color_write: bool,
    pub cull: CullMode,
    pub stencil: StencilMode,
}

impl RasterState {
    /// Depth-tested opaque geometry.
    pub const OPAQUE: Self = Self {
        blend: BlendMode::Disabled,
        depth_test: true,
        depth_write: true,
        depth_func: CompareFunction::Less,
        color_write: true,
        cull: CullMode::Back,
        stencil: StencilMode::Disabled,
    };

    /// Screen-space passes: no depth, no culling, no blending.
    pub const FULLSCREEN: Self = Self {
        blend: BlendMode::Disabled,
        depth_test: false,
        depth_write: false,
        depth_func: CompareFunction::Always,
        color_write: true,
        cull: CullMode::None,
        stencil: StencilMode::Disabled,
    };
}

impl Default for RasterState {
    fn default() -> Self {
        Self::OPAQUE
    }
}

macro_rules! tracked {
    ($ctx:ident, $field:ident, $value:expr, $call:ident) => {{
        let value = $value;
        if $ctx.tracked.$field == value {
            $ctx.stats.redundant_state_skips += 1;
        } else {
            $ctx.backend.$call(value);
            $ctx.stats.state_changes += 1;
        }
        $ctx.tracked.$field = value;
    }};
}

impl GpuContext {
    pub fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        tracked!(self, framebuffer, framebuffer, bind_framebuffer);
    }

    pub fn use_program(&mut self, program: Option<ProgramHandle>) {
        tracked!(self, program, program, use_program);
    }

    pub fn set_blending(&mut self, mode: BlendMode) {
        tracked!(self, blend, mode, set_blend);
    }

    pub fn set_depth_test(&mut self, enabled: bool) {
        tracked!(self, depth_test, enabled, set_depth_test);
    }

    pub fn set_depth_write(&mut self, enabled: bool) {
        tracked!(self, depth_write, enabled, set_depth_write);
    }

    pub fn set_depth_func(&mut self, func: CompareFunction) {
        tracked!(self, depth_func, func, set_depth_func);
    }

    pub fn set_color_write(&mut self, enabled: bool) {
        tracked!(self, color_write, enabled, set_color_write);
    }

    pub fn set_cull(&mut self, mode: CullMode) {
        tracked!(self, cull, mode, set_cull);
    }

    pub fn set_stencil(&mut self, mode: StencilMode) {
        tracked!(self, stencil, mode, set_stencil);
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        tracked!(self, viewport, viewport, set_viewport);
    }

    pub fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        if self.tracked.texture(unit) == texture {
            self.stats.redundant_state_skips += 1;
        } else {
            self.backend.bind_texture(unit, texture);
            self.stats.state_changes += 1;
        }
        self.tracked.set_texture(unit, texture);
    }

    /// Applies a whole raster bundle, each field through its own setter.
    pub fn apply_raster(&mut self, state: &RasterState) {
        self.set_blending(state.blend);
        self.set_depth_test(state.depth_test);
        self.set_depth_write(state.depth_write);
        self.set_depth_func(state.depth_func);
        self.set_color_write(state.color_write);
        self.set_cull(state.cull);
        self.set_stencil(state.stencil);
    }

    /// Clears the bound framebuffer.
    ///
    /// Clears honour the write masks, so the masks required by `flags` are
    /// enabled (through the tracker) first.
    pub fn clear(&mut self, flags: ClearFlags, color: [f32; 4], depth: f32, stencil: u8) {
        if flags.contains(ClearFlags::COLOR) {
            self.set_color_write(true);
        }
        if flags.contains(ClearFlags::DEPTH) {
            self.set_depth_write(true);
        }
        if flags.contains(ClearFlags::STENCIL)
            && matches!(
                self.tracked.stencil,
                StencilMode::Equal { .. } | StencilMode::NotEqual { .. }
            )
        {
            self.set_stencil(StencilMode::Disabled);
        }
        self.backend.clear(flags, color, depth, stencil);
    }

    /// `true` when the tracked state equals the device state, or when the
    /// backend cannot report its state.
    #[must_use]
    pub fn is_state_in_sync(&self) -> bool {
        self.backend
            .query_state()
            .is_none_or(|actual| self.tracked.matches(&actual))
    }

    /// Compares tracked and actual state on backends able to report it.
    ///
    /// On mismatch logs a `StateDesyncWarning` and fails a debug assertion.
    /// A mismatch means some code changed device state without going through
    /// this context: a programming error, not a runtime condition. Release
    /// builds return `false` instead.
    pub fn verify_state(&self) -> bool {
        let Some(actual) = self.backend.query_state() else {
            return true;
        };
        if self.tracked.matches(&actual) {
            return true;
        }
        log::warn!(
            "StateDesyncWarning on '{}': tracked {:?} but device reports {:?}",
            self.backend.name(),
            self.tracked,
            actual
        );
        debug_assert!(false, "GPU state desynchronized on '{}'", self.backend.name());
        false
    }

    /// Forces the device back to the initial state and re-synchronizes the
    /// mirror. Intended after foreign code issued raw API calls.
    pub fn reset_state(&mut self) {
        let initial = GpuState::default();
        let units = self.tracked.textures.len() as u32;
        for unit in 0..units {
            self.backend.bind_texture(unit, None);
        }
        self.backend.bind_framebuffer(initial.framebuffer);
        self.backend.use_program(initial.program);
        self.backend.set_blend(initial.blend);
        self.backend.set_depth_test(initial.depth_test);
        self.backend.set_depth_write(initial.depth_write);
        self.backend.set_depth_func(initial.depth_func);
        self.backend.set_color_write(initial.color_write);
        self.backend.set_cull(initial.cull);
        self.backend.set_stencil(initial.stencil);
        self.backend.set_viewport(initial.viewport);
        self.tracked = initial;
        log::debug!("GPU state reset on '{}'", self.backend.name());
    }
}
