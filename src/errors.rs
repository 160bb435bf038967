//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`RenderError`] covers all failure modes of the
//! variant-compilation and pass-orchestration core:
//! - Shader source assembly (unresolved includes, template syntax)
//! - Shader stage compilation and program linking
//! - Framebuffer allocation on construction and resize
//! - Fence synchronization and background workers
//! - Configuration loading
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, RenderError>`.
//!
//! ```rust,ignore
//! use lumen::errors::{RenderError, Result};
//!
//! fn build() -> Result<()> {
//!     // Operations that may fail return Result
//!     Ok(())
//! }
//! ```
//!
//! # Propagation
//!
//! Compilation and allocation failures are surfaced to the caller of the
//! frame operation that triggered them; the caller decides whether to retry,
//! skip the pass, or abort. Tracked-state desynchronization is not an error
//! value: it is a programming error reported by
//! [`GpuContext::verify_state`](crate::core::GpuContext::verify_state).

use std::time::Duration;

use thiserror::Error;

use crate::shader::stage::ShaderStage;

/// The main error type for the Lumen engine.
#[derive(Error, Debug)]
pub enum RenderError {
    // ========================================================================
    // Shader Errors
    // ========================================================================
    /// A template, include or fragment could not be resolved or rendered.
    #[error("Shader source assembly failed for '{template}': {reason}")]
    SourceAssembly {
        /// Template (or include) being assembled
        template: String,
        /// Human readable cause
        reason: String,
    },

    /// A single shader stage was rejected by the driver compiler.
    #[error("{stage:?} shader compilation failed for '{label}':\n{diagnostic}")]
    ShaderCompile {
        /// The offending stage
        stage: ShaderStage,
        /// Program label (template family + variant)
        label: String,
        /// Compiler info log
        diagnostic: String,
    },

    /// Compiled stages could not be linked into a program.
    #[error("Program link failed for '{label}':\n{diagnostic}")]
    ShaderLink {
        /// Program label (template family + variant)
        label: String,
        /// Linker info log
        diagnostic: String,
    },

    /// The variant failed to build earlier in this cache's lifetime and is
    /// not retried until failures are cleared.
    #[error("Shader variant '{label}' is unusable (earlier build failed)")]
    UnusableVariant {
        /// Program label (template family + variant)
        label: String,
    },

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// Framebuffer attachments could not be (re)allocated.
    #[error("Framebuffer allocation failed for '{label}' at {width}x{height}: {reason}")]
    FramebufferAllocation {
        /// Render target label
        label: String,
        /// Requested width in pixels
        width: u32,
        /// Requested height in pixels
        height: u32,
        /// Backend reason
        reason: String,
    },

    /// A handle did not resolve to a live backend object.
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// Backend-level failure that has no better category.
    #[error("GPU backend error: {0}")]
    Backend(String),

    // ========================================================================
    // Synchronization Errors
    // ========================================================================
    /// A blocking fence wait expired.
    #[error("Fence wait timed out after {timeout:?}")]
    FenceTimeout {
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// A resource worker thread went away before answering.
    #[error("Resource worker disconnected")]
    WorkerDisconnected,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// JSON configuration parse error.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Returns `true` for errors that only invalidate a single shader variant.
    #[must_use]
    pub fn is_variant_failure(&self) -> bool {
        matches!(
            self,
            Self::SourceAssembly { .. }
                | Self::ShaderCompile { .. }
                | Self::ShaderLink { .. }
                | Self::UnusableVariant { .. }
        )
    }
}

/// Alias for `Result<T, RenderError>`.
pub type Result<T> = std::result::Result<T, RenderError>;
