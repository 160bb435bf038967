//! Shader variants.
//!
//! - [`ShaderAssembler`]: GLSL templates + defines → final source
//! - [`UniqueMaterial`] / [`VariantKey`]: the structural identity of a program
//! - [`ShaderCompiler`]: compile-or-fetch cache over variant keys
//! - [`EffectCompiler`]: particle emitters folded into variant keys

pub mod assembler;
pub mod compiler;
pub mod defines;
pub mod effect;
pub mod material;
pub mod stage;
pub mod variant;

pub use assembler::ShaderAssembler;
pub use compiler::{CompiledProgram, CompilerStats, ShaderCompiler};
pub use defines::ShaderDefines;
pub use effect::EffectCompiler;
pub use material::{
    Material, MaterialProperty, PropertyKind, PropertySlot, PropertyValue, ShadingModel,
    UniqueMaterial,
};
pub use stage::ShaderStage;
pub use variant::{BlendingMode, ModelShaderKind, ProgramTemplate, RenderPassKind, VariantKey};
