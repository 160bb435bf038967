//! Variant keys.
//!
//! A [`VariantKey`] names exactly one compiled program: material shape,
//! model shader kind, render pass kind, blending mode and any extra defines
//! (emitter modules, pass settings). Equality is structural over all five
//! parts, so distinct keys never share a program and equal keys always do.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::BlendMode;

use super::defines::ShaderDefines;
use super::material::UniqueMaterial;

/// Joint palette size compiled into skinned variants.
pub const MAX_BONES: u32 = 64;

/// Alpha cut-off compiled into alpha-tested variants.
pub const ALPHA_CUTOFF: &str = "0.5";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelShaderKind {
    Static,
    Skeletal,
    Instanced,
    SkeletalInstanced,
    Effect,
    Text,
}

impl ModelShaderKind {
    /// Vertex-stage switches of this model kind.
    pub fn add_defines(self, defines: &mut ShaderDefines) {
        if matches!(self, Self::Skeletal | Self::SkeletalInstanced) {
            defines.set_flag("ENABLE_SKELETAL");
            defines.set("MAX_BONES", MAX_BONES);
        }
        if matches!(self, Self::Instanced | Self::SkeletalInstanced) {
            defines.set_flag("ENABLE_INSTANCING");
            defines.set("INSTANCE_ATTRIBUTE_COUNT", 4);
        }
        match self {
            Self::Effect => defines.set_flag("ENABLE_PARTICLES"),
            Self::Text => defines.set_flag("ENABLE_TEXT"),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RenderPassKind {
    DepthPrepass,
    Forward,
    DeferredGBuffer,
    DeferredLighting,
    DirectionalShadow,
    Skybox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum BlendingMode {
    #[default]
    Opaque,
    AlphaTested,
    AlphaBlend,
    Additive,
}

impl BlendingMode {
    /// Drawn in the transparent (sorted, depth-write off) part of the frame.
    #[inline]
    #[must_use]
    pub fn is_transparent(self) -> bool {
        matches!(self, Self::AlphaBlend | Self::Additive)
    }

    #[must_use]
    pub fn blend_mode(self) -> BlendMode {
        match self {
            Self::Opaque | Self::AlphaTested => BlendMode::Disabled,
            Self::AlphaBlend => BlendMode::Alpha,
            Self::Additive => BlendMode::Additive,
        }
    }
}

/// A set of stage files compiled and linked together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramTemplate {
    pub name: &'static str,
    pub stages: &'static [&'static str],
}

impl ProgramTemplate {
    pub const MESH: Self = Self {
        name: "mesh",
        stages: &["mesh.vert", "mesh.frag"],
    };
    pub const PARTICLE: Self = Self {
        name: "particle",
        stages: &["particle.vert", "particle.frag"],
    };
    pub const SKYBOX: Self = Self {
        name: "skybox",
        stages: &["skybox.vert", "skybox.frag"],
    };
    pub const DEFERRED_LIGHTING: Self = Self {
        name: "deferred_lighting",
        stages: &["fullscreen.vert", "deferred_lighting.frag"],
    };
    pub const BLUR: Self = Self {
        name: "blur",
        stages: &["fullscreen.vert", "blur.frag"],
    };
    pub const COMPOSITE: Self = Self {
        name: "composite",
        stages: &["fullscreen.vert", "composite.frag"],
    };
    /// Magenta stand-in drawn in place of an unusable variant.
    pub const ERROR: Self = Self {
        name: "error",
        stages: &["mesh.vert", "error.frag"],
    };
    /// Error stand-in for particle effects (billboard vertex layout).
    pub const PARTICLE_ERROR: Self = Self {
        name: "particle_error",
        stages: &["particle.vert", "error.frag"],
    };

    /// Error program matching the vertex layout of `model`.
    #[must_use]
    pub fn error_for(model: ModelShaderKind) -> Self {
        match model {
            ModelShaderKind::Effect => Self::PARTICLE_ERROR,
            _ => Self::ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariantKey {
    pub material: UniqueMaterial,
    pub model: ModelShaderKind,
    pub pass: RenderPassKind,
    pub blending: BlendingMode,
    pub extra: ShaderDefines,
}

impl VariantKey {
    #[must_use]
    pub fn new(
        material: UniqueMaterial,
        model: ModelShaderKind,
        pass: RenderPassKind,
        blending: BlendingMode,
    ) -> Self {
        Self {
            material,
            model,
            pass,
            blending,
            extra: ShaderDefines::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, extra: ShaderDefines) -> Self {
        self.extra = extra;
        self
    }

    /// The stage files this variant is assembled from.
    #[must_use]
    pub fn template(&self) -> ProgramTemplate {
        match (self.model, self.pass) {
            (ModelShaderKind::Effect, _) => ProgramTemplate::PARTICLE,
            (_, RenderPassKind::Skybox) => ProgramTemplate::SKYBOX,
            (_, RenderPassKind::DeferredLighting) => ProgramTemplate::DEFERRED_LIGHTING,
            _ => ProgramTemplate::MESH,
        }
    }

    /// Full define set; `extra` is merged last and wins on conflicts.
    #[must_use]
    pub fn defines(&self) -> ShaderDefines {
        let mut defines = self.material.defines();

        self.model.add_defines(&mut defines);

        match self.pass {
            RenderPassKind::DepthPrepass => defines.set_flag("DEPTH_ONLY"),
            RenderPassKind::DirectionalShadow => {
                defines.set_flag("DEPTH_ONLY");
                defines.set_flag("SHADOW_PASS");
            }
            RenderPassKind::Forward => defines.set_flag("FORWARD_PASS"),
            RenderPassKind::DeferredGBuffer => defines.set_flag("GBUFFER_PASS"),
            RenderPassKind::DeferredLighting => defines.set_flag("DEFERRED_LIGHTING_PASS"),
            RenderPassKind::Skybox => defines.set_flag("SKYBOX_PASS"),
        }

        match self.blending {
            BlendingMode::Opaque => {}
            BlendingMode::AlphaTested => {
                defines.set_flag("ALPHA_TEST");
                defines.set("ALPHA_CUTOFF", ALPHA_CUTOFF);
            }
            BlendingMode::AlphaBlend => defines.set_flag("BLEND_ALPHA"),
            BlendingMode::Additive => defines.set_flag("BLEND_ADDITIVE"),
        }

        defines.merge(&self.extra);
        defines
    }

    /// Short human readable name used in logs and errors.
    #[must_use]
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{:?}/{:?}/{:?}/{:?}+{}",
            self.template().name,
            self.model,
            self.pass,
            self.blending,
            self.material.shading(),
            self.material.properties().len()
        )?;
        if !self.extra.is_empty() {
            write!(f, "/x{:08x}", self.extra.compute_hash() as u32)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::material::{MaterialProperty, PropertyKind, PropertySlot, ShadingModel};

    fn lit(properties: &[MaterialProperty]) -> UniqueMaterial {
        UniqueMaterial::new(
            properties.iter().map(|p| PropertySlot {
                property: *p,
                kind: if *p == MaterialProperty::NormalMap {
                    PropertyKind::Texture
                } else {
                    PropertyKind::Color
                },
            }),
            ShadingModel::Lit,
        )
    }

    #[test]
    fn shadow_pass_is_depth_only() {
        let key = VariantKey::new(
            lit(&[MaterialProperty::BaseColor]),
            ModelShaderKind::Static,
            RenderPassKind::DirectionalShadow,
            BlendingMode::Opaque,
        );
        let defines = key.defines();
        assert!(defines.contains("DEPTH_ONLY"));
        assert!(defines.contains("SHADOW_PASS"));
        assert!(!defines.contains("FORWARD_PASS"));
    }

    #[test]
    fn model_kind_defines() {
        let material = lit(&[MaterialProperty::BaseColor]);
        let skinned = VariantKey::new(
            material.clone(),
            ModelShaderKind::SkeletalInstanced,
            RenderPassKind::Forward,
            BlendingMode::Opaque,
        )
        .defines();
        assert!(skinned.contains("ENABLE_SKELETAL"));
        assert!(skinned.contains("ENABLE_INSTANCING"));
        assert_eq!(skinned.get("MAX_BONES"), Some("64"));

        let plain = VariantKey::new(
            material,
            ModelShaderKind::Static,
            RenderPassKind::Forward,
            BlendingMode::Opaque,
        )
        .defines();
        assert!(!plain.contains("ENABLE_SKELETAL"));
        assert!(!plain.contains("ENABLE_INSTANCING"));
    }

    #[test]
    fn keys_differing_in_any_part_are_distinct() {
        let base = VariantKey::new(
            lit(&[MaterialProperty::BaseColor]),
            ModelShaderKind::Static,
            RenderPassKind::Forward,
            BlendingMode::Opaque,
        );
        let mut variants = vec![base.clone()];
        variants.push(VariantKey {
            model: ModelShaderKind::Instanced,
            ..base.clone()
        });
        variants.push(VariantKey {
            pass: RenderPassKind::DeferredGBuffer,
            ..base.clone()
        });
        variants.push(VariantKey {
            blending: BlendingMode::AlphaTested,
            ..base.clone()
        });
        variants.push(base.clone().with_extra(ShaderDefines::new().with_flag("X")));
        variants.push(VariantKey {
            material: lit(&[MaterialProperty::BaseColor, MaterialProperty::NormalMap]),
            ..base
        });

        let unique: std::collections::BTreeSet<_> = variants.iter().collect();
        assert_eq!(unique.len(), variants.len());
    }

    #[test]
    fn extra_defines_win() {
        let key = VariantKey::new(
            lit(&[]),
            ModelShaderKind::Static,
            RenderPassKind::Forward,
            BlendingMode::AlphaTested,
        )
        .with_extra(ShaderDefines::new().with("ALPHA_CUTOFF", "0.25"));
        assert_eq!(key.defines().get("ALPHA_CUTOFF"), Some("0.25"));
    }
}
