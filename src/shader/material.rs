//! Materials and their structural identity.
//!
//! A [`Material`] carries values (colours, scalars, textures). Its
//! [`UniqueMaterial`] keeps only the shape: which properties are present,
//! what kind each one is, and the shading model. Shader variants are keyed by
//! the shape alone, so two materials differing only in values share every
//! compiled program.

use std::collections::BTreeMap;

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::core::{GpuContext, TextureBinding, TextureHandle};

use super::defines::ShaderDefines;
use super::variant::BlendingMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MaterialProperty {
    BaseColor,
    NormalMap,
    Metallic,
    Roughness,
    Occlusion,
    Emissive,
    Opacity,
    ClearCoat,
    Sheen,
    SubsurfaceColor,
}

impl MaterialProperty {
    pub const ALL: [Self; 10] = [
        Self::BaseColor,
        Self::NormalMap,
        Self::Metallic,
        Self::Roughness,
        Self::Occlusion,
        Self::Emissive,
        Self::Opacity,
        Self::ClearCoat,
        Self::Sheen,
        Self::SubsurfaceColor,
    ];

    /// Token used to build `ENABLE_<TOKEN>` / `<TOKEN>_FROM_TEXTURE`.
    #[must_use]
    pub const fn define_token(self) -> &'static str {
        match self {
            Self::BaseColor => "BASE_COLOR",
            Self::NormalMap => "NORMAL_MAPPING",
            Self::Metallic => "METALLIC",
            Self::Roughness => "ROUGHNESS",
            Self::Occlusion => "OCCLUSION",
            Self::Emissive => "EMISSIVE",
            Self::Opacity => "OPACITY",
            Self::ClearCoat => "CLEAR_COAT",
            Self::Sheen => "SHEEN",
            Self::SubsurfaceColor => "SUBSURFACE_COLOR",
        }
    }

    #[must_use]
    pub const fn uniform_name(self, kind: PropertyKind) -> &'static str {
        match (self, kind) {
            (Self::BaseColor, PropertyKind::Texture) => "u_base_color_map",
            (Self::BaseColor, _) => "u_base_color",
            (Self::NormalMap, _) => "u_normal_map",
            (Self::Metallic, _) => "u_metallic",
            (Self::Roughness, _) => "u_roughness",
            (Self::Occlusion, _) => "u_occlusion_map",
            (Self::Emissive, PropertyKind::Texture) => "u_emissive_map",
            (Self::Emissive, _) => "u_emissive",
            (Self::Opacity, _) => "u_opacity",
            (Self::ClearCoat, _) => "u_clear_coat",
            (Self::Sheen, _) => "u_sheen",
            (Self::SubsurfaceColor, _) => "u_subsurface_color",
        }
    }

    /// Whether the shader library can consume this property as `kind`.
    #[must_use]
    pub const fn accepts(self, kind: PropertyKind) -> bool {
        match self {
            Self::BaseColor | Self::Emissive => {
                matches!(kind, PropertyKind::Color | PropertyKind::Texture)
            }
            Self::NormalMap | Self::Occlusion => matches!(kind, PropertyKind::Texture),
            Self::Metallic | Self::Roughness | Self::Opacity | Self::ClearCoat => {
                matches!(kind, PropertyKind::Scalar)
            }
            Self::Sheen | Self::SubsurfaceColor => matches!(kind, PropertyKind::Color),
        }
    }

    /// Inherently texture-backed properties need no `_FROM_TEXTURE` switch.
    const fn texture_only(self) -> bool {
        matches!(self, Self::NormalMap | Self::Occlusion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    Scalar,
    Color,
    Texture,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    Scalar(f32),
    Color(Vec4),
    Texture(TextureHandle),
}

impl PropertyValue {
    #[must_use]
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Scalar(_) => PropertyKind::Scalar,
            Self::Color(_) => PropertyKind::Color,
            Self::Texture(_) => PropertyKind::Texture,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum ShadingModel {
    #[default]
    Lit,
    Unlit,
    Cloth,
    Subsurface,
    /// User lighting code, included from the named chunk.
    Custom(String),
}

impl ShadingModel {
    #[must_use]
    pub fn define_name(&self) -> &'static str {
        match self {
            Self::Lit => "SHADING_MODEL_LIT",
            Self::Unlit => "SHADING_MODEL_UNLIT",
            Self::Cloth => "SHADING_MODEL_CLOTH",
            Self::Subsurface => "SHADING_MODEL_SUBSURFACE",
            Self::Custom(_) => "SHADING_MODEL_CUSTOM",
        }
    }

    /// Stable id written into the G-buffer.
    #[must_use]
    pub fn id(&self) -> u32 {
        match self {
            Self::Lit => 0,
            Self::Unlit => 1,
            Self::Cloth => 2,
            Self::Subsurface => 3,
            Self::Custom(_) => 4,
        }
    }
}

/// One present property of a material shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertySlot {
    pub property: MaterialProperty,
    pub kind: PropertyKind,
}

/// Structural identity of a material.
///
/// Ordering is lexicographic over the sorted property slots, then the
/// shading model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct UniqueMaterial {
    properties: Vec<PropertySlot>,
    shading: ShadingModel,
}

impl UniqueMaterial {
    /// Builds a shape; duplicate properties keep the last kind given.
    pub fn new(slots: impl IntoIterator<Item = PropertySlot>, shading: ShadingModel) -> Self {
        let mut properties: Vec<PropertySlot> = Vec::new();
        for slot in slots {
            match properties.binary_search_by_key(&slot.property, |s| s.property) {
                Ok(idx) => properties[idx] = slot,
                Err(idx) => properties.insert(idx, slot),
            }
        }
        Self {
            properties,
            shading,
        }
    }

    #[inline]
    #[must_use]
    pub fn properties(&self) -> &[PropertySlot] {
        &self.properties
    }

    #[inline]
    #[must_use]
    pub fn shading(&self) -> &ShadingModel {
        &self.shading
    }

    #[must_use]
    pub fn contains(&self, property: MaterialProperty) -> bool {
        self.properties.iter().any(|s| s.property == property)
    }

    /// Defines contributed by the material shape.
    #[must_use]
    pub fn defines(&self) -> ShaderDefines {
        let mut defines = ShaderDefines::new();
        defines.set("MATERIAL_PROPERTY_COUNT", self.properties.len());
        for slot in &self.properties {
            let token = slot.property.define_token();
            defines.set_flag(&format!("ENABLE_{token}"));
            if slot.kind == PropertyKind::Texture && !slot.property.texture_only() {
                defines.set_flag(&format!("{token}_FROM_TEXTURE"));
            }
        }
        defines.set_flag(self.shading.define_name());
        defines.set("SHADING_MODEL_ID", self.shading.id());
        if let ShadingModel::Custom(chunk) = &self.shading {
            defines.set("CUSTOM_SHADING_CHUNK", chunk);
        }
        defines
    }
}

/// A material as authored: values plus render flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    properties: BTreeMap<MaterialProperty, PropertyValue>,
    pub shading: ShadingModel,
    pub blending: BlendingMode,
    pub double_sided: bool,
}

impl Material {
    #[must_use]
    pub fn new(name: impl Into<String>, shading: ShadingModel) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
            shading,
            blending: BlendingMode::Opaque,
            double_sided: false,
        }
    }

    #[must_use]
    pub fn with(mut self, property: MaterialProperty, value: PropertyValue) -> Self {
        self.set(property, value);
        self
    }

    #[must_use]
    pub fn with_blending(mut self, blending: BlendingMode) -> Self {
        self.blending = blending;
        self
    }

    /// Sets a property. Values of a kind the shader library cannot consume
    /// are dropped with a warning.
    pub fn set(&mut self, property: MaterialProperty, value: PropertyValue) {
        if !property.accepts(value.kind()) {
            log::warn!(
                "Material '{}': {property:?} cannot be a {:?}; ignored",
                self.name,
                value.kind()
            );
            return;
        }
        self.properties.insert(property, value);
    }

    pub fn remove(&mut self, property: MaterialProperty) -> Option<PropertyValue> {
        self.properties.remove(&property)
    }

    #[must_use]
    pub fn get(&self, property: MaterialProperty) -> Option<&PropertyValue> {
        self.properties.get(&property)
    }

    /// The material's shape, independent of its values.
    #[must_use]
    pub fn unique(&self) -> UniqueMaterial {
        UniqueMaterial::new(
            self.properties.iter().map(|(property, value)| PropertySlot {
                property: *property,
                kind: value.kind(),
            }),
            self.shading.clone(),
        )
    }

    /// Uploads every property into the bound program. Textures occupy
    /// consecutive units starting at `first_unit`; returns the next free unit.
    pub fn apply(&self, gpu: &mut GpuContext, first_unit: u32) -> u32 {
        let mut unit = first_unit;
        for (property, value) in &self.properties {
            let name = property.uniform_name(value.kind());
            match *value {
                PropertyValue::Scalar(v) => gpu.set_uniform(name, v),
                PropertyValue::Color(c) => match property {
                    MaterialProperty::BaseColor => gpu.set_uniform(name, c),
                    _ => gpu.set_uniform(name, c.truncate()),
                },
                PropertyValue::Texture(texture) => {
                    let binding = TextureBinding::for_texture(gpu, texture);
                    binding.make_resident(gpu, true);
                    binding.apply(gpu, name, unit);
                    unit += 1;
                }
            }
        }
        unit
    }
}
