//! Particle effect variants.
//!
//! Effects share the material variant cache: the emitter's module list is
//! folded into the key's extra defines and the model kind is
//! [`ModelShaderKind::Effect`].

use crate::core::GpuContext;
use crate::errors::Result;
use crate::scene::particles::{EmitterDescription, EmitterModule};

use super::compiler::{CompiledProgram, ShaderCompiler};
use super::defines::ShaderDefines;
use super::material::UniqueMaterial;
use super::variant::{BlendingMode, ModelShaderKind, RenderPassKind, VariantKey};

/// Define switched on by each module kind.
#[must_use]
pub fn module_define(module: &EmitterModule) -> &'static str {
    match module {
        EmitterModule::SpawnRate(_) => "EMITTER_SPAWN_RATE",
        EmitterModule::Lifetime { .. } => "EMITTER_LIFETIME",
        EmitterModule::InitialVelocity { .. } => "EMITTER_INITIAL_VELOCITY",
        EmitterModule::Gravity(_) => "EMITTER_GRAVITY",
        EmitterModule::ColorOverLife { .. } => "EMITTER_COLOR_OVER_LIFE",
        EmitterModule::SizeOverLife { .. } => "EMITTER_SIZE_OVER_LIFE",
        EmitterModule::TextureSheet { .. } => "EMITTER_TEXTURE_SHEET",
    }
}

/// Extra defines contributed by an emitter. Module order does not matter,
/// only which kinds are present and the sheet dimensions.
#[must_use]
pub fn emitter_defines(emitter: &EmitterDescription) -> ShaderDefines {
    let mut defines = ShaderDefines::new();
    for module in &emitter.modules {
        defines.set_flag(module_define(module));
        if let EmitterModule::TextureSheet { columns, rows, .. } = module {
            defines.set("SHEET_COLUMNS", (*columns).max(1));
            defines.set("SHEET_ROWS", (*rows).max(1));
        }
    }
    defines
}

pub struct EffectCompiler<'a> {
    compiler: &'a mut ShaderCompiler,
}

impl<'a> EffectCompiler<'a> {
    pub fn new(compiler: &'a mut ShaderCompiler) -> Self {
        Self { compiler }
    }

    #[must_use]
    pub fn variant_key(
        emitter: &EmitterDescription,
        material: &UniqueMaterial,
        pass: RenderPassKind,
        blending: BlendingMode,
    ) -> VariantKey {
        VariantKey::new(material.clone(), ModelShaderKind::Effect, pass, blending)
            .with_extra(emitter_defines(emitter))
    }

    pub fn get_or_compile(
        &mut self,
        gpu: &mut GpuContext,
        emitter: &EmitterDescription,
        material: &UniqueMaterial,
        pass: RenderPassKind,
        blending: BlendingMode,
    ) -> Result<&CompiledProgram> {
        let key = Self::variant_key(emitter, material, pass, blending);
        self.compiler.get_or_compile(gpu, &key)
    }
}

impl ShaderCompiler {
    /// Effect view over this cache.
    pub fn effects(&mut self) -> EffectCompiler<'_> {
        EffectCompiler::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HeadlessBackend;
    use crate::scene::assets::MaterialId;
    use crate::shader::material::{MaterialProperty, PropertyKind, PropertySlot, ShadingModel};
    use crate::shader::stage::ShaderStage;
    use glam::Vec4;

    fn material() -> UniqueMaterial {
        UniqueMaterial::new(
            [PropertySlot {
                property: MaterialProperty::BaseColor,
                kind: PropertyKind::Texture,
            }],
            ShadingModel::Unlit,
        )
    }

    fn emitter() -> EmitterDescription {
        EmitterDescription::new("smoke", MaterialId::default())
            .with_module(EmitterModule::SpawnRate(20.0))
            .with_module(EmitterModule::ColorOverLife {
                start: Vec4::ONE,
                end: Vec4::ZERO,
            })
    }

    #[test]
    fn modules_become_defines() {
        let sheet = emitter().with_module(EmitterModule::TextureSheet {
            columns: 4,
            rows: 2,
            frames_per_second: 12.0,
        });
        let defines = emitter_defines(&sheet);
        assert!(defines.contains("EMITTER_SPAWN_RATE"));
        assert!(defines.contains("EMITTER_COLOR_OVER_LIFE"));
        assert!(!defines.contains("EMITTER_GRAVITY"));
        assert_eq!(defines.get("SHEET_COLUMNS"), Some("4"));
        assert_eq!(defines.get("SHEET_ROWS"), Some("2"));
    }

    #[test]
    fn module_values_do_not_split_the_cache() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let mut compiler = ShaderCompiler::new();

        let slow = emitter();
        let mut fast = emitter();
        fast.modules[0] = EmitterModule::SpawnRate(500.0);

        let a = compiler
            .effects()
            .get_or_compile(&mut gpu, &slow, &material(), RenderPassKind::Forward, BlendingMode::AlphaBlend)
            .unwrap()
            .handle();
        let b = compiler
            .effects()
            .get_or_compile(&mut gpu, &fast, &material(), RenderPassKind::Forward, BlendingMode::AlphaBlend)
            .unwrap()
            .handle();
        assert_eq!(a, b);
        assert_eq!(probe.link_count(), 1);
    }

    #[test]
    fn texture_sheet_reaches_the_vertex_stage() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let mut compiler = ShaderCompiler::new();
        let sheet = emitter().with_module(EmitterModule::TextureSheet {
            columns: 4,
            rows: 4,
            frames_per_second: 12.0,
        });

        let program = compiler
            .effects()
            .get_or_compile(&mut gpu, &sheet, &material(), RenderPassKind::Forward, BlendingMode::Additive)
            .unwrap()
            .handle();

        let sources = probe.program_sources(program);
        let (_, vertex) = sources.iter().find(|(stage, _)| *stage == ShaderStage::Vertex).unwrap();
        assert!(vertex.contains("vec2(4.0, 4.0)"));
    }
}
