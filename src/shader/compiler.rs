//! Shader Variant Compiler
//!
//! Turns a [`VariantKey`] into a linked GPU program and owns the cache that
//! guarantees at most one program per key.
//!
//! ## Two compilation paths
//!
//! | Method | Use case | Cache key |
//! |--------|----------|-----------|
//! | [`ShaderCompiler::get_or_compile`]         | Material variants           | [`VariantKey`] |
//! | [`ShaderCompiler::get_or_compile_utility`] | Fullscreen / utility passes | template + defines |
//!
//! A variant whose build failed is remembered and reported as
//! [`RenderError::UnusableVariant`] on later requests, so a broken material
//! costs one driver round trip rather than one per frame.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use crate::core::{GpuContext, ProgramHandle, ShaderHandle};
use crate::errors::{RenderError, Result};

use super::assembler::ShaderAssembler;
use super::defines::ShaderDefines;
use super::stage::ShaderStage;
use super::variant::{ModelShaderKind, ProgramTemplate, VariantKey};

/// A linked program together with the stage objects it was built from.
///
/// Immutable once created; owned by the cache entry that produced it.
#[derive(Debug)]
pub struct CompiledProgram {
    handle: ProgramHandle,
    stages: SmallVec<[(ShaderStage, ShaderHandle); 3]>,
    label: String,
    fingerprint: u128,
}

impl CompiledProgram {
    #[inline]
    #[must_use]
    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    #[must_use]
    pub fn stages(&self) -> impl Iterator<Item = ShaderStage> + '_ {
        self.stages.iter().map(|(stage, _)| *stage)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// xxh3 of the assembled sources of every stage.
    #[must_use]
    pub fn fingerprint(&self) -> u128 {
        self.fingerprint
    }

    fn release(self, gpu: &mut GpuContext) {
        gpu.delete_program(self.handle);
        for (_, shader) in self.stages {
            gpu.delete_shader(shader);
        }
    }
}

/// Cache counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompilerStats {
    /// Programs built (one per successful `link`).
    pub compiles: u64,
    /// Requests answered from the cache.
    pub hits: u64,
    /// Build attempts that failed.
    pub failures: u64,
}

type UtilityKey = (ProgramTemplate, ShaderDefines);

pub struct ShaderCompiler {
    assembler: ShaderAssembler,
    programs: FxHashMap<VariantKey, CompiledProgram>,
    utilities: FxHashMap<UtilityKey, CompiledProgram>,
    failed: FxHashSet<VariantKey>,
    failed_utilities: FxHashSet<UtilityKey>,
    stats: CompilerStats,
    dump_shaders: bool,
}

impl Default for ShaderCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_assembler(ShaderAssembler::new())
    }

    #[must_use]
    pub fn with_assembler(assembler: ShaderAssembler) -> Self {
        Self {
            assembler,
            programs: FxHashMap::default(),
            utilities: FxHashMap::default(),
            failed: FxHashSet::default(),
            failed_utilities: FxHashSet::default(),
            stats: CompilerStats::default(),
            dump_shaders: false,
        }
    }

    /// Logs every newly assembled stage at `debug` level.
    pub fn set_dump_shaders(&mut self, enabled: bool) {
        self.dump_shaders = enabled;
    }

    #[must_use]
    pub fn assembler(&self) -> &ShaderAssembler {
        &self.assembler
    }

    /// Registers a source override. Earlier failures are forgotten, since the
    /// new source may fix them; programs already built are kept.
    pub fn register_source(&mut self, name: &str, source: impl Into<String>) {
        self.assembler.register_source(name, source);
        self.clear_failures();
    }

    #[must_use]
    pub fn stats(&self) -> CompilerStats {
        self.stats
    }

    /// Number of cached material variants.
    #[must_use]
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn utility_count(&self) -> usize {
        self.utilities.len()
    }

    #[must_use]
    pub fn program(&self, key: &VariantKey) -> Option<&CompiledProgram> {
        self.programs.get(key)
    }

    #[must_use]
    pub fn is_unusable(&self, key: &VariantKey) -> bool {
        self.failed.contains(key)
    }

    pub fn clear_failures(&mut self) {
        self.failed.clear();
        self.failed_utilities.clear();
    }

    // ─── Material variants ─────────────────────────────────────────────

    /// Returns the program for `key`, building it on first request.
    ///
    /// Equal keys always yield the same cached instance. Nothing is cached
    /// when any stage fails to assemble, compile or link.
    pub fn get_or_compile(&mut self, gpu: &mut GpuContext, key: &VariantKey) -> Result<&CompiledProgram> {
        if self.programs.contains_key(key) {
            self.stats.hits += 1;
            return Ok(&self.programs[key]);
        }
        if self.failed.contains(key) {
            return Err(RenderError::UnusableVariant { label: key.label() });
        }

        let label = key.label();
        match self.compile_program(gpu, key.template(), &key.defines(), &label) {
            Ok(program) => {
                self.stats.compiles += 1;
                log::debug!("Compiled variant {label} ({} cached)", self.programs.len() + 1);
                Ok(self.programs.entry(key.clone()).or_insert(program))
            }
            Err(err) => {
                self.stats.failures += 1;
                self.failed.insert(key.clone());
                log::warn!("Variant {label} is unusable: {err}");
                Err(err)
            }
        }
    }

    /// Assembled source of every stage of `key`, without touching the GPU.
    pub fn assemble_sources(&self, key: &VariantKey) -> Result<Vec<(ShaderStage, String)>> {
        self.assemble_template(key.template(), &key.defines())
            .map(SmallVec::into_vec)
    }

    // ─── Utility programs ──────────────────────────────────────────────

    /// Programs that do not depend on a material (post-processing, lighting
    /// resolve, placeholder), cached by template and defines.
    pub fn get_or_compile_utility(
        &mut self,
        gpu: &mut GpuContext,
        template: ProgramTemplate,
        defines: &ShaderDefines,
    ) -> Result<&CompiledProgram> {
        let key = (template, defines.clone());
        if self.utilities.contains_key(&key) {
            self.stats.hits += 1;
            return Ok(&self.utilities[&key]);
        }

        let label = if defines.is_empty() {
            template.name.to_owned()
        } else {
            format!("{}[x{:08x}]", template.name, defines.compute_hash() as u32)
        };
        if self.failed_utilities.contains(&key) {
            return Err(RenderError::UnusableVariant { label });
        }

        match self.compile_program(gpu, template, defines, &label) {
            Ok(program) => {
                self.stats.compiles += 1;
                log::debug!("Compiled utility program {label}");
                Ok(self.utilities.entry(key).or_insert(program))
            }
            Err(err) => {
                self.stats.failures += 1;
                log::warn!("Utility program {label} is unusable: {err}");
                self.failed_utilities.insert(key);
                Err(err)
            }
        }
    }

    /// Flat magenta program drawn in place of an unusable variant.
    pub fn placeholder(&mut self, gpu: &mut GpuContext, model: ModelShaderKind) -> Result<&CompiledProgram> {
        let mut defines = ShaderDefines::new();
        model.add_defines(&mut defines);
        self.get_or_compile_utility(gpu, ProgramTemplate::error_for(model), &defines)
    }

    // ─── Teardown ──────────────────────────────────────────────────────

    /// Deletes every cached program and stage object.
    pub fn destroy(&mut self, gpu: &mut GpuContext) {
        let count = self.programs.len() + self.utilities.len();
        for (_, program) in self.programs.drain() {
            program.release(gpu);
        }
        for (_, program) in self.utilities.drain() {
            program.release(gpu);
        }
        self.clear_failures();
        if count > 0 {
            log::debug!("Released {count} shader programs");
        }
    }

    // ─── Internals ─────────────────────────────────────────────────────

    fn assemble_template(
        &self,
        template: ProgramTemplate,
        defines: &ShaderDefines,
    ) -> Result<SmallVec<[(ShaderStage, String); 3]>> {
        template
            .stages
            .iter()
            .map(|file| {
                let stage = ShaderStage::from_path(file).ok_or_else(|| RenderError::SourceAssembly {
                    template: (*file).to_owned(),
                    reason: "file extension names no shader stage".into(),
                })?;
                Ok((stage, self.assembler.assemble_template(file, defines)?))
            })
            .collect()
    }

    fn compile_program(
        &self,
        gpu: &mut GpuContext,
        template: ProgramTemplate,
        defines: &ShaderDefines,
        label: &str,
    ) -> Result<CompiledProgram> {
        let sources = self.assemble_template(template, defines)?;

        let mut hasher = Xxh3::new();
        for (_, source) in &sources {
            hasher.update(source.as_bytes());
        }
        let fingerprint = hasher.digest128();

        if self.dump_shaders {
            for (stage, source) in &sources {
                log::debug!("{label} {stage} stage [{fingerprint:032x}]\n{source}");
            }
        }

        let mut stages: SmallVec<[(ShaderStage, ShaderHandle); 3]> = SmallVec::new();
        for (stage, source) in &sources {
            match gpu.compile_stage(*stage, source) {
                Ok(shader) => stages.push((*stage, shader)),
                Err(diagnostic) => {
                    for (_, shader) in stages {
                        gpu.delete_shader(shader);
                    }
                    return Err(RenderError::ShaderCompile {
                        stage: *stage,
                        label: label.to_owned(),
                        diagnostic,
                    });
                }
            }
        }

        let handles: SmallVec<[ShaderHandle; 3]> = stages.iter().map(|(_, shader)| *shader).collect();
        match gpu.link_program(&handles) {
            Ok(handle) => Ok(CompiledProgram {
                handle,
                stages,
                label: label.to_owned(),
                fingerprint,
            }),
            Err(diagnostic) => {
                for shader in handles {
                    gpu.delete_shader(shader);
                }
                Err(RenderError::ShaderLink {
                    label: label.to_owned(),
                    diagnostic,
                })
            }
        }
    }
}
