//! Shader source assembly.
//!
//! GLSL sources are minijinja templates with a shader-friendly syntax:
//!
//! | Construct   | Syntax                          |
//! |-------------|---------------------------------|
//! | block       | `{$ if ENABLE_SHADOWS $}`       |
//! | expression  | `{{ MAX_POINT_LIGHTS }}`        |
//! | line block  | `$$ for i in range(4)`          |
//! | include     | `{$ include "lighting" $}`      |
//!
//! Includes resolve against `chunks/` and default to the `.glsl` extension.
//! Every define is visible to the template as a variable and is also
//! injected as a `#define` line right after the `#version` directive, so the
//! body can use either template conditionals or the preprocessor.
//!
//! Sources are looked up in the runtime overrides registered through
//! [`ShaderAssembler::register_source`] first, then in the built-in library
//! embedded from `src/shader/library`.

use std::borrow::Cow;
use std::sync::Arc;

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use parking_lot::RwLock;
use rust_embed::RustEmbed;
use rustc_hash::FxHashMap;

use crate::errors::{RenderError, Result};

use super::defines::ShaderDefines;

/// Version directive used when a source does not declare one.
pub const DEFAULT_VERSION: &str = "#version 330 core";

#[derive(RustEmbed)]
#[folder = "src/shader/library"]
struct ShaderLibrary;

type SourceOverrides = Arc<RwLock<FxHashMap<String, String>>>;

pub struct ShaderAssembler {
    env: Environment<'static>,
    overrides: SourceOverrides,
}

impl Default for ShaderAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn file_name(name: &str) -> Cow<'_, str> {
    if std::path::Path::new(name).extension().is_some() {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.glsl"))
    }
}

fn lookup(overrides: &SourceOverrides, name: &str) -> Option<String> {
    let name = file_name(name);
    if let Some(source) = overrides.read().get(name.as_ref()) {
        return Some(source.clone());
    }
    ShaderLibrary::get(&name).and_then(|file| String::from_utf8(file.data.into_owned()).ok())
}

impl ShaderAssembler {
    #[must_use]
    pub fn new() -> Self {
        let overrides: SourceOverrides = Arc::default();
        let mut env = Environment::new();

        match SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
        {
            Ok(syntax) => env.set_syntax(syntax),
            Err(err) => log::error!("Shader template syntax rejected, using defaults: {err}"),
        }
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(UndefinedBehavior::SemiStrict);
        env.set_path_join_callback(|name, _parent| format!("chunks/{name}").into());

        let loader_sources = overrides.clone();
        env.set_loader(move |name| Ok(lookup(&loader_sources, name)));

        Self { env, overrides }
    }

    /// Registers (or replaces) a source under `name`, shadowing the built-in
    /// library. Chunks are registered as `chunks/<name>.glsl`.
    pub fn register_source(&mut self, name: &str, source: impl Into<String>) {
        self.overrides
            .write()
            .insert(file_name(name).into_owned(), source.into());
        self.env.clear_templates();
    }

    /// Raw (unassembled) source of a library or registered template.
    pub fn source(&self, name: &str) -> Result<String> {
        lookup(&self.overrides, name).ok_or_else(|| RenderError::SourceAssembly {
            template: name.to_owned(),
            reason: "template not found".into(),
        })
    }

    /// Assembles a named library template.
    pub fn assemble_template(&self, name: &str, defines: &ShaderDefines) -> Result<String> {
        let base = self.source(name)?;
        self.assemble(name, &base, defines)
    }

    /// Produces final GLSL from `base_source` and `defines`.
    ///
    /// The output depends on nothing but the arguments and the registered
    /// sources, so equal inputs always assemble byte-identically.
    pub fn assemble(&self, name: &str, base_source: &str, defines: &ShaderDefines) -> Result<String> {
        let body = self
            .env
            .render_named_str(name, base_source, defines.to_map())
            .map_err(|err| {
                let reason = if err.kind() == ErrorKind::TemplateNotFound {
                    format!("unresolved include: {err}")
                } else {
                    err.to_string()
                };
                RenderError::SourceAssembly {
                    template: name.to_owned(),
                    reason,
                }
            })?;

        let (version, body) = split_version(&body);

        let mut out = String::with_capacity(body.len() + 32 * (defines.len() + 1));
        out.push_str(version);
        out.push('\n');
        for (key, value) in defines.iter() {
            out.push_str("#define ");
            out.push_str(key);
            out.push(' ');
            out.push_str(value);
            out.push('\n');
        }
        out.push_str(body);
        Ok(out)
    }
}

/// Splits off a leading `#version` line; blank lines before it are dropped.
fn split_version(source: &str) -> (&str, &str) {
    let trimmed = source.trim_start();
    if trimmed.starts_with("#version") {
        match trimmed.split_once('\n') {
            Some((version, rest)) => (version.trim_end(), rest),
            None => (trimmed.trim_end(), ""),
        }
    } else {
        (DEFAULT_VERSION, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_follow_the_version_line() {
        let assembler = ShaderAssembler::new();
        let defines = ShaderDefines::new()
            .with_flag("ENABLE_NORMAL_MAPPING")
            .with("MATERIAL_PROPERTY_COUNT", 2);

        let out = assembler
            .assemble("inline", "#version 410 core\nvoid main() {}\n", &defines)
            .unwrap();

        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "#version 410 core");
        assert_eq!(lines[1], "#define ENABLE_NORMAL_MAPPING 1");
        assert_eq!(lines[2], "#define MATERIAL_PROPERTY_COUNT 2");
        assert_eq!(lines[3], "void main() {}");
    }

    #[test]
    fn missing_version_gets_the_default() {
        let assembler = ShaderAssembler::new();
        let out = assembler
            .assemble("inline", "void main() {}", &ShaderDefines::new())
            .unwrap();
        assert!(out.starts_with(DEFAULT_VERSION));
    }

    #[test]
    fn conditionals_see_defines() {
        let assembler = ShaderAssembler::new();
        let source = "{$ if ENABLE_FOG $}fog();{$ endif $}\nbase();";

        let with = assembler
            .assemble("inline", source, &ShaderDefines::new().with_flag("ENABLE_FOG"))
            .unwrap();
        let without = assembler
            .assemble("inline", source, &ShaderDefines::new())
            .unwrap();

        assert!(with.contains("fog();"));
        assert!(!without.contains("fog();"));
    }

    #[test]
    fn includes_resolve_registered_chunks() {
        let mut assembler = ShaderAssembler::new();
        assembler.register_source("chunks/helpers", "float helper() { return {{ SCALE }}; }");

        let out = assembler
            .assemble(
                "inline",
                "{$ include \"helpers\" $}\nvoid main() {}",
                &ShaderDefines::new().with("SCALE", "2.0"),
            )
            .unwrap();
        assert!(out.contains("float helper() { return 2.0; }"));
    }

    #[test]
    fn unresolved_include_is_an_assembly_error() {
        let assembler = ShaderAssembler::new();
        let err = assembler
            .assemble("broken", "{$ include \"does_not_exist\" $}", &ShaderDefines::new())
            .unwrap_err();

        match err {
            RenderError::SourceAssembly { template, .. } => assert_eq!(template, "broken"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn assembly_is_deterministic() {
        let assembler = ShaderAssembler::new();
        let defines = ShaderDefines::new().with_flag("ENABLE_NORMAL_MAPPING");
        let a = assembler.assemble_template("mesh.frag", &defines).unwrap();
        let b = assembler.assemble_template("mesh.frag", &defines).unwrap();
        assert_eq!(a, b);
    }
}
