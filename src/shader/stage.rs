use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Maps a source file extension (without the dot) to its stage.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext {
            "vert" | "vs" => Self::Vertex,
            "tesc" | "tcs" => Self::TessControl,
            "tese" | "tes" => Self::TessEval,
            "geom" | "gs" => Self::Geometry,
            "frag" | "fs" => Self::Fragment,
            "comp" | "cs" => Self::Compute,
            _ => return None,
        })
    }

    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessControl => "tessellation control",
            Self::TessEval => "tessellation evaluation",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_map_to_stages() {
        let cases = [
            ("a.vert", ShaderStage::Vertex),
            ("a.vs", ShaderStage::Vertex),
            ("a.tesc", ShaderStage::TessControl),
            ("a.tcs", ShaderStage::TessControl),
            ("a.tese", ShaderStage::TessEval),
            ("a.tes", ShaderStage::TessEval),
            ("a.geom", ShaderStage::Geometry),
            ("a.gs", ShaderStage::Geometry),
            ("a.frag", ShaderStage::Fragment),
            ("a.fs", ShaderStage::Fragment),
            ("a.comp", ShaderStage::Compute),
            ("a.cs", ShaderStage::Compute),
        ];
        for (path, stage) in cases {
            assert_eq!(ShaderStage::from_path(path), Some(stage), "{path}");
        }
    }

    #[test]
    fn unknown_extension_has_no_stage() {
        assert_eq!(ShaderStage::from_path("shader.glsl"), None);
        assert_eq!(ShaderStage::from_path("noext"), None);
    }
}
