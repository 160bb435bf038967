//! Texture binding strategies.
//!
//! Material textures reach shaders either as 64-bit bindless handles (when the
//! backend exposes `ARB_bindless_texture`) or through a classic texture unit
//! plus sampler uniform. The two are a closed set, so they are modelled as an
//! enum and every operation matches on it.

use super::context::GpuContext;
use super::handles::TextureHandle;
use super::types::UniformValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureBinding {
    /// Resident texture addressed through a bindless handle.
    Bindless { texture: TextureHandle, handle: u64 },
    /// Texture bound to a unit and addressed through a sampler uniform.
    Extension { texture: TextureHandle },
}

impl TextureBinding {
    /// Chooses bindless access when the backend hands out a handle.
    pub fn for_texture(gpu: &mut GpuContext, texture: TextureHandle) -> Self {
        match gpu.bindless_handle(texture) {
            Some(handle) => Self::Bindless { texture, handle },
            None => Self::Extension { texture },
        }
    }

    #[inline]
    #[must_use]
    pub fn texture(&self) -> TextureHandle {
        match *self {
            Self::Bindless { texture, .. } | Self::Extension { texture } => texture,
        }
    }

    /// Makes the texture resident (bindless) or does nothing (unit-bound).
    /// Residency is dropped again when the texture is deleted.
    pub fn make_resident(&self, gpu: &mut GpuContext, resident: bool) {
        match *self {
            Self::Bindless { texture, handle } => gpu.set_texture_resident(texture, handle, resident),
            Self::Extension { .. } => {}
        }
    }

    /// Byte alignment of the value inside a uniform block.
    #[inline]
    #[must_use]
    pub fn uniform_alignment(&self) -> usize {
        match self {
            Self::Bindless { .. } => 8,
            Self::Extension { .. } => 4,
        }
    }

    /// Publishes the texture to the bound program under `name`.
    ///
    /// `unit` is only consumed by unit-bound textures. Bindless handles must
    /// be resident before a draw samples them.
    pub fn apply(&self, gpu: &mut GpuContext, name: &str, unit: u32) {
        match *self {
            Self::Bindless { handle, .. } => {
                gpu.set_uniform(name, UniformValue::BindlessHandle(handle));
            }
            Self::Extension { texture } => {
                gpu.bind_texture(unit, Some(texture));
                gpu.set_uniform(name, UniformValue::Sampler(unit));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::headless::{GpuCall, HeadlessBackend};
    use crate::shader::stage::ShaderStage;

    #[test]
    fn extension_binding_uses_a_unit() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let texture = probe.fake_texture(&mut gpu, 4, 4).unwrap();
        let binding = TextureBinding::for_texture(&mut gpu, texture);

        assert_eq!(binding, TextureBinding::Extension { texture });
        assert_eq!(binding.uniform_alignment(), 4);

        let vs = gpu.compile_stage(ShaderStage::Vertex, "void main() {}").unwrap();
        let program = gpu.link_program(&[vs]).unwrap();
        gpu.use_program(Some(program));

        binding.make_resident(&mut gpu, true);
        binding.apply(&mut gpu, "u_albedo", 2);
        assert_eq!(probe.uniform(program, "u_albedo"), Some(UniformValue::Sampler(2)));
        assert_eq!(gpu.state().texture(2), Some(texture));
        assert_eq!(
            probe.count(|c| matches!(c, GpuCall::BindTexture { unit: 2, .. })),
            1
        );
    }

    #[test]
    fn bindless_binding_is_made_resident() {
        let (mut gpu, probe) = HeadlessBackend::context();
        probe.configure(|o| o.bindless = true);
        let texture = probe.fake_texture(&mut gpu, 4, 4).unwrap();
        let binding = TextureBinding::for_texture(&mut gpu, texture);

        let TextureBinding::Bindless { handle, .. } = binding else {
            panic!("expected a bindless binding");
        };
        assert_eq!(binding.uniform_alignment(), 8);

        binding.make_resident(&mut gpu, true);
        assert!(probe.is_resident(handle));
        assert!(gpu.is_texture_resident(texture));
        binding.make_resident(&mut gpu, false);
        assert!(!probe.is_resident(handle));
    }

    #[test]
    fn deleting_a_resident_texture_releases_it() {
        let (mut gpu, probe) = HeadlessBackend::context();
        probe.configure(|o| o.bindless = true);
        let texture = probe.fake_texture(&mut gpu, 4, 4).unwrap();
        let binding = TextureBinding::for_texture(&mut gpu, texture);
        let TextureBinding::Bindless { handle, .. } = binding else {
            panic!("expected a bindless binding");
        };

        binding.make_resident(&mut gpu, true);
        gpu.delete_texture(texture);

        assert!(!probe.is_resident(handle));
        assert!(!gpu.is_texture_resident(texture));
    }
}
