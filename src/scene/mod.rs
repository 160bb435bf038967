//! Scene-side inputs of a frame.
//!
//! - [`Camera`] / [`Frustum`]: view parameters and culling volume
//! - [`MeshInstance`]: one drawable (geometry + material + transform)
//! - [`LightContainer`]: fixed-capacity light storage per light kind
//! - [`ParticleSystem`]: CPU particle simulation for one emitter
//! - [`Assets`]: material and emitter storage

pub mod assets;
pub mod camera;
pub mod light;
pub mod particles;

pub use assets::{Assets, EmitterId, MaterialId};
pub use camera::{Camera, Frustum};
pub use light::{DirectionalLight, Light, LightContainer, PointLight};
pub use particles::{
    BillboardInstance, BillboardParticle, EmitterDescription, EmitterModule, EmitterParams,
    Particle, ParticleSystem,
};

use glam::{Mat4, Vec3};
use slotmap::{SlotMap, new_key_type};

use crate::core::{GeometryHandle, TextureHandle};
use crate::settings::RenderSettings;
use crate::shader::ModelShaderKind;

new_key_type! {
    pub struct MeshKey;
    pub struct EmitterKey;
}

/// Bounding sphere in model space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    #[must_use]
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Sphere enclosing this one after `transform` (conservative under
    /// non-uniform scale).
    #[must_use]
    pub fn transformed(&self, transform: &Mat4) -> Self {
        let scale = transform
            .x_axis
            .truncate()
            .length()
            .max(transform.y_axis.truncate().length())
            .max(transform.z_axis.truncate().length());
        Self {
            center: transform.transform_point3(self.center),
            radius: self.radius * scale,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeshInstance {
    pub geometry: GeometryHandle,
    pub material: MaterialId,
    pub transform: Mat4,
    pub bounds: BoundingSphere,
    pub shader_kind: ModelShaderKind,
    pub casts_shadow: bool,
    /// Per-instance transforms for instanced kinds.
    pub instances: Vec<Mat4>,
    /// Joint palette for skeletal kinds.
    pub bones: Vec<Mat4>,
}

impl MeshInstance {
    #[must_use]
    pub fn new(geometry: GeometryHandle, material: MaterialId, transform: Mat4) -> Self {
        Self {
            geometry,
            material,
            transform,
            bounds: BoundingSphere::new(Vec3::ZERO, 1.0),
            shader_kind: ModelShaderKind::Static,
            casts_shadow: true,
            instances: Vec::new(),
            bones: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_bounds(mut self, bounds: BoundingSphere) -> Self {
        self.bounds = bounds;
        self
    }

    #[must_use]
    pub fn with_shader_kind(mut self, kind: ModelShaderKind) -> Self {
        self.shader_kind = kind;
        self
    }

    #[must_use]
    pub fn with_instances(mut self, instances: Vec<Mat4>) -> Self {
        self.instances = instances;
        self
    }

    #[must_use]
    pub fn with_bones(mut self, bones: Vec<Mat4>) -> Self {
        self.bones = bones;
        self
    }

    /// World-space bounds.
    #[must_use]
    pub fn world_bounds(&self) -> BoundingSphere {
        self.bounds.transformed(&self.transform)
    }

    /// Number of instances submitted per draw.
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        match self.shader_kind {
            ModelShaderKind::Instanced | ModelShaderKind::SkeletalInstanced => self.instances.len() as u32,
            _ => 1,
        }
    }
}

/// A placed emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterInstance {
    pub emitter: EmitterId,
    pub origin: Vec3,
    /// Simulation seed.
    pub seed: u64,
}

pub struct Scene {
    pub meshes: SlotMap<MeshKey, MeshInstance>,
    pub emitters: SlotMap<EmitterKey, EmitterInstance>,
    pub point_lights: LightContainer<PointLight>,
    pub directional_lights: LightContainer<DirectionalLight>,
    pub ambient: Vec3,
    /// Cubemap drawn by the skybox pass.
    pub skybox: Option<TextureHandle>,
}

impl Scene {
    /// Light capacities follow the settings the shaders are compiled for.
    #[must_use]
    pub fn new(settings: &RenderSettings) -> Self {
        Self {
            meshes: SlotMap::with_key(),
            emitters: SlotMap::with_key(),
            point_lights: LightContainer::new(settings.max_point_lights),
            directional_lights: LightContainer::new(settings.max_directional_lights),
            ambient: Vec3::splat(0.03),
            skybox: None,
        }
    }

    pub fn add_mesh(&mut self, mesh: MeshInstance) -> MeshKey {
        self.meshes.insert(mesh)
    }

    pub fn add_emitter(&mut self, emitter: EmitterId, origin: Vec3) -> EmitterKey {
        let seed = self.emitters.len() as u64;
        self.emitters.insert(EmitterInstance {
            emitter,
            origin,
            seed,
        })
    }

    /// The light whose direction drives the sun and the shadow map.
    #[must_use]
    pub fn sun(&self) -> Option<&DirectionalLight> {
        self.directional_lights.most_important()
    }
}
