//! Particle Pass
//!
//! Advances one [`ParticleSystem`] per placed emitter in `update` and draws
//! each system as instanced camera-facing quads in `draw`.
//!
//! The simulation state lives here rather than in the scene: the scene only
//! says where emitters are, the pass decides how many particles exist. A
//! system is created the first frame its emitter is seen and dropped the
//! first frame it is gone.
//!
//! # State Handoff
//!
//! Depth writes stay off; the blend mode of the last drawn emitter remains
//! set.

use rustc_hash::FxHashMap;

use crate::core::{
    AttachmentDesc, CompareFunction, CullMode, GeometryData, GeometryHandle, GpuContext,
    RasterState, RenderTarget, TextureHandle, VertexAttribute,
};
use crate::errors::Result;
use crate::scene::{BillboardInstance, BillboardParticle, EmitterId, EmitterKey, ParticleSystem};
use crate::shader::{ModelShaderKind, RenderPassKind};

use super::mesh::resolve_variant;
use super::pass::{DrawContext, RenderPass, UpdateContext};

/// Bytes per [`BillboardInstance`].
pub const BILLBOARD_STRIDE: u32 = size_of::<BillboardInstance>() as u32;

/// Instance attributes of `particle.vert`.
pub const BILLBOARD_LAYOUT: [VertexAttribute; 5] = [
    VertexAttribute {
        location: 1,
        components: 3,
        offset: 0,
    },
    VertexAttribute {
        location: 2,
        components: 1,
        offset: 12,
    },
    VertexAttribute {
        location: 3,
        components: 4,
        offset: 16,
    },
    VertexAttribute {
        location: 4,
        components: 1,
        offset: 32,
    },
    VertexAttribute {
        location: 5,
        components: 1,
        offset: 36,
    },
];

#[rustfmt::skip]
const QUAD_CORNERS: [f32; 8] = [
    -0.5, -0.5,
     0.5, -0.5,
     0.5,  0.5,
    -0.5,  0.5,
];

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

struct Batch {
    emitter: EmitterId,
    distance: f32,
    instances: Vec<BillboardInstance>,
}

pub struct ParticlePass {
    target: RenderTarget,
    quad: GeometryHandle,
    capacity: usize,
    systems: FxHashMap<EmitterKey, ParticleSystem<BillboardParticle>>,
    batches: Vec<Batch>,
}

impl ParticlePass {
    /// Draws into `color`, depth-testing against `depth`.
    pub fn new(
        gpu: &mut GpuContext,
        size: (u32, u32),
        color: TextureHandle,
        depth: TextureHandle,
        capacity: usize,
    ) -> Result<Self> {
        let quad = gpu.create_geometry(&GeometryData {
            label: "billboard quad".into(),
            vertices: QUAD_CORNERS.to_vec(),
            stride: 8,
            attributes: smallvec::smallvec![VertexAttribute {
                location: 0,
                components: 2,
                offset: 0,
            }],
            indices: Some(QUAD_INDICES.to_vec()),
        })?;
        let target = match RenderTarget::create(
            gpu,
            "particles",
            size,
            &[AttachmentDesc::Shared(color)],
            Some(AttachmentDesc::Shared(depth)),
        ) {
            Ok(target) => target,
            Err(err) => {
                gpu.delete_geometry(quad);
                return Err(err);
            }
        };
        Ok(Self {
            target,
            quad,
            capacity,
            systems: FxHashMap::default(),
            batches: Vec::new(),
        })
    }

    /// The live simulation of a placed emitter.
    #[must_use]
    pub fn system(&self, key: EmitterKey) -> Option<&ParticleSystem<BillboardParticle>> {
        self.systems.get(&key)
    }

    /// Number of particles alive across all emitters.
    #[must_use]
    pub fn particle_count(&self) -> usize {
        self.systems.values().map(ParticleSystem::len).sum()
    }
}

impl RenderPass for ParticlePass {
    fn name(&self) -> &str {
        "particles"
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) {
        let emitters = &ctx.scene.emitters;
        self.systems.retain(|key, _| emitters.contains_key(*key));
        self.batches.clear();

        for (key, placed) in emitters {
            let Some(description) = ctx.assets.emitter(placed.emitter) else {
                continue;
            };
            let system = self.systems.entry(key).or_insert_with(|| {
                log::debug!("Particle system '{}' started", description.name);
                ParticleSystem::new(description, self.capacity, placed.seed)
            });
            system.set_origin(placed.origin);
            system.update(ctx.frame.dt);

            if !system.is_empty() {
                self.batches.push(Batch {
                    emitter: placed.emitter,
                    distance: ctx.camera.distance_squared(placed.origin),
                    instances: system.instances(),
                });
            }
        }
        self.batches
            .sort_by(|a, b| b.distance.total_cmp(&a.distance));
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        if self.batches.is_empty() {
            return Ok(());
        }
        self.target.bind(ctx.gpu);
        ctx.gpu.apply_raster(&RasterState {
            depth_write: false,
            depth_func: CompareFunction::Lequal,
            cull: CullMode::None,
            ..RasterState::OPAQUE
        });

        let policy = ctx.settings.variant_failure;
        for batch in &self.batches {
            let assets = ctx.assets;
            let Some(description) = assets.emitter(batch.emitter) else {
                continue;
            };
            let Some(material) = assets.material(description.material) else {
                continue;
            };

            let attempt = ctx
                .compiler
                .effects()
                .get_or_compile(
                    ctx.gpu,
                    description,
                    &material.unique(),
                    RenderPassKind::Forward,
                    description.blending,
                )
                .map(|p| p.handle());
            let Some(program) = resolve_variant(
                ctx.gpu,
                ctx.compiler,
                attempt,
                ModelShaderKind::Effect,
                policy,
            )?
            else {
                continue;
            };

            ctx.gpu.use_program(Some(program.handle));
            ctx.apply_uniforms();
            ctx.gpu.set_blending(description.blending.blend_mode());
            if !program.placeholder {
                material.apply(ctx.gpu, 0);
            }

            ctx.gpu.upload_instances(
                self.quad,
                bytemuck::cast_slice(&batch.instances),
                BILLBOARD_STRIDE,
                &BILLBOARD_LAYOUT,
            )?;
            ctx.gpu.draw(self.quad, batch.instances.len() as u32);
        }
        Ok(())
    }

    fn target(&self) -> Option<&RenderTarget> {
        Some(&self.target)
    }

    fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<()> {
        self.target.resize(gpu, width, height)
    }

    fn destroy(self: Box<Self>, gpu: &mut GpuContext) {
        gpu.delete_geometry(self.quad);
        self.target.destroy(gpu);
    }
}
