//! Mesh submission shared by every pass that draws scene geometry.
//!
//! Passes pick their draw list in `update` ([`collect`]) and hand it to
//! [`submit`] in `draw`. Submission resolves the variant for each draw,
//! binds the program (running the frame uniform setters once per program
//! switch), uploads material values and per-instance data, and issues the
//! draw call.

use glam::Mat4;

use crate::core::{CullMode, GpuContext, ProgramHandle, VertexAttribute};
use crate::errors::Result;
use crate::scene::{Assets, Camera, Frustum, MeshInstance, MeshKey, Scene};
use crate::settings::VariantFailurePolicy;
use crate::shader::{
    Material, ModelShaderKind, RenderPassKind, ShaderCompiler, ShaderDefines, VariantKey,
};

use super::pass::DrawContext;

/// Bytes per instance: one column-major `mat4`.
pub const INSTANCE_STRIDE: u32 = 64;

/// Instance attribute locations consumed by the `instancing` chunk.
pub const INSTANCE_LAYOUT: [VertexAttribute; 4] = [
    VertexAttribute {
        location: 6,
        components: 4,
        offset: 0,
    },
    VertexAttribute {
        location: 7,
        components: 4,
        offset: 16,
    },
    VertexAttribute {
        location: 8,
        components: 4,
        offset: 32,
    },
    VertexAttribute {
        location: 9,
        components: 4,
        offset: 48,
    },
];

/// One selected draw and its squared distance to the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    pub mesh: MeshKey,
    pub distance: f32,
}

/// Selects the meshes a pass draws this frame.
///
/// Meshes whose material is missing are dropped. Instanced meshes skip the
/// frustum test because their bounds only cover the base transform.
pub fn collect(
    scene: &Scene,
    assets: &Assets,
    camera: &Camera,
    frustum: Option<&Frustum>,
    filter: impl Fn(&MeshInstance, &Material) -> bool,
) -> Vec<DrawItem> {
    let mut items = Vec::new();
    for (key, mesh) in &scene.meshes {
        let Some(material) = assets.material(mesh.material) else {
            continue;
        };
        if !filter(mesh, material) {
            continue;
        }
        let bounds = mesh.world_bounds();
        if let Some(frustum) = frustum
            && mesh.instances.is_empty()
            && !frustum.intersects_sphere(bounds.center, bounds.radius)
        {
            continue;
        }
        items.push(DrawItem {
            mesh: key,
            distance: camera.distance_squared(bounds.center),
        });
    }
    items
}

/// Orders draws farthest first.
pub fn sort_back_to_front(items: &mut [DrawItem]) {
    items.sort_by(|a, b| b.distance.total_cmp(&a.distance));
}

/// Orders draws nearest first.
pub fn sort_front_to_back(items: &mut [DrawItem]) {
    items.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}

/// A program picked for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedProgram {
    pub handle: ProgramHandle,
    /// The error program stands in for an unusable variant.
    pub placeholder: bool,
}

/// Applies the variant failure policy to a compile attempt.
///
/// `Ok(None)` means the draw is left out. Errors other than variant
/// failures always propagate.
pub fn resolve_variant(
    gpu: &mut GpuContext,
    compiler: &mut ShaderCompiler,
    attempt: Result<ProgramHandle>,
    model: ModelShaderKind,
    policy: VariantFailurePolicy,
) -> Result<Option<ResolvedProgram>> {
    let error = match attempt {
        Ok(handle) => {
            return Ok(Some(ResolvedProgram {
                handle,
                placeholder: false,
            }));
        }
        Err(error) if error.is_variant_failure() => error,
        Err(error) => return Err(error),
    };

    match policy {
        VariantFailurePolicy::Abort => Err(error),
        VariantFailurePolicy::Skip => Ok(None),
        VariantFailurePolicy::Placeholder => match compiler.placeholder(gpu, model) {
            Ok(program) => Ok(Some(ResolvedProgram {
                handle: program.handle(),
                placeholder: true,
            })),
            Err(placeholder_error) => {
                log::warn!("Error program unavailable ({placeholder_error}); draw skipped");
                Ok(None)
            }
        },
    }
}

/// Per-pass parameters of [`submit`].
pub struct Submission<'a> {
    pub pass: RenderPassKind,
    pub extra: &'a ShaderDefines,
    /// First texture unit free for material textures.
    pub first_unit: u32,
    /// Apply each material's blend mode instead of leaving blending alone.
    pub blend: bool,
}

/// Draws `items` in order. Returns the number of draw calls issued.
///
/// `per_program` runs after the frame uniform setters every time the bound
/// program changes; passes use it for their own uniforms and inputs.
pub fn submit(
    ctx: &mut DrawContext<'_>,
    items: &[DrawItem],
    submission: &Submission<'_>,
    per_program: &mut dyn FnMut(&mut GpuContext),
) -> Result<u32> {
    let policy = ctx.settings.variant_failure;
    let mut current: Option<ProgramHandle> = None;
    let mut draws = 0;

    for item in items {
        let scene = ctx.scene;
        let assets = ctx.assets;
        let Some(mesh) = scene.meshes.get(item.mesh) else {
            continue;
        };
        let Some(material) = assets.material(mesh.material) else {
            continue;
        };

        let key = VariantKey::new(
            material.unique(),
            mesh.shader_kind,
            submission.pass,
            material.blending,
        )
        .with_extra(submission.extra.clone());
        let attempt = ctx.compiler.get_or_compile(ctx.gpu, &key).map(|p| p.handle());
        let Some(program) =
            resolve_variant(ctx.gpu, ctx.compiler, attempt, mesh.shader_kind, policy)?
        else {
            continue;
        };

        if current != Some(program.handle) {
            ctx.gpu.use_program(Some(program.handle));
            ctx.apply_uniforms();
            per_program(ctx.gpu);
            current = Some(program.handle);
        }

        ctx.gpu.set_cull(if material.double_sided {
            CullMode::None
        } else {
            CullMode::Back
        });
        if submission.blend {
            ctx.gpu.set_blending(material.blending.blend_mode());
        }
        if !program.placeholder {
            material.apply(ctx.gpu, submission.first_unit);
        }

        draws += draw_mesh(ctx.gpu, mesh)?;
    }
    Ok(draws)
}

/// Uploads the mesh's transforms and issues its draw call.
///
/// A skinned mesh with more bones than the variants are compiled for is
/// skipped with a warning.
fn draw_mesh(gpu: &mut GpuContext, mesh: &MeshInstance) -> Result<u32> {
    let skinned = matches!(
        mesh.shader_kind,
        ModelShaderKind::Skeletal | ModelShaderKind::SkeletalInstanced
    );
    let limit = crate::shader::variant::MAX_BONES as usize;
    if skinned && mesh.bones.len() > limit {
        log::warn!(
            "Skipping mesh with {} bones, variants are compiled for {limit}",
            mesh.bones.len()
        );
        return Ok(0);
    }

    match mesh.shader_kind {
        ModelShaderKind::Instanced | ModelShaderKind::SkeletalInstanced => {
            if mesh.instances.is_empty() {
                return Ok(0);
            }
            gpu.upload_instances(
                mesh.geometry,
                bytemuck::cast_slice::<Mat4, u8>(&mesh.instances),
                INSTANCE_STRIDE,
                &INSTANCE_LAYOUT,
            )?;
        }
        _ => gpu.set_uniform("u_model", mesh.transform),
    }

    if skinned {
        for (i, bone) in mesh.bones.iter().enumerate() {
            gpu.set_uniform(&format!("u_bones[{i}]"), *bone);
        }
    }

    gpu.draw(mesh.geometry, mesh.instance_count());
    Ok(1)
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec4};

    use super::*;
    use crate::core::{GpuCall, HeadlessBackend};
    use crate::errors::RenderError;
    use crate::scene::{BoundingSphere, MaterialId};
    use crate::shader::{MaterialProperty, PropertyValue, ShadingModel};

    fn scene_with_meshes(gpu: &mut GpuContext, probe: &crate::core::HeadlessProbe) -> (Scene, Assets, Camera) {
        let settings = crate::settings::RenderSettings::default();
        let mut scene = Scene::new(&settings);
        let mut assets = Assets::new();
        let material = assets.add_material(
            Material::new("red", ShadingModel::Lit)
                .with(MaterialProperty::BaseColor, PropertyValue::Color(Vec4::X)),
        );
        let geometry = probe.fake_geometry(gpu).unwrap();
        for z in [-5.0, -20.0, 50.0] {
            scene.add_mesh(
                MeshInstance::new(geometry, material, Mat4::from_translation(Vec3::new(0.0, 0.0, z)))
                    .with_bounds(BoundingSphere::new(Vec3::ZERO, 1.0)),
            );
        }
        let mut camera = Camera::new_perspective(60.0, 1.0, 0.1, 100.0);
        camera.look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        (scene, assets, camera)
    }

    #[test]
    fn frustum_drops_meshes_behind_the_camera() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let (scene, assets, camera) = scene_with_meshes(&mut gpu, &probe);

        let all = collect(&scene, &assets, &camera, None, |_, _| true);
        let visible = collect(&scene, &assets, &camera, Some(camera.frustum()), |_, _| true);
        assert_eq!(all.len(), 3);
        assert_eq!(visible.len(), 2);
    }

    #[test]
    fn sorting_orders_by_distance() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let (scene, assets, camera) = scene_with_meshes(&mut gpu, &probe);

        let mut items = collect(&scene, &assets, &camera, None, |_, _| true);
        sort_back_to_front(&mut items);
        assert!(items.windows(2).all(|w| w[0].distance >= w[1].distance));
        sort_front_to_back(&mut items);
        assert!(items.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn skip_policy_drops_the_draw() {
        let (mut gpu, _probe) = HeadlessBackend::context();
        let mut compiler = ShaderCompiler::new();
        let attempt = Err(RenderError::UnusableVariant {
            label: "mesh[x]".into(),
        });

        let resolved = resolve_variant(
            &mut gpu,
            &mut compiler,
            attempt,
            ModelShaderKind::Static,
            VariantFailurePolicy::Skip,
        )
        .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn placeholder_policy_substitutes_the_error_program() {
        let (mut gpu, _probe) = HeadlessBackend::context();
        let mut compiler = ShaderCompiler::new();
        let attempt = Err(RenderError::UnusableVariant {
            label: "mesh[x]".into(),
        });

        let resolved = resolve_variant(
            &mut gpu,
            &mut compiler,
            attempt,
            ModelShaderKind::Static,
            VariantFailurePolicy::Placeholder,
        )
        .unwrap()
        .unwrap();
        assert!(resolved.placeholder);
    }

    #[test]
    fn mesh_with_too_many_bones_is_skipped() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let geometry = probe.fake_geometry(&mut gpu).unwrap();
        let bones = vec![Mat4::IDENTITY; crate::shader::variant::MAX_BONES as usize + 1];
        let mesh = MeshInstance::new(geometry, MaterialId::default(), Mat4::IDENTITY)
            .with_shader_kind(ModelShaderKind::Skeletal)
            .with_bones(bones);
        probe.clear_calls();

        assert_eq!(draw_mesh(&mut gpu, &mesh).unwrap(), 0);
        assert_eq!(probe.count(|call| matches!(call, GpuCall::Draw { .. })), 0);
        assert_eq!(gpu.stats().draw_calls, 0);
    }

    #[test]
    fn non_variant_errors_ignore_the_policy() {
        let (mut gpu, _probe) = HeadlessBackend::context();
        let mut compiler = ShaderCompiler::new();

        let result = resolve_variant(
            &mut gpu,
            &mut compiler,
            Err(RenderError::Backend("lost context".into())),
            ModelShaderKind::Static,
            VariantFailurePolicy::Skip,
        );
        assert!(matches!(result, Err(RenderError::Backend(_))));
    }
}
