//! Renderer Tests
//!
//! End-to-end frames on the headless backend:
//! - Forward and deferred frames with meshes, lights, skybox and particles
//! - Compile counts when two material shapes appear in one frame
//! - Variant failure policies (skip / placeholder / abort)
//! - Skinned meshes beyond the bone limit
//! - Resize recovery at reduced resolution
//! - Frame fences and shutdown

use glam::{Mat4, Vec3, Vec4};

use lumen::core::{
    BlendMode, GpuCall, GpuContext, HeadlessBackend, HeadlessProbe, TextureDesc, TextureFormat,
};
use lumen::errors::RenderError;
use lumen::passes::{ColorPass, FrameInfo};
use lumen::pipeline::Pipeline;
use lumen::renderer::Renderer;
use lumen::scene::particles::{EmitterDescription, EmitterModule};
use lumen::scene::{Assets, BoundingSphere, Camera, DirectionalLight, MeshInstance, PointLight, Scene};
use lumen::settings::{RenderPath, RenderSettings, VariantFailurePolicy};
use lumen::shader::{
    BlendingMode, Material, MaterialProperty, ModelShaderKind, PropertyValue, ShaderCompiler,
    ShadingModel,
};

const ERROR_COLOR: &str = "vec4(1.0, 0.0, 1.0, 1.0)";

/// Routes `log` output through the test harness; set `RUST_LOG` to see it.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn camera() -> Camera {
    let mut camera = Camera::new_perspective(60.0, 16.0 / 9.0, 0.1, 100.0);
    camera.look_at(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, Vec3::Y);
    camera
}

fn lit(name: &str, properties: &[(MaterialProperty, PropertyValue)]) -> Material {
    let mut material = Material::new(name, ShadingModel::Lit);
    for (property, value) in properties {
        material.set(*property, *value);
    }
    material
}

fn add_mesh(
    gpu: &mut GpuContext,
    probe: &HeadlessProbe,
    scene: &mut Scene,
    material: lumen::scene::MaterialId,
    at: Vec3,
) -> lumen::scene::MeshKey {
    let geometry = probe.fake_geometry(gpu).unwrap();
    scene.add_mesh(
        MeshInstance::new(geometry, material, Mat4::from_translation(at))
            .with_bounds(BoundingSphere::new(Vec3::ZERO, 1.0)),
    )
}

/// A small but complete scene: opaque + transparent + instanced meshes,
/// sun and point lights, skybox and one emitter.
fn populate(gpu: &mut GpuContext, probe: &HeadlessProbe, settings: &RenderSettings) -> (Scene, Assets) {
    let mut scene = Scene::new(settings);
    let mut assets = Assets::new();

    let albedo = probe.fake_texture(gpu, 16, 16).unwrap();
    let stone = assets.add_material(lit(
        "stone",
        &[
            (MaterialProperty::BaseColor, PropertyValue::Texture(albedo)),
            (MaterialProperty::Roughness, PropertyValue::Scalar(0.8)),
        ],
    ));
    let glass = assets.add_material(
        lit("glass", &[(MaterialProperty::BaseColor, PropertyValue::Color(Vec4::new(0.8, 0.9, 1.0, 0.3)))])
            .with_blending(BlendingMode::AlphaBlend),
    );

    add_mesh(gpu, probe, &mut scene, stone, Vec3::ZERO);
    add_mesh(gpu, probe, &mut scene, glass, Vec3::new(1.0, 0.0, 1.0));

    let geometry = probe.fake_geometry(gpu).unwrap();
    scene.add_mesh(
        MeshInstance::new(geometry, stone, Mat4::IDENTITY)
            .with_shader_kind(ModelShaderKind::Instanced)
            .with_instances(vec![
                Mat4::from_translation(Vec3::new(-2.0, 0.0, 0.0)),
                Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)),
            ]),
    );

    scene
        .directional_lights
        .insert(DirectionalLight::new(Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 3.0));
    scene
        .point_lights
        .insert(PointLight::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(1.0, 0.5, 0.2), 5.0, 10.0));
    scene.skybox = Some(probe.fake_texture(gpu, 32, 32).unwrap());

    let sparks = assets.add_material(Material::new("sparks", ShadingModel::Unlit));
    let emitter = assets.add_emitter(
        EmitterDescription::new("sparks", sparks)
            .with_module(EmitterModule::SpawnRate(100.0))
            .with_module(EmitterModule::Lifetime { min: 1.0, max: 2.0 })
            .with_module(EmitterModule::Gravity(Vec3::new(0.0, -9.81, 0.0)))
            .with_blending(BlendingMode::Additive),
    );
    scene.add_emitter(emitter, Vec3::new(0.0, 1.0, 0.0));

    (scene, assets)
}

fn draws_with_program_matching(probe: &HeadlessProbe, needle: &str) -> usize {
    probe
        .calls()
        .iter()
        .filter_map(|call| match call {
            GpuCall::Draw { program: Some(p), .. } => Some(*p),
            _ => None,
        })
        .filter(|p| probe.program_sources(*p).iter().any(|(_, src)| src.contains(needle)))
        .count()
}

// ============================================================================
// Full frames
// ============================================================================

#[test]
fn deferred_frame_runs_every_pass() -> anyhow::Result<()> {
    init_logging();
    let (mut gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        validate_state: true,
        ..Default::default()
    };
    let (scene, assets) = populate(&mut gpu, &probe, &settings);
    let mut renderer = Renderer::new(gpu, settings, (640, 360))?;

    let stats = renderer.render(&scene, &assets, &camera(), 0.1)?;

    assert_eq!(stats.frame, 1);
    assert!(stats.gpu.draw_calls > 0);
    assert!(renderer.gpu().verify_state());

    // Deferred lighting, blur steps and composite are fullscreen draws.
    let fullscreen = probe.count(|c| matches!(c, GpuCall::DrawFullscreen { .. }));
    assert_eq!(fullscreen, 1 + 2 * 2 + 1);

    // The instanced mesh uploads its two transforms once per mesh pass.
    assert!(probe.count(|c| matches!(c, GpuCall::UploadInstances { bytes: 128, .. })) >= 3);
    assert_eq!(draws_with_program_matching(&probe, ERROR_COLOR), 0);
    Ok(())
}

#[test]
fn forward_frame_draws_into_the_forward_target() {
    init_logging();
    let (mut gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        path: RenderPath::Forward,
        validate_state: true,
        ..Default::default()
    };
    let (scene, assets) = populate(&mut gpu, &probe, &settings);
    let mut renderer = Renderer::new(gpu, settings, (640, 360)).unwrap();

    renderer.render(&scene, &assets, &camera(), 0.1).unwrap();

    let forward_fb = renderer
        .pipeline()
        .and_then(|p| p.pass("forward_opaque"))
        .and_then(|p| p.target())
        .map(|t| t.framebuffer())
        .unwrap();
    let forward_draws = probe.count(|c| {
        matches!(c, GpuCall::Draw { framebuffer: Some(fb), .. } if *fb == forward_fb)
    });
    assert_eq!(forward_draws, 2, "plain and instanced opaque meshes");

    // Additive particles draw after the alpha-blended glass.
    let blends: Vec<BlendMode> = probe
        .calls()
        .iter()
        .filter_map(|c| match c {
            GpuCall::SetBlend(mode) => Some(*mode),
            _ => None,
        })
        .collect();
    let alpha = blends.iter().position(|m| *m == BlendMode::Alpha).unwrap();
    let additive = blends.iter().position(|m| *m == BlendMode::Additive).unwrap();
    assert!(alpha < additive);
}

#[test]
fn particle_simulation_advances_between_frames() {
    let (mut gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings::default();
    let (scene, assets) = populate(&mut gpu, &probe, &settings);
    let mut renderer = Renderer::new(gpu, settings, (320, 180)).unwrap();

    renderer.render(&scene, &assets, &camera(), 0.05).unwrap();
    renderer.render(&scene, &assets, &camera(), 0.05).unwrap();

    // 100 particles/s over 0.1 s, none expired yet.
    let particle_draws: Vec<u32> = probe
        .calls()
        .iter()
        .filter_map(|c| match c {
            GpuCall::Draw { instances, .. } if *instances > 2 => Some(*instances),
            _ => None,
        })
        .collect();
    assert_eq!(particle_draws, [5, 10]);
}

#[test]
fn second_frame_compiles_nothing() -> anyhow::Result<()> {
    let (mut gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings::default();
    let (scene, assets) = populate(&mut gpu, &probe, &settings);
    let mut renderer = Renderer::new(gpu, settings, (320, 180))?;

    let first = renderer.render(&scene, &assets, &camera(), 0.016)?;
    let links = probe.link_count();
    let second = renderer.render(&scene, &assets, &camera(), 0.016)?;

    assert_eq!(probe.link_count(), links);
    assert_eq!(first.compiler.compiles, second.compiler.compiles);
    assert!(second.compiler.hits > first.compiler.hits);
    assert!(
        second.gpu.redundant_state_skips > 0,
        "the tracker elides repeated state in a steady frame"
    );
    Ok(())
}

// ============================================================================
// Two materials, one frame
// ============================================================================

#[test]
fn two_material_shapes_compile_exactly_twice() {
    let (mut gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        shadows: false,
        ..Default::default()
    };
    let mut scene = Scene::new(&settings);
    let mut assets = Assets::new();

    let plain = assets.add_material(lit(
        "plain",
        &[(MaterialProperty::BaseColor, PropertyValue::Color(Vec4::ONE))],
    ));
    let glowing = assets.add_material(lit(
        "glowing",
        &[
            (MaterialProperty::BaseColor, PropertyValue::Color(Vec4::ONE)),
            (MaterialProperty::Emissive, PropertyValue::Color(Vec4::new(1.0, 0.5, 0.0, 1.0))),
        ],
    ));
    add_mesh(&mut gpu, &probe, &mut scene, plain, Vec3::ZERO);
    add_mesh(&mut gpu, &probe, &mut scene, glowing, Vec3::new(2.0, 0.0, 0.0));
    add_mesh(&mut gpu, &probe, &mut scene, plain, Vec3::new(-2.0, 0.0, 0.0));

    let depth = gpu
        .create_texture(&TextureDesc::new_2d("depth", 320, 180, TextureFormat::Depth24Stencil8))
        .unwrap();
    let opaque = ColorPass::opaque(&mut gpu, (320, 180), depth, None, &settings).unwrap();
    let mut pipeline = Pipeline::from_passes(vec![Box::new(opaque)], (320, 180));
    let mut compiler = ShaderCompiler::new();
    let camera = camera();
    let frame = FrameInfo {
        index: 1,
        width: 320,
        height: 180,
        ..FrameInfo::default()
    };

    probe.clear_calls();
    pipeline.update(&scene, &assets, &camera, &frame);
    pipeline
        .draw(&mut gpu, &mut compiler, &scene, &assets, &camera, &frame, &settings)
        .unwrap();

    assert_eq!(compiler.program_count(), 2);
    assert_eq!(compiler.stats().compiles, 2);
    assert_eq!(probe.link_count(), 2);
    assert_eq!(probe.count(|c| matches!(c, GpuCall::Draw { .. })), 3);

    pipeline.destroy(&mut gpu);
    compiler.destroy(&mut gpu);
    gpu.delete_texture(depth);
}

// ============================================================================
// Variant failure policies
// ============================================================================

fn broken_scene(policy: VariantFailurePolicy) -> (Renderer, HeadlessProbe, Scene, Assets) {
    init_logging();
    let (mut gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        path: RenderPath::Forward,
        shadows: false,
        bloom: false,
        variant_failure: policy,
        ..Default::default()
    };
    let mut scene = Scene::new(&settings);
    let mut assets = Assets::new();
    let good = assets.add_material(lit(
        "good",
        &[(MaterialProperty::BaseColor, PropertyValue::Color(Vec4::ONE))],
    ));
    let broken = assets.add_material(lit(
        "broken",
        &[(MaterialProperty::Sheen, PropertyValue::Color(Vec4::ONE))],
    ));
    add_mesh(&mut gpu, &probe, &mut scene, good, Vec3::ZERO);
    add_mesh(&mut gpu, &probe, &mut scene, broken, Vec3::new(2.0, 0.0, 0.0));

    probe.reject_shaders_containing("ENABLE_SHEEN");
    let renderer = Renderer::new(gpu, settings, (320, 180)).unwrap();
    (renderer, probe, scene, assets)
}

#[test]
fn placeholder_policy_draws_the_error_program() {
    let (mut renderer, probe, scene, assets) = broken_scene(VariantFailurePolicy::Placeholder);

    renderer.render(&scene, &assets, &camera(), 0.016).unwrap();

    // Pre-pass and forward pass each draw the broken mesh with the stand-in.
    assert_eq!(draws_with_program_matching(&probe, ERROR_COLOR), 2);
    assert_eq!(draws_with_program_matching(&probe, "ENABLE_BASE_COLOR"), 2);
    assert_eq!(renderer.compiler().stats().failures, 2);

    // Failed variants are not retried on the next frame.
    probe.clear_calls();
    renderer.render(&scene, &assets, &camera(), 0.016).unwrap();
    assert_eq!(probe.compile_count(), 0);
}

#[test]
fn skip_policy_leaves_the_draw_out() {
    let (mut renderer, probe, scene, assets) = broken_scene(VariantFailurePolicy::Skip);

    renderer.render(&scene, &assets, &camera(), 0.016).unwrap();

    assert_eq!(probe.count(|c| matches!(c, GpuCall::Draw { .. })), 2);
    assert_eq!(draws_with_program_matching(&probe, ERROR_COLOR), 0);
}

#[test]
fn abort_policy_fails_the_frame() {
    let (mut renderer, _probe, scene, assets) = broken_scene(VariantFailurePolicy::Abort);

    let err = renderer.render(&scene, &assets, &camera(), 0.016).unwrap_err();

    match err {
        RenderError::ShaderCompile { diagnostic, .. } => assert!(diagnostic.contains("ENABLE_SHEEN")),
        other => panic!("expected a compile error, got {other}"),
    }
}

#[test]
fn over_skinned_mesh_is_left_out_without_failing_the_frame() -> anyhow::Result<()> {
    init_logging();
    let (mut gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        path: RenderPath::Forward,
        shadows: false,
        bloom: false,
        ..Default::default()
    };
    let mut scene = Scene::new(&settings);
    let mut assets = Assets::new();
    let skin = assets.add_material(lit(
        "skin",
        &[(MaterialProperty::BaseColor, PropertyValue::Color(Vec4::ONE))],
    ));
    add_mesh(&mut gpu, &probe, &mut scene, skin, Vec3::ZERO);
    let geometry = probe.fake_geometry(&mut gpu)?;
    scene.add_mesh(
        MeshInstance::new(geometry, skin, Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)))
            .with_bounds(BoundingSphere::new(Vec3::ZERO, 1.0))
            .with_shader_kind(ModelShaderKind::Skeletal)
            .with_bones(vec![Mat4::IDENTITY; 65]),
    );
    let mut renderer = Renderer::new(gpu, settings, (320, 180))?;

    renderer.render(&scene, &assets, &camera(), 0.016)?;

    // Pre-pass and forward pass draw only the static mesh.
    assert_eq!(probe.count(|c| matches!(c, GpuCall::Draw { .. })), 2);
    Ok(())
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn resize_retries_at_half_resolution() {
    let (gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        shadow_map_size: 256,
        offscreen_output: true,
        ..Default::default()
    };
    let mut renderer = Renderer::new(gpu, settings, (256, 256)).unwrap();

    probe.set_max_texture_pixels(Some(300_000));
    let size = renderer.resize(1024, 1024).unwrap();

    assert_eq!(size, (512, 512));
    assert_eq!(renderer.pipeline().unwrap().size(), (512, 512));
    assert_eq!((renderer.frame().width, renderer.frame().height), (512, 512));
    let output = renderer.output().unwrap();
    assert_eq!(probe.texture_size(output), Some((512, 512)));
}

#[test]
fn resize_gives_up_below_the_minimum_extent() {
    let (gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        shadows: false,
        min_resize_extent: 128,
        ..Default::default()
    };
    let mut renderer = Renderer::new(gpu, settings, (64, 64)).unwrap();

    probe.set_max_texture_pixels(Some(100));
    let err = renderer.resize(1024, 1024).unwrap_err();

    assert!(matches!(err, RenderError::FramebufferAllocation { width: 128, height: 128, .. }));
    assert_eq!(renderer.pipeline().unwrap().size(), (64, 64));
}

#[test]
fn zero_extent_resize_is_clamped() {
    let (gpu, _probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        shadows: false,
        min_resize_extent: 1,
        ..Default::default()
    };
    let mut renderer = Renderer::new(gpu, settings, (64, 64)).unwrap();

    assert_eq!(renderer.resize(0, 0).unwrap(), (1, 1));
}

// ============================================================================
// Fences & shutdown
// ============================================================================

#[test]
fn stalled_frame_fence_times_out() {
    let (gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        frames_in_flight: 1,
        fence_timeout_ms: 1,
        ..Default::default()
    };
    let scene = Scene::new(&settings);
    let assets = Assets::new();
    let mut renderer = Renderer::new(gpu, settings, (64, 64)).unwrap();

    renderer.render(&scene, &assets, &camera(), 0.016).unwrap();
    probe.configure(|o| o.stall_fences = true);

    let err = renderer.render(&scene, &assets, &camera(), 0.016).unwrap_err();
    assert!(matches!(err, RenderError::FenceTimeout { .. }));
    assert_eq!(renderer.frames_in_flight(), 0, "the timed out fence is released");

    probe.configure(|o| o.stall_fences = false);
    assert!(renderer.render(&scene, &assets, &camera(), 0.016).is_ok());
}

#[test]
fn slow_fences_are_waited_on() {
    let (gpu, probe) = HeadlessBackend::context();
    probe.configure(|o| o.fence_latency = 3);
    let settings = RenderSettings {
        frames_in_flight: 1,
        ..Default::default()
    };
    let scene = Scene::new(&settings);
    let assets = Assets::new();
    let mut renderer = Renderer::new(gpu, settings, (64, 64)).unwrap();

    let first = renderer.render(&scene, &assets, &camera(), 0.016).unwrap();
    let second = renderer.render(&scene, &assets, &camera(), 0.016).unwrap();

    assert_eq!(first.fence_waits, 0);
    assert_eq!(second.fence_waits, 1);
}

#[test]
fn dropping_the_renderer_releases_gpu_objects() {
    let (mut gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        offscreen_output: true,
        ..Default::default()
    };
    let (scene, assets) = populate(&mut gpu, &probe, &settings);
    let scene_textures = probe.live_textures();
    {
        let mut renderer = Renderer::new(gpu, settings, (320, 180)).unwrap();
        renderer.render(&scene, &assets, &camera(), 0.016).unwrap();
        assert!(probe.live_programs() > 0);
    }
    assert_eq!(probe.live_programs(), 0);
    assert_eq!(probe.live_shaders(), 0);
    assert_eq!(probe.live_framebuffers(), 0);
    assert_eq!(probe.live_textures(), scene_textures, "caller-owned textures survive");
}

#[test]
fn offscreen_target_binds_before_the_final_draw() {
    let (gpu, probe) = HeadlessBackend::context();
    let settings = RenderSettings {
        offscreen_output: true,
        ..Default::default()
    };
    let scene = Scene::new(&settings);
    let mut renderer = Renderer::new(gpu, settings, (64, 64)).unwrap();

    renderer.render(&scene, &Assets::new(), &camera(), 0.016).unwrap();

    let composite_fb = renderer
        .pipeline()
        .and_then(|p| p.pass("composite"))
        .and_then(|p| p.target())
        .map(|t| t.framebuffer());
    let last_fullscreen = probe
        .calls()
        .iter()
        .rev()
        .find_map(|c| match c {
            GpuCall::DrawFullscreen { framebuffer, .. } => Some(*framebuffer),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_fullscreen, composite_fb);
}
