//! Renders a few frames of a small scene on the headless backend and logs
//! the per-frame statistics.
//!
//! Run with `RUST_LOG=debug cargo run --example headless_frame [config.json]`.

use glam::{Mat4, Vec3, Vec4};

use lumen::core::HeadlessBackend;
use lumen::scene::particles::{EmitterDescription, EmitterModule};
use lumen::scene::{BoundingSphere, DirectionalLight, PointLight};
use lumen::shader::{BlendingMode, Material, MaterialProperty, PropertyValue, ShadingModel};
use lumen::{Assets, Camera, EngineConfig, MeshInstance, Renderer, Scene};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };

    let (gpu, probe) = HeadlessBackend::context();
    let mut scene = Scene::new(&config.render);
    let mut assets = Assets::new();

    let mut stone = Material::new("stone", ShadingModel::Lit);
    stone.set(MaterialProperty::BaseColor, PropertyValue::Color(Vec4::new(0.6, 0.6, 0.55, 1.0)));
    stone.set(MaterialProperty::Roughness, PropertyValue::Scalar(0.8));
    let stone = assets.add_material(stone);

    let mut renderer = Renderer::new(gpu, config.render.clone(), (1280, 720))?;

    for x in [-2.0, 0.0, 2.0] {
        let geometry = probe.fake_geometry(renderer.gpu_mut())?;
        scene.add_mesh(
            MeshInstance::new(geometry, stone, Mat4::from_translation(Vec3::new(x, 0.0, 0.0)))
                .with_bounds(BoundingSphere::new(Vec3::ZERO, 1.0)),
        );
    }
    scene
        .directional_lights
        .insert(DirectionalLight::new(Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 3.0));
    scene
        .point_lights
        .insert(PointLight::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(1.0, 0.5, 0.2), 5.0, 10.0));

    let sparks = assets.add_material(Material::new("sparks", ShadingModel::Unlit));
    let emitter = assets.add_emitter(
        EmitterDescription::new("sparks", sparks)
            .with_module(EmitterModule::SpawnRate(200.0))
            .with_module(EmitterModule::Lifetime { min: 0.5, max: 1.5 })
            .with_blending(BlendingMode::Additive),
    );
    scene.add_emitter(emitter, Vec3::new(0.0, 1.0, 0.0));

    let mut camera = Camera::new_perspective(60.0, 16.0 / 9.0, 0.1, 100.0);
    camera.look_at(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, Vec3::Y);

    for _ in 0..3 {
        let stats = renderer.render(&scene, &assets, &camera, 1.0 / 60.0)?;
        log::info!(
            "frame {}: {} draws, {} compiles, {} cache hits",
            stats.frame,
            stats.gpu.draw_calls,
            stats.compiler.compiles,
            stats.compiler.hits
        );
    }

    renderer.shutdown();
    Ok(())
}
