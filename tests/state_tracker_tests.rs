//! State Tracker Tests
//!
//! Tests for:
//! - Idempotent setters (redundant calls never reach the backend)
//! - Raster bundles and clears through the tracker
//! - Desync detection against the device's real state
//! - Render targets and texture bindings
//! - Bindless residency of material textures

use lumen::core::{
    AttachmentDesc, BlendMode, ClearFlags, CompareFunction, CullMode, GpuCall, HeadlessBackend,
    HeadlessOptions, RasterState, RenderTarget, StencilMode, TextureBinding, TextureFormat,
    Viewport,
};
use lumen::errors::RenderError;
use lumen::shader::{
    Material, MaterialProperty, ProgramTemplate, PropertyValue, ShaderCompiler, ShaderDefines,
    ShadingModel,
};

fn blend_calls(calls: &[GpuCall]) -> Vec<BlendMode> {
    calls
        .iter()
        .filter_map(|c| match c {
            GpuCall::SetBlend(mode) => Some(*mode),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn set_blending_twice_issues_one_call() {
    let (mut gpu, probe) = HeadlessBackend::context();

    gpu.set_blending(BlendMode::Additive);
    gpu.set_blending(BlendMode::Additive);

    assert_eq!(blend_calls(&probe.calls()), [BlendMode::Additive]);
    let stats = gpu.stats();
    assert_eq!(stats.state_changes, 1);
    assert_eq!(stats.redundant_state_skips, 1);
}

#[test]
fn setting_the_initial_state_issues_nothing() {
    let (mut gpu, probe) = HeadlessBackend::context();

    gpu.set_blending(BlendMode::Disabled);
    gpu.bind_framebuffer(None);
    gpu.use_program(None);
    gpu.bind_texture(3, None);

    assert_eq!(probe.state_calls(), 0);
}

#[test]
fn alternating_values_are_all_issued() {
    let (mut gpu, probe) = HeadlessBackend::context();

    for mode in [BlendMode::Alpha, BlendMode::Additive, BlendMode::Alpha] {
        gpu.set_blending(mode);
    }

    assert_eq!(
        blend_calls(&probe.calls()),
        [BlendMode::Alpha, BlendMode::Additive, BlendMode::Alpha]
    );
}

#[test]
fn texture_units_are_tracked_independently() {
    let (mut gpu, probe) = HeadlessBackend::context();
    let texture = probe.fake_texture(&mut gpu, 4, 4).unwrap();
    probe.clear_calls();

    gpu.bind_texture(0, Some(texture));
    gpu.bind_texture(1, Some(texture));
    gpu.bind_texture(0, Some(texture));

    assert_eq!(probe.count(|c| matches!(c, GpuCall::BindTexture { .. })), 2);
}

#[test]
fn raster_bundle_only_issues_differences() {
    let (mut gpu, probe) = HeadlessBackend::context();
    gpu.apply_raster(&RasterState::OPAQUE);
    probe.clear_calls();

    gpu.apply_raster(&RasterState {
        depth_write: false,
        ..RasterState::OPAQUE
    });

    assert_eq!(probe.calls(), [GpuCall::SetDepthWrite(false)]);
}

#[test]
fn clear_enables_the_masks_it_needs() {
    let (mut gpu, probe) = HeadlessBackend::context();
    gpu.set_color_write(false);
    gpu.set_depth_write(false);
    gpu.set_stencil(StencilMode::NotEqual { reference: 1 });
    probe.clear_calls();

    gpu.clear(ClearFlags::all(), [0.0; 4], 1.0, 0);

    let calls = probe.calls();
    assert!(calls.contains(&GpuCall::SetColorWrite(true)));
    assert!(calls.contains(&GpuCall::SetDepthWrite(true)));
    assert!(calls.contains(&GpuCall::SetStencil(StencilMode::Disabled)));
    assert_eq!(calls.last(), Some(&GpuCall::Clear(ClearFlags::all())));
}

// ============================================================================
// Desync detection
// ============================================================================

#[test]
fn tracked_state_matches_the_device() {
    let (mut gpu, _probe) = HeadlessBackend::context();

    gpu.set_blending(BlendMode::Alpha);
    gpu.set_depth_func(CompareFunction::Lequal);
    gpu.set_cull(CullMode::None);
    gpu.set_viewport(Viewport::from_size(640, 480));

    assert!(gpu.verify_state());
}

#[test]
fn foreign_state_changes_are_detected_and_repaired() {
    let (mut gpu, probe) = HeadlessBackend::context();
    gpu.set_blending(BlendMode::Alpha);

    probe.external_state_change(|state| state.blend = BlendMode::Disabled);
    assert!(!gpu.is_state_in_sync());

    // The tracker still believes Alpha is set and elides the call.
    gpu.set_blending(BlendMode::Alpha);
    assert_eq!(probe.actual_state().blend, BlendMode::Disabled);

    gpu.reset_state();
    assert!(gpu.verify_state());
    gpu.set_blending(BlendMode::Alpha);
    assert_eq!(probe.actual_state().blend, BlendMode::Alpha);
}

#[test]
fn deleting_a_bound_texture_unbinds_it_everywhere() {
    let (mut gpu, probe) = HeadlessBackend::context();
    let texture = probe.fake_texture(&mut gpu, 4, 4).unwrap();
    gpu.bind_texture(2, Some(texture));

    gpu.delete_texture(texture);

    assert_eq!(gpu.state().texture(2), None);
    assert!(gpu.verify_state());
}

// ============================================================================
// Render targets
// ============================================================================

#[test]
fn target_bind_sets_framebuffer_and_viewport() {
    let (mut gpu, probe) = HeadlessBackend::context();
    let target = RenderTarget::create(
        &mut gpu,
        "hdr",
        (200, 100),
        &[AttachmentDesc::New(TextureFormat::Rgba16Float)],
        Some(AttachmentDesc::New(TextureFormat::Depth24Stencil8)),
    )
    .unwrap();
    probe.clear_calls();

    target.bind(&mut gpu);
    target.bind(&mut gpu);

    assert_eq!(
        probe.calls(),
        [
            GpuCall::BindFramebuffer(Some(target.framebuffer())),
            GpuCall::SetViewport(Viewport::from_size(200, 100)),
        ]
    );
    target.destroy(&mut gpu);
    assert_eq!(probe.live_textures(), 0);
}

#[test]
fn shared_attachments_survive_the_borrower() {
    let (mut gpu, probe) = HeadlessBackend::context();
    let owner = RenderTarget::create(
        &mut gpu,
        "owner",
        (64, 64),
        &[AttachmentDesc::New(TextureFormat::Rgba8)],
        None,
    )
    .unwrap();
    let color = owner.color(0).unwrap();
    let borrower =
        RenderTarget::create(&mut gpu, "borrower", (64, 64), &[AttachmentDesc::Shared(color)], None)
            .unwrap();

    borrower.destroy(&mut gpu);
    assert_eq!(probe.texture_size(color), Some((64, 64)));

    owner.destroy(&mut gpu);
    assert_eq!(probe.texture_size(color), None);
}

#[test]
fn depth_format_as_colour_is_an_allocation_error() {
    let (mut gpu, probe) = HeadlessBackend::context();

    let err = RenderTarget::create(
        &mut gpu,
        "broken",
        (64, 64),
        &[AttachmentDesc::New(TextureFormat::Depth32Float)],
        None,
    )
    .err()
    .unwrap();

    assert!(matches!(err, RenderError::FramebufferAllocation { .. }));
    assert_eq!(probe.live_textures(), 0, "partially created attachments are released");
}

#[test]
fn bindless_textures_become_resident() {
    let (backend, probe) = HeadlessBackend::with_options(HeadlessOptions {
        bindless: true,
        ..Default::default()
    });
    let mut gpu = lumen::core::GpuContext::new(Box::new(backend));
    let texture = probe.fake_texture(&mut gpu, 8, 8).unwrap();

    let binding = TextureBinding::for_texture(&mut gpu, texture);
    let TextureBinding::Bindless { handle, .. } = binding else {
        panic!("bindless backend should produce a bindless binding");
    };
    assert_eq!(binding.uniform_alignment(), 8);

    binding.make_resident(&mut gpu, true);
    assert!(probe.is_resident(handle));
    binding.make_resident(&mut gpu, false);
    assert!(!probe.is_resident(handle));
}

#[test]
fn extension_textures_bind_to_a_unit() {
    let (mut gpu, probe) = HeadlessBackend::context();
    let texture = probe.fake_texture(&mut gpu, 8, 8).unwrap();

    let binding = TextureBinding::for_texture(&mut gpu, texture);
    assert!(matches!(binding, TextureBinding::Extension { .. }));
    assert_eq!(binding.texture(), texture);
    assert_eq!(binding.uniform_alignment(), 4);
}

#[test]
fn bindless_material_textures_are_resident_until_deleted() {
    let (backend, probe) = HeadlessBackend::with_options(HeadlessOptions {
        bindless: true,
        ..Default::default()
    });
    let mut gpu = lumen::core::GpuContext::new(Box::new(backend));
    let mut compiler = ShaderCompiler::new();
    let program = compiler
        .get_or_compile_utility(&mut gpu, ProgramTemplate::COMPOSITE, &ShaderDefines::new())
        .unwrap()
        .handle();
    gpu.use_program(Some(program));

    let albedo = probe.fake_texture(&mut gpu, 8, 8).unwrap();
    let TextureBinding::Bindless { handle, .. } = TextureBinding::for_texture(&mut gpu, albedo) else {
        panic!("bindless backend should produce a bindless binding");
    };
    let material = Material::new("bindless", ShadingModel::Lit)
        .with(MaterialProperty::BaseColor, PropertyValue::Texture(albedo));

    material.apply(&mut gpu, 0);
    material.apply(&mut gpu, 0);
    assert!(probe.is_resident(handle));
    assert!(gpu.is_texture_resident(albedo));

    gpu.delete_texture(albedo);
    assert!(!probe.is_resident(handle));
    compiler.destroy(&mut gpu);
}
