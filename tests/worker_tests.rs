//! Resource Worker Tests
//!
//! Tests for:
//! - Job submission, polling and blocking waits
//! - One-shot tickets
//! - Background variant precompilation (including failures and program release)
//! - Context factory failures

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use glam::Vec4;
use parking_lot::Mutex;

use lumen::core::{
    ContextFactory, GpuContext, HeadlessBackend, HeadlessOptions, Residency, ResourceWorkerPool,
    TextureDesc, TextureFormat,
};
use lumen::errors::{RenderError, Result};
use lumen::shader::{
    BlendingMode, Material, MaterialProperty, ModelShaderKind, PropertyValue, RenderPassKind,
    ShadingModel, VariantKey,
};

const WAIT: Duration = Duration::from_secs(5);

fn factory(options: HeadlessOptions) -> ContextFactory {
    Arc::new(move |_: usize| -> Result<GpuContext> {
        let (backend, _probe) = HeadlessBackend::with_options(options.clone());
        Ok(GpuContext::new(Box::new(backend)))
    })
}

fn pool(options: HeadlessOptions) -> ResourceWorkerPool {
    let _ = env_logger::builder().is_test(true).try_init();
    ResourceWorkerPool::new(2, Duration::from_secs(1), factory(options)).unwrap()
}

fn key(material: &Material, pass: RenderPassKind) -> VariantKey {
    VariantKey::new(material.unique(), ModelShaderKind::Static, pass, BlendingMode::Opaque)
}

fn poll_until_done<T>(ticket: &mut lumen::core::ResourceTicket<T>) -> Residency<T> {
    loop {
        match ticket.poll() {
            Residency::Pending => thread::yield_now(),
            other => return other,
        }
    }
}

// ============================================================================
// Submission
// ============================================================================

#[test]
fn submitted_job_runs_on_a_worker_context() -> anyhow::Result<()> {
    let pool = pool(HeadlessOptions::default());

    let ticket = pool.submit(|gpu| {
        let desc = TextureDesc::new_2d("albedo", 64, 32, TextureFormat::Rgba8);
        gpu.create_texture(&desc)?;
        Ok(gpu.backend_name().to_owned())
    })?;

    assert_eq!(ticket.wait(WAIT)?, "headless");
    Ok(())
}

#[test]
fn polling_hands_the_value_out_once() {
    let pool = pool(HeadlessOptions::default());
    let mut ticket = pool.submit(|_| Ok(42u32)).unwrap();

    assert!(matches!(poll_until_done(&mut ticket), Residency::Ready(42)));
    assert!(matches!(
        ticket.poll(),
        Residency::Failed(RenderError::InvalidHandle(_))
    ));
}

#[test]
fn job_errors_reach_the_ticket() {
    let pool = pool(HeadlessOptions {
        max_texture_pixels: Some(16),
        ..Default::default()
    });

    let ticket = pool
        .submit(|gpu| {
            gpu.create_texture(&TextureDesc::new_2d("huge", 1024, 1024, TextureFormat::Rgba8))
        })
        .unwrap();

    assert!(matches!(ticket.wait(WAIT), Err(RenderError::Backend(_))));
}

#[test]
fn stalled_upload_fence_times_out() {
    let pool = ResourceWorkerPool::new(
        1,
        Duration::from_millis(1),
        factory(HeadlessOptions {
            stall_fences: true,
            ..Default::default()
        }),
    )
    .unwrap();

    let ticket = pool.submit(|_| Ok(())).unwrap();

    assert!(matches!(ticket.wait(WAIT), Err(RenderError::FenceTimeout { .. })));
}

#[test]
fn many_jobs_complete_across_workers() {
    let pool = pool(HeadlessOptions::default());

    let tickets: Vec<_> = (0..16u32)
        .map(|i| pool.submit(move |_| Ok(i * i)).unwrap())
        .collect();
    let results: Vec<u32> = tickets.into_iter().map(|t| t.wait(WAIT).unwrap()).collect();

    assert_eq!(results, (0..16u32).map(|i| i * i).collect::<Vec<_>>());
}

// ============================================================================
// Precompilation
// ============================================================================

#[test]
fn precompile_reports_every_variant() {
    let pool = pool(HeadlessOptions::default());
    let material = Material::new("plain", ShadingModel::Lit)
        .with(MaterialProperty::BaseColor, PropertyValue::Color(Vec4::ONE));

    let report = pool
        .precompile_variants(vec![
            key(&material, RenderPassKind::Forward),
            key(&material, RenderPassKind::DepthPrepass),
            key(&material, RenderPassKind::DeferredGBuffer),
        ])
        .unwrap()
        .wait(WAIT)
        .unwrap();

    assert_eq!(report.compiled, 3);
    assert!(report.failed.is_empty());
}

#[test]
fn precompile_collects_failures_without_aborting() {
    let pool = pool(HeadlessOptions {
        reject_marker: Some("ENABLE_EMISSIVE".into()),
        ..Default::default()
    });
    let plain = Material::new("plain", ShadingModel::Lit)
        .with(MaterialProperty::BaseColor, PropertyValue::Color(Vec4::ONE));
    let glowing = Material::new("glowing", ShadingModel::Lit)
        .with(MaterialProperty::Emissive, PropertyValue::Color(Vec4::ONE));

    let report = pool
        .precompile_variants(vec![
            key(&glowing, RenderPassKind::Forward),
            key(&plain, RenderPassKind::Forward),
        ])
        .unwrap()
        .wait(WAIT)
        .unwrap();

    assert_eq!(report.compiled, 1);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0].1, RenderError::ShaderCompile { .. }));
}

#[test]
fn precompiled_programs_stay_on_the_worker() {
    let probes = Arc::new(Mutex::new(Vec::new()));
    let recorded = probes.clone();
    let factory: ContextFactory = Arc::new(move |_: usize| -> Result<GpuContext> {
        let (backend, probe) = HeadlessBackend::new();
        recorded.lock().push(probe);
        Ok(GpuContext::new(Box::new(backend)))
    });
    let pool = ResourceWorkerPool::new(1, Duration::from_secs(1), factory).unwrap();
    let material = Material::new("plain", ShadingModel::Lit)
        .with(MaterialProperty::BaseColor, PropertyValue::Color(Vec4::ONE));

    let report = pool
        .precompile_variants(vec![
            key(&material, RenderPassKind::Forward),
            key(&material, RenderPassKind::DepthPrepass),
        ])
        .unwrap()
        .wait(WAIT)
        .unwrap();

    assert_eq!(report.compiled, 2);
    let worker = probes.lock()[0].clone();
    assert_eq!(worker.link_count(), 2);
    assert_eq!(worker.live_programs(), 0);
}

// ============================================================================
// Pool lifecycle
// ============================================================================

#[test]
fn factory_failure_fails_pool_creation() {
    let factory: ContextFactory = Arc::new(|index: usize| -> Result<GpuContext> {
        if index == 1 {
            Err(RenderError::Backend("context sharing unavailable".into()))
        } else {
            Ok(HeadlessBackend::context().0)
        }
    });

    let err = ResourceWorkerPool::new(3, Duration::from_secs(1), factory).err().unwrap();

    assert!(matches!(err, RenderError::Backend(ref msg) if msg.contains("sharing")));
}

#[test]
fn zero_threads_still_starts_one_worker() {
    let pool = ResourceWorkerPool::new(0, Duration::from_secs(1), factory(HeadlessOptions::default()))
        .unwrap();

    assert_eq!(pool.thread_count(), 1);
    assert_eq!(pool.submit(|_| Ok("done")).unwrap().wait(WAIT).unwrap(), "done");
}
