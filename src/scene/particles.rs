//! Particle emitters.
//!
//! An [`EmitterDescription`] is an ordered list of [`EmitterModule`]s. The
//! modules drive the CPU simulation in [`ParticleSystem`] and, through the
//! effect compiler, the define set of the particle shader.

use std::collections::VecDeque;
use std::fmt;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::shader::BlendingMode;

use super::assets::MaterialId;

#[derive(Debug, Clone, PartialEq)]
pub enum EmitterModule {
    /// Particles spawned per second.
    SpawnRate(f32),
    /// Lifetime range in seconds.
    Lifetime { min: f32, max: f32 },
    /// Launch direction, cone half-angle (radians) and speed range.
    InitialVelocity {
        direction: Vec3,
        spread: f32,
        speed_min: f32,
        speed_max: f32,
    },
    Gravity(Vec3),
    ColorOverLife { start: Vec4, end: Vec4 },
    SizeOverLife { start: f32, end: f32 },
    /// Flipbook animation over a `columns x rows` atlas.
    TextureSheet {
        columns: u32,
        rows: u32,
        frames_per_second: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmitterDescription {
    pub name: String,
    pub modules: Vec<EmitterModule>,
    pub material: MaterialId,
    pub blending: BlendingMode,
}

impl EmitterDescription {
    #[must_use]
    pub fn new(name: impl Into<String>, material: MaterialId) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
            material,
            blending: BlendingMode::AlphaBlend,
        }
    }

    #[must_use]
    pub fn with_module(mut self, module: EmitterModule) -> Self {
        self.modules.push(module);
        self
    }

    #[must_use]
    pub fn with_blending(mut self, blending: BlendingMode) -> Self {
        self.blending = blending;
        self
    }

    /// Resolves the module list into simulation parameters. Later modules of
    /// the same kind override earlier ones.
    #[must_use]
    pub fn params(&self) -> EmitterParams {
        let mut params = EmitterParams::default();
        for module in &self.modules {
            match *module {
                EmitterModule::SpawnRate(rate) => params.spawn_rate = rate.max(0.0),
                EmitterModule::Lifetime { min, max } => {
                    params.lifetime = (min.max(f32::EPSILON), max.max(min).max(f32::EPSILON));
                }
                EmitterModule::InitialVelocity {
                    direction,
                    spread,
                    speed_min,
                    speed_max,
                } => {
                    params.direction = direction.normalize_or(Vec3::Y);
                    params.spread = spread.abs();
                    params.speed = (speed_min, speed_max.max(speed_min));
                }
                EmitterModule::Gravity(g) => params.gravity = g,
                EmitterModule::ColorOverLife { start, end } => params.color = (start, end),
                EmitterModule::SizeOverLife { start, end } => params.size = (start, end),
                EmitterModule::TextureSheet {
                    columns,
                    rows,
                    frames_per_second,
                } => params.sheet = Some((columns.max(1), rows.max(1), frames_per_second)),
            }
        }
        params
    }
}

/// Simulation parameters folded from an emitter's modules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterParams {
    pub spawn_rate: f32,
    pub lifetime: (f32, f32),
    pub direction: Vec3,
    pub spread: f32,
    pub speed: (f32, f32),
    pub gravity: Vec3,
    pub color: (Vec4, Vec4),
    pub size: (f32, f32),
    pub sheet: Option<(u32, u32, f32)>,
}

impl Default for EmitterParams {
    fn default() -> Self {
        Self {
            spawn_rate: 10.0,
            lifetime: (1.0, 1.0),
            direction: Vec3::Y,
            spread: 0.0,
            speed: (1.0, 1.0),
            gravity: Vec3::ZERO,
            color: (Vec4::ONE, Vec4::ONE),
            size: (1.0, 1.0),
            sheet: None,
        }
    }
}

/// A simulated particle type.
pub trait Particle: fmt::Debug + Clone {
    /// Per-instance vertex data uploaded for drawing.
    type Instance: Pod;

    fn spawn(params: &EmitterParams, origin: Vec3, rng: &mut StdRng) -> Self;

    /// Advances by `dt` seconds; returns `false` once the particle expired.
    fn advance(&mut self, params: &EmitterParams, dt: f32) -> bool;

    fn instance(&self, params: &EmitterParams) -> Self::Instance;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillboardParticle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub age: f32,
    pub lifetime: f32,
    pub rotation: f32,
}

impl BillboardParticle {
    /// Normalized age in `0..=1`.
    #[inline]
    #[must_use]
    pub fn life_fraction(&self) -> f32 {
        (self.age / self.lifetime).clamp(0.0, 1.0)
    }
}

/// Matches the per-instance attributes of `particle.vert`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BillboardInstance {
    pub position: [f32; 3],
    pub size: f32,
    pub color: [f32; 4],
    pub rotation: f32,
    pub frame: f32,
}

fn sample(rng: &mut StdRng, (min, max): (f32, f32)) -> f32 {
    if max > min { rng.random_range(min..max) } else { min }
}

impl Particle for BillboardParticle {
    type Instance = BillboardInstance;

    fn spawn(params: &EmitterParams, origin: Vec3, rng: &mut StdRng) -> Self {
        let mut direction = params.direction;
        if params.spread > 0.0 {
            // Random tilt inside the cone around `direction`.
            let tilt = rng.random_range(0.0..params.spread);
            let spin = rng.random_range(0.0..std::f32::consts::TAU);
            let (a, b) = direction.any_orthonormal_pair();
            direction = (direction * tilt.cos() + (a * spin.cos() + b * spin.sin()) * tilt.sin()).normalize();
        }
        Self {
            position: origin,
            velocity: direction * sample(rng, params.speed),
            age: 0.0,
            lifetime: sample(rng, params.lifetime),
            rotation: rng.random_range(0.0..std::f32::consts::TAU),
        }
    }

    fn advance(&mut self, params: &EmitterParams, dt: f32) -> bool {
        self.age += dt;
        self.velocity += params.gravity * dt;
        self.position += self.velocity * dt;
        self.age < self.lifetime
    }

    fn instance(&self, params: &EmitterParams) -> BillboardInstance {
        let t = self.life_fraction();
        let frame = match params.sheet {
            Some((columns, rows, fps)) => ((self.age * fps).floor() as u32 % (columns * rows)) as f32,
            None => 0.0,
        };
        BillboardInstance {
            position: self.position.to_array(),
            size: params.size.0 + (params.size.1 - params.size.0) * t,
            color: params.color.0.lerp(params.color.1, t).to_array(),
            rotation: self.rotation,
            frame,
        }
    }
}

/// Fixed-capacity particle pool. Spawning into a full pool replaces the
/// oldest particle.
#[derive(Debug)]
pub struct ParticleSystem<P: Particle> {
    params: EmitterParams,
    particles: VecDeque<P>,
    capacity: usize,
    origin: Vec3,
    spawn_accumulator: f32,
    rng: StdRng,
}

impl<P: Particle> ParticleSystem<P> {
    /// `seed` makes the simulation reproducible.
    #[must_use]
    pub fn new(description: &EmitterDescription, capacity: usize, seed: u64) -> Self {
        Self {
            params: description.params(),
            particles: VecDeque::with_capacity(capacity),
            capacity,
            origin: Vec3::ZERO,
            spawn_accumulator: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub fn params(&self) -> &EmitterParams {
        &self.params
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }

    #[must_use]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn particles(&self) -> impl Iterator<Item = &P> {
        self.particles.iter()
    }

    /// Spawns `count` particles at the origin.
    pub fn spawn(&mut self, count: usize) {
        if self.capacity == 0 {
            return;
        }
        // Only the newest `capacity` spawns would survive eviction.
        for _ in 0..count.min(self.capacity) {
            if self.particles.len() == self.capacity {
                self.particles.pop_front();
            }
            let particle = P::spawn(&self.params, self.origin, &mut self.rng);
            self.particles.push_back(particle);
        }
    }

    /// Ages every particle, drops the expired ones and emits new ones at the
    /// configured rate.
    ///
    /// A negative or non-finite `dt` is treated as zero.
    pub fn update(&mut self, dt: f32) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let params = self.params;
        self.particles.retain_mut(|p| p.advance(&params, dt));

        self.spawn_accumulator += params.spawn_rate * dt;
        let due = self.spawn_accumulator.floor();
        self.spawn_accumulator -= due;
        self.spawn(due as usize);
    }

    /// Per-instance data, oldest particle first.
    #[must_use]
    pub fn instances(&self) -> Vec<P::Instance> {
        self.particles.iter().map(|p| p.instance(&self.params)).collect()
    }

    pub fn clear(&mut self) {
        self.particles.clear();
        self.spawn_accumulator = 0.0;
    }
}
