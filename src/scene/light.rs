//! Lights and fixed-capacity light containers.
//!
//! Shaders are compiled for a fixed number of lights per kind, so each kind
//! lives in a [`LightContainer`] of matching capacity. Inserting into a full
//! container drops the least important light; on equal importance the light
//! that was there first stays.

use std::fmt;

use glam::Vec3;

pub trait Light: fmt::Debug + Clone {
    /// Kind name used in logs.
    const KIND: &'static str;

    /// Eviction priority; higher survives.
    fn importance(&self) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Distance at which the contribution reaches zero.
    pub radius: f32,
}

impl PointLight {
    #[must_use]
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            radius,
        }
    }
}

impl Light for PointLight {
    const KIND: &'static str = "point";

    fn importance(&self) -> f32 {
        self.intensity * self.radius
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in (normalized on construction).
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub casts_shadow: bool,
}

impl DirectionalLight {
    #[must_use]
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or(Vec3::NEG_Y),
            color,
            intensity,
            casts_shadow: true,
        }
    }
}

impl Light for DirectionalLight {
    const KIND: &'static str = "directional";

    fn importance(&self) -> f32 {
        self.intensity
    }
}

#[derive(Debug, Clone)]
pub struct LightContainer<L: Light> {
    lights: Vec<(u64, L)>,
    capacity: usize,
    next_seq: u64,
}

impl<L: Light> LightContainer<L> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lights: Vec::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.lights.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    /// Adds `light`, returning whichever light did not fit (the evicted one,
    /// or `light` itself when it is not more important than any resident).
    pub fn insert(&mut self, light: L) -> Option<L> {
        if self.capacity == 0 {
            return Some(light);
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.lights.len() < self.capacity {
            self.lights.push((seq, light));
            return None;
        }

        // Least important resident; among equals the newest goes first.
        let victim = self
            .lights
            .iter()
            .enumerate()
            .min_by(|(_, (sa, a)), (_, (sb, b))| {
                a.importance().total_cmp(&b.importance()).then(sb.cmp(sa))
            })
            .map(|(idx, _)| idx)?;

        if light.importance() <= self.lights[victim].1.importance() {
            log::debug!("{} light container full ({}), new light dropped", L::KIND, self.capacity);
            return Some(light);
        }

        let (_, evicted) = std::mem::replace(&mut self.lights[victim], (seq, light));
        log::debug!("{} light container full ({}), evicted {evicted:?}", L::KIND, self.capacity);
        Some(evicted)
    }

    /// Lights in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &L> {
        let mut ordered: Vec<_> = self.lights.iter().collect();
        ordered.sort_by_key(|(seq, _)| *seq);
        ordered.into_iter().map(|(_, light)| light)
    }

    /// The light with the highest importance (oldest among equals).
    #[must_use]
    pub fn most_important(&self) -> Option<&L> {
        self.lights
            .iter()
            .max_by(|(sa, a), (sb, b)| a.importance().total_cmp(&b.importance()).then(sb.cmp(sa)))
            .map(|(_, light)| light)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&L) -> bool) {
        self.lights.retain(|(_, light)| keep(light));
    }

    pub fn clear(&mut self) {
        self.lights.clear();
    }
}
