//! Frame uniform setters.
//!
//! A [`UniformSetters`] is an ordered list of independent callbacks. After a
//! pass binds a program it runs every callback in order; each one may set any
//! number of uniforms on the bound program. There is no short-circuiting and
//! no ordering contract beyond "later setters win".

use glam::Vec3;

use crate::core::GpuContext;
use crate::scene::{Camera, Scene};

use super::pass::FrameInfo;

/// What a setter may read.
pub struct UniformInputs<'a> {
    pub camera: &'a Camera,
    pub scene: &'a Scene,
    pub frame: &'a FrameInfo,
}

pub type UniformSetter = Box<dyn Fn(&mut GpuContext, &UniformInputs<'_>)>;

#[derive(Default)]
pub struct UniformSetters {
    setters: Vec<UniformSetter>,
}

impl UniformSetters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Camera, time and scene lighting, in that order.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with(camera_uniforms)
            .with(time_uniforms)
            .with(light_uniforms)
    }

    pub fn push(&mut self, setter: impl Fn(&mut GpuContext, &UniformInputs<'_>) + 'static) {
        self.setters.push(Box::new(setter));
    }

    #[must_use]
    pub fn with(mut self, setter: impl Fn(&mut GpuContext, &UniformInputs<'_>) + 'static) -> Self {
        self.push(setter);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.setters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.setters.is_empty()
    }

    pub fn apply(&self, gpu: &mut GpuContext, inputs: &UniformInputs<'_>) {
        for setter in &self.setters {
            setter(gpu, inputs);
        }
    }
}

pub fn camera_uniforms(gpu: &mut GpuContext, inputs: &UniformInputs<'_>) {
    let camera = inputs.camera;
    gpu.set_uniform("u_view", camera.view_matrix());
    gpu.set_uniform("u_projection", camera.projection_matrix());
    gpu.set_uniform("u_view_projection", camera.view_projection_matrix());
    gpu.set_uniform("u_camera_position", camera.position());
}

pub fn time_uniforms(gpu: &mut GpuContext, inputs: &UniformInputs<'_>) {
    gpu.set_uniform("u_time", inputs.frame.time);
    gpu.set_uniform("u_delta_time", inputs.frame.dt);
}

pub fn light_uniforms(gpu: &mut GpuContext, inputs: &UniformInputs<'_>) {
    let scene = inputs.scene;
    gpu.set_uniform("u_ambient", scene.ambient);

    match scene.sun() {
        Some(sun) => {
            gpu.set_uniform("u_sun_direction", sun.direction);
            gpu.set_uniform("u_sun_color", sun.color * sun.intensity);
        }
        None => {
            gpu.set_uniform("u_sun_direction", Vec3::NEG_Y);
            gpu.set_uniform("u_sun_color", Vec3::ZERO);
        }
    }

    let mut count: i32 = 0;
    for (i, light) in scene.point_lights.iter().enumerate() {
        gpu.set_uniform(&format!("u_point_lights[{i}].position"), light.position);
        gpu.set_uniform(&format!("u_point_lights[{i}].radius"), light.radius);
        gpu.set_uniform(&format!("u_point_lights[{i}].color"), light.color);
        gpu.set_uniform(&format!("u_point_lights[{i}].intensity"), light.intensity);
        count += 1;
    }
    gpu.set_uniform("u_point_light_count", count);
}
