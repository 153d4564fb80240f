//! Per-frame scene snapshot
//!
//! The render paths never own scene data. Each frame the caller builds a
//! [`RenderScene`] borrowing its meshes and materials.

mod camera;
mod material;

pub use camera::*;
pub use material::*;

use glam::{Mat4, Vec3};

use crate::resources::Mesh;

/// One drawable object
#[derive(Debug, Clone, Copy)]
pub struct RenderObject<'a> {
    pub mesh: &'a Mesh,
    pub material: &'a dyn Material,
    pub world: Mat4,
    /// Last frame's transform, for motion vectors
    pub prev_world: Mat4,
    /// Stable across frames
    pub id: u64,
}

impl<'a> RenderObject<'a> {
    pub fn new(id: u64, mesh: &'a Mesh, material: &'a dyn Material, world: Mat4) -> Self {
        Self {
            mesh,
            material,
            world,
            prev_world: world,
            id,
        }
    }

    pub fn with_prev_world(mut self, prev_world: Mat4) -> Self {
        self.prev_world = prev_world;
        self
    }
}

/// Directional light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderLight {
    pub id: u64,
    /// Direction the light travels in
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl RenderLight {
    pub fn directional(id: u64, direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            id,
            direction: direction.normalize_or_zero(),
            color,
            intensity,
        }
    }

    /// Color times intensity
    pub fn radiance(&self) -> Vec3 {
        self.color * self.intensity
    }
}

/// Background model; selects the composite program variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EnvironmentType {
    #[default]
    SolidColor,
    Gradient,
    Sky,
}

impl EnvironmentType {
    pub const ALL: [EnvironmentType; 3] = [
        EnvironmentType::SolidColor,
        EnvironmentType::Gradient,
        EnvironmentType::Sky,
    ];

    pub fn index(self) -> u32 {
        match self {
            EnvironmentType::SolidColor => 0,
            EnvironmentType::Gradient => 1,
            EnvironmentType::Sky => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    pub env_type: EnvironmentType,
    pub sky_color: Vec3,
    pub horizon_color: Vec3,
    pub ground_color: Vec3,
    pub intensity: f32,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            env_type: EnvironmentType::Gradient,
            sky_color: Vec3::new(0.35, 0.55, 0.9),
            horizon_color: Vec3::new(0.8, 0.85, 0.9),
            ground_color: Vec3::new(0.25, 0.22, 0.2),
            intensity: 1.0,
        }
    }
}

/// Everything rendered in one frame
#[derive(Debug, Default)]
pub struct RenderScene<'a> {
    pub objects: Vec<RenderObject<'a>>,
    pub lights: Vec<RenderLight>,
    pub environment: Environment,
}

impl<'a> RenderScene<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, object: RenderObject<'a>) {
        self.objects.push(object);
    }

    pub fn add_light(&mut self, light: RenderLight) {
        self.lights.push(light);
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }
}
