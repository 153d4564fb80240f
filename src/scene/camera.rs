//! Orbit camera
//!
//! The renderer only consumes view and projection matrices; [`Camera`] is a
//! convenience for callers that orbit a point of interest.

use glam::{Mat4, Vec3};

const MAX_PITCH: f32 = 1.55;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lens {
    /// Vertical field of view in radians
    Perspective { fov_y: f32 },
    /// Visible height in world units
    Orthographic { height: f32 },
}

/// Camera circling `target` at `distance`
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub target: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,
    pub lens: Lens,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO)
    }
}

impl Camera {
    /// Camera at `position` looking at `target`.
    pub fn new(position: Vec3, target: Vec3) -> Self {
        let offset = position - target;
        let distance = offset.length().max(1e-3);
        Self {
            target,
            yaw: offset.x.atan2(offset.z),
            pitch: (offset.y / distance).clamp(-1.0, 1.0).asin(),
            distance,
            lens: Lens::Perspective {
                fov_y: std::f32::consts::FRAC_PI_4,
            },
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }

    pub fn with_lens(mut self, lens: Lens) -> Self {
        self.lens = lens;
        self
    }

    pub fn position(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target + self.distance * Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    /// Rotate around the target. Angles in radians; pitch stops short of the poles.
    pub fn orbit(&mut self, yaw: f32, pitch: f32) {
        self.yaw += yaw;
        self.pitch = (self.pitch + pitch).clamp(-MAX_PITCH, MAX_PITCH);
    }

    pub fn zoom(&mut self, factor: f32) {
        self.distance = (self.distance * factor).clamp(self.near * 2.0, self.far * 0.5);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        match self.lens {
            Lens::Perspective { fov_y } => Mat4::perspective_rh(fov_y, self.aspect, self.near, self.far),
            Lens::Orthographic { height } => {
                let half_h = height * 0.5;
                let half_w = half_h * self.aspect;
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        }
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position()).normalize_or_zero()
    }

    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if height > 0.0 {
            self.aspect = width / height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_recovers_the_given_position() {
        let position = Vec3::new(1.0, 2.0, 5.0);
        let camera = Camera::new(position, Vec3::new(0.0, 0.5, 0.0));
        assert!((camera.position() - position).length() < 1e-4);
    }

    #[test]
    fn orbit_keeps_distance_and_clamps_pitch() {
        let mut camera = Camera::default();
        let distance = camera.distance;
        camera.orbit(0.7, 10.0);
        assert_eq!(camera.pitch, MAX_PITCH);
        assert!((camera.position().distance(camera.target) - distance).abs() < 1e-4);
    }

    #[test]
    fn view_matrix_moves_target_onto_the_forward_axis() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let target = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!((target - Vec3::new(0.0, 0.0, -5.0)).length() < 1e-4);
    }

    #[test]
    fn orthographic_lens_keeps_parallel_lines() {
        let camera = Camera::default().with_lens(Lens::Orthographic { height: 4.0 });
        let proj = camera.projection_matrix();
        assert_eq!(proj.w_axis.w, 1.0);
        assert_eq!(proj.z_axis.w, 0.0);
    }
}
