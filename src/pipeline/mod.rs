//! Render paths
//!
//! Two ways of turning a [`RenderScene`](crate::scene::RenderScene) into an
//! image, selected per view:
//! 1. [`RealtimePath`] - deferred G-buffer, per-light lighting, composite,
//!    temporal resolve, present and an optional wireframe overlay
//! 2. [`PathTracer`] - compute path tracer accumulating into a persistent
//!    history image, tone mapped to the output
//!
//! Every pass owns its programs. A program that fails to compile leaves its
//! pass disabled with a warning instead of failing the frame.

pub mod composite;
pub mod gbuffer;
pub mod lighting;
pub mod path_tracer;
pub mod present;
pub mod realtime;
pub mod shaders;
pub mod temporal;
pub mod wireframe;

pub use path_tracer::PathTracer;
pub use realtime::RealtimePath;

use glam::Vec4;

use crate::device::RenderDevice;
use crate::frame::ViewFrame;
use crate::scene::Environment;
use crate::shader::ShaderId;

/// Which path renders a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderPath {
    #[default]
    Realtime,
    PathTraced,
}

/// Buffer shown by the realtime path's present pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewMode {
    #[default]
    Final,
    Albedo,
    Normal,
    Material,
    Velocity,
    Diffuse,
    Specular,
    Depth,
}

impl ViewMode {
    pub const ALL: [ViewMode; 8] = [
        ViewMode::Final,
        ViewMode::Albedo,
        ViewMode::Normal,
        ViewMode::Material,
        ViewMode::Velocity,
        ViewMode::Diffuse,
        ViewMode::Specular,
        ViewMode::Depth,
    ];

    /// Debug views show raw buffers and must not be jittered.
    pub fn allows_jitter(self) -> bool {
        self == ViewMode::Final
    }

    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|mode| *mode == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

/// Compile a render program, logging instead of failing when it does not build.
pub(crate) fn load_program(
    device: &mut RenderDevice,
    label: &str,
    source: &str,
    vertex: &str,
    fragment: Option<&str>,
) -> Option<ShaderId> {
    let shader = device.create_shader(label, source, vertex, fragment);
    if shader.is_none() {
        log::warn!("{} disabled: program failed to build", label);
    }
    shader
}

/// Upload the shared camera block through `shader`.
pub fn upload_view_params(device: &mut RenderDevice, shader: ShaderId, frame: &ViewFrame) {
    let current = &frame.current;
    let size = current.viewport.max(glam::Vec2::ONE);
    device.set_mat4(shader, "view_proj", current.view_proj);
    device.set_mat4(shader, "view_proj_jittered", current.view_proj_jittered);
    device.set_mat4(shader, "prev_view_proj", frame.prev.view_proj);
    device.set_mat4(
        shader,
        "prev_view_proj_rejittered",
        frame.prev_view_proj_rejittered,
    );
    device.set_mat4(shader, "inv_view_proj", current.view_proj_inverse);
    device.set_vec4(shader, "camera_position", current.world_position.extend(1.0));
    device.set_vec4(
        shader,
        "viewport_size",
        Vec4::new(size.x, size.y, 1.0 / size.x, 1.0 / size.y),
    );
    let jitter_uv = current.jitter / size;
    device.set_vec4(shader, "jitter_uv", Vec4::new(jitter_uv.x, jitter_uv.y, 0.0, 0.0));
}

/// Upload the environment block through `shader`.
pub fn upload_environment(device: &mut RenderDevice, shader: ShaderId, environment: &Environment) {
    device.set_vec4(shader, "sky_color", environment.sky_color.extend(1.0));
    device.set_vec4(shader, "horizon_color", environment.horizon_color.extend(1.0));
    device.set_vec4(
        shader,
        "ground_color",
        environment.ground_color.extend(environment.intensity),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_mode_cycles_through_every_mode() {
        let mut mode = ViewMode::Final;
        for _ in 0..ViewMode::ALL.len() {
            mode = mode.next();
        }
        assert_eq!(mode, ViewMode::Final);
    }

    #[test]
    fn only_final_mode_is_jittered() {
        assert!(ViewMode::Final.allows_jitter());
        assert!(!ViewMode::Velocity.allows_jitter());
    }
}
