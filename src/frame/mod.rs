//! Per-view camera bookkeeping
//!
//! [`FrameOrchestrator`] keeps the current and previous [`Mats`] of every
//! logical view, picks the frame's sub-pixel jitter and runs the view's GPU
//! frame timer.

pub mod jitter;
pub mod timer;

use glam::{Mat4, Vec2, Vec3};
use rustc_hash::FxHashMap;

use crate::device::RenderDevice;
pub use jitter::{apply_jitter, jitter_offset, jitter_sequence, JITTER_SEQUENCE_LEN};
pub use timer::{FrameTimerRing, TIMER_RING_LEN};

/// Camera matrices of one view for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mats {
    pub proj: Mat4,
    pub proj_jittered: Mat4,
    pub view: Mat4,
    pub view_proj: Mat4,
    pub view_proj_jittered: Mat4,
    pub view_proj_inverse: Mat4,
    pub view_inverse: Mat4,
    pub world_position: Vec3,
    /// Jitter applied to `proj_jittered`, in pixels
    pub jitter: Vec2,
    pub viewport: Vec2,
}

impl Mats {
    pub fn new(view: Mat4, proj: Mat4, viewport: Vec2, jitter: Vec2) -> Self {
        let proj_jittered = apply_jitter(proj, jitter, viewport);
        let view_proj = proj * view;
        let view_inverse = view.inverse();
        Self {
            proj,
            proj_jittered,
            view,
            view_proj,
            view_proj_jittered: proj_jittered * view,
            view_proj_inverse: view_proj.inverse(),
            view_inverse,
            world_position: view_inverse.w_axis.truncate(),
            jitter,
            viewport,
        }
    }
}

/// Matrices handed to the render paths for one view
#[derive(Debug, Clone, Copy)]
pub struct ViewFrame {
    pub current: Mats,
    pub prev: Mats,
    /// Previous view-projection with the current frame's jitter applied
    pub prev_view_proj_rejittered: Mat4,
    /// No history exists for this view yet
    pub first_frame: bool,
    pub frame: u64,
}

#[derive(Debug, Default)]
struct ViewHistory {
    prev: Option<Mats>,
    current: Option<Mats>,
    timer: FrameTimerRing,
}

/// Tracks camera history for every logical view
#[derive(Debug)]
pub struct FrameOrchestrator {
    temporal_aa: bool,
    jitter_scale: f32,
    views: FxHashMap<u64, ViewHistory>,
}

impl FrameOrchestrator {
    pub fn new(temporal_aa: bool, jitter_scale: f32) -> Self {
        Self {
            temporal_aa,
            jitter_scale,
            views: FxHashMap::default(),
        }
    }

    pub fn set_temporal_aa(&mut self, enabled: bool) {
        self.temporal_aa = enabled;
    }

    pub fn temporal_aa(&self) -> bool {
        self.temporal_aa
    }

    /// Compute this frame's matrices for `view_id` and start its GPU timer.
    pub fn frame_begin(
        &mut self,
        device: &mut RenderDevice,
        view_id: u64,
        view: Mat4,
        proj: Mat4,
        viewport: (u32, u32),
        allow_jitter: bool,
    ) -> ViewFrame {
        let frame = device.frame();
        let viewport = Vec2::new(viewport.0 as f32, viewport.1 as f32);
        let jitter = if self.temporal_aa && allow_jitter {
            jitter_offset(frame) * self.jitter_scale
        } else {
            Vec2::ZERO
        };

        let current = Mats::new(view, proj, viewport, jitter);
        let history = self.views.entry(view_id).or_default();
        let first_frame = history.prev.is_none();
        let prev = history.prev.unwrap_or(current);
        let prev_view_proj_rejittered = apply_jitter(prev.proj, jitter, viewport) * prev.view;

        history.current = Some(current);
        history.timer.begin(device, frame);

        ViewFrame {
            current,
            prev,
            prev_view_proj_rejittered,
            first_frame,
            frame,
        }
    }

    /// Stop the view's timer and keep this frame's matrices as next frame's history.
    pub fn frame_end(&mut self, device: &mut RenderDevice, view_id: u64) {
        let Some(history) = self.views.get_mut(&view_id) else {
            log::warn!("frame_end for view {} without frame_begin", view_id);
            return;
        };
        history.timer.end(device);
        if let Some(current) = history.current.take() {
            history.prev = Some(current);
        }
    }

    /// Drop a view's history; its next frame starts fresh.
    pub fn forget_view(&mut self, view_id: u64) {
        self.views.remove(&view_id);
    }

    /// Last GPU frame time read back for a view, in milliseconds
    pub fn gpu_frame_time(&self, view_id: u64) -> Option<f64> {
        self.views.get(&view_id).and_then(|h| h.timer.last_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::DeviceConfig;

    fn device() -> RenderDevice {
        RenderDevice::with_backend(Box::new(NullBackend::new(64, 64)), DeviceConfig::null(64, 64))
    }

    fn proj() -> Mat4 {
        Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0)
    }

    #[test]
    fn first_frame_history_equals_current() {
        let mut device = device();
        let mut frames = FrameOrchestrator::new(true, 1.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, Vec3::Y);
        let frame = frames.frame_begin(&mut device, 7, view, proj(), (64, 64), true);
        assert!(frame.first_frame);
        assert_eq!(frame.prev, frame.current);
        assert_eq!(frame.prev_view_proj_rejittered, frame.current.view_proj_jittered);
    }

    #[test]
    fn previous_matrices_come_from_the_last_frame() {
        let mut device = device();
        let mut frames = FrameOrchestrator::new(true, 1.0);
        let first = Mat4::look_at_rh(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, Vec3::Y);
        let second = Mat4::look_at_rh(Vec3::new(1.0, 1.0, 5.0), Vec3::ZERO, Vec3::Y);

        frames.frame_begin(&mut device, 1, first, proj(), (64, 64), true);
        frames.frame_end(&mut device, 1);
        device.update();
        let frame = frames.frame_begin(&mut device, 1, second, proj(), (64, 64), true);

        assert!(!frame.first_frame);
        assert_eq!(frame.prev.view, first);
        let expected = apply_jitter(proj(), frame.current.jitter, Vec2::new(64.0, 64.0)) * first;
        assert_eq!(frame.prev_view_proj_rejittered, expected);
    }

    #[test]
    fn jitter_disabled_leaves_projection_untouched() {
        let mut device = device();
        let mut frames = FrameOrchestrator::new(true, 1.0);
        let frame = frames.frame_begin(&mut device, 1, Mat4::IDENTITY, proj(), (64, 64), false);
        assert_eq!(frame.current.jitter, Vec2::ZERO);
        assert_eq!(frame.current.proj_jittered, frame.current.proj);
    }

    #[test]
    fn views_are_independent() {
        let mut device = device();
        let mut frames = FrameOrchestrator::new(false, 1.0);
        frames.frame_begin(&mut device, 1, Mat4::IDENTITY, proj(), (64, 64), true);
        frames.frame_end(&mut device, 1);
        let other = frames.frame_begin(&mut device, 2, Mat4::IDENTITY, proj(), (64, 64), true);
        assert!(other.first_frame);
    }
}
