//! Frame driver
//!
//! [`Renderer`] owns both render paths and the frame orchestrator, and runs
//! one view per call through whichever path that view selected.

use glam::Mat4;
use rustc_hash::FxHashMap;

use crate::backend::{BackendResult, TextureHandle};
use crate::device::RenderDevice;
use crate::frame::FrameOrchestrator;
use crate::pipeline::realtime::RealtimeView;
use crate::pipeline::{PathTracer, RealtimePath, RenderPath, ViewMode};
use crate::scene::{RenderObject, RenderScene};
use crate::RendererConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ViewSettings {
    path: RenderPath,
    mode: ViewMode,
}

#[derive(Debug)]
pub struct Renderer {
    config: RendererConfig,
    frames: FrameOrchestrator,
    realtime: RealtimePath,
    path_tracer: PathTracer,
    views: FxHashMap<u64, ViewSettings>,
}

impl Renderer {
    /// Build every pass's programs on `device`.
    pub fn new(device: &mut RenderDevice, config: RendererConfig) -> Self {
        let realtime = RealtimePath::new(device, &config);
        let path_tracer = PathTracer::new(device, &config);
        log::info!(
            "Renderer ready on {} (temporal AA {})",
            device.backend_name(),
            if config.temporal_aa { "on" } else { "off" }
        );
        Self {
            frames: FrameOrchestrator::new(config.temporal_aa, config.jitter_scale),
            config,
            realtime,
            path_tracer,
            views: FxHashMap::default(),
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn set_temporal_aa(&mut self, enabled: bool) {
        self.config.temporal_aa = enabled;
        self.frames.set_temporal_aa(enabled);
    }

    pub fn set_view_path(&mut self, view_id: u64, path: RenderPath) {
        let settings = self.views.entry(view_id).or_default();
        if settings.path != path {
            log::debug!("View {}: switching to {:?}", view_id, path);
            settings.path = path;
            self.path_tracer.reset();
        }
    }

    pub fn view_path(&self, view_id: u64) -> RenderPath {
        self.views.get(&view_id).map(|s| s.path).unwrap_or_default()
    }

    pub fn set_view_mode(&mut self, view_id: u64, mode: ViewMode) {
        self.views.entry(view_id).or_default().mode = mode;
    }

    pub fn view_mode(&self, view_id: u64) -> ViewMode {
        self.views.get(&view_id).map(|s| s.mode).unwrap_or_default()
    }

    /// Drop everything kept for a view.
    pub fn forget_view(&mut self, view_id: u64) {
        self.views.remove(&view_id);
        self.frames.forget_view(view_id);
    }

    pub fn frames(&self) -> &FrameOrchestrator {
        &self.frames
    }

    pub fn path_tracer(&self) -> &PathTracer {
        &self.path_tracer
    }

    pub fn path_tracer_mut(&mut self) -> &mut PathTracer {
        &mut self.path_tracer
    }

    pub fn realtime_mut(&mut self) -> &mut RealtimePath {
        &mut self.realtime
    }

    /// Render one view of `scene` into `output`, which must be `size` pixels.
    ///
    /// `wireframe` lists the objects outlined over a realtime view; path
    /// traced views ignore it.
    #[allow(clippy::too_many_arguments)]
    pub fn render_view(
        &mut self,
        device: &mut RenderDevice,
        view_id: u64,
        scene: &RenderScene<'_>,
        view: Mat4,
        proj: Mat4,
        wireframe: Option<&[RenderObject<'_>]>,
        output: TextureHandle,
        size: (u32, u32),
    ) -> bool {
        let settings = self.views.get(&view_id).copied().unwrap_or_default();
        let allow_jitter = settings.path == RenderPath::Realtime && settings.mode.allows_jitter();
        let frame = self
            .frames
            .frame_begin(device, view_id, view, proj, size, allow_jitter);

        let rendered = match settings.path {
            RenderPath::Realtime => {
                let options = RealtimeView {
                    mode: settings.mode,
                    temporal: self.frames.temporal_aa() && allow_jitter,
                    wireframe,
                };
                self.realtime
                    .render_view(device, &frame, scene, options, output, size)
            }
            RenderPath::PathTraced => self
                .path_tracer
                .render_view(device, &frame, scene, output, size),
        };

        self.frames.frame_end(device, view_id);
        rendered
    }

    /// Render a view to the back buffer, present it and advance the device frame.
    pub fn render_frame(
        &mut self,
        device: &mut RenderDevice,
        view_id: u64,
        scene: &RenderScene<'_>,
        view: Mat4,
        proj: Mat4,
        wireframe: Option<&[RenderObject<'_>]>,
    ) -> BackendResult<()> {
        let context = device.begin_frame()?;
        let size = (context.width, context.height);
        if !self.render_view(device, view_id, scene, view, proj, wireframe, context.back_buffer, size) {
            log::warn!("View {} was not rendered this frame", view_id);
        }
        let result = device.end_frame();
        device.update();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::DeviceConfig;

    fn renderer() -> (RenderDevice, Renderer) {
        let mut device =
            RenderDevice::with_backend(Box::new(NullBackend::new(16, 16)), DeviceConfig::null(16, 16));
        let renderer = Renderer::new(&mut device, RendererConfig::default());
        (device, renderer)
    }

    #[test]
    fn views_default_to_realtime_final() {
        let (_device, renderer) = renderer();
        assert_eq!(renderer.view_path(3), RenderPath::Realtime);
        assert_eq!(renderer.view_mode(3), ViewMode::Final);
    }

    #[test]
    fn view_settings_are_per_view() {
        let (_device, mut renderer) = renderer();
        renderer.set_view_path(1, RenderPath::PathTraced);
        renderer.set_view_mode(2, ViewMode::Depth);
        assert_eq!(renderer.view_path(1), RenderPath::PathTraced);
        assert_eq!(renderer.view_mode(1), ViewMode::Final);
        assert_eq!(renderer.view_path(2), RenderPath::Realtime);
        assert_eq!(renderer.view_mode(2), ViewMode::Depth);
        renderer.forget_view(1);
        assert_eq!(renderer.view_path(1), RenderPath::Realtime);
    }
}
