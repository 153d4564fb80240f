//! Deferred realtime path

use crate::backend::traits::TextureHandle;
use crate::backend::types::*;
use crate::device::RenderDevice;
use crate::frame::ViewFrame;
use crate::pipeline::composite::{CompositePass, COLOR_FORMAT};
use crate::pipeline::gbuffer::{GBufferPass, GBufferTargets};
use crate::pipeline::lighting::{LightingPass, LIGHTING_FORMAT};
use crate::pipeline::present::{PresentPass, PresentSource};
use crate::pipeline::temporal::TemporalPass;
use crate::pipeline::wireframe::WireframePass;
use crate::pipeline::ViewMode;
use crate::resources::RenderTargetDesc;
use crate::scene::{RenderObject, RenderScene};
use crate::RendererConfig;

/// Per-frame options of one realtime view
#[derive(Debug, Clone, Copy)]
pub struct RealtimeView<'a> {
    pub mode: ViewMode,
    pub temporal: bool,
    /// Objects to outline on top of the presented image
    pub wireframe: Option<&'a [RenderObject<'a>]>,
}

#[derive(Debug)]
pub struct RealtimePath {
    gbuffer: GBufferPass,
    lighting: LightingPass,
    composite: CompositePass,
    temporal: TemporalPass,
    present: PresentPass,
    wireframe: WireframePass,
}

impl RealtimePath {
    pub fn new(device: &mut RenderDevice, config: &RendererConfig) -> Self {
        Self {
            gbuffer: GBufferPass::new(device),
            lighting: LightingPass::new(device),
            composite: CompositePass::new(device),
            temporal: TemporalPass::new(device, config.history_blend),
            present: PresentPass::new(device),
            wireframe: WireframePass::new(device, config.wireframe_msaa_samples),
        }
    }

    pub fn temporal_pass_mut(&mut self) -> &mut TemporalPass {
        &mut self.temporal
    }

    pub fn wireframe_pass_mut(&mut self) -> &mut WireframePass {
        &mut self.wireframe
    }

    /// Render `scene` into `output`. Returns `false` when the frame's targets
    /// could not be allocated and nothing was drawn.
    pub fn render_view(
        &self,
        device: &mut RenderDevice,
        frame: &ViewFrame,
        scene: &RenderScene<'_>,
        view: RealtimeView<'_>,
        output: TextureHandle,
        size: (u32, u32),
    ) -> bool {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return false;
        }
        let Some(gbuffer) = GBufferTargets::acquire(device, width, height) else {
            log::error!("Realtime path: G-buffer allocation failed at {}x{}", width, height);
            return false;
        };
        let mut checked_out = Vec::with_capacity(3);
        for format in [LIGHTING_FORMAT, LIGHTING_FORMAT, COLOR_FORMAT] {
            match device.get_render_texture(&RenderTargetDesc::new(width, height, format)) {
                Some(target) => checked_out.push(target),
                None => {
                    for target in checked_out {
                        device.release_render_texture(target.id);
                    }
                    gbuffer.release(device);
                    return false;
                }
            }
        }
        let (diffuse, specular, color) = (checked_out[0], checked_out[1], checked_out[2]);

        self.gbuffer.render(device, frame, scene, &gbuffer);
        self.lighting
            .render(device, frame, &scene.lights, &gbuffer, diffuse, specular);
        self.composite.render(
            device,
            frame,
            &scene.environment,
            &gbuffer,
            diffuse,
            specular,
            color,
        );

        let final_color = if view.mode == ViewMode::Final && view.temporal {
            self.temporal
                .resolve(device, color, gbuffer.velocity)
                .unwrap_or(color.texture)
        } else {
            color.texture
        };

        let source = match view.mode {
            ViewMode::Final => PresentSource::Color(final_color),
            ViewMode::Albedo => PresentSource::Color(gbuffer.albedo.texture),
            ViewMode::Normal => PresentSource::Color(gbuffer.normal.texture),
            ViewMode::Material => PresentSource::Color(gbuffer.material.texture),
            ViewMode::Velocity => PresentSource::Velocity(gbuffer.velocity.texture),
            ViewMode::Diffuse => PresentSource::Color(diffuse.texture),
            ViewMode::Specular => PresentSource::Color(specular.texture),
            ViewMode::Depth => PresentSource::Depth(gbuffer.depth.texture),
        };
        self.present
            .render(device, source, output, size, BlendDesc::OPAQUE);

        // After present, so edges never enter the color history.
        if let Some(objects) = view.wireframe.filter(|objects| !objects.is_empty()) {
            self.wireframe
                .render(device, frame, objects, output, gbuffer.depth, &self.present);
        }

        for target in [diffuse, specular, color] {
            device.release_render_texture(target.id);
        }
        gbuffer.release(device);
        true
    }
}
