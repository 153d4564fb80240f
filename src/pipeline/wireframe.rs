//! Wireframe overlay
//!
//! Edges are drawn either straight onto the output, depth tested against the
//! G-buffer depth, or into a multisampled target that is resolved and
//! alpha-blended over the output.

use std::ops::{Deref, DerefMut};

use glam::Vec4;

use crate::backend::traits::TextureHandle;
use crate::backend::types::*;
use crate::device::RenderDevice;
use crate::frame::ViewFrame;
use crate::pipeline::present::{PresentPass, PresentSource};
use crate::pipeline::{load_program, shaders, upload_view_params};
use crate::resources::{RenderTarget, RenderTargetDesc};
use crate::scene::RenderObject;
use crate::shader::ShaderId;

const OVERLAY_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Wireframe fill for as long as it lives; solid fill is restored on drop.
pub struct WireframeFill<'a> {
    device: &'a mut RenderDevice,
}

impl<'a> WireframeFill<'a> {
    pub fn new(device: &'a mut RenderDevice) -> Self {
        device.set_filling_mode(FillMode::Wireframe);
        Self { device }
    }
}

impl Deref for WireframeFill<'_> {
    type Target = RenderDevice;

    fn deref(&self) -> &RenderDevice {
        self.device
    }
}

impl DerefMut for WireframeFill<'_> {
    fn deref_mut(&mut self) -> &mut RenderDevice {
        self.device
    }
}

impl Drop for WireframeFill<'_> {
    fn drop(&mut self) {
        self.device.set_filling_mode(FillMode::Solid);
    }
}

#[derive(Debug)]
pub struct WireframePass {
    shader: Option<ShaderId>,
    samples: u32,
    color: Vec4,
}

impl WireframePass {
    pub fn new(device: &mut RenderDevice, samples: u32) -> Self {
        let source = shaders::program(&[
            shaders::VIEW_PARAMS,
            shaders::OBJECT_PARAMS,
            shaders::WIREFRAME,
        ]);
        Self {
            shader: load_program(device, "wireframe", &source, "vs_wire", Some("fs_wire")),
            samples: samples.max(1),
            color: Vec4::new(0.9, 0.9, 0.9, 1.0),
        }
    }

    pub fn set_color(&mut self, color: Vec4) {
        self.color = color;
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Overlay the edges of `objects` on `output`.
    ///
    /// `objects` may be any subset of the scene. `depth` is the G-buffer depth
    /// of the same view; it is only used when drawing without multisampling.
    pub fn render(
        &self,
        device: &mut RenderDevice,
        frame: &ViewFrame,
        objects: &[RenderObject<'_>],
        output: TextureHandle,
        depth: RenderTarget,
        present: &PresentPass,
    ) {
        let Some(shader) = self.shader else {
            return;
        };
        let (width, height) = (depth.desc.width, depth.desc.height);

        if self.samples <= 1 {
            device.set_render_targets(&[output], Some(depth.texture));
            device.set_blend(BlendDesc::OPAQUE);
            device.set_depth_state(DepthDesc {
                test: true,
                write: false,
                func: CompareFunction::LessEqual,
            });
            self.draw_edges(device, frame, objects, shader);
            return;
        }

        let msaa_desc = RenderTargetDesc::new(width, height, OVERLAY_FORMAT).with_samples(self.samples);
        let Some(msaa) = device.get_render_texture(&msaa_desc) else {
            return;
        };
        let Some(resolved) = device.get_render_texture(&RenderTargetDesc::new(width, height, OVERLAY_FORMAT))
        else {
            device.release_render_texture(msaa.id);
            return;
        };

        device.set_render_targets(&[msaa.texture], None);
        device.clear_render_target(msaa.texture, [0.0; 4]);
        device.set_blend(BlendDesc::OPAQUE);
        device.set_depth_state(DepthDesc {
            test: false,
            write: false,
            func: CompareFunction::Always,
        });
        self.draw_edges(device, frame, objects, shader);
        device.resolve_texture(msaa.texture, resolved.texture);
        present.render(
            device,
            PresentSource::Color(resolved.texture),
            output,
            (width, height),
            BlendDesc::ALPHA,
        );

        device.release_render_texture(msaa.id);
        device.release_render_texture(resolved.id);
    }

    fn draw_edges(
        &self,
        device: &mut RenderDevice,
        frame: &ViewFrame,
        objects: &[RenderObject<'_>],
        shader: ShaderId,
    ) {
        let mut device = WireframeFill::new(device);
        device.set_culling_mode(CullMode::None);
        device.set_shader(Some(shader));
        upload_view_params(&mut device, shader, frame);
        device.set_vec4(shader, "wire_color", self.color);
        for object in objects {
            device.set_mat4(shader, "world", object.world);
            device.set_mat4(shader, "prev_world", object.prev_world);
            device.draw(object.mesh, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::DeviceConfig;

    #[test]
    fn fill_mode_is_restored_on_drop() {
        let mut device =
            RenderDevice::with_backend(Box::new(NullBackend::new(8, 8)), DeviceConfig::null(8, 8));
        {
            let fill = WireframeFill::new(&mut device);
            assert_eq!(fill.state().raster.fill, FillMode::Wireframe);
        }
        assert_eq!(device.state().raster.fill, FillMode::Solid);
    }
}
