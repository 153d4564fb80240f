//! Deferred lighting
//!
//! One full-screen pass per light, blended additively into the diffuse and
//! specular buffers. With no lights the buffers are only cleared.

use crate::backend::types::*;
use crate::device::RenderDevice;
use crate::frame::ViewFrame;
use crate::pipeline::gbuffer::GBufferTargets;
use crate::pipeline::{load_program, shaders, upload_view_params};
use crate::resources::RenderTarget;
use crate::scene::RenderLight;
use crate::shader::ShaderId;

pub const LIGHTING_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

#[derive(Debug)]
pub struct LightingPass {
    shader: Option<ShaderId>,
}

impl LightingPass {
    pub fn new(device: &mut RenderDevice) -> Self {
        let source = shaders::program(&[shaders::VIEW_PARAMS, shaders::FULLSCREEN, shaders::LIGHTING]);
        Self {
            shader: load_program(device, "lighting", &source, "vs_fullscreen", Some("fs_lighting")),
        }
    }

    pub fn render(
        &self,
        device: &mut RenderDevice,
        frame: &ViewFrame,
        lights: &[RenderLight],
        gbuffer: &GBufferTargets,
        diffuse: RenderTarget,
        specular: RenderTarget,
    ) {
        device.set_render_targets(&[diffuse.texture, specular.texture], None);
        device.clear_render_target(diffuse.texture, [0.0; 4]);
        device.clear_render_target(specular.texture, [0.0; 4]);

        let Some(shader) = self.shader else {
            return;
        };
        if lights.is_empty() {
            return;
        }

        device.push_states();
        device.set_blend(BlendDesc::ADDITIVE);
        device.set_depth_state(DepthDesc {
            test: false,
            write: false,
            func: CompareFunction::Always,
        });
        device.set_culling_mode(CullMode::None);
        device.set_shader(Some(shader));
        upload_view_params(device, shader, frame);
        device.bind_textures(&[
            Some(gbuffer.albedo.texture),
            Some(gbuffer.normal.texture),
            Some(gbuffer.material.texture),
            Some(gbuffer.depth.texture),
        ]);
        for light in lights {
            device.set_vec4(shader, "light_direction", light.direction.extend(0.0));
            device.set_vec4(shader, "light_radiance", light.radiance().extend(1.0));
            device.draw_fullscreen();
        }
        device.pop_states();
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;
    use crate::backend::{NullBackend, NullCounters};
    use crate::frame::FrameOrchestrator;
    use crate::resources::RenderTargetDesc;
    use crate::DeviceConfig;

    fn light_with(lights: &[RenderLight]) -> NullCounters {
        let backend = NullBackend::new(16, 16);
        let counters = backend.counters();
        let mut device = RenderDevice::with_backend(Box::new(backend), DeviceConfig::null(16, 16));
        let pass = LightingPass::new(&mut device);
        let frame = FrameOrchestrator::new(false, 1.0).frame_begin(
            &mut device,
            0,
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            (16, 16),
            false,
        );
        let gbuffer = GBufferTargets::acquire(&mut device, 16, 16).unwrap();
        let desc = RenderTargetDesc::new(16, 16, LIGHTING_FORMAT);
        let diffuse = device.get_render_texture(&desc).unwrap();
        let specular = device.get_render_texture(&desc).unwrap();

        let before = counters.lock().clone();
        pass.render(&mut device, &frame, lights, &gbuffer, diffuse, specular);
        assert_eq!(device.state_stack_depth(), 0);
        let after = counters.lock().clone();
        NullCounters {
            draws: after.draws - before.draws,
            clears: after.clears - before.clears,
            ..Default::default()
        }
    }

    #[test]
    fn no_lights_only_clears_the_buffers() {
        let delta = light_with(&[]);
        assert_eq!(delta.clears, 2);
        assert_eq!(delta.draws, 0);
    }

    #[test]
    fn one_draw_per_light() {
        let lights = [
            RenderLight::directional(1, -Vec3::Y, Vec3::ONE, 2.0),
            RenderLight::directional(2, Vec3::new(1.0, -1.0, 0.0), Vec3::X, 1.0),
        ];
        let delta = light_with(&lights);
        assert_eq!(delta.clears, 2);
        assert_eq!(delta.draws, 2);
    }
}
