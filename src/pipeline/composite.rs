//! Composite
//!
//! Combines the G-buffer, the lighting buffers and the environment into the
//! frame's color. One program variant per environment type.

use crate::backend::types::*;
use crate::device::RenderDevice;
use crate::frame::ViewFrame;
use crate::pipeline::gbuffer::GBufferTargets;
use crate::pipeline::{load_program, shaders, upload_environment, upload_view_params};
use crate::resources::RenderTarget;
use crate::scene::{Environment, EnvironmentType};
use crate::shader::ShaderId;

pub const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

#[derive(Debug)]
pub struct CompositePass {
    variants: [Option<ShaderId>; 3],
}

impl CompositePass {
    pub fn new(device: &mut RenderDevice) -> Self {
        let variants = EnvironmentType::ALL.map(|env_type| {
            let source = shaders::composite_variant(env_type.index());
            load_program(
                device,
                &format!("composite {:?}", env_type),
                &source,
                "vs_fullscreen",
                Some("fs_composite"),
            )
        });
        Self { variants }
    }

    pub fn variant(&self, env_type: EnvironmentType) -> Option<ShaderId> {
        self.variants[env_type.index() as usize]
    }

    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        device: &mut RenderDevice,
        frame: &ViewFrame,
        environment: &Environment,
        gbuffer: &GBufferTargets,
        diffuse: RenderTarget,
        specular: RenderTarget,
        output: RenderTarget,
    ) {
        device.set_render_targets(&[output.texture], None);
        let Some(shader) = self.variant(environment.env_type) else {
            device.clear_render_target(output.texture, [0.0, 0.0, 0.0, 1.0]);
            return;
        };
        device.set_blend(BlendDesc::OPAQUE);
        device.set_depth_state(DepthDesc {
            test: false,
            write: false,
            func: CompareFunction::Always,
        });
        device.set_culling_mode(CullMode::None);
        device.set_shader(Some(shader));
        upload_view_params(device, shader, frame);
        upload_environment(device, shader, environment);
        device.bind_textures(&[
            Some(gbuffer.albedo.texture),
            Some(gbuffer.normal.texture),
            Some(gbuffer.material.texture),
            Some(diffuse.texture),
            Some(specular.texture),
            Some(gbuffer.depth.texture),
        ]);
        device.draw_fullscreen();
    }
}
