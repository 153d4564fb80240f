//! Copy a buffer to the output, with debug visualizations for buffers that
//! are not colors.

use crate::backend::traits::TextureHandle;
use crate::backend::types::*;
use crate::device::RenderDevice;
use crate::pipeline::{load_program, shaders};
use crate::shader::ShaderId;

/// How the present program interprets its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentSource {
    Color(TextureHandle),
    Velocity(TextureHandle),
    Depth(TextureHandle),
}

impl PresentSource {
    fn mode(&self) -> u32 {
        match self {
            PresentSource::Color(_) => 0,
            PresentSource::Velocity(_) => 1,
            PresentSource::Depth(_) => 2,
        }
    }

    fn textures(&self) -> [Option<TextureHandle>; 2] {
        match *self {
            PresentSource::Color(texture) | PresentSource::Velocity(texture) => [Some(texture), None],
            PresentSource::Depth(texture) => [None, Some(texture)],
        }
    }
}

#[derive(Debug)]
pub struct PresentPass {
    shader: Option<ShaderId>,
}

impl PresentPass {
    pub fn new(device: &mut RenderDevice) -> Self {
        let source = shaders::program(&[shaders::FULLSCREEN, shaders::PRESENT]);
        Self {
            shader: load_program(device, "present", &source, "vs_fullscreen", Some("fs_present")),
        }
    }

    /// Draw `source` over the whole of `output` with `blend`.
    pub fn render(
        &self,
        device: &mut RenderDevice,
        source: PresentSource,
        output: TextureHandle,
        size: (u32, u32),
        blend: BlendDesc,
    ) {
        device.set_render_targets(&[output], None);
        device.set_viewport(Viewport::from_size(size.0, size.1));
        let Some(shader) = self.shader else {
            device.clear_render_target(output, [0.0, 0.0, 0.0, 1.0]);
            return;
        };
        device.set_blend(blend);
        device.set_depth_state(DepthDesc {
            test: false,
            write: false,
            func: CompareFunction::Always,
        });
        device.set_culling_mode(CullMode::None);
        device.set_shader(Some(shader));
        device.set_u32(shader, "present_mode", source.mode());
        device.bind_textures(&source.textures());
        device.draw_fullscreen();
    }
}
