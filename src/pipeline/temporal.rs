//! Temporal anti-aliasing
//!
//! The last resolved color is reprojected through this frame's velocity
//! buffer, then blended with the new composite. The blend result becomes the
//! next frame's history through the previous-frame registry.

use crate::backend::traits::TextureHandle;
use crate::backend::types::*;
use crate::device::RenderDevice;
use crate::pipeline::composite::COLOR_FORMAT;
use crate::pipeline::{load_program, shaders};
use crate::resources::{PrevSemantic, RenderTarget, RenderTargetDesc};
use crate::shader::ShaderId;

#[derive(Debug)]
pub struct TemporalPass {
    reproject: Option<ShaderId>,
    resolve: Option<ShaderId>,
    history_blend: f32,
}

impl TemporalPass {
    pub fn new(device: &mut RenderDevice, history_blend: f32) -> Self {
        let reproject_source = shaders::program(&[shaders::FULLSCREEN, shaders::REPROJECTION]);
        let resolve_source = shaders::program(&[shaders::FULLSCREEN, shaders::TEMPORAL_RESOLVE]);
        Self {
            reproject: load_program(
                device,
                "reprojection",
                &reproject_source,
                "vs_fullscreen",
                Some("fs_reproject"),
            ),
            resolve: load_program(
                device,
                "temporal resolve",
                &resolve_source,
                "vs_fullscreen",
                Some("fs_temporal"),
            ),
            history_blend: history_blend.clamp(0.0, 1.0),
        }
    }

    pub fn is_available(&self) -> bool {
        self.reproject.is_some() && self.resolve.is_some()
    }

    pub fn set_history_blend(&mut self, blend: f32) {
        self.history_blend = blend.clamp(0.0, 1.0);
    }

    /// Resolve `color` against history and store the result as the new history.
    ///
    /// Returns the texture holding the resolved image, or `None` when the
    /// pass could not run and `color` should be presented as is. `color` is
    /// left checked out either way.
    ///
    /// The history is reprojected here, after composite, not ahead of lighting.
    pub fn resolve(
        &self,
        device: &mut RenderDevice,
        color: RenderTarget,
        velocity: RenderTarget,
    ) -> Option<TextureHandle> {
        let (Some(reproject), Some(resolve)) = (self.reproject, self.resolve) else {
            return None;
        };
        let (width, height) = (color.desc.width, color.desc.height);
        let prev = device.get_prev_render_texture(PrevSemantic::ColorHistory, width, height, COLOR_FORMAT)?;
        let history_desc = RenderTargetDesc::history(width, height, COLOR_FORMAT);

        device.set_blend(BlendDesc::OPAQUE);
        device.set_depth_state(DepthDesc {
            test: false,
            write: false,
            func: CompareFunction::Always,
        });
        device.set_culling_mode(CullMode::None);

        // Fresh history holds garbage; skip reprojection and take the current frame.
        let reprojected = if prev.fresh {
            None
        } else {
            let target = device.get_render_texture(&history_desc)?;
            device.set_render_targets(&[target.texture], None);
            device.set_shader(Some(reproject));
            device.bind_textures(&[Some(prev.texture), Some(velocity.texture)]);
            device.draw_fullscreen();
            Some(target)
        };

        let Some(resolved) = device.get_render_texture(&history_desc) else {
            if let Some(target) = reprojected {
                device.release_render_texture(target.id);
            }
            return None;
        };
        device.set_render_targets(&[resolved.texture], None);
        device.set_shader(Some(resolve));
        device.set_f32(resolve, "history_blend", self.history_blend);
        device.set_f32(
            resolve,
            "history_valid",
            if reprojected.is_some() { 1.0 } else { 0.0 },
        );
        device.bind_textures(&[
            Some(color.texture),
            Some(reprojected.map_or(color.texture, |target| target.texture)),
        ]);
        device.draw_fullscreen();

        if let Some(target) = reprojected {
            device.release_render_texture(target.id);
        }
        if !device.exchange_prev_render_texture(prev.id, resolved.id) {
            device.release_render_texture(resolved.id);
            return None;
        }
        device.prev_render_texture(prev.id)
    }
}
