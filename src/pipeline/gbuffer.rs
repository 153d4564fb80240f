//! Geometry pass
//!
//! A full-screen pre-pass fills the velocity buffer for background pixels,
//! then every object is drawn into albedo, normal, material and velocity
//! targets plus depth.

use crate::backend::types::*;
use crate::device::RenderDevice;
use crate::frame::ViewFrame;
use crate::pipeline::{load_program, shaders, upload_view_params};
use crate::resources::{RenderTarget, RenderTargetDesc};
use crate::scene::{MaterialPass, RenderScene};
use crate::shader::ShaderId;

pub const ALBEDO_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const MATERIAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const VELOCITY_FORMAT: TextureFormat = TextureFormat::Rg16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Pooled targets of one G-buffer
#[derive(Debug, Clone, Copy)]
pub struct GBufferTargets {
    pub albedo: RenderTarget,
    pub normal: RenderTarget,
    pub material: RenderTarget,
    pub velocity: RenderTarget,
    pub depth: RenderTarget,
}

impl GBufferTargets {
    /// Check out every target, returning the ones already taken if any fails.
    pub fn acquire(device: &mut RenderDevice, width: u32, height: u32) -> Option<Self> {
        let formats = [
            ALBEDO_FORMAT,
            NORMAL_FORMAT,
            MATERIAL_FORMAT,
            VELOCITY_FORMAT,
            DEPTH_FORMAT,
        ];
        let mut targets = Vec::with_capacity(formats.len());
        for format in formats {
            match device.get_render_texture(&RenderTargetDesc::new(width, height, format)) {
                Some(target) => targets.push(target),
                None => {
                    for target in targets {
                        device.release_render_texture(target.id);
                    }
                    return None;
                }
            }
        }
        Some(Self {
            albedo: targets[0],
            normal: targets[1],
            material: targets[2],
            velocity: targets[3],
            depth: targets[4],
        })
    }

    pub fn release(self, device: &mut RenderDevice) {
        for target in [self.albedo, self.normal, self.material, self.velocity, self.depth] {
            device.release_render_texture(target.id);
        }
    }
}

#[derive(Debug)]
pub struct GBufferPass {
    sky_velocity: Option<ShaderId>,
    gbuffer: Option<ShaderId>,
}

impl GBufferPass {
    pub fn new(device: &mut RenderDevice) -> Self {
        let sky_source = shaders::program(&[
            shaders::VIEW_PARAMS,
            shaders::FULLSCREEN,
            shaders::SKY_VELOCITY,
        ]);
        let gbuffer_source = shaders::program(&[
            shaders::VIEW_PARAMS,
            shaders::OBJECT_PARAMS,
            shaders::GBUFFER,
        ]);
        Self {
            sky_velocity: load_program(
                device,
                "sky velocity",
                &sky_source,
                "vs_fullscreen",
                Some("fs_sky_velocity"),
            ),
            gbuffer: load_program(device, "gbuffer", &gbuffer_source, "vs_gbuffer", Some("fs_gbuffer")),
        }
    }

    /// The built-in geometry program, for materials without their own.
    pub fn default_shader(&self) -> Option<ShaderId> {
        self.gbuffer
    }

    pub fn render(
        &self,
        device: &mut RenderDevice,
        frame: &ViewFrame,
        scene: &RenderScene<'_>,
        targets: &GBufferTargets,
    ) {
        let (width, height) = (targets.albedo.desc.width, targets.albedo.desc.height);
        device.set_viewport(Viewport::from_size(width, height));

        // Background motion
        device.clear_render_target(targets.velocity.texture, [0.0; 4]);
        if let Some(shader) = self.sky_velocity {
            device.set_render_targets(&[targets.velocity.texture], None);
            device.set_blend(BlendDesc::OPAQUE);
            device.set_depth_state(DepthDesc {
                test: false,
                write: false,
                func: CompareFunction::Always,
            });
            device.set_culling_mode(CullMode::None);
            device.set_shader(Some(shader));
            upload_view_params(device, shader, frame);
            device.draw_fullscreen();
        }

        device.set_render_targets(
            &[
                targets.albedo.texture,
                targets.normal.texture,
                targets.material.texture,
                targets.velocity.texture,
            ],
            Some(targets.depth.texture),
        );
        device.clear_render_target(targets.albedo.texture, [0.0; 4]);
        device.clear_render_target(targets.normal.texture, [0.0; 4]);
        device.clear_render_target(targets.material.texture, [0.0; 4]);
        device.clear_depth(targets.depth.texture, 1.0);
        device.set_depth_state(DepthDesc::default());
        device.set_culling_mode(CullMode::Back);

        for object in &scene.objects {
            let Some(shader) = object
                .material
                .shader(MaterialPass::GBuffer)
                .or(self.gbuffer)
            else {
                continue;
            };
            device.set_shader(Some(shader));
            upload_view_params(device, shader, frame);
            device.set_mat4(shader, "world", object.world);
            device.set_mat4(shader, "prev_world", object.prev_world);
            object.material.bind(device, shader, MaterialPass::GBuffer);
            device.draw(object.mesh, 1);
        }
    }
}
