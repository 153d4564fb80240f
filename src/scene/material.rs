//! Materials as consumed by the render paths

use glam::{Vec3, Vec4};

use crate::backend::traits::TextureHandle;
use crate::device::RenderDevice;
use crate::shader::ShaderId;

/// Pass a material is drawn in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialPass {
    GBuffer,
    DepthOnly,
}

/// Surface inputs of the path tracer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PathTraceSurface {
    pub albedo: Vec3,
    pub emission: Vec3,
}

/// What the render paths need from a material
pub trait Material: std::fmt::Debug {
    /// Program used for `pass`; `None` selects the pass's built-in program.
    ///
    /// Custom programs declare the same view and object parameters as the
    /// built-in ones.
    fn shader(&self, _pass: MaterialPass) -> Option<ShaderId> {
        None
    }

    /// Upload parameters and bind textures for a draw with `shader`.
    fn bind(&self, device: &mut RenderDevice, shader: ShaderId, pass: MaterialPass);

    fn path_trace_surface(&self) -> PathTraceSurface;
}

/// Metallic-roughness material
#[derive(Debug, Clone, PartialEq)]
pub struct StandardMaterial {
    pub name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub emissive_strength: f32,
    pub base_color_texture: Option<TextureHandle>,
    pub gbuffer_shader: Option<ShaderId>,
}

impl Default for StandardMaterial {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            emissive_strength: 1.0,
            base_color_texture: None,
            gbuffer_shader: None,
        }
    }
}

impl StandardMaterial {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3, strength: f32) -> Self {
        self.emissive = emissive;
        self.emissive_strength = strength;
        self
    }

    pub fn with_texture(mut self, texture: TextureHandle) -> Self {
        self.base_color_texture = Some(texture);
        self
    }

    pub fn with_shader(mut self, shader: ShaderId) -> Self {
        self.gbuffer_shader = Some(shader);
        self
    }

    // Presets

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_base_color(color.extend(1.0))
            .with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_base_color(color.extend(1.0))
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    pub fn gold() -> Self {
        Self::metal(Vec3::new(1.0, 0.766, 0.336), 0.3)
    }

    pub fn rubber(color: Vec3) -> Self {
        Self::new("rubber")
            .with_base_color(color.extend(1.0))
            .with_roughness(0.9)
    }

    pub fn emissive(color: Vec3, strength: f32) -> Self {
        // The realtime path tints emission by albedo.
        Self::new("emissive")
            .with_base_color(color.extend(1.0))
            .with_emissive(color, strength)
    }
}

impl Material for StandardMaterial {
    fn shader(&self, pass: MaterialPass) -> Option<ShaderId> {
        match pass {
            MaterialPass::GBuffer => self.gbuffer_shader,
            MaterialPass::DepthOnly => None,
        }
    }

    fn bind(&self, device: &mut RenderDevice, shader: ShaderId, pass: MaterialPass) {
        if pass == MaterialPass::DepthOnly {
            return;
        }
        device.set_vec4(shader, "base_color", self.base_color);
        device.set_vec4(
            shader,
            "metallic_roughness",
            Vec4::new(self.metallic, self.roughness, 0.0, 0.0),
        );
        device.set_vec4(shader, "emissive", self.emissive.extend(self.emissive_strength));
        device.bind_textures(&[self.base_color_texture]);
    }

    fn path_trace_surface(&self) -> PathTraceSurface {
        PathTraceSurface {
            albedo: self.base_color.truncate(),
            emission: self.emissive * self.emissive_strength,
        }
    }
}
