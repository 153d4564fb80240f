//! Compute path tracer
//!
//! The scene is flattened into a world-space triangle list that is uploaded
//! only when the scene's structural hash changes. Each frame adds one sample
//! per pixel to a running mean that ping-pongs through the previous-frame
//! registry; scene or camera changes restart the mean.

use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use rustc_hash::FxHasher;

use crate::backend::traits::TextureHandle;
use crate::backend::types::*;
use crate::device::RenderDevice;
use crate::frame::ViewFrame;
use crate::pipeline::{load_program, shaders, upload_environment, upload_view_params};
use crate::resources::{PrevSemantic, RenderTargetDesc, StructuredBuffer, Texture};
use crate::scene::{MaterialPass, RenderScene};
use crate::shader::ShaderId;
use crate::RendererConfig;

pub const ACCUMULATION_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
const WORKGROUP_SIZE: u32 = 8;

/// Triangle record of the trace buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: [f32; 4],
    pub v1: [f32; 4],
    pub v2: [f32; 4],
    pub albedo: [f32; 4],
    pub emission: [f32; 4],
}

impl GpuTriangle {
    fn new(corners: [Vec3; 3], albedo: Vec3, emission: Vec3) -> Self {
        Self {
            v0: corners[0].extend(1.0).to_array(),
            v1: corners[1].extend(1.0).to_array(),
            v2: corners[2].extend(1.0).to_array(),
            albedo: albedo.extend(1.0).to_array(),
            emission: emission.extend(1.0).to_array(),
        }
    }

    pub fn is_emissive(&self) -> bool {
        self.emission[..3].iter().any(|c| *c > 0.0)
    }
}

/// Flattened scene: triangles plus indices of the emissive ones
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TraceGeometry {
    pub triangles: Vec<GpuTriangle>,
    pub area_lights: Vec<u32>,
}

impl TraceGeometry {
    pub fn build(scene: &RenderScene<'_>) -> Self {
        let mut geometry = Self::default();
        for object in &scene.objects {
            let surface = object.material.path_trace_surface();
            for corners in object.mesh.data().world_triangles(&object.world) {
                let triangle = GpuTriangle::new(corners, surface.albedo, surface.emission);
                if triangle.is_emissive() {
                    geometry.area_lights.push(geometry.triangles.len() as u32);
                }
                geometry.triangles.push(triangle);
            }
        }
        geometry
    }
}

fn hash_floats(state: &mut FxHasher, values: &[f32]) {
    for value in values {
        value.to_bits().hash(state);
    }
}

/// Structural hash of everything the trace buffers and lighting depend on
pub fn scene_hash(scene: &RenderScene<'_>) -> u64 {
    let mut state = FxHasher::default();
    scene.objects.len().hash(&mut state);
    for object in &scene.objects {
        object.id.hash(&mut state);
        object.mesh.id().hash(&mut state);
        hash_floats(&mut state, &object.world.to_cols_array());
        let surface = object.material.path_trace_surface();
        hash_floats(&mut state, &surface.albedo.to_array());
        hash_floats(&mut state, &surface.emission.to_array());
    }
    scene.lights.len().hash(&mut state);
    for light in &scene.lights {
        light.id.hash(&mut state);
        hash_floats(&mut state, &light.direction.to_array());
        hash_floats(&mut state, &light.radiance().to_array());
    }
    let environment = &scene.environment;
    environment.env_type.hash(&mut state);
    hash_floats(&mut state, &environment.sky_color.to_array());
    hash_floats(&mut state, &environment.horizon_color.to_array());
    hash_floats(&mut state, &environment.ground_color.to_array());
    hash_floats(&mut state, &[environment.intensity]);
    state.finish()
}

fn camera_changed(last: Option<Mat4>, current: Mat4, tolerance: Option<f32>) -> bool {
    match (last, tolerance) {
        (None, _) => true,
        (Some(last), None) => last != current,
        (Some(last), Some(tolerance)) => !last.abs_diff_eq(current, tolerance),
    }
}

#[derive(Debug)]
pub struct PathTracer {
    trace: Option<ShaderId>,
    tone_map: Option<ShaderId>,
    depth_only: Option<ShaderId>,
    triangles: Option<StructuredBuffer>,
    area_lights: Option<StructuredBuffer>,
    preview_depth: Option<Texture>,
    scene_hash: Option<u64>,
    last_view_proj: Option<Mat4>,
    sample_index: u32,
    max_bounces: u32,
    exposure: f32,
    camera_tolerance: Option<f32>,
}

impl PathTracer {
    pub fn new(device: &mut RenderDevice, config: &RendererConfig) -> Self {
        let trace_source = shaders::program(&[
            shaders::VIEW_PARAMS,
            shaders::ENVIRONMENT,
            shaders::PATH_TRACE,
        ]);
        let trace = device.create_compute_shader("path trace", &trace_source, "cs_path_trace");
        if trace.is_none() {
            log::warn!("path trace disabled: program failed to build");
        }
        let tone_map_source = shaders::program(&[shaders::FULLSCREEN, shaders::TONE_MAP]);
        let depth_source = shaders::program(&[
            shaders::VIEW_PARAMS,
            shaders::OBJECT_PARAMS,
            shaders::DEPTH_ONLY,
        ]);

        let triangle_size = std::mem::size_of::<GpuTriangle>() as u64;
        Self {
            trace,
            tone_map: load_program(
                device,
                "path trace tone map",
                &tone_map_source,
                "vs_fullscreen",
                Some("fs_tone_map"),
            ),
            depth_only: load_program(device, "path trace depth preview", &depth_source, "vs_depth", None),
            triangles: device.create_structured_buffer("path trace triangles", triangle_size, 256, false),
            area_lights: device.create_structured_buffer("path trace area lights", 4, 64, false),
            preview_depth: None,
            scene_hash: None,
            last_view_proj: None,
            sample_index: 0,
            max_bounces: config.max_bounces,
            exposure: config.exposure,
            camera_tolerance: config.camera_tolerance,
        }
    }

    /// Samples accumulated into the current image
    pub fn sample_count(&self) -> u32 {
        self.sample_index
    }

    /// World-space triangles the trace reads
    pub fn triangle_buffer(&self) -> Option<&StructuredBuffer> {
        self.triangles.as_ref()
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.exposure = exposure;
    }

    /// Restart accumulation on the next frame.
    pub fn reset(&mut self) {
        self.sample_index = 0;
        self.last_view_proj = None;
    }

    /// Upload the scene if it changed. Returns `true` when it was uploaded.
    fn maybe_upload_scene(&mut self, device: &mut RenderDevice, scene: &RenderScene<'_>) -> bool {
        let hash = scene_hash(scene);
        if self.scene_hash == Some(hash) {
            return false;
        }
        let geometry = TraceGeometry::build(scene);
        log::debug!(
            "Path tracer: uploading {} triangles, {} emissive",
            geometry.triangles.len(),
            geometry.area_lights.len()
        );
        let uploaded = match (self.triangles.as_mut(), self.area_lights.as_mut()) {
            (Some(triangles), Some(area_lights)) => {
                device.write_structured_buffer(triangles, &geometry.triangles)
                    && device.write_structured_buffer(area_lights, &geometry.area_lights)
            }
            _ => false,
        };
        // A failed upload is retried next frame.
        self.scene_hash = uploaded.then_some(hash);
        true
    }

    fn ensure_preview_depth(&mut self, device: &mut RenderDevice, width: u32, height: u32) -> bool {
        let matches = self
            .preview_depth
            .as_ref()
            .is_some_and(|depth| depth.width() == width && depth.height() == height);
        if matches {
            return false;
        }
        let desc = TextureDescriptor {
            label: Some("path trace depth preview".into()),
            width,
            height,
            mip_levels: 1,
            format: TextureFormat::Depth32Float,
            samples: 1,
            flags: TextureFlags::RENDER_TARGET,
        };
        self.preview_depth = device.create_texture(&desc, None);
        true
    }

    fn render_preview_depth(&self, device: &mut RenderDevice, frame: &ViewFrame, scene: &RenderScene<'_>) {
        let (Some(shader), Some(depth)) = (self.depth_only, self.preview_depth.as_ref()) else {
            return;
        };
        let depth = depth.handle();
        device.set_render_targets(&[], Some(depth));
        device.clear_depth(depth, 1.0);
        device.set_blend(BlendDesc::OPAQUE);
        device.set_depth_state(DepthDesc::default());
        device.set_culling_mode(CullMode::None);
        device.set_shader(Some(shader));
        upload_view_params(device, shader, frame);
        for object in &scene.objects {
            object.material.bind(device, shader, MaterialPass::DepthOnly);
            device.set_mat4(shader, "world", object.world);
            device.draw(object.mesh, 1);
        }
    }

    /// Add one sample per pixel and tone map the running mean into `output`.
    pub fn render_view(
        &mut self,
        device: &mut RenderDevice,
        frame: &ViewFrame,
        scene: &RenderScene<'_>,
        output: TextureHandle,
        size: (u32, u32),
    ) -> bool {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return false;
        }
        let (Some(trace), Some(tone_map)) = (self.trace, self.tone_map) else {
            return false;
        };

        let scene_changed = self.maybe_upload_scene(device, scene);
        let resized = self.ensure_preview_depth(device, width, height);
        let view_proj = frame.current.view_proj;
        let moved = camera_changed(self.last_view_proj, view_proj, self.camera_tolerance);
        if moved {
            self.last_view_proj = Some(view_proj);
        }
        device.set_viewport(Viewport::from_size(width, height));
        if scene_changed || resized || moved {
            self.sample_index = 0;
            self.render_preview_depth(device, frame, scene);
        }

        let Some(prev) =
            device.get_prev_render_texture(PrevSemantic::PathTraceAccumulation, width, height, ACCUMULATION_FORMAT)
        else {
            return false;
        };
        if prev.fresh {
            self.sample_index = 0;
        }
        let Some(current) = device.get_render_texture(&RenderTargetDesc::history(width, height, ACCUMULATION_FORMAT))
        else {
            return false;
        };

        device.set_shader(Some(trace));
        upload_view_params(device, trace, frame);
        upload_environment(device, trace, &scene.environment);
        let sun = scene.lights.first();
        device.set_u32(trace, "sample_index", self.sample_index);
        device.set_u32(
            trace,
            "triangle_count",
            self.triangles.as_ref().map_or(0, |b| b.len() as u32),
        );
        device.set_u32(
            trace,
            "area_light_count",
            self.area_lights.as_ref().map_or(0, |b| b.len() as u32),
        );
        device.set_u32(trace, "max_bounces", self.max_bounces);
        device.set_u32(trace, "environment_type", scene.environment.env_type.index());
        device.set_vec4(
            trace,
            "sun_direction",
            sun.map_or(glam::Vec4::ZERO, |light| light.direction.extend(1.0)),
        );
        device.set_vec4(
            trace,
            "sun_radiance",
            sun.map_or(glam::Vec4::ZERO, |light| light.radiance().extend(1.0)),
        );
        device.bind_textures(&[
            Some(prev.texture),
            self.preview_depth.as_ref().map(Texture::handle),
        ]);
        device.bind_unordered_access_textures(&[Some(current.texture)]);
        device.bind_structured_buffer(0, self.triangles.as_ref());
        device.bind_structured_buffer(1, self.area_lights.as_ref());
        device.dispatch(
            width.div_ceil(WORKGROUP_SIZE),
            height.div_ceil(WORKGROUP_SIZE),
            1,
        );
        device.bind_unordered_access_textures(&[]);
        self.sample_index = self.sample_index.saturating_add(1);

        if !device.exchange_prev_render_texture(prev.id, current.id) {
            device.release_render_texture(current.id);
            return false;
        }
        let Some(accumulated) = device.prev_render_texture(prev.id) else {
            return false;
        };

        device.set_render_targets(&[output], None);
        device.set_depth_state(DepthDesc {
            test: false,
            write: false,
            func: CompareFunction::Always,
        });
        device.set_shader(Some(tone_map));
        device.set_f32(tone_map, "exposure", self.exposure);
        device.bind_textures(&[Some(accumulated)]);
        device.draw_fullscreen();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::resources::MeshData;
    use crate::scene::{RenderLight, RenderObject, StandardMaterial};
    use crate::DeviceConfig;

    fn device() -> RenderDevice {
        RenderDevice::with_backend(Box::new(NullBackend::new(32, 32)), DeviceConfig::null(32, 32))
    }

    #[test]
    fn gpu_triangle_matches_the_shader_record() {
        assert_eq!(std::mem::size_of::<GpuTriangle>(), 80);
    }

    #[test]
    fn emissive_triangles_are_listed_as_area_lights() {
        let mut device = device();
        let mesh = device.create_mesh(&MeshData::quad()).unwrap();
        let lamp = StandardMaterial::emissive(Vec3::ONE, 5.0);
        let wall = StandardMaterial::plastic(Vec3::splat(0.5));
        let mut scene = RenderScene::new();
        scene.add_object(RenderObject::new(1, &mesh, &wall, Mat4::IDENTITY));
        scene.add_object(RenderObject::new(2, &mesh, &lamp, Mat4::from_translation(Vec3::Y)));

        let geometry = TraceGeometry::build(&scene);
        assert_eq!(geometry.triangles.len(), 4);
        assert_eq!(geometry.area_lights, vec![2, 3]);
    }

    #[test]
    fn scene_hash_tracks_transforms_and_lights() {
        let mut device = device();
        let mesh = device.create_mesh(&MeshData::cube()).unwrap();
        let material = StandardMaterial::default();
        let mut scene = RenderScene::new();
        scene.add_object(RenderObject::new(1, &mesh, &material, Mat4::IDENTITY));
        let base = scene_hash(&scene);
        assert_eq!(base, scene_hash(&scene));

        scene.objects[0].world = Mat4::from_translation(Vec3::X);
        let moved = scene_hash(&scene);
        assert_ne!(base, moved);

        scene.add_light(RenderLight::directional(1, -Vec3::Y, Vec3::ONE, 2.0));
        assert_ne!(moved, scene_hash(&scene));
    }

    #[test]
    fn camera_compare_is_exact_unless_a_tolerance_is_set() {
        let a = Mat4::IDENTITY;
        let b = Mat4::from_translation(Vec3::splat(1e-6));
        assert!(camera_changed(None, a, None));
        assert!(!camera_changed(Some(a), a, None));
        assert!(camera_changed(Some(a), b, None));
        assert!(!camera_changed(Some(a), b, Some(1e-4)));
    }
}
