//! wgpu backend implementation
//!
//! Render passes are implicit: binding render targets opens a pass lazily on
//! the first draw or clear, and commands are buffered until the pass has to
//! end (new targets, a copy, a dispatch, a timer, or frame end). A clear
//! issued before any draw of the pass turns into the pass's load op.

mod convert;
mod mips;
mod ring;
mod timer;

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;

use crate::backend::traits::*;
use crate::backend::types::*;
use mips::MipGenerator;
use ring::UniformRing;
use timer::GpuTimer;

const BACK_BUFFER_ID: u64 = 1;
const BIND_GROUP_COUNT: usize = 4;

/// Buffered render pass command
enum RenderCommand {
    SetPipeline(u64),
    SetUniformGroup { shader: u64, offsets: Vec<u32> },
    SetBindGroup { index: u32, group: usize },
    SetVertexBuffer(u64),
    SetIndexBuffer { buffer: u64, format: IndexFormat },
    SetViewport(Viewport),
    Draw { vertices: Range<u32>, instances: Range<u32> },
    DrawIndexed { indices: Range<u32>, instances: Range<u32> },
}

struct ColorAttachment {
    texture: u64,
    clear: Option<[f32; 4]>,
}

struct DepthAttachment {
    texture: u64,
    clear: Option<f32>,
}

/// Pending render pass with buffered commands
struct PendingRenderPass {
    colors: Vec<ColorAttachment>,
    depth: Option<DepthAttachment>,
    commands: Vec<RenderCommand>,
}

impl PendingRenderPass {
    fn has_draws(&self) -> bool {
        self.commands.iter().any(|cmd| {
            matches!(
                cmd,
                RenderCommand::Draw { .. } | RenderCommand::DrawIndexed { .. }
            )
        })
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Single-mip view for storage binding of mipped textures
    storage_view: Option<wgpu::TextureView>,
    desc: TextureDescriptor,
}

struct GpuShader {
    module: wgpu::ShaderModule,
    entry_points: ShaderEntryPoints,
    bindings: Vec<ShaderBinding>,
    layout: wgpu::PipelineLayout,
    group_layouts: Vec<wgpu::BindGroupLayout>,
    uniform_bindings: Vec<(u32, u64)>,
    uniform_group: wgpu::BindGroup,
}

struct ConstantBufferSlot {
    data: Vec<u8>,
    /// Offset of the current contents in the uniform ring, once staged
    offset: Option<u32>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: u64,
    blend: BlendDesc,
    depth: DepthDesc,
    raster: RasterDesc,
    topology: PrimitiveTopology,
    layout: Option<VertexBufferLayout>,
    colors: Vec<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
    samples: u32,
}

#[derive(Default)]
struct BoundState {
    blend: BlendDesc,
    depth: DepthDesc,
    raster: RasterDesc,
    shader: Option<u64>,
    constant_buffers: Vec<(u32, u64)>,
    mesh: Option<MeshBinding>,
    textures: [Option<TextureHandle>; MAX_TEXTURE_SLOTS],
    uavs: [Option<TextureHandle>; MAX_UAV_SLOTS],
    structured: [Option<BufferHandle>; MAX_STRUCTURED_BUFFER_SLOTS],
    viewport: Option<Viewport>,
    targets: Option<(Vec<u64>, Option<u64>)>,
}

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    current: Option<wgpu::SurfaceTexture>,
    view: Option<wgpu::TextureView>,
}

/// Options for creating a [`WgpuBackend`]
#[derive(Debug, Clone)]
pub struct WgpuInit {
    /// Present to this window; `None` renders into an offscreen back buffer
    pub window: Option<Arc<winit::window::Window>>,
    pub vsync: bool,
    pub width: u32,
    pub height: u32,
    /// Request the software (fallback) adapter
    pub force_fallback_adapter: bool,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    features: wgpu::Features,
    surface: Option<SurfaceState>,
    width: u32,
    height: u32,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, GpuTexture>,
    shaders: HashMap<u64, GpuShader>,
    constant_buffers: HashMap<u64, ConstantBufferSlot>,
    blend_states: HashMap<u64, BlendDesc>,
    depth_states: HashMap<u64, DepthDesc>,
    raster_states: HashMap<u64, RasterDesc>,
    timers: HashMap<u64, GpuTimer>,
    next_id: u64,

    // Pipelines
    pipeline_ids: HashMap<PipelineKey, u64>,
    failed_pipelines: HashSet<PipelineKey>,
    render_pipelines: HashMap<u64, wgpu::RenderPipeline>,
    compute_pipelines: HashMap<u64, wgpu::ComputePipeline>,

    clamp_sampler: wgpu::Sampler,
    repeat_sampler: wgpu::Sampler,
    comparison_sampler: wgpu::Sampler,
    fallback_color: GpuTexture,
    fallback_depth: GpuTexture,
    mips: MipGenerator,
    ring: UniformRing,

    // Command recording
    bound: BoundState,
    encoder: Option<wgpu::CommandEncoder>,
    pending_pass: Option<PendingRenderPass>,
    frame_bind_groups: Vec<wgpu::BindGroup>,
    current_pipeline: Option<u64>,
    dirty_groups: [bool; BIND_GROUP_COUNT],
    mesh_dirty: bool,
    warned_wireframe: bool,
}

impl WgpuBackend {
    /// Blocking initialization
    pub fn new(init: &WgpuInit) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(init))
    }

    pub async fn new_async(init: &WgpuInit) -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = match &init.window {
            Some(window) => Some(
                instance
                    .create_surface(Arc::clone(window))
                    .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?,
            ),
            None => None,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .ok_or_else(|| {
                BackendError::InitializationFailed(if init.force_fallback_adapter {
                    "No software adapter found".into()
                } else {
                    "No suitable adapter found".into()
                })
            })?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend, {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );

        let wanted = wgpu::Features::POLYGON_MODE_LINE
            | wgpu::Features::TIMESTAMP_QUERY
            | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
        let features = adapter.features() & wanted;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Render Device"),
                    required_features: features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu error: {}", error);
        }));

        let max_size = device.limits().max_texture_dimension_2d;
        let (width, height) = clamp_size(init.width, init.height, max_size);

        let surface = match surface {
            Some(surface) => {
                let caps = surface.get_capabilities(&adapter);
                let format = caps
                    .formats
                    .iter()
                    .copied()
                    .find(|f| f.is_srgb())
                    .or_else(|| caps.formats.first().copied())
                    .ok_or_else(|| {
                        BackendError::SurfaceCreationFailed(
                            "Surface reports no supported formats".into(),
                        )
                    })?;
                let config = wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    format,
                    width,
                    height,
                    present_mode: if init.vsync {
                        wgpu::PresentMode::AutoVsync
                    } else {
                        wgpu::PresentMode::AutoNoVsync
                    },
                    alpha_mode: caps
                        .alpha_modes
                        .first()
                        .copied()
                        .unwrap_or(wgpu::CompositeAlphaMode::Auto),
                    view_formats: vec![],
                    desired_maximum_frame_latency: 2,
                };
                surface.configure(&device, &config);
                Some(SurfaceState {
                    surface,
                    config,
                    current: None,
                    view: None,
                })
            }
            None => None,
        };

        let sampler = |label: &str, address: wgpu::AddressMode, compare| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address,
                address_mode_v: address,
                address_mode_w: address,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Linear,
                compare,
                ..Default::default()
            })
        };
        let clamp_sampler = sampler("Clamp Sampler", wgpu::AddressMode::ClampToEdge, None);
        let repeat_sampler = sampler("Repeat Sampler", wgpu::AddressMode::Repeat, None);
        let comparison_sampler = sampler(
            "Comparison Sampler",
            wgpu::AddressMode::ClampToEdge,
            Some(wgpu::CompareFunction::LessEqual),
        );

        let fallback_color = create_gpu_texture(
            &device,
            &TextureDescriptor {
                label: Some("Fallback Color".into()),
                ..Default::default()
            },
        );
        queue.write_texture(
            fallback_color.texture.as_image_copy(),
            &[255, 255, 255, 255],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let fallback_depth = create_gpu_texture(
            &device,
            &TextureDescriptor {
                label: Some("Fallback Depth".into()),
                format: TextureFormat::Depth32Float,
                flags: TextureFlags::RENDER_TARGET,
                ..Default::default()
            },
        );

        let mips = MipGenerator::new(&device);
        let ring = UniformRing::new(&device);

        let mut backend = Self {
            instance,
            adapter_name: adapter_info.name,
            device,
            queue,
            features,
            surface,
            width,
            height,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            shaders: HashMap::new(),
            constant_buffers: HashMap::new(),
            blend_states: HashMap::new(),
            depth_states: HashMap::new(),
            raster_states: HashMap::new(),
            timers: HashMap::new(),
            next_id: BACK_BUFFER_ID + 1,
            pipeline_ids: HashMap::new(),
            failed_pipelines: HashSet::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            clamp_sampler,
            repeat_sampler,
            comparison_sampler,
            fallback_color,
            fallback_depth,
            mips,
            ring,
            bound: BoundState::default(),
            encoder: None,
            pending_pass: None,
            frame_bind_groups: Vec::new(),
            current_pipeline: None,
            dirty_groups: [true; BIND_GROUP_COUNT],
            mesh_dirty: true,
            warned_wireframe: false,
        };
        if backend.surface.is_none() {
            backend.create_offscreen_back_buffer();
        }
        Ok(backend)
    }

    /// Adapter the device was created on
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Get reference to the wgpu device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get reference to the wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn create_offscreen_back_buffer(&mut self) {
        let texture = create_gpu_texture(
            &self.device,
            &TextureDescriptor {
                label: Some("Offscreen Back Buffer".into()),
                width: self.width,
                height: self.height,
                format: TextureFormat::Rgba8UnormSrgb,
                flags: TextureFlags::RENDER_TARGET,
                ..Default::default()
            },
        );
        self.textures.insert(BACK_BUFFER_ID, texture);
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn back_buffer_format(&self) -> wgpu::TextureFormat {
        match &self.surface {
            Some(surface) => surface.config.format,
            None => wgpu::TextureFormat::Rgba8UnormSrgb,
        }
    }

    fn view(&self, id: u64) -> Option<&wgpu::TextureView> {
        if id == BACK_BUFFER_ID {
            if let Some(surface) = &self.surface {
                return surface.view.as_ref();
            }
        }
        self.textures.get(&id).map(|t| &t.view)
    }

    fn target_info(&self, id: u64) -> Option<(wgpu::TextureFormat, u32)> {
        if id == BACK_BUFFER_ID && self.surface.is_some() {
            return Some((self.back_buffer_format(), 1));
        }
        self.textures
            .get(&id)
            .map(|t| (t.texture.format(), t.desc.samples.max(1)))
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                })
        })
    }

    fn mark_all_dirty(&mut self) {
        self.dirty_groups = [true; BIND_GROUP_COUNT];
        self.mesh_dirty = true;
        self.current_pipeline = None;
    }

    /// Open a pass on the bound targets if none is pending.
    fn open_pass(&mut self) -> bool {
        if self.pending_pass.is_some() {
            return true;
        }
        let Some((colors, depth)) = self.bound.targets.clone() else {
            log::warn!("Draw or clear issued with no render targets bound");
            return false;
        };
        let mut commands = Vec::new();
        if let Some(viewport) = self.bound.viewport {
            commands.push(RenderCommand::SetViewport(viewport));
        }
        self.pending_pass = Some(PendingRenderPass {
            colors: colors
                .into_iter()
                .map(|texture| ColorAttachment {
                    texture,
                    clear: None,
                })
                .collect(),
            depth: depth.map(|texture| DepthAttachment {
                texture,
                clear: None,
            }),
            commands,
        });
        self.mark_all_dirty();
        true
    }

    /// Encode the pending render pass, if any.
    fn flush_pass(&mut self) {
        let Some(pending) = self.pending_pass.take() else {
            return;
        };
        let mut encoder = self.take_encoder();

        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pending
                .colors
                .iter()
                .filter_map(|att| {
                    let view = self.view(att.texture)?;
                    Some(Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: match att.clear {
                                Some(color) => wgpu::LoadOp::Clear(wgpu::Color {
                                    r: color[0] as f64,
                                    g: color[1] as f64,
                                    b: color[2] as f64,
                                    a: color[3] as f64,
                                }),
                                None => wgpu::LoadOp::Load,
                            },
                            store: wgpu::StoreOp::Store,
                        },
                    }))
                })
                .collect();

            let depth_attachment = pending.depth.as_ref().and_then(|att| {
                let view = self.view(att.texture)?;
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: match att.clear {
                            Some(depth) => wgpu::LoadOp::Clear(depth),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                })
            });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    RenderCommand::SetPipeline(id) => {
                        if let Some(pipeline) = self.render_pipelines.get(id) {
                            render_pass.set_pipeline(pipeline);
                        }
                    }
                    RenderCommand::SetUniformGroup { shader, offsets } => {
                        if let Some(shader) = self.shaders.get(shader) {
                            render_pass.set_bind_group(0, &shader.uniform_group, offsets);
                        }
                    }
                    RenderCommand::SetBindGroup { index, group } => {
                        if let Some(bg) = self.frame_bind_groups.get(*group) {
                            render_pass.set_bind_group(*index, bg, &[]);
                        }
                    }
                    RenderCommand::SetVertexBuffer(id) => {
                        if let Some(buf) = self.buffers.get(id) {
                            render_pass.set_vertex_buffer(0, buf.slice(..));
                        }
                    }
                    RenderCommand::SetIndexBuffer { buffer, format } => {
                        if let Some(buf) = self.buffers.get(buffer) {
                            render_pass.set_index_buffer(buf.slice(..), convert::index_format(*format));
                        }
                    }
                    RenderCommand::SetViewport(v) => {
                        render_pass.set_viewport(v.x, v.y, v.width, v.height, 0.0, 1.0);
                    }
                    RenderCommand::Draw {
                        vertices,
                        instances,
                    } => {
                        render_pass.draw(vertices.clone(), instances.clone());
                    }
                    RenderCommand::DrawIndexed { indices, instances } => {
                        render_pass.draw_indexed(indices.clone(), 0, instances.clone());
                    }
                }
            }
        }

        self.encoder = Some(encoder);
        self.frame_bind_groups.clear();
    }

    /// Finish recording and submit everything encoded so far.
    fn submit(&mut self) {
        self.flush_pass();
        self.ring.upload(&self.queue);
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        for timer in self.timers.values() {
            timer.after_submit();
        }
        self.ring.reset();
        for slot in self.constant_buffers.values_mut() {
            slot.offset = None;
        }
    }

    fn clear_immediately(&mut self, id: u64, color: Option<[f32; 4]>, depth: Option<f32>) {
        let mut encoder = self.take_encoder();
        if let Some(view) = self.view(id) {
            let color_attachments = match color {
                Some(c) => vec![Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: c[0] as f64,
                            g: c[1] as f64,
                            b: c[2] as f64,
                            a: c[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                None => Vec::new(),
            };
            let depth_attachment = depth.map(|d| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(d),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            });
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        } else {
            log::warn!("Clear of unknown texture {}", id);
        }
        self.encoder = Some(encoder);
    }

    /// Stage the bound constant buffers of `shader` into the ring and return their offsets.
    fn stage_constant_buffers(&mut self, shader: u64) -> Option<Vec<u32>> {
        let bindings = self.shaders.get(&shader)?.uniform_bindings.clone();
        let mut offsets = Vec::with_capacity(bindings.len());
        for (binding, size) in bindings {
            let buffer = self
                .bound
                .constant_buffers
                .iter()
                .find(|(b, _)| *b == binding)
                .map(|(_, id)| *id);
            let staged = match buffer.and_then(|id| self.constant_buffers.get_mut(&id)) {
                Some(slot) => match slot.offset {
                    Some(offset) => Some(offset),
                    None => {
                        let offset = self.ring.push(&slot.data, size);
                        slot.offset = offset;
                        offset
                    }
                },
                None => {
                    log::warn!("No constant buffer bound at binding {}", binding);
                    self.ring.push(&[], size)
                }
            };
            match staged {
                Some(offset) => offsets.push(offset),
                None => {
                    // Ring exhausted: submit what we have and start over on an empty ring.
                    log::debug!("Uniform ring full, submitting early");
                    self.submit();
                    return self.stage_constant_buffers(shader);
                }
            }
        }
        Some(offsets)
    }

    fn render_pipeline(&mut self, shader_id: u64) -> Option<u64> {
        let (colors, depth_target) = self.bound.targets.clone()?;
        let color_info: Vec<(wgpu::TextureFormat, u32)> =
            colors.iter().filter_map(|id| self.target_info(*id)).collect();
        let depth_info = depth_target.and_then(|id| self.target_info(id));
        let samples = color_info
            .first()
            .or(depth_info.as_ref())
            .map(|(_, s)| *s)
            .unwrap_or(1);

        let mut raster = self.bound.raster;
        if raster.fill == FillMode::Wireframe
            && !self.features.contains(wgpu::Features::POLYGON_MODE_LINE)
        {
            if !self.warned_wireframe {
                log::warn!("Adapter lacks POLYGON_MODE_LINE, wireframe falls back to solid fill");
                self.warned_wireframe = true;
            }
            raster.fill = FillMode::Solid;
        }

        let key = PipelineKey {
            shader: shader_id,
            blend: self.bound.blend,
            depth: self.bound.depth,
            raster,
            topology: self
                .bound
                .mesh
                .as_ref()
                .map(|m| m.topology)
                .unwrap_or_default(),
            layout: self.bound.mesh.as_ref().map(|m| m.layout.clone()),
            colors: color_info.iter().map(|(f, _)| *f).collect(),
            depth_format: depth_info.map(|(f, _)| f),
            samples,
        };
        if let Some(id) = self.pipeline_ids.get(&key) {
            return Some(*id);
        }
        if self.failed_pipelines.contains(&key) {
            return None;
        }

        let shader = self.shaders.get(&shader_id)?;
        let ShaderEntryPoints::Render { vertex, fragment } = &shader.entry_points else {
            log::warn!("Compute shader bound for a draw call");
            return None;
        };

        let vertex_attrs: Vec<wgpu::VertexAttribute> = key
            .layout
            .iter()
            .flat_map(|layout| layout.attributes.iter())
            .map(|a| wgpu::VertexAttribute {
                format: convert::vertex_format(a.format),
                offset: a.offset,
                shader_location: a.location,
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = key
            .layout
            .iter()
            .map(|layout| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &vertex_attrs,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: convert::blend_state(&key.blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: key.depth.test && key.depth.write,
            depth_compare: if key.depth.test {
                convert::compare_function(key.depth.func)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Render Pipeline"),
                layout: Some(&shader.layout),
                vertex: wgpu::VertexState {
                    module: &shader.module,
                    entry_point: vertex,
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: fragment.as_ref().map(|entry| wgpu::FragmentState {
                    module: &shader.module,
                    entry_point: entry,
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: convert::topology(key.topology),
                    cull_mode: convert::cull_mode(key.raster.cull),
                    polygon_mode: match key.raster.fill {
                        FillMode::Solid => wgpu::PolygonMode::Fill,
                        FillMode::Wireframe => wgpu::PolygonMode::Line,
                    },
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState {
                    count: key.samples,
                    ..Default::default()
                },
                multiview: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("Failed to create render pipeline: {}", error);
            self.failed_pipelines.insert(key);
            return None;
        }

        let id = self.alloc_id();
        self.render_pipelines.insert(id, pipeline);
        self.pipeline_ids.insert(key, id);
        Some(id)
    }

    fn compute_pipeline(&mut self, shader_id: u64) -> bool {
        if self.compute_pipelines.contains_key(&shader_id) {
            return true;
        }
        let Some(shader) = self.shaders.get(&shader_id) else {
            return false;
        };
        let ShaderEntryPoints::Compute { entry, .. } = &shader.entry_points else {
            log::warn!("Render shader bound for a dispatch");
            return false;
        };
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Compute Pipeline"),
                layout: Some(&shader.layout),
                module: &shader.module,
                entry_point: entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("Failed to create compute pipeline: {}", error);
            return false;
        }
        self.compute_pipelines.insert(shader_id, pipeline);
        true
    }

    /// Build bind group `group` (1..=3) of `shader_id` from the bound resources.
    fn create_bind_group(&mut self, shader_id: u64, group: u32) -> Option<usize> {
        let bind_group = {
            let shader = self.shaders.get(&shader_id)?;
            let mut entries = Vec::new();
            for binding in &shader.bindings {
                match (group, binding) {
                    (TEXTURE_GROUP, ShaderBinding::Texture { slot, kind, .. }) => {
                        let bound = self
                            .bound
                            .textures
                            .get(*slot as usize)
                            .copied()
                            .flatten()
                            .and_then(|h| self.view(h.0));
                        let view = match (bound, kind) {
                            (Some(view), _) => view,
                            (None, TextureSampleKind::Float) => &self.fallback_color.view,
                            (None, TextureSampleKind::Depth) => &self.fallback_depth.view,
                            (None, _) => {
                                log::warn!("No texture bound at slot {}", slot);
                                return None;
                            }
                        };
                        entries.push(wgpu::BindGroupEntry {
                            binding: *slot,
                            resource: wgpu::BindingResource::TextureView(view),
                        });
                    }
                    (SAMPLER_GROUP, ShaderBinding::Sampler { slot, comparison }) => {
                        let wraps = self
                            .bound
                            .textures
                            .get(*slot as usize)
                            .copied()
                            .flatten()
                            .and_then(|h| self.textures.get(&h.0))
                            .map(|t| t.desc.flags.wraps())
                            .unwrap_or(false);
                        let sampler = if *comparison {
                            &self.comparison_sampler
                        } else if wraps {
                            &self.repeat_sampler
                        } else {
                            &self.clamp_sampler
                        };
                        entries.push(wgpu::BindGroupEntry {
                            binding: *slot,
                            resource: wgpu::BindingResource::Sampler(sampler),
                        });
                    }
                    (STORAGE_GROUP, ShaderBinding::StructuredBuffer { slot, .. }) => {
                        let Some(buffer) = self
                            .bound
                            .structured
                            .get(*slot as usize)
                            .copied()
                            .flatten()
                            .and_then(|h| self.buffers.get(&h.0))
                        else {
                            log::warn!("No structured buffer bound at slot {}", slot);
                            return None;
                        };
                        entries.push(wgpu::BindGroupEntry {
                            binding: *slot,
                            resource: buffer.as_entire_binding(),
                        });
                    }
                    (STORAGE_GROUP, ShaderBinding::StorageTexture { slot, .. }) => {
                        let Some(texture) = self
                            .bound
                            .uavs
                            .get(*slot as usize)
                            .copied()
                            .flatten()
                            .and_then(|h| self.textures.get(&h.0))
                        else {
                            log::warn!("No unordered-access texture bound at slot {}", slot);
                            return None;
                        };
                        entries.push(wgpu::BindGroupEntry {
                            binding: STORAGE_TEXTURE_BINDING_BASE + slot,
                            resource: wgpu::BindingResource::TextureView(
                                texture.storage_view.as_ref().unwrap_or(&texture.view),
                            ),
                        });
                    }
                    _ => {}
                }
            }
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &shader.group_layouts[group as usize],
                entries: &entries,
            })
        };
        self.frame_bind_groups.push(bind_group);
        Some(self.frame_bind_groups.len() - 1)
    }

    /// Bring the pending pass up to date with the bound state before a draw.
    fn prepare_draw(&mut self) -> bool {
        let Some(shader_id) = self.bound.shader else {
            log::warn!("Draw issued without a shader");
            return false;
        };
        let Some(offsets) = self.stage_constant_buffers(shader_id) else {
            return false;
        };
        if !self.open_pass() {
            return false;
        }
        let Some(pipeline) = self.render_pipeline(shader_id) else {
            return false;
        };

        let mut commands = Vec::new();
        if self.current_pipeline != Some(pipeline) {
            commands.push(RenderCommand::SetPipeline(pipeline));
            self.current_pipeline = Some(pipeline);
        }
        commands.push(RenderCommand::SetUniformGroup {
            shader: shader_id,
            offsets,
        });
        for group in 1..BIND_GROUP_COUNT {
            if !self.dirty_groups[group] {
                continue;
            }
            let Some(index) = self.create_bind_group(shader_id, group as u32) else {
                return false;
            };
            commands.push(RenderCommand::SetBindGroup {
                index: group as u32,
                group: index,
            });
            self.dirty_groups[group] = false;
        }
        if self.mesh_dirty {
            if let Some(mesh) = &self.bound.mesh {
                commands.push(RenderCommand::SetVertexBuffer(mesh.vertex_buffer.0));
                if let Some((buffer, format)) = mesh.index_buffer {
                    commands.push(RenderCommand::SetIndexBuffer {
                        buffer: buffer.0,
                        format,
                    });
                }
            }
            self.mesh_dirty = false;
        }
        if let Some(pending) = self.pending_pass.as_mut() {
            pending.commands.extend(commands);
        }
        true
    }

    fn push_command(&mut self, command: RenderCommand) {
        if let Some(pending) = self.pending_pass.as_mut() {
            pending.commands.push(command);
        }
    }

    fn bound_as_color(&self, id: u64) -> bool {
        self.bound
            .targets
            .as_ref()
            .is_some_and(|(colors, _)| colors.contains(&id))
    }

    fn bound_as_depth(&self, id: u64) -> bool {
        self.bound
            .targets
            .as_ref()
            .is_some_and(|(_, depth)| *depth == Some(id))
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let max_size = self.device.limits().max_texture_dimension_2d;
        let (width, height) = clamp_size(width, height, max_size);
        self.width = width;
        self.height = height;
        match self.surface.as_mut() {
            Some(surface) => {
                surface.config.width = width;
                surface.config.height = height;
                surface.surface.configure(&self.device, &surface.config);
            }
            None => self.create_offscreen_back_buffer(),
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        if let Some(surface) = self.surface.as_mut() {
            let output = match surface.surface.get_current_texture() {
                Ok(output) => output,
                Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                    surface.surface.configure(&self.device, &surface.config);
                    return Err(BackendError::SurfaceLost);
                }
                Err(wgpu::SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
                Err(e) => return Err(BackendError::AcquireImageFailed(e.to_string())),
            };
            surface.view = Some(
                output
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default()),
            );
            surface.current = Some(output);
        }
        Ok(FrameContext {
            back_buffer: TextureHandle(BACK_BUFFER_ID),
            format: convert::texture_format_back(self.back_buffer_format()),
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.submit();
        if let Some(surface) = self.surface.as_mut() {
            surface.view = None;
            if let Some(texture) = surface.current.take() {
                texture.present();
            }
        }
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let size = ring::align_up(desc.size.max(4), wgpu::COPY_BUFFER_ALIGNMENT);
        if size > self.device.limits().max_buffer_size {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: {} bytes exceeds the device limit",
                desc.label, size
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size,
            usage: convert::buffer_usage(desc.usage | BufferUsage::COPY_DST),
            mapped_at_creation: false,
        });
        let id = self.alloc_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(buf) = self.buffers.get(&buffer.0) else {
            return;
        };
        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(buf, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(
                ring::align_up(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize,
                0,
            );
            self.queue.write_buffer(buf, offset, &padded);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max_size = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max_size || desc.height > max_size {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: invalid size {}x{} (max {})",
                desc.label, desc.width, desc.height, max_size
            )));
        }
        if desc.flags.is_unordered_access() && !desc.format.supports_storage() {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {:?} cannot be used for unordered access",
                desc.label, desc.format
            )));
        }
        let texture = create_gpu_texture(&self.device, desc);
        let id = self.alloc_id();
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) {
        let Some(tex) = self.textures.get(&texture.0) else {
            return;
        };
        let (width, height) = (tex.desc.width, tex.desc.height);
        self.queue.write_texture(
            tex.texture.as_image_copy(),
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * tex.desc.format.bytes_per_pixel()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        if tex.desc.flags.wants_mips() && tex.desc.mip_levels > 1 {
            self.flush_pass();
            let mut encoder = self.take_encoder();
            if let Some(tex) = self.textures.get(&texture.0) {
                self.mips.generate(&self.device, &mut encoder, &tex.texture);
            }
            self.encoder = Some(encoder);
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if texture.0 == BACK_BUFFER_ID {
            return;
        }
        self.textures.remove(&texture.0);
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        self.flush_pass();
        let mut encoder = self.take_encoder();
        if let (Some(s), Some(d)) = (self.textures.get(&src.0), self.textures.get(&dst.0)) {
            encoder.copy_texture_to_texture(
                s.texture.as_image_copy(),
                d.texture.as_image_copy(),
                wgpu::Extent3d {
                    width: s.desc.width.min(d.desc.width),
                    height: s.desc.height.min(d.desc.height),
                    depth_or_array_layers: 1,
                },
            );
        } else {
            log::warn!("copy_texture: unknown source or destination");
        }
        self.encoder = Some(encoder);
    }

    fn resolve_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        self.flush_pass();
        let mut encoder = self.take_encoder();
        if let (Some(s), Some(d)) = (self.view(src.0), self.view(dst.0)) {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Resolve Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: s,
                    resolve_target: Some(d),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        } else {
            log::warn!("resolve_texture: unknown source or destination");
        }
        self.encoder = Some(encoder);
    }

    fn create_shader(&mut self, desc: &ShaderProgramDescriptor) -> BackendResult<ShaderHandle> {
        let is_compute = matches!(desc.entry_points, ShaderEntryPoints::Compute { .. });
        let stages = if is_compute {
            wgpu::ShaderStages::COMPUTE
        } else {
            wgpu::ShaderStages::VERTEX_FRAGMENT
        };
        // Writable storage is not allowed in the vertex stage.
        let writable_stages = if is_compute {
            wgpu::ShaderStages::COMPUTE
        } else {
            wgpu::ShaderStages::FRAGMENT
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });

        let group_layouts: Vec<wgpu::BindGroupLayout> = (0..BIND_GROUP_COUNT as u32)
            .map(|group| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
                    .bindings
                    .iter()
                    .filter_map(|binding| {
                        let (g, index, visibility, ty) = match binding {
                            ShaderBinding::Uniform { binding, size } => (
                                UNIFORM_GROUP,
                                *binding,
                                stages,
                                wgpu::BindingType::Buffer {
                                    ty: wgpu::BufferBindingType::Uniform,
                                    has_dynamic_offset: true,
                                    min_binding_size: NonZeroU64::new(*size),
                                },
                            ),
                            ShaderBinding::Texture {
                                slot,
                                kind,
                                multisampled,
                            } => (
                                TEXTURE_GROUP,
                                *slot,
                                stages,
                                wgpu::BindingType::Texture {
                                    sample_type: if *multisampled
                                        && *kind == TextureSampleKind::Float
                                    {
                                        wgpu::TextureSampleType::Float { filterable: false }
                                    } else {
                                        convert::sample_type(*kind)
                                    },
                                    view_dimension: wgpu::TextureViewDimension::D2,
                                    multisampled: *multisampled,
                                },
                            ),
                            ShaderBinding::Sampler { slot, comparison } => (
                                SAMPLER_GROUP,
                                *slot,
                                stages,
                                wgpu::BindingType::Sampler(if *comparison {
                                    wgpu::SamplerBindingType::Comparison
                                } else {
                                    wgpu::SamplerBindingType::Filtering
                                }),
                            ),
                            ShaderBinding::StructuredBuffer { slot, read_only } => (
                                STORAGE_GROUP,
                                *slot,
                                if *read_only { stages } else { writable_stages },
                                wgpu::BindingType::Buffer {
                                    ty: wgpu::BufferBindingType::Storage {
                                        read_only: *read_only,
                                    },
                                    has_dynamic_offset: false,
                                    min_binding_size: None,
                                },
                            ),
                            ShaderBinding::StorageTexture { slot, format } => (
                                STORAGE_GROUP,
                                STORAGE_TEXTURE_BINDING_BASE + slot,
                                writable_stages,
                                wgpu::BindingType::StorageTexture {
                                    access: wgpu::StorageTextureAccess::WriteOnly,
                                    format: convert::texture_format(*format),
                                    view_dimension: wgpu::TextureViewDimension::D2,
                                },
                            ),
                        };
                        (g == group).then_some(wgpu::BindGroupLayoutEntry {
                            binding: index,
                            visibility,
                            ty,
                            count: None,
                        })
                    })
                    .collect();
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: None,
                        entries: &entries,
                    })
            })
            .collect();

        let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: desc.label.as_deref(),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });

        let mut uniform_bindings: Vec<(u32, u64)> = desc
            .bindings
            .iter()
            .filter_map(|b| match b {
                ShaderBinding::Uniform { binding, size } => Some((*binding, *size)),
                _ => None,
            })
            .collect();
        uniform_bindings.sort_by_key(|(binding, _)| *binding);

        let uniform_entries: Vec<wgpu::BindGroupEntry> = uniform_bindings
            .iter()
            .map(|(binding, size)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: self.ring.buffer(),
                    offset: 0,
                    size: NonZeroU64::new(*size),
                }),
            })
            .collect();
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: desc.label.as_deref(),
            layout: &group_layouts[UNIFORM_GROUP as usize],
            entries: &uniform_entries,
        });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ShaderCreationFailed(format!(
                "{:?}: {}",
                desc.label, error
            )));
        }

        let id = self.alloc_id();
        self.shaders.insert(
            id,
            GpuShader {
                module,
                entry_points: desc.entry_points.clone(),
                bindings: desc.bindings.clone(),
                layout,
                group_layouts,
                uniform_bindings,
                uniform_group,
            },
        );
        Ok(ShaderHandle(id))
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader.0);
        self.compute_pipelines.remove(&shader.0);
        let render_pipelines = &mut self.render_pipelines;
        self.pipeline_ids.retain(|key, id| {
            let keep = key.shader != shader.0;
            if !keep {
                render_pipelines.remove(id);
            }
            keep
        });
        self.failed_pipelines.retain(|key| key.shader != shader.0);
        if self.bound.shader == Some(shader.0) {
            self.bound.shader = None;
        }
    }

    fn create_constant_buffer(&mut self, size: u64) -> BackendResult<BufferHandle> {
        let max = self.device.limits().max_uniform_buffer_binding_size as u64;
        if size > max {
            return Err(BackendError::BufferCreationFailed(format!(
                "constant buffer of {} bytes exceeds the binding limit {}",
                size, max
            )));
        }
        let id = self.alloc_id();
        self.constant_buffers.insert(
            id,
            ConstantBufferSlot {
                data: vec![0; size as usize],
                offset: None,
            },
        );
        Ok(BufferHandle(id))
    }

    fn upload_constant_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        if let Some(slot) = self.constant_buffers.get_mut(&buffer.0) {
            let len = data.len().min(slot.data.len());
            slot.data[..len].copy_from_slice(&data[..len]);
            slot.offset = None;
        }
    }

    fn create_blend_state(&mut self, desc: &BlendDesc) -> BlendStateHandle {
        let id = self.alloc_id();
        self.blend_states.insert(id, *desc);
        BlendStateHandle(id)
    }

    fn create_depth_state(&mut self, desc: &DepthDesc) -> DepthStateHandle {
        let id = self.alloc_id();
        self.depth_states.insert(id, *desc);
        DepthStateHandle(id)
    }

    fn create_raster_state(&mut self, desc: &RasterDesc) -> RasterStateHandle {
        let id = self.alloc_id();
        self.raster_states.insert(id, *desc);
        RasterStateHandle(id)
    }

    fn bind_blend_state(&mut self, state: BlendStateHandle) {
        if let Some(desc) = self.blend_states.get(&state.0) {
            self.bound.blend = *desc;
        }
    }

    fn bind_depth_state(&mut self, state: DepthStateHandle) {
        if let Some(desc) = self.depth_states.get(&state.0) {
            self.bound.depth = *desc;
        }
    }

    fn bind_raster_state(&mut self, state: RasterStateHandle) {
        if let Some(desc) = self.raster_states.get(&state.0) {
            self.bound.raster = *desc;
        }
    }

    fn bind_shader(&mut self, shader: Option<ShaderHandle>) {
        self.bound.shader = shader.map(|s| s.0);
        self.dirty_groups = [true; BIND_GROUP_COUNT];
    }

    fn bind_constant_buffers(&mut self, buffers: &[(u32, BufferHandle)]) {
        self.bound.constant_buffers = buffers.iter().map(|(b, h)| (*b, h.0)).collect();
    }

    fn bind_mesh(&mut self, mesh: Option<&MeshBinding>) {
        self.bound.mesh = mesh.cloned();
        self.mesh_dirty = true;
    }

    fn bind_textures(&mut self, textures: &[Option<TextureHandle>]) {
        for (slot, texture) in self.bound.textures.iter_mut().zip(textures) {
            *slot = *texture;
        }
        self.dirty_groups[TEXTURE_GROUP as usize] = true;
        self.dirty_groups[SAMPLER_GROUP as usize] = true;
    }

    fn bind_unordered_access(&mut self, textures: &[Option<TextureHandle>]) {
        for (slot, texture) in self.bound.uavs.iter_mut().zip(textures) {
            *slot = *texture;
        }
        self.dirty_groups[STORAGE_GROUP as usize] = true;
    }

    fn bind_structured_buffers(&mut self, buffers: &[Option<BufferHandle>]) {
        for (slot, buffer) in self.bound.structured.iter_mut().zip(buffers) {
            *slot = *buffer;
        }
        self.dirty_groups[STORAGE_GROUP as usize] = true;
    }

    fn set_render_targets(&mut self, colors: &[TextureHandle], depth: Option<TextureHandle>) {
        self.flush_pass();
        self.bound.targets = Some((colors.iter().map(|c| c.0).collect(), depth.map(|d| d.0)));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.bound.viewport = Some(viewport);
        self.push_command(RenderCommand::SetViewport(viewport));
    }

    fn clear_render_target(&mut self, texture: TextureHandle, color: [f32; 4]) {
        if self.pending_pass.is_none() && self.bound_as_color(texture.0) {
            self.open_pass();
        }
        if let Some(pending) = self.pending_pass.as_mut() {
            if !pending.has_draws() {
                if let Some(att) = pending.colors.iter_mut().find(|a| a.texture == texture.0) {
                    att.clear = Some(color);
                    return;
                }
            }
        }
        self.flush_pass();
        self.clear_immediately(texture.0, Some(color), None);
    }

    fn clear_depth(&mut self, texture: TextureHandle, depth: f32) {
        if self.pending_pass.is_none() && self.bound_as_depth(texture.0) {
            self.open_pass();
        }
        if let Some(pending) = self.pending_pass.as_mut() {
            if !pending.has_draws() {
                if let Some(att) = pending.depth.as_mut().filter(|a| a.texture == texture.0) {
                    att.clear = Some(depth);
                    return;
                }
            }
        }
        self.flush_pass();
        self.clear_immediately(texture.0, None, Some(depth));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        if self.prepare_draw() {
            self.push_command(RenderCommand::Draw {
                vertices,
                instances,
            });
        }
    }

    fn draw_indexed(&mut self, indices: Range<u32>, instances: Range<u32>) {
        if self.prepare_draw() {
            self.push_command(RenderCommand::DrawIndexed { indices, instances });
        }
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        let Some(shader_id) = self.bound.shader else {
            log::warn!("Dispatch issued without a shader");
            return;
        };
        self.flush_pass();
        let Some(offsets) = self.stage_constant_buffers(shader_id) else {
            return;
        };
        if !self.compute_pipeline(shader_id) {
            return;
        }
        let mut groups = Vec::with_capacity(BIND_GROUP_COUNT - 1);
        for group in 1..BIND_GROUP_COUNT as u32 {
            let Some(index) = self.create_bind_group(shader_id, group) else {
                self.frame_bind_groups.clear();
                return;
            };
            groups.push((group, index));
        }

        let mut encoder = self.take_encoder();
        if let (Some(pipeline), Some(shader)) = (
            self.compute_pipelines.get(&shader_id),
            self.shaders.get(&shader_id),
        ) {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Compute Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &shader.uniform_group, &offsets);
            for (group, index) in &groups {
                if let Some(bg) = self.frame_bind_groups.get(*index) {
                    pass.set_bind_group(*group, bg, &[]);
                }
            }
            pass.dispatch_workgroups(x, y, z);
        }
        self.encoder = Some(encoder);
        self.frame_bind_groups.clear();
        self.mark_all_dirty();
    }

    fn create_gpu_timer(&mut self) -> Option<TimerHandle> {
        let needed = wgpu::Features::TIMESTAMP_QUERY
            | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
        if !self.features.contains(needed) {
            return None;
        }
        let id = self.alloc_id();
        self.timers.insert(id, GpuTimer::new(&self.device));
        Some(TimerHandle(id))
    }

    fn begin_gpu_timer(&mut self, timer: TimerHandle) {
        self.flush_pass();
        let mut encoder = self.take_encoder();
        if let Some(t) = self.timers.get(&timer.0) {
            t.begin(&mut encoder);
        }
        self.encoder = Some(encoder);
    }

    fn end_gpu_timer(&mut self, timer: TimerHandle) {
        self.flush_pass();
        let mut encoder = self.take_encoder();
        if let Some(t) = self.timers.get(&timer.0) {
            t.end(&mut encoder);
        }
        self.encoder = Some(encoder);
    }

    fn resolve_gpu_timer(&mut self, timer: TimerHandle) -> Option<f64> {
        self.device.poll(wgpu::Maintain::Poll);
        let period = self.queue.get_timestamp_period();
        self.timers.get(&timer.0)?.try_read(period)
    }
}

fn create_gpu_texture(device: &wgpu::Device, desc: &TextureDescriptor) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: desc.label.as_deref(),
        size: wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: desc.mip_levels.max(1),
        sample_count: desc.samples.max(1),
        dimension: wgpu::TextureDimension::D2,
        format: convert::texture_format(desc.format),
        usage: convert::texture_usage(desc),
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let storage_view = (desc.flags.is_unordered_access() && desc.mip_levels > 1).then(|| {
        texture.create_view(&wgpu::TextureViewDescriptor {
            base_mip_level: 0,
            mip_level_count: Some(1),
            ..Default::default()
        })
    });
    GpuTexture {
        texture,
        view,
        storage_view,
        desc: desc.clone(),
    }
}

/// Clamp to device limits while maintaining aspect ratio
fn clamp_size(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width > max_size || height > max_size {
        let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
        (
            ((width as f32 * scale) as u32).max(1),
            ((height as f32 * scale) as u32).max(1),
        )
    } else {
        (width.max(1), height.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::clamp_size;

    #[test]
    fn clamp_keeps_aspect_ratio() {
        assert_eq!(clamp_size(8192, 4096, 4096), (4096, 2048));
        assert_eq!(clamp_size(800, 600, 4096), (800, 600));
        assert_eq!(clamp_size(0, 0, 4096), (1, 1));
    }
}
