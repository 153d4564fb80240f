//! Render device
//!
//! Owns the backend connection plus every cache and pool that lives for the
//! device's lifetime. All state is reached through `&mut self`; the only
//! shared piece is the release queue that owned resources push into on drop.

pub mod state;

use std::sync::Arc;

use slotmap::SlotMap;

use crate::backend::{self, *};
use crate::resources::*;
use crate::shader::{ConstantBufferPool, ShaderId, ShaderProgram};
use crate::DeviceConfig;
pub use state::{PipelineState, RenderTargets, StateCache};

/// Snapshot of the device's pools and caches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub frame: u64,
    pub render_targets: usize,
    pub free_render_targets: usize,
    pub prev_targets: usize,
    pub constant_buffers: usize,
    pub shaders: usize,
    pub state_objects: usize,
    pub pending_releases: usize,
}

pub struct RenderDevice {
    pub(crate) backend: Box<dyn GraphicsBackend>,
    pub(crate) config: DeviceConfig,
    pub(crate) frame: u64,
    pub(crate) state: PipelineState,
    pub(crate) state_stack: Vec<PipelineState>,
    pub(crate) state_cache: StateCache,
    pub(crate) render_targets: RenderTargetPool,
    pub(crate) prev_targets: PrevTextureRegistry,
    pub(crate) constant_buffers: ConstantBufferPool,
    pub(crate) shaders: SlotMap<ShaderId, ShaderProgram>,
    pub(crate) releases: ReleaseQueue,
    next_mesh_id: u64,
    frame_context: Option<FrameContext>,
}

impl std::fmt::Debug for RenderDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderDevice")
            .field("backend", &self.backend.name())
            .field("frame", &self.frame)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl RenderDevice {
    /// Create a device through the backend fallback cascade.
    pub fn new(
        window: Option<Arc<winit::window::Window>>,
        config: DeviceConfig,
    ) -> BackendResult<Self> {
        let backend = backend::create_backend(window, &config)?;
        Ok(Self::with_backend(backend, config))
    }

    /// Create a device on top of an existing backend.
    pub fn with_backend(backend: Box<dyn GraphicsBackend>, config: DeviceConfig) -> Self {
        let threshold = config.eviction_threshold;
        let mut device = Self {
            backend,
            config,
            frame: 0,
            state: PipelineState::default(),
            state_stack: Vec::new(),
            state_cache: StateCache::default(),
            render_targets: RenderTargetPool::new(threshold),
            prev_targets: PrevTextureRegistry::new(threshold),
            constant_buffers: ConstantBufferPool::new(),
            shaders: SlotMap::with_key(),
            releases: ReleaseQueue::new(),
            next_mesh_id: 1,
            frame_context: None,
        };
        device.bind_initial_states();
        device
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.backend.surface_size()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.backend.resize(width, height);
    }

    pub fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let context = self.backend.begin_frame()?;
        self.frame_context = Some(context);
        Ok(context)
    }

    /// Back buffer of the frame in flight
    pub fn back_buffer(&self) -> Option<FrameContext> {
        self.frame_context
    }

    pub fn end_frame(&mut self) -> BackendResult<()> {
        self.frame_context = None;
        // The back buffer changes every frame; force a rebind next frame.
        self.state.targets = None;
        self.backend.end_frame()
    }

    /// Advance the frame counter, evict idle pooled textures and perform queued releases.
    pub fn update(&mut self) {
        self.frame += 1;
        let evicted = self.render_targets.evict(self.frame) + self.prev_targets.evict(self.frame);
        if evicted > 0 {
            log::debug!("Frame {}: evicted {} pooled textures", self.frame, evicted);
        }
        self.perform_releases();
    }

    fn perform_releases(&mut self) {
        for release in self.releases.drain() {
            match release {
                Release::Texture(texture) => {
                    self.state.forget_texture(texture);
                    self.backend.destroy_texture(texture);
                }
                Release::Buffer(buffer) => {
                    self.state.forget_buffer(buffer);
                    self.backend.destroy_buffer(buffer);
                }
            }
        }
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            frame: self.frame,
            render_targets: self.render_targets.len(),
            free_render_targets: self.render_targets.free_count(),
            prev_targets: self.prev_targets.len(),
            constant_buffers: self.constant_buffers.len(),
            shaders: self.shaders.len(),
            state_objects: self.state_cache.len(),
            pending_releases: self.releases.len(),
        }
    }

    // Resources

    pub fn create_texture(&mut self, desc: &TextureDescriptor, data: Option<&[u8]>) -> Option<Texture> {
        let handle = match self.backend.create_texture(desc) {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Failed to create texture {:?}: {}", desc.label, e);
                return None;
            }
        };
        if let Some(data) = data {
            self.backend.write_texture(handle, data);
        }
        Some(Texture::new(handle, desc.clone(), self.releases.clone()))
    }

    pub fn create_texture_from_data(&mut self, data: &TextureData, flags: TextureFlags) -> Option<Texture> {
        let desc = data.descriptor(flags);
        self.create_texture(&desc, Some(&data.data))
    }

    /// Upload mip 0 of a texture.
    pub fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) {
        self.backend.write_texture(texture, data);
    }

    pub fn create_mesh(&mut self, data: &MeshData) -> Option<Mesh> {
        if data.vertices.is_empty() {
            log::error!("Mesh `{}` has no vertices", data.name);
            return None;
        }
        let vertex_buffer = self.create_filled_buffer(
            &format!("{} vertices", data.name),
            BufferUsage::VERTEX | BufferUsage::COPY_DST,
            data.vertex_bytes(),
        )?;
        let index_buffer = if data.indices.is_empty() {
            None
        } else {
            match self.create_filled_buffer(
                &format!("{} indices", data.name),
                BufferUsage::INDEX | BufferUsage::COPY_DST,
                data.index_bytes(),
            ) {
                Some(buffer) => Some((buffer, IndexFormat::Uint32)),
                None => {
                    self.backend.destroy_buffer(vertex_buffer);
                    return None;
                }
            }
        };

        let id = MeshId(self.next_mesh_id);
        self.next_mesh_id += 1;
        let binding = MeshBinding {
            vertex_buffer,
            index_buffer,
            layout: Vertex::layout(),
            topology: PrimitiveTopology::TriangleList,
        };
        Some(Mesh::new(id, binding, Arc::new(data.clone()), self.releases.clone()))
    }

    fn create_filled_buffer(&mut self, label: &str, usage: BufferUsage, bytes: &[u8]) -> Option<BufferHandle> {
        let desc = BufferDescriptor {
            label: Some(label.to_string()),
            size: (bytes.len() as u64).max(4),
            usage,
        };
        match self.backend.create_buffer(&desc) {
            Ok(buffer) => {
                self.backend.write_buffer(buffer, 0, bytes);
                Some(buffer)
            }
            Err(e) => {
                log::error!("Failed to create buffer `{}`: {}", label, e);
                None
            }
        }
    }

    fn allocate_storage(&mut self, label: &str, bytes: u64, count: usize) -> Option<Vec<BufferHandle>> {
        let desc = BufferDescriptor {
            label: Some(label.to_string()),
            size: bytes.max(16),
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
        };
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            match self.backend.create_buffer(&desc) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    log::error!("Failed to create structured buffer `{}`: {}", label, e);
                    for buffer in buffers {
                        self.backend.destroy_buffer(buffer);
                    }
                    return None;
                }
            }
        }
        Some(buffers)
    }

    /// Create a structured buffer for `capacity` elements of `element_size` bytes.
    ///
    /// A ringed buffer keeps [`STRUCTURED_BUFFER_RING`] allocations and
    /// advances on every write.
    pub fn create_structured_buffer(
        &mut self,
        label: &str,
        element_size: u64,
        capacity: u64,
        ringed: bool,
    ) -> Option<StructuredBuffer> {
        if element_size == 0 {
            log::error!("Structured buffer `{}` has a zero element size", label);
            return None;
        }
        let capacity = capacity.max(1);
        let count = if ringed { STRUCTURED_BUFFER_RING } else { 1 };
        let buffers = self.allocate_storage(label, element_size * capacity, count)?;
        Some(StructuredBuffer::new(
            label.to_string(),
            element_size,
            capacity,
            buffers,
            self.releases.clone(),
        ))
    }

    /// Upload `elements`, reallocating only when they exceed the capacity.
    pub fn write_structured_buffer<T: bytemuck::Pod>(
        &mut self,
        buffer: &mut StructuredBuffer,
        elements: &[T],
    ) -> bool {
        if std::mem::size_of::<T>() as u64 != buffer.element_size() {
            log::warn!(
                "Structured buffer `{}`: element size {} does not match {}",
                buffer.label(),
                std::mem::size_of::<T>(),
                buffer.element_size()
            );
            return false;
        }
        let len = elements.len() as u64;
        if len > buffer.capacity() {
            let capacity = len.next_power_of_two();
            let Some(storage) =
                self.allocate_storage(buffer.label(), capacity * buffer.element_size(), buffer.ring_len())
            else {
                return false;
            };
            log::debug!(
                "Structured buffer `{}` grown to {} elements",
                buffer.label(),
                capacity
            );
            buffer.replace_storage(storage, capacity);
        } else if buffer.is_ringed() {
            buffer.advance();
        }
        if !elements.is_empty() {
            self.backend
                .write_buffer(buffer.handle(), 0, bytemuck::cast_slice(elements));
        }
        buffer.set_len(len);
        true
    }

    // Pools

    /// Check out a pooled render target, creating one if no free entry matches exactly.
    pub fn get_render_texture(&mut self, desc: &RenderTargetDesc) -> Option<RenderTarget> {
        if let Some(target) = self.render_targets.acquire(desc, self.frame) {
            return Some(target);
        }
        let desc = *desc;
        let label = format!("pooled {}x{} {:?}", desc.width, desc.height, desc.format);
        let texture = self.create_texture(&desc.texture_descriptor(&label), None)?;
        log::debug!("Render target pool: new {}", label);
        Some(self.render_targets.insert(texture, desc, self.frame))
    }

    pub fn release_render_texture(&mut self, id: RenderTargetId) {
        if !self.render_targets.release(id, self.frame) {
            log::warn!("Releasing a render target that is unknown or already free");
        }
    }

    pub fn render_target(&self, id: RenderTargetId) -> Option<RenderTarget> {
        self.render_targets.get(id)
    }

    /// The previous-frame texture for this key, created on first request.
    pub fn get_prev_render_texture(
        &mut self,
        semantic: PrevSemantic,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Option<PrevTarget> {
        if let Some(prev) = self.prev_targets.find(semantic, width, height, format, self.frame) {
            return Some(prev);
        }
        let desc = RenderTargetDesc::history(width, height, format);
        let label = format!("{:?} {}x{}", semantic, width, height);
        let texture = self.create_texture(&desc.texture_descriptor(&label), None)?;
        Some(self.prev_targets.insert(semantic, texture, desc, self.frame))
    }

    pub fn prev_render_texture(&self, id: PrevTargetId) -> Option<TextureHandle> {
        self.prev_targets.texture(id)
    }

    /// Hand the current target's texture to the history slot and free the target.
    pub fn exchange_prev_render_texture(&mut self, prev: PrevTargetId, current: RenderTargetId) -> bool {
        match self
            .prev_targets
            .exchange(prev, &mut self.render_targets, current, self.frame)
        {
            Ok(()) => true,
            Err(reason) => {
                log::warn!("exchange_prev_render_texture: {}", reason);
                false
            }
        }
    }

    // Commands

    pub fn draw(&mut self, mesh: &Mesh, instances: u32) {
        if self.state.shader.is_none() {
            log::warn!("draw called without a bound shader");
            return;
        }
        self.set_mesh(Some(mesh));
        self.flush_parameters();
        if mesh.binding().index_buffer.is_some() {
            self.backend.draw_indexed(0..mesh.index_count(), 0..instances);
        } else {
            self.backend.draw(0..mesh.vertex_count(), 0..instances);
        }
    }

    /// Draw a single triangle covering the viewport, with no mesh bound.
    pub fn draw_fullscreen(&mut self) {
        if self.state.shader.is_none() {
            log::warn!("draw_fullscreen called without a bound shader");
            return;
        }
        self.set_mesh(None);
        self.flush_parameters();
        self.backend.draw(0..3, 0..1);
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if self.state.shader.is_none() {
            log::warn!("dispatch called without a bound shader");
            return;
        }
        self.flush_parameters();
        self.backend.dispatch(x, y, z);
    }

    pub fn clear_render_target(&mut self, texture: TextureHandle, color: [f32; 4]) {
        self.backend.clear_render_target(texture, color);
    }

    pub fn clear_depth(&mut self, texture: TextureHandle, depth: f32) {
        self.backend.clear_depth(texture, depth);
    }

    pub fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        self.backend.copy_texture(src, dst);
    }

    pub fn resolve_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        self.backend.resolve_texture(src, dst);
    }

    // GPU timers

    pub fn create_gpu_timer(&mut self) -> Option<TimerHandle> {
        self.backend.create_gpu_timer()
    }

    pub fn begin_gpu_timer(&mut self, timer: TimerHandle) {
        self.backend.begin_gpu_timer(timer);
    }

    pub fn end_gpu_timer(&mut self, timer: TimerHandle) {
        self.backend.end_gpu_timer(timer);
    }

    pub fn resolve_gpu_timer(&mut self, timer: TimerHandle) -> Option<f64> {
        self.backend.resolve_gpu_timer(timer)
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        self.render_targets.clear();
        self.prev_targets.clear();
        self.perform_releases();
        for (_, program) in self.shaders.drain() {
            self.backend.destroy_shader(program.handle());
        }
        log::debug!("Render device destroyed after {} frames", self.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> (RenderDevice, Arc<parking_lot::Mutex<NullCounters>>) {
        let backend = NullBackend::new(64, 64);
        let counters = backend.counters();
        (
            RenderDevice::with_backend(Box::new(backend), DeviceConfig::default()),
            counters,
        )
    }

    #[test]
    fn dropped_textures_are_destroyed_on_update() {
        let (mut device, counters) = device();
        let texture = device
            .create_texture(&TextureDescriptor::default(), None)
            .unwrap();
        drop(texture);
        assert_eq!(counters.lock().textures_destroyed, 0);
        device.update();
        assert_eq!(counters.lock().textures_destroyed, 1);
    }

    #[test]
    fn structured_buffer_grows_only_past_capacity() {
        let (mut device, counters) = device();
        let mut buffer = device.create_structured_buffer("tris", 16, 4, false).unwrap();
        assert!(device.write_structured_buffer(&mut buffer, &[[0f32; 4]; 3]));
        assert_eq!(buffer.reallocations(), 0);
        assert!(device.write_structured_buffer(&mut buffer, &[[0f32; 4]; 9]));
        assert_eq!(buffer.reallocations(), 1);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.len(), 9);
        device.update();
        assert_eq!(counters.lock().buffers_destroyed, 1);
    }

    #[test]
    fn mismatched_element_size_is_rejected() {
        let (mut device, _) = device();
        let mut buffer = device.create_structured_buffer("lights", 32, 4, true).unwrap();
        assert!(!device.write_structured_buffer(&mut buffer, &[0u32; 4]));
    }

    #[test]
    fn draw_without_shader_does_nothing() {
        let (mut device, counters) = device();
        let mesh = device.create_mesh(&MeshData::cube()).unwrap();
        device.draw(&mesh, 1);
        device.draw_fullscreen();
        device.dispatch(1, 1, 1);
        let counters = counters.lock();
        assert_eq!(counters.draws, 0);
        assert_eq!(counters.dispatches, 0);
        assert_eq!(counters.mesh_binds, 0);
    }

    #[test]
    fn too_large_texture_returns_none() {
        let backend = NullBackend::new(64, 64).with_max_texture_size(256);
        let mut device = RenderDevice::with_backend(Box::new(backend), DeviceConfig::default());
        let desc = TextureDescriptor {
            width: 512,
            height: 512,
            ..Default::default()
        };
        assert!(device.create_texture(&desc, None).is_none());
    }

    #[test]
    fn prev_texture_is_fresh_only_once() {
        let (mut device, _) = device();
        let first = device
            .get_prev_render_texture(PrevSemantic::ColorHistory, 32, 32, TextureFormat::Rgba16Float)
            .unwrap();
        let second = device
            .get_prev_render_texture(PrevSemantic::ColorHistory, 32, 32, TextureFormat::Rgba16Float)
            .unwrap();
        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(first.id, second.id);
    }
}
