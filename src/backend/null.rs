//! Null GPU backend for tests and headless tooling.
//!
//! Performs no GPU work. Every call is counted in a shared [`NullCounters`]
//! block so tests can observe exactly what the render device issued.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;

/// Call counters shared between a [`NullBackend`] and whoever asked for them.
#[derive(Debug, Default, Clone)]
pub struct NullCounters {
    pub frames: u64,
    pub buffers_created: usize,
    pub buffers_destroyed: usize,
    pub buffer_writes: usize,
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub texture_writes: usize,
    pub shaders_created: usize,
    pub shaders_destroyed: usize,
    pub constant_buffers_created: usize,
    pub constant_uploads: usize,
    pub blend_states_created: usize,
    pub depth_states_created: usize,
    pub raster_states_created: usize,
    pub blend_binds: usize,
    pub depth_binds: usize,
    pub raster_binds: usize,
    pub shader_binds: usize,
    pub constant_buffer_binds: usize,
    pub mesh_binds: usize,
    pub texture_binds: usize,
    pub uav_binds: usize,
    pub structured_buffer_binds: usize,
    pub render_target_binds: usize,
    pub viewport_sets: usize,
    pub clears: usize,
    pub copies: usize,
    pub resolves: usize,
    pub draws: usize,
    pub dispatches: usize,
    pub timers_begun: usize,
    pub live_textures: usize,
    pub bound_blend: Option<BlendDesc>,
    pub bound_depth: Option<DepthDesc>,
    pub bound_raster: Option<RasterDesc>,
    pub bound_targets: Vec<TextureHandle>,
    pub destroyed_textures: Vec<TextureHandle>,
}

/// Null GPU backend.
#[derive(Debug)]
pub struct NullBackend {
    counters: Arc<Mutex<NullCounters>>,
    width: u32,
    height: u32,
    max_texture_size: u32,
    next_id: u64,
    back_buffer: TextureHandle,
    blend_states: HashMap<u64, BlendDesc>,
    depth_states: HashMap<u64, DepthDesc>,
    raster_states: HashMap<u64, RasterDesc>,
}

impl NullBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            counters: Arc::new(Mutex::new(NullCounters::default())),
            width: width.max(1),
            height: height.max(1),
            max_texture_size: 16384,
            next_id: 2,
            back_buffer: TextureHandle(1),
            blend_states: HashMap::new(),
            depth_states: HashMap::new(),
            raster_states: HashMap::new(),
        }
    }

    /// Textures larger than `max` fail to create, like a device limit would.
    pub fn with_max_texture_size(mut self, max: u32) -> Self {
        self.max_texture_size = max;
        self
    }

    /// Shared view of the call counters.
    pub fn counters(&self) -> Arc<Mutex<NullCounters>> {
        Arc::clone(&self.counters)
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl GraphicsBackend for NullBackend {
    fn name(&self) -> &str {
        "Null Backend"
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        log::trace!("NullBackend: begin frame");
        Ok(FrameContext {
            back_buffer: self.back_buffer,
            format: TextureFormat::Bgra8UnormSrgb,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.counters.lock().frames += 1;
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "NullBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        self.counters.lock().buffers_created += 1;
        Ok(BufferHandle(self.next()))
    }

    fn write_buffer(&mut self, _buffer: BufferHandle, _offset: u64, _data: &[u8]) {
        self.counters.lock().buffer_writes += 1;
    }

    fn destroy_buffer(&mut self, _buffer: BufferHandle) {
        self.counters.lock().buffers_destroyed += 1;
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "NullBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        if desc.width > self.max_texture_size || desc.height > self.max_texture_size {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}x{} exceeds the maximum texture size {}",
                desc.width, desc.height, self.max_texture_size
            )));
        }
        let mut counters = self.counters.lock();
        counters.textures_created += 1;
        counters.live_textures += 1;
        drop(counters);
        Ok(TextureHandle(self.next()))
    }

    fn write_texture(&mut self, _texture: TextureHandle, _data: &[u8]) {
        self.counters.lock().texture_writes += 1;
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let mut counters = self.counters.lock();
        counters.textures_destroyed += 1;
        counters.live_textures = counters.live_textures.saturating_sub(1);
        counters.destroyed_textures.push(texture);
    }

    fn copy_texture(&mut self, _src: TextureHandle, _dst: TextureHandle) {
        self.counters.lock().copies += 1;
    }

    fn resolve_texture(&mut self, _src: TextureHandle, _dst: TextureHandle) {
        self.counters.lock().resolves += 1;
    }

    fn create_shader(&mut self, desc: &ShaderProgramDescriptor) -> BackendResult<ShaderHandle> {
        log::trace!(
            "NullBackend: creating shader {:?} ({} bindings)",
            desc.label,
            desc.bindings.len()
        );
        self.counters.lock().shaders_created += 1;
        Ok(ShaderHandle(self.next()))
    }

    fn destroy_shader(&mut self, _shader: ShaderHandle) {
        self.counters.lock().shaders_destroyed += 1;
    }

    fn create_constant_buffer(&mut self, size: u64) -> BackendResult<BufferHandle> {
        log::trace!("NullBackend: creating constant buffer ({} bytes)", size);
        self.counters.lock().constant_buffers_created += 1;
        Ok(BufferHandle(self.next()))
    }

    fn upload_constant_buffer(&mut self, _buffer: BufferHandle, _data: &[u8]) {
        self.counters.lock().constant_uploads += 1;
    }

    fn create_blend_state(&mut self, desc: &BlendDesc) -> BlendStateHandle {
        self.counters.lock().blend_states_created += 1;
        let id = self.next();
        self.blend_states.insert(id, *desc);
        BlendStateHandle(id)
    }

    fn create_depth_state(&mut self, desc: &DepthDesc) -> DepthStateHandle {
        self.counters.lock().depth_states_created += 1;
        let id = self.next();
        self.depth_states.insert(id, *desc);
        DepthStateHandle(id)
    }

    fn create_raster_state(&mut self, desc: &RasterDesc) -> RasterStateHandle {
        self.counters.lock().raster_states_created += 1;
        let id = self.next();
        self.raster_states.insert(id, *desc);
        RasterStateHandle(id)
    }

    fn bind_blend_state(&mut self, state: BlendStateHandle) {
        let mut counters = self.counters.lock();
        counters.blend_binds += 1;
        counters.bound_blend = self.blend_states.get(&state.0).copied();
    }

    fn bind_depth_state(&mut self, state: DepthStateHandle) {
        let mut counters = self.counters.lock();
        counters.depth_binds += 1;
        counters.bound_depth = self.depth_states.get(&state.0).copied();
    }

    fn bind_raster_state(&mut self, state: RasterStateHandle) {
        let mut counters = self.counters.lock();
        counters.raster_binds += 1;
        counters.bound_raster = self.raster_states.get(&state.0).copied();
    }

    fn bind_shader(&mut self, _shader: Option<ShaderHandle>) {
        self.counters.lock().shader_binds += 1;
    }

    fn bind_constant_buffers(&mut self, _buffers: &[(u32, BufferHandle)]) {
        self.counters.lock().constant_buffer_binds += 1;
    }

    fn bind_mesh(&mut self, _mesh: Option<&MeshBinding>) {
        self.counters.lock().mesh_binds += 1;
    }

    fn bind_textures(&mut self, _textures: &[Option<TextureHandle>]) {
        self.counters.lock().texture_binds += 1;
    }

    fn bind_unordered_access(&mut self, _textures: &[Option<TextureHandle>]) {
        self.counters.lock().uav_binds += 1;
    }

    fn bind_structured_buffers(&mut self, _buffers: &[Option<BufferHandle>]) {
        self.counters.lock().structured_buffer_binds += 1;
    }

    fn set_render_targets(&mut self, colors: &[TextureHandle], _depth: Option<TextureHandle>) {
        let mut counters = self.counters.lock();
        counters.render_target_binds += 1;
        counters.bound_targets = colors.to_vec();
    }

    fn set_viewport(&mut self, _viewport: Viewport) {
        self.counters.lock().viewport_sets += 1;
    }

    fn clear_render_target(&mut self, _texture: TextureHandle, _color: [f32; 4]) {
        self.counters.lock().clears += 1;
    }

    fn clear_depth(&mut self, _texture: TextureHandle, _depth: f32) {
        self.counters.lock().clears += 1;
    }

    fn draw(&mut self, _vertices: std::ops::Range<u32>, _instances: std::ops::Range<u32>) {
        self.counters.lock().draws += 1;
    }

    fn draw_indexed(&mut self, _indices: std::ops::Range<u32>, _instances: std::ops::Range<u32>) {
        self.counters.lock().draws += 1;
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        log::trace!("NullBackend: dispatch {}x{}x{}", x, y, z);
        self.counters.lock().dispatches += 1;
    }

    fn create_gpu_timer(&mut self) -> Option<TimerHandle> {
        Some(TimerHandle(self.next()))
    }

    fn begin_gpu_timer(&mut self, _timer: TimerHandle) {
        self.counters.lock().timers_begun += 1;
    }

    fn end_gpu_timer(&mut self, _timer: TimerHandle) {}

    fn resolve_gpu_timer(&mut self, _timer: TimerHandle) -> Option<f64> {
        Some(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_shared() {
        let mut backend = NullBackend::new(64, 64);
        let counters = backend.counters();
        backend.draw(0..3, 0..1);
        backend.dispatch(1, 1, 1);
        assert_eq!(counters.lock().draws, 1);
        assert_eq!(counters.lock().dispatches, 1);
    }

    #[test]
    fn oversized_texture_fails() {
        let mut backend = NullBackend::new(64, 64).with_max_texture_size(128);
        let desc = TextureDescriptor {
            width: 256,
            height: 256,
            ..Default::default()
        };
        assert!(backend.create_texture(&desc).is_err());
        assert_eq!(backend.counters().lock().live_textures, 0);
    }

    #[test]
    fn bound_state_is_tracked() {
        let mut backend = NullBackend::new(64, 64);
        let handle = backend.create_raster_state(&RasterDesc {
            cull: CullMode::None,
            fill: FillMode::Wireframe,
        });
        backend.bind_raster_state(handle);
        let counters = backend.counters();
        let bound = counters.lock().bound_raster.unwrap();
        assert_eq!(bound.fill, FillMode::Wireframe);
    }
}
