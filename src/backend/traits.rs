//! Core backend abstraction traits
//!
//! Every backend (wgpu, null) implements [`GraphicsBackend`]. The render device
//! holds exactly one of them, chosen once at startup.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture (with its default view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// Handle to a blend state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateHandle(pub(crate) u64);

/// Handle to a depth state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStateHandle(pub(crate) u64);

/// Handle to a rasterizer state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterStateHandle(pub(crate) u64);

/// Handle to a GPU timer (begin/end timestamp pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) u64);

/// Frame context returned when beginning a frame
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub back_buffer: TextureHandle,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Human readable backend name
    fn name(&self) -> &str;

    /// Resize the swapchain (or the offscreen back buffer when headless)
    fn resize(&mut self, width: u32, height: u32);

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Begin a new frame
    fn begin_frame(&mut self) -> BackendResult<FrameContext>;

    /// Submit recorded work and present the frame
    fn end_frame(&mut self) -> BackendResult<()>;

    // Resources

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload mip 0 of a texture, regenerating the mip chain if the texture asked for one
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]);

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle);

    /// Resolve a multisampled texture into a single-sampled one
    fn resolve_texture(&mut self, src: TextureHandle, dst: TextureHandle);

    // Shaders and constant buffers

    fn create_shader(&mut self, desc: &ShaderProgramDescriptor) -> BackendResult<ShaderHandle>;

    fn destroy_shader(&mut self, shader: ShaderHandle);

    /// Allocate storage for a constant buffer of `size` bytes
    fn create_constant_buffer(&mut self, size: u64) -> BackendResult<BufferHandle>;

    /// Upload the full contents of a constant buffer; draws recorded afterwards see the new data
    fn upload_constant_buffer(&mut self, buffer: BufferHandle, data: &[u8]);

    // State objects

    fn create_blend_state(&mut self, desc: &BlendDesc) -> BlendStateHandle;

    fn create_depth_state(&mut self, desc: &DepthDesc) -> DepthStateHandle;

    fn create_raster_state(&mut self, desc: &RasterDesc) -> RasterStateHandle;

    fn bind_blend_state(&mut self, state: BlendStateHandle);

    fn bind_depth_state(&mut self, state: DepthStateHandle);

    fn bind_raster_state(&mut self, state: RasterStateHandle);

    fn bind_shader(&mut self, shader: Option<ShaderHandle>);

    /// Bind constant buffers by uniform binding index
    fn bind_constant_buffers(&mut self, buffers: &[(u32, BufferHandle)]);

    fn bind_mesh(&mut self, mesh: Option<&MeshBinding>);

    /// Bind sampled textures starting at slot 0
    fn bind_textures(&mut self, textures: &[Option<TextureHandle>]);

    /// Bind storage textures starting at slot 0
    fn bind_unordered_access(&mut self, textures: &[Option<TextureHandle>]);

    /// Bind structured buffers starting at slot 0
    fn bind_structured_buffers(&mut self, buffers: &[Option<BufferHandle>]);

    // Passes and commands

    fn set_render_targets(&mut self, colors: &[TextureHandle], depth: Option<TextureHandle>);

    fn set_viewport(&mut self, viewport: Viewport);

    fn clear_render_target(&mut self, texture: TextureHandle, color: [f32; 4]);

    fn clear_depth(&mut self, texture: TextureHandle, depth: f32);

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    fn draw_indexed(&mut self, indices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    // GPU timers

    fn create_gpu_timer(&mut self) -> Option<TimerHandle>;

    fn begin_gpu_timer(&mut self, timer: TimerHandle);

    fn end_gpu_timer(&mut self, timer: TimerHandle);

    /// Milliseconds between begin and end, if the result is already available. Never blocks.
    fn resolve_gpu_timer(&mut self, timer: TimerHandle) -> Option<f64>;
}
