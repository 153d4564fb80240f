//! Render core - a state-tracking render device with pooled GPU resources
//!
//! The crate is built in layers:
//! - **backend**: the [`GraphicsBackend`](backend::GraphicsBackend) trait with a wgpu
//!   implementation and a headless null implementation
//! - **device**: [`RenderDevice`], which eliminates redundant state changes and owns
//!   the render-target pool, the previous-frame registry and the constant buffer pool
//! - **shader**: reflection-driven parameters with dirty tracking
//! - **frame**: per-view camera matrices, sub-pixel jitter and GPU frame timers
//! - **pipeline**: a deferred path with temporal anti-aliasing and a compute path tracer
//! - **renderer**: [`Renderer::render_frame`] tying it all together

pub mod backend;
pub mod device;
pub mod frame;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shader;

use std::path::PathBuf;

pub use backend::{BackendError, BackendResult, GraphicsBackend, NullBackend, NullCounters};
pub use device::{DeviceStats, PipelineState, RenderDevice};
pub use frame::{FrameOrchestrator, Mats};
pub use pipeline::{RenderPath, ViewMode};
pub use renderer::Renderer;
pub use resources::{
    Mesh, MeshData, PrevSemantic, RenderTarget, RenderTargetDesc, StructuredBuffer, Texture,
    TextureData,
};
pub use scene::{Camera, Environment, Material, RenderLight, RenderObject, RenderScene};
pub use shader::ShaderId;

/// Which backend the device is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Hardware adapter, then the software fallback adapter
    #[default]
    Auto,
    /// Hardware adapter only
    Hardware,
    /// Software fallback adapter only
    Software,
    /// No GPU at all; for tests and tooling
    Null,
}

/// Configuration for creating a [`RenderDevice`]
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub backend: BackendPreference,
    /// Enable vsync
    pub vsync: bool,
    /// Back buffer size when no window is given
    pub headless_size: (u32, u32),
    /// Frames a free pooled texture survives before it is destroyed
    pub eviction_threshold: u64,
    /// Where the source of shaders that fail to compile is written
    pub shader_dump_dir: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            vsync: true,
            headless_size: (1280, 720),
            eviction_threshold: 3,
            shader_dump_dir: Some(std::env::temp_dir().join("render-core-shader-failures")),
        }
    }
}

impl DeviceConfig {
    /// Headless null-backend configuration
    pub fn null(width: u32, height: u32) -> Self {
        Self {
            backend: BackendPreference::Null,
            headless_size: (width, height),
            shader_dump_dir: None,
            ..Default::default()
        }
    }
}

/// Configuration for the [`Renderer`]
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Jitter the projection and resolve against history
    pub temporal_aa: bool,
    /// Scale of the sub-pixel jitter, in pixels
    pub jitter_scale: f32,
    /// Weight of the current frame in the temporal resolve
    pub history_blend: f32,
    /// Sample count of the wireframe overlay target; 1 draws directly
    pub wireframe_msaa_samples: u32,
    /// Maximum per-element difference before the path tracer sees a camera change.
    /// `None` compares exactly.
    pub camera_tolerance: Option<f32>,
    /// Path tracer bounces per sample
    pub max_bounces: u32,
    /// Exposure applied by the path tracer's tone map
    pub exposure: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            temporal_aa: true,
            jitter_scale: 1.0,
            history_blend: 0.1,
            wireframe_msaa_samples: 4,
            camera_tolerance: None,
            max_bounces: 4,
            exposure: 1.0,
        }
    }
}
