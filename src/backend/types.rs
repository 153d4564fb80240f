//! Common types shared between backends

use crate::backend::traits::BufferHandle;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    R32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rg16Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// Formats usable as a write-only storage texture.
    pub fn supports_storage(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8Unorm
                | TextureFormat::Rgba16Float
                | TextureFormat::Rgba32Float
                | TextureFormat::R32Float
        )
    }
}

bitflags! {
    /// Creation flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        /// Usable as a color or depth render target.
        const RENDER_TARGET = 1 << 0;
        /// Usable as an unordered-access (storage) image.
        const UNORDERED_ACCESS = 1 << 1;
        /// Allocate a full mip chain and regenerate it after uploads.
        const GENERATE_MIPS = 1 << 2;
        /// Sample with repeat addressing instead of clamp.
        const WRAP = 1 << 3;
    }
}

impl TextureFlags {
    pub fn is_render_target(&self) -> bool {
        self.contains(TextureFlags::RENDER_TARGET)
    }

    pub fn is_unordered_access(&self) -> bool {
        self.contains(TextureFlags::UNORDERED_ACCESS)
    }

    pub fn wants_mips(&self) -> bool {
        self.contains(TextureFlags::GENERATE_MIPS)
    }

    pub fn wraps(&self) -> bool {
        self.contains(TextureFlags::WRAP)
    }
}

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const INDEX = 1 << 2;
        const VERTEX = 1 << 3;
        const UNIFORM = 1 << 4;
        const STORAGE = 1 << 5;
    }
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub samples: u32,
    pub flags: TextureFlags,
}

impl TextureDescriptor {
    /// Number of mips in a full chain for the given size.
    pub fn full_mip_count(width: u32, height: u32) -> u32 {
        32 - width.max(height).max(1).leading_zeros()
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            mip_levels: 1,
            format: TextureFormat::Rgba8Unorm,
            samples: 1,
            flags: TextureFlags::empty(),
        }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// Vertex attribute description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Vertex buffer layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

/// Standard vertex with position, normal, UV, and tangent
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Vertex {
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x3,
                    offset: 12,
                },
                VertexAttribute {
                    location: 2,
                    format: VertexFormat::Float32x2,
                    offset: 24,
                },
                VertexAttribute {
                    location: 3,
                    format: VertexFormat::Float32x4,
                    offset: 32,
                },
            ],
        }
    }
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Polygon fill mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

/// Compare function for depth testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    Src,
    OneMinusSrc,
    SrcAlpha,
    OneMinusSrcAlpha,
    Dst,
    OneMinusDst,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Blend state descriptor. `One`/`Zero` means blending is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendDesc {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendDesc {
    pub const OPAQUE: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
    };

    pub const ADDITIVE: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::One,
    };

    pub const ALPHA: Self = Self {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };

    pub fn is_enabled(&self) -> bool {
        *self != Self::OPAQUE
    }
}

impl Default for BlendDesc {
    fn default() -> Self {
        Self::OPAQUE
    }
}

/// Depth state descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthDesc {
    pub test: bool,
    pub write: bool,
    pub func: CompareFunction,
}

impl Default for DepthDesc {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            func: CompareFunction::Less,
        }
    }
}

/// Rasterizer state descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterDesc {
    pub cull: CullMode,
    pub fill: FillMode,
}

impl Default for RasterDesc {
    fn default() -> Self {
        Self {
            cull: CullMode::Back,
            fill: FillMode::Solid,
        }
    }
}

/// Viewport rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Entry points of a shader program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderEntryPoints {
    Render {
        vertex: String,
        fragment: Option<String>,
    },
    Compute {
        entry: String,
        workgroup_size: [u32; 3],
    },
}

/// Sample type of a sampled texture binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSampleKind {
    Float,
    Depth,
    Uint,
    Sint,
}

/// Resource binding declared by a shader, as reflected from its source.
///
/// Bind group convention: group 0 holds uniform buffers, group 1 sampled textures
/// (binding = texture slot), group 2 samplers (binding = texture slot), group 3
/// structured buffers (binding = slot) and storage textures (binding = 8 + slot).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderBinding {
    Uniform {
        binding: u32,
        size: u64,
    },
    Texture {
        slot: u32,
        kind: TextureSampleKind,
        multisampled: bool,
    },
    Sampler {
        slot: u32,
        comparison: bool,
    },
    StructuredBuffer {
        slot: u32,
        read_only: bool,
    },
    StorageTexture {
        slot: u32,
        format: TextureFormat,
    },
}

pub const UNIFORM_GROUP: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;
pub const SAMPLER_GROUP: u32 = 2;
pub const STORAGE_GROUP: u32 = 3;
pub const STORAGE_TEXTURE_BINDING_BASE: u32 = 8;

pub const MAX_TEXTURE_SLOTS: usize = 8;
pub const MAX_UAV_SLOTS: usize = 4;
pub const MAX_STRUCTURED_BUFFER_SLOTS: usize = 8;
pub const MAX_COLOR_TARGETS: usize = 4;

/// Everything a backend needs to build a shader program
#[derive(Debug, Clone)]
pub struct ShaderProgramDescriptor {
    pub label: Option<String>,
    pub source: String,
    pub entry_points: ShaderEntryPoints,
    pub bindings: Vec<ShaderBinding>,
}

/// Vertex/index buffers and input layout of a mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshBinding {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<(BufferHandle, IndexFormat)>,
    pub layout: VertexBufferLayout,
    pub topology: PrimitiveTopology,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_struct_size() {
        let layout = Vertex::layout();
        assert_eq!(layout.array_stride, 48);
        let end = layout
            .attributes
            .iter()
            .map(|a| a.offset + a.format.size())
            .max()
            .unwrap();
        assert_eq!(end, layout.array_stride);
    }

    #[test]
    fn full_mip_chain() {
        assert_eq!(TextureDescriptor::full_mip_count(1, 1), 1);
        assert_eq!(TextureDescriptor::full_mip_count(256, 256), 9);
        assert_eq!(TextureDescriptor::full_mip_count(300, 17), 9);
    }

    #[test]
    fn texture_flag_predicates() {
        let flags = TextureFlags::RENDER_TARGET | TextureFlags::WRAP;
        assert!(flags.is_render_target());
        assert!(flags.wraps());
        assert!(!flags.is_unordered_access());
        assert!(!flags.wants_mips());
    }

    #[test]
    fn opaque_blend_is_disabled() {
        assert!(!BlendDesc::OPAQUE.is_enabled());
        assert!(BlendDesc::ADDITIVE.is_enabled());
    }
}
