//! WGSL reflection through naga
//!
//! Extracts the resource bindings a program declares, the layout of every
//! uniform block (flattened to named parameters), and which entry points
//! actually touch each block.

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Handle, ImageClass, ImageDimension, Module, ScalarKind, TypeInner};

use crate::backend::types::*;

/// Shader reflection error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShaderError {
    #[error("Parse error:\n{0}")]
    Parse(String),
    #[error("Validation error:\n{0}")]
    Validation(String),
    #[error("Unsupported binding `{name}`: {reason}")]
    UnsupportedBinding { name: String, reason: String },
    #[error("Missing {stage:?} entry point `{name}`")]
    MissingEntryPoint { name: String, stage: ShaderStage },
    #[error("Backend rejected program: {0}")]
    Backend(String),
}

/// One named value inside a uniform block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterDesc {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    /// Array length, 1 for non-arrays
    pub count: u32,
}

/// Reflected layout of a uniform block.
///
/// Two layouts are equal when name, size and the full ordered parameter table
/// match, which is what the constant buffer pool deduplicates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantBufferLayout {
    pub name: String,
    pub size: u32,
    pub parameters: Vec<ParameterDesc>,
}

impl ConstantBufferLayout {
    /// Bytes to allocate, rounded up to 16
    pub fn allocation_size(&self) -> u64 {
        (self.size as u64).div_ceil(16).max(1) * 16
    }

    pub fn parameter(&self, name: &str) -> Option<(usize, &ParameterDesc)> {
        self.parameters.iter().enumerate().find(|(_, p)| p.name == name)
    }
}

/// A uniform block and the group-0 binding it is declared at
#[derive(Debug, Clone)]
pub struct ReflectedConstantBuffer {
    pub binding: u32,
    pub layout: ConstantBufferLayout,
}

/// Constant buffers referenced by one entry point
#[derive(Debug, Clone)]
pub struct StageUsage {
    pub stage: ShaderStage,
    /// Indices into [`ShaderReflection::constant_buffers`]
    pub constant_buffers: Vec<usize>,
}

/// Everything reflected from one program
#[derive(Debug, Clone)]
pub struct ShaderReflection {
    pub constant_buffers: Vec<ReflectedConstantBuffer>,
    pub bindings: Vec<ShaderBinding>,
    pub stages: Vec<StageUsage>,
    pub workgroup_size: Option<[u32; 3]>,
}

/// Parse, validate and reflect a WGSL program.
pub fn reflect(source: &str, entry_points: &ShaderEntryPoints) -> Result<ShaderReflection, ShaderError> {
    let module =
        naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse(e.emit_to_string(source)))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| ShaderError::Validation(e.emit_to_string(source)))?;

    let wanted: Vec<(&str, ShaderStage)> = match entry_points {
        ShaderEntryPoints::Render { vertex, fragment } => {
            let mut wanted = vec![(vertex.as_str(), ShaderStage::Vertex)];
            if let Some(fragment) = fragment {
                wanted.push((fragment.as_str(), ShaderStage::Fragment));
            }
            wanted
        }
        ShaderEntryPoints::Compute { entry, .. } => vec![(entry.as_str(), ShaderStage::Compute)],
    };

    let mut entry_indices = Vec::with_capacity(wanted.len());
    for (name, stage) in wanted {
        let index = module
            .entry_points
            .iter()
            .position(|ep| ep.name == name && naga_stage(ep.stage) == stage)
            .ok_or_else(|| ShaderError::MissingEntryPoint {
                name: name.to_string(),
                stage,
            })?;
        entry_indices.push((index, stage));
    }

    let mut constant_buffers = Vec::new();
    let mut uniform_globals = Vec::new();
    let mut bindings = Vec::new();

    for (handle, var) in module.global_variables.iter() {
        let Some(resource) = &var.binding else {
            continue;
        };
        let name = var.name.clone().unwrap_or_default();
        let unsupported = |reason: &str| ShaderError::UnsupportedBinding {
            name: name.clone(),
            reason: reason.to_string(),
        };
        let (group, binding) = (resource.group, resource.binding);

        match var.space {
            AddressSpace::Uniform => {
                if group != UNIFORM_GROUP {
                    return Err(unsupported("uniform blocks belong in group 0"));
                }
                let layout = uniform_layout(&module, var.ty, &name);
                bindings.push(ShaderBinding::Uniform {
                    binding,
                    size: layout.allocation_size(),
                });
                constant_buffers.push(ReflectedConstantBuffer { binding, layout });
                uniform_globals.push(handle);
            }
            AddressSpace::Storage { access } => {
                if group != STORAGE_GROUP || binding >= STORAGE_TEXTURE_BINDING_BASE {
                    return Err(unsupported("structured buffers belong in group 3, bindings 0..8"));
                }
                bindings.push(ShaderBinding::StructuredBuffer {
                    slot: binding,
                    read_only: !access.contains(naga::StorageAccess::STORE),
                });
            }
            AddressSpace::Handle => match &module.types[var.ty].inner {
                TypeInner::Image {
                    dim,
                    arrayed,
                    class,
                } => {
                    if *dim != ImageDimension::D2 || *arrayed {
                        return Err(unsupported("only non-arrayed 2D images are supported"));
                    }
                    match class {
                        ImageClass::Sampled { kind, multi } => {
                            check_texture_slot(group, binding).map_err(|r| unsupported(r))?;
                            bindings.push(ShaderBinding::Texture {
                                slot: binding,
                                kind: match kind {
                                    ScalarKind::Uint => TextureSampleKind::Uint,
                                    ScalarKind::Sint => TextureSampleKind::Sint,
                                    _ => TextureSampleKind::Float,
                                },
                                multisampled: *multi,
                            });
                        }
                        ImageClass::Depth { multi } => {
                            check_texture_slot(group, binding).map_err(|r| unsupported(r))?;
                            bindings.push(ShaderBinding::Texture {
                                slot: binding,
                                kind: TextureSampleKind::Depth,
                                multisampled: *multi,
                            });
                        }
                        ImageClass::Storage { format, .. } => {
                            if group != STORAGE_GROUP
                                || binding < STORAGE_TEXTURE_BINDING_BASE
                                || binding >= STORAGE_TEXTURE_BINDING_BASE + MAX_UAV_SLOTS as u32
                            {
                                return Err(unsupported("storage textures belong in group 3, bindings 8..12"));
                            }
                            let format = storage_format(*format)
                                .ok_or_else(|| unsupported("storage format"))?;
                            bindings.push(ShaderBinding::StorageTexture {
                                slot: binding - STORAGE_TEXTURE_BINDING_BASE,
                                format,
                            });
                        }
                    }
                }
                TypeInner::Sampler { comparison } => {
                    if group != SAMPLER_GROUP || binding as usize >= MAX_TEXTURE_SLOTS {
                        return Err(unsupported("samplers belong in group 2, bindings 0..8"));
                    }
                    bindings.push(ShaderBinding::Sampler {
                        slot: binding,
                        comparison: *comparison,
                    });
                }
                _ => return Err(unsupported("unknown handle type")),
            },
            _ => return Err(unsupported("address space")),
        }
    }

    let stages = entry_indices
        .iter()
        .map(|(index, stage)| {
            let function = info.get_entry_point(*index);
            StageUsage {
                stage: *stage,
                constant_buffers: uniform_globals
                    .iter()
                    .enumerate()
                    .filter(|(_, global)| !function[**global].is_empty())
                    .map(|(i, _)| i)
                    .collect(),
            }
        })
        .collect();

    let workgroup_size = match entry_points {
        ShaderEntryPoints::Compute { .. } => entry_indices
            .first()
            .map(|(index, _)| module.entry_points[*index].workgroup_size),
        ShaderEntryPoints::Render { .. } => None,
    };

    Ok(ShaderReflection {
        constant_buffers,
        bindings,
        stages,
        workgroup_size,
    })
}

fn check_texture_slot(group: u32, binding: u32) -> Result<(), &'static str> {
    if group != TEXTURE_GROUP || binding as usize >= MAX_TEXTURE_SLOTS {
        return Err("sampled textures belong in group 1, bindings 0..8");
    }
    Ok(())
}

fn naga_stage(stage: naga::ShaderStage) -> ShaderStage {
    match stage {
        naga::ShaderStage::Vertex => ShaderStage::Vertex,
        naga::ShaderStage::Fragment => ShaderStage::Fragment,
        naga::ShaderStage::Compute => ShaderStage::Compute,
    }
}

fn storage_format(format: naga::StorageFormat) -> Option<TextureFormat> {
    match format {
        naga::StorageFormat::Rgba8Unorm => Some(TextureFormat::Rgba8Unorm),
        naga::StorageFormat::Rgba16Float => Some(TextureFormat::Rgba16Float),
        naga::StorageFormat::Rgba32Float => Some(TextureFormat::Rgba32Float),
        naga::StorageFormat::Rg16Float => Some(TextureFormat::Rg16Float),
        naga::StorageFormat::R32Float => Some(TextureFormat::R32Float),
        _ => None,
    }
}

fn uniform_layout(module: &Module, ty: Handle<naga::Type>, var_name: &str) -> ConstantBufferLayout {
    let gctx = module.to_ctx();
    let declared = &module.types[ty];
    let mut parameters = Vec::new();
    let name = match &declared.inner {
        TypeInner::Struct { .. } => {
            flatten(module, ty, "", 0, &mut parameters);
            declared.name.clone().unwrap_or_else(|| var_name.to_string())
        }
        _ => {
            flatten(module, ty, var_name, 0, &mut parameters);
            var_name.to_string()
        }
    };
    ConstantBufferLayout {
        name,
        size: declared.inner.size(gctx),
        parameters,
    }
}

fn flatten(module: &Module, ty: Handle<naga::Type>, prefix: &str, base: u32, out: &mut Vec<ParameterDesc>) {
    let inner = &module.types[ty].inner;
    match inner {
        TypeInner::Struct { members, .. } => {
            for member in members {
                let Some(name) = &member.name else {
                    continue;
                };
                let full = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                flatten(module, member.ty, &full, base + member.offset, out);
            }
        }
        _ => {
            let count = match inner {
                TypeInner::Array {
                    size: naga::ArraySize::Constant(n),
                    ..
                } => n.get(),
                _ => 1,
            };
            out.push(ParameterDesc {
                name: prefix.to_string(),
                offset: base,
                size: inner.size(module.to_ctx()),
                count,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = r#"
struct Inner {
    scale: f32,
    bias: f32,
}

struct Params {
    color: vec4<f32>,
    transform: mat4x4<f32>,
    inner: Inner,
    weights: array<vec4<f32>, 4>,
}

struct Other {
    value: vec4<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<uniform> other: Other;
@group(1) @binding(0) var albedo: texture_2d<f32>;
@group(1) @binding(1) var depth: texture_depth_2d;
@group(2) @binding(0) var albedo_sampler: sampler;
@group(3) @binding(0) var<storage, read> items: array<vec4<f32>>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return params.transform * vec4<f32>(f32(index), 0.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let d = textureLoad(depth, vec2<i32>(position.xy), 0);
    return textureSample(albedo, albedo_sampler, position.xy) * other.value * items[0] * d;
}
"#;

    fn render_entries() -> ShaderEntryPoints {
        ShaderEntryPoints::Render {
            vertex: "vs_main".into(),
            fragment: Some("fs_main".into()),
        }
    }

    #[test]
    fn flattens_nested_members_with_dotted_names() {
        let reflection = reflect(PROGRAM, &render_entries()).unwrap();
        let layout = &reflection.constant_buffers[0].layout;
        assert_eq!(layout.name, "Params");
        let names: Vec<&str> = layout.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["color", "transform", "inner.scale", "inner.bias", "weights"]);

        let (_, scale) = layout.parameter("inner.scale").unwrap();
        assert_eq!(scale.offset, 80);
        assert_eq!(scale.size, 4);
        let (_, weights) = layout.parameter("weights").unwrap();
        assert_eq!(weights.count, 4);
        assert_eq!(weights.size, 64);
        assert_eq!(layout.allocation_size() % 16, 0);
    }

    #[test]
    fn stage_usage_follows_entry_points() {
        let reflection = reflect(PROGRAM, &render_entries()).unwrap();
        let vertex = &reflection.stages[0];
        let fragment = &reflection.stages[1];
        assert_eq!(vertex.stage, ShaderStage::Vertex);
        assert_eq!(vertex.constant_buffers, vec![0]);
        assert_eq!(fragment.constant_buffers, vec![1]);
    }

    #[test]
    fn collects_resource_bindings() {
        let reflection = reflect(PROGRAM, &render_entries()).unwrap();
        assert!(reflection.bindings.contains(&ShaderBinding::Texture {
            slot: 1,
            kind: TextureSampleKind::Depth,
            multisampled: false,
        }));
        assert!(reflection.bindings.contains(&ShaderBinding::Sampler {
            slot: 0,
            comparison: false,
        }));
        assert!(reflection.bindings.contains(&ShaderBinding::StructuredBuffer {
            slot: 0,
            read_only: true,
        }));
    }

    #[test]
    fn missing_entry_point_is_reported() {
        let entries = ShaderEntryPoints::Render {
            vertex: "nope".into(),
            fragment: None,
        };
        assert!(matches!(
            reflect(PROGRAM, &entries),
            Err(ShaderError::MissingEntryPoint { .. })
        ));
    }

    #[test]
    fn parse_errors_carry_the_message() {
        let err = reflect("fn broken( {", &render_entries()).unwrap_err();
        assert!(matches!(err, ShaderError::Parse(_)));
    }

    #[test]
    fn uniforms_outside_group_zero_are_rejected() {
        let source = r#"
struct P { v: vec4<f32> }
@group(1) @binding(0) var<uniform> p: P;
@compute @workgroup_size(8, 8, 1)
fn main() { _ = p.v; }
"#;
        let entries = ShaderEntryPoints::Compute {
            entry: "main".into(),
            workgroup_size: [8, 8, 1],
        };
        assert!(matches!(
            reflect(source, &entries),
            Err(ShaderError::UnsupportedBinding { .. })
        ));
    }

    #[test]
    fn compute_workgroup_size_is_reflected() {
        let source = r#"
@group(3) @binding(8) var output: texture_storage_2d<rgba32float, write>;
@compute @workgroup_size(8, 4, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    textureStore(output, vec2<i32>(id.xy), vec4<f32>(1.0));
}
"#;
        let entries = ShaderEntryPoints::Compute {
            entry: "main".into(),
            workgroup_size: [1, 1, 1],
        };
        let reflection = reflect(source, &entries).unwrap();
        assert_eq!(reflection.workgroup_size, Some([8, 4, 1]));
        assert_eq!(
            reflection.bindings,
            vec![ShaderBinding::StorageTexture {
                slot: 0,
                format: TextureFormat::Rgba32Float,
            }]
        );
    }
}
