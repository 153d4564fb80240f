//! Shader programs and the parameter system
//!
//! Programs are reflected on creation. Every uniform block is matched against
//! the [`ConstantBufferPool`], and each named parameter resolves to a slot in a
//! pooled buffer's CPU shadow. `set_*` calls write the shadow; the bound
//! program's dirty buffers are uploaded by [`RenderDevice::flush_parameters`],
//! which the draw and dispatch calls run first.

pub mod constant_buffers;
pub mod reflection;

use std::path::Path;

use bytemuck::Pod;
use glam::{Mat4, Vec2, Vec3, Vec4};
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::new_key_type;

use crate::backend::traits::{BufferHandle, ShaderHandle};
use crate::backend::types::*;
use crate::device::RenderDevice;
pub use constant_buffers::ConstantBufferPool;
pub use reflection::{ConstantBufferLayout, ParameterDesc, ShaderError, ShaderReflection};

new_key_type! {
    /// Id of a shader program owned by a [`RenderDevice`]
    pub struct ShaderId;
}

#[derive(Debug, Clone, Copy)]
struct ParameterSlot {
    pool_index: usize,
    offset: u32,
    size: u32,
}

/// A compiled program plus what reflection found in it
#[derive(Debug)]
pub struct ShaderProgram {
    label: String,
    handle: ShaderHandle,
    workgroup_size: Option<[u32; 3]>,
    /// (group 0 binding, pool index)
    constant_buffers: Vec<(u32, usize)>,
    /// Pool indices referenced by at least one entry point
    used_buffers: Vec<usize>,
    parameters: FxHashMap<String, ParameterSlot>,
    bindings: Vec<ShaderBinding>,
    warned: FxHashSet<String>,
}

impl ShaderProgram {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handle(&self) -> ShaderHandle {
        self.handle
    }

    pub fn is_compute(&self) -> bool {
        self.workgroup_size.is_some()
    }

    pub fn workgroup_size(&self) -> Option<[u32; 3]> {
        self.workgroup_size
    }

    pub fn bindings(&self) -> &[ShaderBinding] {
        &self.bindings
    }

    /// Pool indices of the constant buffers this program declares
    pub fn constant_buffer_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.constant_buffers.iter().map(|(_, index)| *index)
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub(crate) fn buffer_bindings(&self, pool: &ConstantBufferPool) -> Vec<(u32, BufferHandle)> {
        self.constant_buffers
            .iter()
            .filter_map(|(binding, index)| pool.buffer(*index).map(|buffer| (*binding, buffer)))
            .collect()
    }
}

impl RenderDevice {
    /// Create a vertex + fragment program. A `None` fragment entry makes a depth-only program.
    pub fn create_shader(
        &mut self,
        label: &str,
        source: &str,
        vertex_entry: &str,
        fragment_entry: Option<&str>,
    ) -> Option<ShaderId> {
        self.create_program(
            label,
            source,
            ShaderEntryPoints::Render {
                vertex: vertex_entry.to_string(),
                fragment: fragment_entry.map(str::to_string),
            },
        )
    }

    pub fn create_compute_shader(&mut self, label: &str, source: &str, entry: &str) -> Option<ShaderId> {
        self.create_program(
            label,
            source,
            ShaderEntryPoints::Compute {
                entry: entry.to_string(),
                workgroup_size: [1, 1, 1],
            },
        )
    }

    fn create_program(
        &mut self,
        label: &str,
        source: &str,
        entry_points: ShaderEntryPoints,
    ) -> Option<ShaderId> {
        let reflection = match reflection::reflect(source, &entry_points) {
            Ok(reflection) => reflection,
            Err(e) => {
                self.report_shader_failure(label, source, &e);
                return None;
            }
        };

        let mut constant_buffers = Vec::with_capacity(reflection.constant_buffers.len());
        for cb in &reflection.constant_buffers {
            match self
                .constant_buffers
                .find_or_create(self.backend.as_mut(), &cb.layout)
            {
                Ok(index) => constant_buffers.push((cb.binding, index)),
                Err(e) => {
                    log::error!("Shader `{}`: constant buffer `{}`: {}", label, cb.layout.name, e);
                    return None;
                }
            }
        }

        let entry_points = match entry_points {
            ShaderEntryPoints::Compute { entry, .. } => ShaderEntryPoints::Compute {
                entry,
                workgroup_size: reflection.workgroup_size.unwrap_or([1, 1, 1]),
            },
            render => render,
        };
        let handle = match self.backend.create_shader(&ShaderProgramDescriptor {
            label: Some(label.to_string()),
            source: source.to_string(),
            entry_points,
            bindings: reflection.bindings.clone(),
        }) {
            Ok(handle) => handle,
            Err(e) => {
                self.report_shader_failure(label, source, &ShaderError::Backend(e.to_string()));
                return None;
            }
        };

        let mut parameters = FxHashMap::default();
        for (_, pool_index) in &constant_buffers {
            let Some(layout) = self.constant_buffers.layout(*pool_index) else {
                continue;
            };
            for param in &layout.parameters {
                parameters.entry(param.name.clone()).or_insert(ParameterSlot {
                    pool_index: *pool_index,
                    offset: param.offset,
                    size: param.size,
                });
            }
        }

        let mut used_buffers: Vec<usize> = reflection
            .stages
            .iter()
            .flat_map(|stage| stage.constant_buffers.iter())
            .filter_map(|i| constant_buffers.get(*i).map(|(_, index)| *index))
            .collect();
        used_buffers.sort_unstable();
        used_buffers.dedup();

        log::debug!(
            "Created shader `{}` ({} constant buffers, {} bindings)",
            label,
            constant_buffers.len(),
            reflection.bindings.len()
        );

        Some(self.shaders.insert(ShaderProgram {
            label: label.to_string(),
            handle,
            workgroup_size: reflection.workgroup_size,
            constant_buffers,
            used_buffers,
            parameters,
            bindings: reflection.bindings,
            warned: FxHashSet::default(),
        }))
    }

    fn report_shader_failure(&self, label: &str, source: &str, error: &ShaderError) {
        log::error!("Failed to create shader `{}`: {}", label, error);
        if let Some(dir) = &self.config.shader_dump_dir {
            dump_failed_source(dir, label, source, error);
        }
    }

    pub fn destroy_shader(&mut self, shader: ShaderId) {
        if self.state.shader == Some(shader) {
            self.set_shader(None);
        }
        if let Some(program) = self.shaders.remove(shader) {
            self.backend.destroy_shader(program.handle);
        }
    }

    pub fn shader(&self, shader: ShaderId) -> Option<&ShaderProgram> {
        self.shaders.get(shader)
    }

    /// Write raw parameter bytes. Returns whether the shadow changed.
    ///
    /// Unknown names are reported once per program and ignored.
    pub fn set_parameter_bytes(&mut self, shader: ShaderId, name: &str, bytes: &[u8]) -> bool {
        let Some(program) = self.shaders.get_mut(shader) else {
            log::warn!("set_parameter `{}` on a destroyed shader", name);
            return false;
        };
        let Some(slot) = program.parameters.get(name).copied() else {
            if program.warned.insert(name.to_string()) {
                log::warn!("Shader `{}` has no parameter `{}`", program.label, name);
            }
            return false;
        };
        let len = bytes.len().min(slot.size as usize);
        self.constant_buffers
            .write(slot.pool_index, slot.offset as usize, &bytes[..len])
    }

    pub fn set_parameter<T: Pod>(&mut self, shader: ShaderId, name: &str, value: &T) -> bool {
        self.set_parameter_bytes(shader, name, bytemuck::bytes_of(value))
    }

    /// Write an array parameter starting at element 0.
    pub fn set_parameter_slice<T: Pod>(&mut self, shader: ShaderId, name: &str, values: &[T]) -> bool {
        self.set_parameter_bytes(shader, name, bytemuck::cast_slice(values))
    }

    pub fn set_f32(&mut self, shader: ShaderId, name: &str, value: f32) -> bool {
        self.set_parameter(shader, name, &value)
    }

    pub fn set_u32(&mut self, shader: ShaderId, name: &str, value: u32) -> bool {
        self.set_parameter(shader, name, &value)
    }

    pub fn set_vec2(&mut self, shader: ShaderId, name: &str, value: Vec2) -> bool {
        self.set_parameter(shader, name, &value)
    }

    pub fn set_vec3(&mut self, shader: ShaderId, name: &str, value: Vec3) -> bool {
        self.set_parameter(shader, name, &value)
    }

    pub fn set_vec4(&mut self, shader: ShaderId, name: &str, value: Vec4) -> bool {
        self.set_parameter(shader, name, &value)
    }

    pub fn set_mat4(&mut self, shader: ShaderId, name: &str, value: Mat4) -> bool {
        self.set_parameter(shader, name, &value)
    }

    /// Upload the bound program's dirty constant buffers. Returns the upload count.
    pub fn flush_parameters(&mut self) -> usize {
        let Some(program) = self.state.shader.and_then(|id| self.shaders.get(id)) else {
            return 0;
        };
        self.constant_buffers
            .flush(self.backend.as_mut(), &program.used_buffers)
    }
}

fn dump_failed_source(dir: &Path, label: &str, source: &str, error: &ShaderError) {
    let file_name: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{file_name}.wgsl"));
    let mut contents = String::new();
    for line in error.to_string().lines() {
        contents.push_str("// ");
        contents.push_str(line);
        contents.push('\n');
    }
    contents.push_str(source);

    match std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, contents)) {
        Ok(()) => log::error!("Failing shader source written to {}", path.display()),
        Err(e) => log::warn!("Could not write failing shader to {}: {}", path.display(), e),
    }
}
