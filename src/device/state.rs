//! Pipeline state tracking
//!
//! The device mirrors everything bound on the backend in a [`PipelineState`]
//! and only forwards a bind when the requested value differs from the mirror.
//! State objects are memoized per descriptor in a [`StateCache`].

use rustc_hash::FxHashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::device::RenderDevice;
use crate::resources::{Mesh, MeshId, StructuredBuffer};
use crate::shader::ShaderId;

/// Bound color and depth targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargets {
    pub colors: Vec<TextureHandle>,
    pub depth: Option<TextureHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoundMesh {
    id: MeshId,
    binding: MeshBinding,
}

/// Snapshot of everything bound on the device
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub blend: BlendDesc,
    pub depth: DepthDesc,
    pub raster: RasterDesc,
    pub shader: Option<ShaderId>,
    pub(crate) mesh: Option<BoundMesh>,
    pub targets: Option<RenderTargets>,
    pub viewport: Option<Viewport>,
    pub textures: [Option<TextureHandle>; MAX_TEXTURE_SLOTS],
    pub uavs: [Option<TextureHandle>; MAX_UAV_SLOTS],
    pub structured_buffers: [Option<BufferHandle>; MAX_STRUCTURED_BUFFER_SLOTS],
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            blend: BlendDesc::OPAQUE,
            depth: DepthDesc::default(),
            raster: RasterDesc::default(),
            shader: None,
            mesh: None,
            targets: None,
            viewport: None,
            textures: [None; MAX_TEXTURE_SLOTS],
            uavs: [None; MAX_UAV_SLOTS],
            structured_buffers: [None; MAX_STRUCTURED_BUFFER_SLOTS],
        }
    }
}

impl PipelineState {
    pub fn mesh_id(&self) -> Option<MeshId> {
        self.mesh.as_ref().map(|m| m.id)
    }

    /// Forget a destroyed texture wherever it is tracked.
    pub(crate) fn forget_texture(&mut self, texture: TextureHandle) {
        for slot in self.textures.iter_mut().chain(self.uavs.iter_mut()) {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
        if let Some(targets) = &self.targets {
            if targets.colors.contains(&texture) || targets.depth == Some(texture) {
                self.targets = None;
            }
        }
    }

    pub(crate) fn forget_buffer(&mut self, buffer: BufferHandle) {
        for slot in self.structured_buffers.iter_mut() {
            if *slot == Some(buffer) {
                *slot = None;
            }
        }
        let mesh_uses = self.mesh.as_ref().is_some_and(|m| {
            m.binding.vertex_buffer == buffer
                || m.binding.index_buffer.map(|(b, _)| b) == Some(buffer)
        });
        if mesh_uses {
            self.mesh = None;
        }
    }
}

/// State objects memoized by descriptor
#[derive(Debug, Default)]
pub struct StateCache {
    blend: FxHashMap<BlendDesc, BlendStateHandle>,
    depth: FxHashMap<DepthDesc, DepthStateHandle>,
    raster: FxHashMap<RasterDesc, RasterStateHandle>,
}

impl StateCache {
    pub fn blend(&mut self, backend: &mut dyn GraphicsBackend, desc: BlendDesc) -> BlendStateHandle {
        *self
            .blend
            .entry(desc)
            .or_insert_with(|| backend.create_blend_state(&desc))
    }

    pub fn depth(&mut self, backend: &mut dyn GraphicsBackend, desc: DepthDesc) -> DepthStateHandle {
        *self
            .depth
            .entry(desc)
            .or_insert_with(|| backend.create_depth_state(&desc))
    }

    pub fn raster(&mut self, backend: &mut dyn GraphicsBackend, desc: RasterDesc) -> RasterStateHandle {
        *self
            .raster
            .entry(desc)
            .or_insert_with(|| backend.create_raster_state(&desc))
    }

    pub fn len(&self) -> usize {
        self.blend.len() + self.depth.len() + self.raster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RenderDevice {
    /// Bind the default blend, depth and raster states so the mirror matches the backend.
    pub(crate) fn bind_initial_states(&mut self) {
        let defaults = PipelineState::default();
        let blend = self.state_cache.blend(self.backend.as_mut(), defaults.blend);
        self.backend.bind_blend_state(blend);
        let depth = self.state_cache.depth(self.backend.as_mut(), defaults.depth);
        self.backend.bind_depth_state(depth);
        let raster = self.state_cache.raster(self.backend.as_mut(), defaults.raster);
        self.backend.bind_raster_state(raster);
        self.state = defaults;
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn set_blend(&mut self, desc: BlendDesc) {
        if self.state.blend == desc {
            return;
        }
        let handle = self.state_cache.blend(self.backend.as_mut(), desc);
        self.backend.bind_blend_state(handle);
        self.state.blend = desc;
    }

    pub fn set_blend_state(&mut self, src: BlendFactor, dst: BlendFactor) {
        self.set_blend(BlendDesc { src, dst });
    }

    pub fn set_depth_state(&mut self, desc: DepthDesc) {
        if self.state.depth == desc {
            return;
        }
        let handle = self.state_cache.depth(self.backend.as_mut(), desc);
        self.backend.bind_depth_state(handle);
        self.state.depth = desc;
    }

    pub fn set_depth_test(&mut self, enabled: bool) {
        self.set_depth_state(DepthDesc {
            test: enabled,
            ..self.state.depth
        });
    }

    pub fn set_depth_write(&mut self, enabled: bool) {
        self.set_depth_state(DepthDesc {
            write: enabled,
            ..self.state.depth
        });
    }

    pub fn set_depth_func(&mut self, func: CompareFunction) {
        self.set_depth_state(DepthDesc {
            func,
            ..self.state.depth
        });
    }

    pub fn set_raster_state(&mut self, desc: RasterDesc) {
        if self.state.raster == desc {
            return;
        }
        let handle = self.state_cache.raster(self.backend.as_mut(), desc);
        self.backend.bind_raster_state(handle);
        self.state.raster = desc;
    }

    pub fn set_culling_mode(&mut self, cull: CullMode) {
        self.set_raster_state(RasterDesc {
            cull,
            ..self.state.raster
        });
    }

    pub fn set_filling_mode(&mut self, fill: FillMode) {
        self.set_raster_state(RasterDesc {
            fill,
            ..self.state.raster
        });
    }

    /// Bind sampled textures to slots `0..textures.len()`; the remaining slots are cleared.
    pub fn bind_textures(&mut self, textures: &[Option<TextureHandle>]) {
        let mut slots = [None; MAX_TEXTURE_SLOTS];
        for (slot, texture) in slots.iter_mut().zip(textures) {
            *slot = *texture;
        }
        if textures.len() > MAX_TEXTURE_SLOTS {
            log::warn!("bind_textures: {} textures, only {} slots", textures.len(), MAX_TEXTURE_SLOTS);
        }
        if self.state.textures == slots {
            return;
        }
        self.backend.bind_textures(&slots);
        self.state.textures = slots;
    }

    /// Bind storage textures to slots `0..textures.len()`; the remaining slots are cleared.
    pub fn bind_unordered_access_textures(&mut self, textures: &[Option<TextureHandle>]) {
        let mut slots = [None; MAX_UAV_SLOTS];
        for (slot, texture) in slots.iter_mut().zip(textures) {
            *slot = *texture;
        }
        if self.state.uavs == slots {
            return;
        }
        self.backend.bind_unordered_access(&slots);
        self.state.uavs = slots;
    }

    pub fn bind_structured_buffer(&mut self, slot: usize, buffer: Option<&StructuredBuffer>) {
        self.bind_structured_buffer_handle(slot, buffer.map(StructuredBuffer::handle));
    }

    pub(crate) fn bind_structured_buffer_handle(&mut self, slot: usize, buffer: Option<BufferHandle>) {
        if slot >= MAX_STRUCTURED_BUFFER_SLOTS {
            log::warn!("Structured buffer slot {} out of range", slot);
            return;
        }
        let mut slots = self.state.structured_buffers;
        slots[slot] = buffer;
        self.apply_structured_buffers(slots);
    }

    fn apply_structured_buffers(&mut self, slots: [Option<BufferHandle>; MAX_STRUCTURED_BUFFER_SLOTS]) {
        if self.state.structured_buffers == slots {
            return;
        }
        self.backend.bind_structured_buffers(&slots);
        self.state.structured_buffers = slots;
    }

    pub fn set_mesh(&mut self, mesh: Option<&Mesh>) {
        self.apply_mesh(mesh.map(|m| BoundMesh {
            id: m.id(),
            binding: m.binding().clone(),
        }));
    }

    fn apply_mesh(&mut self, mesh: Option<BoundMesh>) {
        if self.state.mesh.as_ref().map(|m| m.id) == mesh.as_ref().map(|m| m.id) {
            return;
        }
        self.backend.bind_mesh(mesh.as_ref().map(|m| &m.binding));
        self.state.mesh = mesh;
    }

    /// Bind a program and its pooled constant buffers.
    pub fn set_shader(&mut self, shader: Option<ShaderId>) {
        let shader = shader.filter(|id| {
            let known = self.shaders.contains_key(*id);
            if !known {
                log::warn!("set_shader: unknown shader");
            }
            known
        });
        if self.state.shader == shader {
            return;
        }
        match shader.and_then(|id| self.shaders.get(id)) {
            Some(program) => {
                self.backend.bind_shader(Some(program.handle()));
                let buffers = program.buffer_bindings(&self.constant_buffers);
                self.backend.bind_constant_buffers(&buffers);
            }
            None => self.backend.bind_shader(None),
        }
        self.state.shader = shader;
    }

    pub fn set_render_targets(&mut self, colors: &[TextureHandle], depth: Option<TextureHandle>) {
        if colors.len() > MAX_COLOR_TARGETS {
            log::warn!("set_render_targets: {} color targets, max {}", colors.len(), MAX_COLOR_TARGETS);
        }
        let targets = RenderTargets {
            colors: colors.iter().take(MAX_COLOR_TARGETS).copied().collect(),
            depth,
        };
        if self.state.targets.as_ref() == Some(&targets) {
            return;
        }
        self.backend.set_render_targets(&targets.colors, targets.depth);
        self.state.targets = Some(targets);
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.state.viewport == Some(viewport) {
            return;
        }
        self.backend.set_viewport(viewport);
        self.state.viewport = Some(viewport);
    }

    /// Save the whole pipeline state.
    pub fn push_states(&mut self) {
        self.state_stack.push(self.state.clone());
    }

    /// Restore the last saved state through the diffing setters.
    pub fn pop_states(&mut self) {
        let Some(saved) = self.state_stack.pop() else {
            log::warn!("pop_states called with an empty state stack");
            return;
        };
        self.set_blend(saved.blend);
        self.set_depth_state(saved.depth);
        self.set_raster_state(saved.raster);
        self.set_shader(saved.shader);
        self.apply_mesh(saved.mesh);
        if let Some(targets) = saved.targets {
            self.set_render_targets(&targets.colors, targets.depth);
        }
        if let Some(viewport) = saved.viewport {
            self.set_viewport(viewport);
        }
        self.bind_textures(&saved.textures);
        self.bind_unordered_access_textures(&saved.uavs);
        self.apply_structured_buffers(saved.structured_buffers);
    }

    pub fn state_stack_depth(&self) -> usize {
        self.state_stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forgetting_a_texture_clears_slots_and_targets() {
        let mut state = PipelineState::default();
        state.textures[2] = Some(TextureHandle(5));
        state.targets = Some(RenderTargets {
            colors: vec![TextureHandle(5)],
            depth: None,
        });
        state.forget_texture(TextureHandle(5));
        assert_eq!(state.textures[2], None);
        assert!(state.targets.is_none());
    }

    #[test]
    fn state_cache_memoizes_by_descriptor() {
        let mut backend = crate::backend::NullBackend::new(1, 1);
        let mut cache = StateCache::default();
        let a = cache.blend(&mut backend, BlendDesc::ADDITIVE);
        let b = cache.blend(&mut backend, BlendDesc::ADDITIVE);
        let c = cache.blend(&mut backend, BlendDesc::ALPHA);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(backend.counters().lock().blend_states_created, 2);
    }
}
