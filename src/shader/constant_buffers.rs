//! Constant buffer pool
//!
//! Programs declaring the same uniform block layout share one pooled buffer
//! with one CPU shadow copy. Writes only touch the shadow and mark the entry
//! dirty; uploads happen on flush.

use crate::backend::traits::{BackendResult, BufferHandle, GraphicsBackend};
use crate::shader::reflection::ConstantBufferLayout;

#[derive(Debug)]
struct ConstantBufferEntry {
    layout: ConstantBufferLayout,
    buffer: BufferHandle,
    shadow: Vec<u8>,
    dirty: bool,
}

/// Pool of constant buffers deduplicated by reflected layout
#[derive(Debug, Default)]
pub struct ConstantBufferPool {
    entries: Vec<ConstantBufferEntry>,
}

impl ConstantBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the entry with exactly this layout, creating one if needed.
    pub fn find_or_create(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        layout: &ConstantBufferLayout,
    ) -> BackendResult<usize> {
        if let Some(index) = self.entries.iter().position(|e| e.layout == *layout) {
            return Ok(index);
        }
        let size = layout.allocation_size();
        let buffer = backend.create_constant_buffer(size)?;
        log::debug!(
            "New constant buffer `{}` ({} bytes, {} parameters)",
            layout.name,
            size,
            layout.parameters.len()
        );
        self.entries.push(ConstantBufferEntry {
            layout: layout.clone(),
            buffer,
            shadow: vec![0; size as usize],
            dirty: true,
        });
        Ok(self.entries.len() - 1)
    }

    pub fn buffer(&self, index: usize) -> Option<BufferHandle> {
        self.entries.get(index).map(|e| e.buffer)
    }

    pub fn layout(&self, index: usize) -> Option<&ConstantBufferLayout> {
        self.entries.get(index).map(|e| &e.layout)
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.entries.get(index).is_some_and(|e| e.dirty)
    }

    /// Write `bytes` into the shadow at `offset`. Returns whether anything changed.
    pub fn write(&mut self, index: usize, offset: usize, bytes: &[u8]) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        let end = (offset + bytes.len()).min(entry.shadow.len());
        if offset >= end {
            return false;
        }
        let bytes = &bytes[..end - offset];
        let destination = &mut entry.shadow[offset..end];
        if destination == bytes {
            return false;
        }
        destination.copy_from_slice(bytes);
        entry.dirty = true;
        true
    }

    /// Upload the dirty entries among `indices`, each at most once. Returns the upload count.
    pub fn flush(&mut self, backend: &mut dyn GraphicsBackend, indices: &[usize]) -> usize {
        let mut uploads = 0;
        for &index in indices {
            let Some(entry) = self.entries.get_mut(index) else {
                continue;
            };
            if !entry.dirty {
                continue;
            }
            backend.upload_constant_buffer(entry.buffer, &entry.shadow);
            entry.dirty = false;
            uploads += 1;
        }
        uploads
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
