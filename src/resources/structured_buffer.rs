//! Structured (storage) buffers

use crate::backend::traits::BufferHandle;
use crate::resources::{Release, ReleaseQueue};

/// Number of buffers in a frame ring
pub const STRUCTURED_BUFFER_RING: usize = 3;

/// A GPU array of fixed-size records.
///
/// Writes larger than the current capacity reallocate; smaller writes reuse
/// the allocation. A ringed buffer cycles through three allocations so a write
/// never lands in the buffer the previous two frames may still be reading.
#[derive(Debug)]
pub struct StructuredBuffer {
    label: String,
    element_size: u64,
    capacity: u64,
    len: u64,
    buffers: Vec<BufferHandle>,
    current: usize,
    reallocations: u32,
    releases: ReleaseQueue,
}

impl StructuredBuffer {
    pub(crate) fn new(
        label: String,
        element_size: u64,
        capacity: u64,
        buffers: Vec<BufferHandle>,
        releases: ReleaseQueue,
    ) -> Self {
        Self {
            label,
            element_size,
            capacity,
            len: 0,
            buffers,
            current: 0,
            reallocations: 0,
            releases,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Buffer holding the most recent write
    pub fn handle(&self) -> BufferHandle {
        self.buffers[self.current]
    }

    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    /// Capacity in elements
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of elements written last
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_ringed(&self) -> bool {
        self.buffers.len() > 1
    }

    /// How many times the storage was reallocated to grow
    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }

    pub(crate) fn ring_len(&self) -> usize {
        self.buffers.len()
    }

    /// Advance to the slot the next write goes to.
    pub(crate) fn advance(&mut self) -> BufferHandle {
        self.current = (self.current + 1) % self.buffers.len();
        self.buffers[self.current]
    }

    /// Swap in freshly allocated storage, queueing the old buffers for release.
    pub(crate) fn replace_storage(&mut self, buffers: Vec<BufferHandle>, capacity: u64) {
        for old in std::mem::replace(&mut self.buffers, buffers) {
            self.releases.push(Release::Buffer(old));
        }
        self.capacity = capacity;
        self.current = 0;
        self.reallocations += 1;
    }

    pub(crate) fn set_len(&mut self, len: u64) {
        self.len = len;
    }
}

impl Drop for StructuredBuffer {
    fn drop(&mut self) {
        for buffer in &self.buffers {
            self.releases.push(Release::Buffer(*buffer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ringed(queue: &ReleaseQueue) -> StructuredBuffer {
        StructuredBuffer::new(
            "test".into(),
            16,
            4,
            vec![BufferHandle(1), BufferHandle(2), BufferHandle(3)],
            queue.clone(),
        )
    }

    #[test]
    fn ring_cycles_through_all_slots() {
        let queue = ReleaseQueue::new();
        let mut buffer = ringed(&queue);
        assert_eq!(buffer.handle(), BufferHandle(1));
        assert_eq!(buffer.advance(), BufferHandle(2));
        assert_eq!(buffer.advance(), BufferHandle(3));
        assert_eq!(buffer.advance(), BufferHandle(1));
    }

    #[test]
    fn replacing_storage_releases_old_buffers() {
        let queue = ReleaseQueue::new();
        let mut buffer = ringed(&queue);
        buffer.replace_storage(vec![BufferHandle(4), BufferHandle(5), BufferHandle(6)], 8);
        assert_eq!(queue.len(), 3);
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.reallocations(), 1);
        drop(buffer);
        assert_eq!(queue.len(), 6);
    }
}
