//! GPU resource ownership
//!
//! Owned resources ([`Texture`], [`Mesh`], [`StructuredBuffer`]) never talk to
//! the backend when dropped. They push a [`Release`] onto the device's shared
//! queue, which [`RenderDevice::update`](crate::RenderDevice::update) drains.
//! Pooled render targets are owned by the pools and lent out as copyable ids.

mod mesh;
mod pool;
mod structured_buffer;
mod texture;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::traits::{BufferHandle, TextureHandle};

pub use mesh::*;
pub use pool::*;
pub use structured_buffer::*;
pub use texture::*;

/// A GPU object whose owner went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

/// Queue of pending releases shared between the device and the resources it created.
#[derive(Debug, Clone, Default)]
pub struct ReleaseQueue(Arc<Mutex<Vec<Release>>>);

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, release: Release) {
        self.0.lock().push(release);
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Take everything queued so far.
    pub fn drain(&self) -> Vec<Release> {
        std::mem::take(&mut *self.0.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_queue() {
        let queue = ReleaseQueue::new();
        let clone = queue.clone();
        clone.push(Release::Texture(TextureHandle(7)));
        clone.push(Release::Buffer(BufferHandle(8)));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![
                Release::Texture(TextureHandle(7)),
                Release::Buffer(BufferHandle(8))
            ]
        );
        assert!(queue.is_empty());
    }
}
