//! Render-target pool and previous-frame texture registry
//!
//! Both pools own their textures. Transient targets are checked out by exact
//! key and returned with [`RenderTargetPool::release`]; previous-frame slots
//! persist across frames and swap their texture with a transient target at
//! frame end. Entries idle for more than the eviction threshold are dropped in
//! `evict`, which is only called from the device's `update()`.

use slotmap::{new_key_type, SlotMap};

use crate::backend::traits::TextureHandle;
use crate::backend::types::*;
use crate::resources::Texture;

new_key_type! {
    /// Id of a pooled render target
    pub struct RenderTargetId;
    /// Id of a previous-frame slot
    pub struct PrevTargetId;
}

/// Creation key of a pooled render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub samples: u32,
    pub flags: TextureFlags,
    pub mip_levels: u32,
}

impl RenderTargetDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            samples: 1,
            flags: TextureFlags::RENDER_TARGET,
            mip_levels: 1,
        }
    }

    /// Key of previous-frame textures. Targets exchanged with a history slot
    /// are requested with it, so the swapped-in entry is found again.
    pub fn history(width: u32, height: u32, format: TextureFormat) -> Self {
        let mut flags = TextureFlags::RENDER_TARGET;
        if format.supports_storage() {
            flags |= TextureFlags::UNORDERED_ACCESS;
        }
        Self::new(width, height, format).with_flags(flags)
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn with_flags(mut self, flags: TextureFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub(crate) fn texture_descriptor(&self, label: &str) -> TextureDescriptor {
        TextureDescriptor {
            label: Some(label.to_string()),
            width: self.width,
            height: self.height,
            mip_levels: self.mip_levels,
            format: self.format,
            samples: self.samples,
            flags: self.flags,
        }
    }
}

/// A checked-out render target. The pool keeps ownership of the texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub id: RenderTargetId,
    pub texture: TextureHandle,
    pub desc: RenderTargetDesc,
}

#[derive(Debug)]
struct PoolEntry {
    texture: Texture,
    desc: RenderTargetDesc,
    free: bool,
    last_used: u64,
}

/// Pool of transient render targets keyed by creation parameters
#[derive(Debug)]
pub struct RenderTargetPool {
    entries: SlotMap<RenderTargetId, PoolEntry>,
    eviction_threshold: u64,
}

impl RenderTargetPool {
    pub fn new(eviction_threshold: u64) -> Self {
        Self {
            entries: SlotMap::with_key(),
            eviction_threshold,
        }
    }

    /// Check out a free entry whose key matches `desc` exactly.
    pub fn acquire(&mut self, desc: &RenderTargetDesc, frame: u64) -> Option<RenderTarget> {
        let (id, entry) = self
            .entries
            .iter_mut()
            .find(|(_, entry)| entry.free && entry.desc == *desc)?;
        entry.free = false;
        entry.last_used = frame;
        Some(RenderTarget {
            id,
            texture: entry.texture.handle(),
            desc: entry.desc,
        })
    }

    /// Add a newly created texture as a checked-out entry.
    pub fn insert(&mut self, texture: Texture, desc: RenderTargetDesc, frame: u64) -> RenderTarget {
        let handle = texture.handle();
        let id = self.entries.insert(PoolEntry {
            texture,
            desc,
            free: false,
            last_used: frame,
        });
        RenderTarget {
            id,
            texture: handle,
            desc,
        }
    }

    /// Return an entry to the pool. `false` if the id is unknown or already free.
    pub fn release(&mut self, id: RenderTargetId, frame: u64) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if !entry.free => {
                entry.free = true;
                entry.last_used = frame;
                true
            }
            _ => false,
        }
    }

    /// Drop free entries idle for more than the threshold. Returns how many went.
    pub fn evict(&mut self, frame: u64) -> usize {
        let threshold = self.eviction_threshold;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let expired = entry.free && frame.saturating_sub(entry.last_used) > threshold;
            if expired {
                log::debug!(
                    "Evicting pooled {}x{} {:?} render target",
                    entry.desc.width,
                    entry.desc.height,
                    entry.desc.format
                );
            }
            !expired
        });
        before - self.entries.len()
    }

    pub fn get(&self, id: RenderTargetId) -> Option<RenderTarget> {
        self.entries.get(id).map(|entry| RenderTarget {
            id,
            texture: entry.texture.handle(),
            desc: entry.desc,
        })
    }

    pub fn is_free(&self, id: RenderTargetId) -> Option<bool> {
        self.entries.get(id).map(|entry| entry.free)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.free).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Meaning of a previous-frame texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrevSemantic {
    /// Resolved color of the last frame, input to temporal resolve
    ColorHistory,
    /// Running radiance sum of the path tracer
    PathTraceAccumulation,
}

/// A previous-frame slot as seen by a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrevTarget {
    pub id: PrevTargetId,
    pub texture: TextureHandle,
    /// Created by this request; its contents are not a valid history.
    pub fresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PrevKey {
    semantic: PrevSemantic,
    width: u32,
    height: u32,
    format: TextureFormat,
}

#[derive(Debug)]
struct PrevEntry {
    key: PrevKey,
    texture: Texture,
    desc: RenderTargetDesc,
    last_used: u64,
}

/// Previous-frame textures, at most one per (semantic, width, height, format)
#[derive(Debug)]
pub struct PrevTextureRegistry {
    entries: SlotMap<PrevTargetId, PrevEntry>,
    eviction_threshold: u64,
}

impl PrevTextureRegistry {
    pub fn new(eviction_threshold: u64) -> Self {
        Self {
            entries: SlotMap::with_key(),
            eviction_threshold,
        }
    }

    /// Look up the slot for this key and stamp it.
    pub fn find(
        &mut self,
        semantic: PrevSemantic,
        width: u32,
        height: u32,
        format: TextureFormat,
        frame: u64,
    ) -> Option<PrevTarget> {
        let key = PrevKey {
            semantic,
            width,
            height,
            format,
        };
        let (id, entry) = self.entries.iter_mut().find(|(_, entry)| entry.key == key)?;
        entry.last_used = frame;
        Some(PrevTarget {
            id,
            texture: entry.texture.handle(),
            fresh: false,
        })
    }

    pub fn insert(
        &mut self,
        semantic: PrevSemantic,
        texture: Texture,
        desc: RenderTargetDesc,
        frame: u64,
    ) -> PrevTarget {
        let handle = texture.handle();
        let id = self.entries.insert(PrevEntry {
            key: PrevKey {
                semantic,
                width: desc.width,
                height: desc.height,
                format: desc.format,
            },
            texture,
            desc,
            last_used: frame,
        });
        PrevTarget {
            id,
            texture: handle,
            fresh: true,
        }
    }

    /// Swap textures between a previous-frame slot and a checked-out pool entry.
    ///
    /// The pool entry receives the old history and is marked free. Fails
    /// without changing anything when either side is missing or the sizes or
    /// formats differ.
    pub fn exchange(
        &mut self,
        prev: PrevTargetId,
        pool: &mut RenderTargetPool,
        current: RenderTargetId,
        frame: u64,
    ) -> Result<(), &'static str> {
        let entry = self.entries.get_mut(prev).ok_or("unknown previous-frame texture")?;
        let target = pool
            .entries
            .get_mut(current)
            .ok_or("unknown render target")?;
        if target.free {
            return Err("render target is not checked out");
        }
        if (target.desc.width, target.desc.height, target.desc.format)
            != (entry.key.width, entry.key.height, entry.key.format)
        {
            return Err("size or format mismatch");
        }

        std::mem::swap(&mut entry.texture, &mut target.texture);
        std::mem::swap(&mut entry.desc, &mut target.desc);
        entry.last_used = frame;
        target.free = true;
        target.last_used = frame;
        Ok(())
    }

    pub fn texture(&self, id: PrevTargetId) -> Option<TextureHandle> {
        self.entries.get(id).map(|entry| entry.texture.handle())
    }

    /// Drop slots not requested for more than the threshold.
    pub fn evict(&mut self, frame: u64) -> usize {
        let threshold = self.eviction_threshold;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let expired = frame.saturating_sub(entry.last_used) > threshold;
            if expired {
                log::debug!("Evicting previous-frame texture {:?}", entry.key.semantic);
            }
            !expired
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ReleaseQueue;
    use rstest::rstest;

    fn texture(id: u64, desc: &RenderTargetDesc, queue: &ReleaseQueue) -> Texture {
        Texture::new(TextureHandle(id), desc.texture_descriptor("test"), queue.clone())
    }

    #[test]
    fn checked_out_entry_is_not_handed_out_twice() {
        let queue = ReleaseQueue::new();
        let desc = RenderTargetDesc::new(256, 256, TextureFormat::Rgba8Unorm);
        let mut pool = RenderTargetPool::new(3);
        pool.insert(texture(1, &desc, &queue), desc, 0);
        assert!(pool.acquire(&desc, 0).is_none());
    }

    #[test]
    fn released_entry_is_reused_for_the_same_key_only() {
        let queue = ReleaseQueue::new();
        let desc = RenderTargetDesc::new(256, 256, TextureFormat::Rgba8Unorm);
        let mut pool = RenderTargetPool::new(3);
        let target = pool.insert(texture(1, &desc, &queue), desc, 0);
        assert!(pool.release(target.id, 0));

        let other = desc.with_samples(4);
        assert!(pool.acquire(&other, 0).is_none());
        let again = pool.acquire(&desc, 1).unwrap();
        assert_eq!(again.texture, target.texture);
    }

    #[test]
    fn double_release_is_rejected() {
        let queue = ReleaseQueue::new();
        let desc = RenderTargetDesc::new(64, 64, TextureFormat::Rgba8Unorm);
        let mut pool = RenderTargetPool::new(3);
        let target = pool.insert(texture(1, &desc, &queue), desc, 0);
        assert!(pool.release(target.id, 0));
        assert!(!pool.release(target.id, 0));
    }

    #[rstest]
    #[case(1, false)]
    #[case(3, false)]
    #[case(4, true)]
    #[case(10, true)]
    fn eviction_after_threshold(#[case] frame: u64, #[case] evicted: bool) {
        let queue = ReleaseQueue::new();
        let desc = RenderTargetDesc::new(64, 64, TextureFormat::Rgba8Unorm);
        let mut pool = RenderTargetPool::new(3);
        let target = pool.insert(texture(1, &desc, &queue), desc, 0);
        pool.release(target.id, 0);

        assert_eq!(pool.evict(frame), usize::from(evicted));
        assert_eq!(queue.len(), usize::from(evicted));
    }

    #[test]
    fn checked_out_entries_are_never_evicted() {
        let queue = ReleaseQueue::new();
        let desc = RenderTargetDesc::new(64, 64, TextureFormat::Rgba8Unorm);
        let mut pool = RenderTargetPool::new(3);
        pool.insert(texture(1, &desc, &queue), desc, 0);
        assert_eq!(pool.evict(100), 0);
    }

    #[test]
    fn exchange_swaps_and_frees_the_transient_entry() {
        let queue = ReleaseQueue::new();
        let desc = RenderTargetDesc::new(64, 64, TextureFormat::Rgba16Float);
        let mut pool = RenderTargetPool::new(3);
        let mut registry = PrevTextureRegistry::new(3);

        let prev = registry.insert(PrevSemantic::ColorHistory, texture(1, &desc, &queue), desc, 0);
        assert!(prev.fresh);
        let current = pool.insert(texture(2, &desc, &queue), desc, 0);

        registry.exchange(prev.id, &mut pool, current.id, 0).unwrap();
        assert_eq!(registry.texture(prev.id), Some(TextureHandle(2)));
        assert_eq!(pool.get(current.id).unwrap().texture, TextureHandle(1));
        assert_eq!(pool.is_free(current.id), Some(true));

        let found = registry
            .find(PrevSemantic::ColorHistory, 64, 64, TextureFormat::Rgba16Float, 1)
            .unwrap();
        assert!(!found.fresh);
        assert_eq!(found.texture, TextureHandle(2));
    }

    #[test]
    fn exchange_with_missing_side_changes_nothing() {
        let queue = ReleaseQueue::new();
        let desc = RenderTargetDesc::new(64, 64, TextureFormat::Rgba16Float);
        let mut pool = RenderTargetPool::new(3);
        let mut registry = PrevTextureRegistry::new(3);
        let prev = registry.insert(PrevSemantic::ColorHistory, texture(1, &desc, &queue), desc, 0);
        let current = pool.insert(texture(2, &desc, &queue), desc, 0);
        pool.release(current.id, 0);
        pool.evict(10);

        assert!(registry.exchange(prev.id, &mut pool, current.id, 10).is_err());
        assert_eq!(registry.texture(prev.id), Some(TextureHandle(1)));
    }

    #[test]
    fn registry_keys_include_semantic() {
        let queue = ReleaseQueue::new();
        let desc = RenderTargetDesc::new(32, 32, TextureFormat::Rgba32Float);
        let mut registry = PrevTextureRegistry::new(3);
        registry.insert(PrevSemantic::PathTraceAccumulation, texture(1, &desc, &queue), desc, 0);
        assert!(registry
            .find(PrevSemantic::ColorHistory, 32, 32, TextureFormat::Rgba32Float, 0)
            .is_none());
        assert!(registry
            .find(PrevSemantic::PathTraceAccumulation, 32, 32, TextureFormat::Rgba32Float, 0)
            .is_some());
    }
}
