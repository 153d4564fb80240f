//! Owned textures and CPU-side texture data

use crate::backend::traits::TextureHandle;
use crate::backend::types::*;
use crate::resources::{Release, ReleaseQueue};

/// CPU texture data ready for upload
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Create a default white texture
    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// Create a checkerboard texture with 8 pixel cells
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                let color = if is_even { color1 } else { color2 };
                data.extend_from_slice(&color);
            }
        }

        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }

    /// Descriptor for a sampled texture holding this data.
    pub fn descriptor(&self, flags: TextureFlags) -> TextureDescriptor {
        TextureDescriptor {
            label: Some(self.name.clone()),
            width: self.width,
            height: self.height,
            mip_levels: if flags.wants_mips() {
                TextureDescriptor::full_mip_count(self.width, self.height)
            } else {
                1
            },
            format: self.format,
            samples: 1,
            flags,
        }
    }
}

/// A GPU texture with a single owner.
///
/// Dropping it queues the release; the texture is destroyed on the device's
/// next `update()`.
#[derive(Debug)]
pub struct Texture {
    handle: TextureHandle,
    desc: TextureDescriptor,
    releases: ReleaseQueue,
}

impl Texture {
    pub(crate) fn new(handle: TextureHandle, desc: TextureDescriptor, releases: ReleaseQueue) -> Self {
        Self {
            handle,
            desc,
            releases,
        }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn desc(&self) -> &TextureDescriptor {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn flags(&self) -> TextureFlags {
        self.desc.flags
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.releases.push(Release::Texture(self.handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_queues_release() {
        let queue = ReleaseQueue::new();
        let texture = Texture::new(TextureHandle(3), TextureDescriptor::default(), queue.clone());
        assert!(queue.is_empty());
        drop(texture);
        assert_eq!(queue.drain(), vec![Release::Texture(TextureHandle(3))]);
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let data = TextureData::checkerboard(16, [255; 4], [0, 0, 0, 255]);
        assert_eq!(data.data.len(), 16 * 16 * 4);
        assert_eq!(&data.data[0..4], &[255; 4]);
        // First pixel of the second cell
        assert_eq!(&data.data[8 * 4..8 * 4 + 4], &[0, 0, 0, 255]);
    }

    #[test]
    fn mipped_descriptor_has_full_chain() {
        let data = TextureData::checkerboard(64, [255; 4], [0; 4]);
        let desc = data.descriptor(TextureFlags::GENERATE_MIPS | TextureFlags::WRAP);
        assert_eq!(desc.mip_levels, 7);
        assert!(desc.flags.wraps());
    }
}
