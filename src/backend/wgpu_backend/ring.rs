//! Per-submission uniform ring.
//!
//! `queue.write_buffer` calls land before the next submit, so writing one
//! uniform buffer repeatedly between draws would leave every draw seeing the
//! last value. Constant buffer contents are instead staged into this ring at
//! increasing offsets and bound with dynamic offsets; the whole ring is written
//! once right before the command buffer is submitted.

pub const RING_CAPACITY: u64 = 4 * 1024 * 1024;

pub struct UniformRing {
    buffer: wgpu::Buffer,
    staging: Vec<u8>,
    alignment: u64,
}

impl UniformRing {
    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Ring"),
            size: RING_CAPACITY,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            staging: Vec::with_capacity(64 * 1024),
            alignment: device.limits().min_uniform_buffer_offset_alignment as u64,
        }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Stage `data` padded to `size` bytes. `None` when the ring is full.
    pub fn push(&mut self, data: &[u8], size: u64) -> Option<u32> {
        let offset = align_up(self.staging.len() as u64, self.alignment);
        if offset + size > RING_CAPACITY {
            return None;
        }
        self.staging.resize(offset as usize, 0);
        let len = data.len().min(size as usize);
        self.staging.extend_from_slice(&data[..len]);
        self.staging.resize((offset + size) as usize, 0);
        Some(offset as u32)
    }

    /// Write the staged bytes to the GPU buffer. Call right before submitting.
    pub fn upload(&self, queue: &wgpu::Queue) {
        if !self.staging.is_empty() {
            queue.write_buffer(&self.buffer, 0, &self.staging);
        }
    }

    pub fn reset(&mut self) {
        self.staging.clear();
    }
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::align_up;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }
}
