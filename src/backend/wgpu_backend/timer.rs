//! Timestamp-query based GPU timers

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Idle,
    /// Copy to the readback buffer is encoded; map after the next submit.
    Recorded,
    Mapping,
    Ready,
}

pub struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
    state: Arc<Mutex<TimerState>>,
}

impl GpuTimer {
    pub fn new(device: &wgpu::Device) -> Self {
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("GPU Timer"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GPU Timer Resolve"),
            size: 16,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GPU Timer Readback"),
            size: 16,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            query_set,
            resolve,
            readback,
            state: Arc::new(Mutex::new(TimerState::Idle)),
        }
    }

    pub fn begin(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.write_timestamp(&self.query_set, 0);
    }

    pub fn end(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.write_timestamp(&self.query_set, 1);
        let mut state = self.state.lock();
        // A readback still in flight keeps its buffer; this measurement is dropped.
        if *state != TimerState::Idle {
            return;
        }
        encoder.resolve_query_set(&self.query_set, 0..2, &self.resolve, 0);
        encoder.copy_buffer_to_buffer(&self.resolve, 0, &self.readback, 0, 16);
        *state = TimerState::Recorded;
    }

    /// Start mapping the readback buffer. Call after the submit containing `end`.
    pub fn after_submit(&self) {
        let mut state = self.state.lock();
        if *state != TimerState::Recorded {
            return;
        }
        *state = TimerState::Mapping;
        drop(state);
        let state = Arc::clone(&self.state);
        self.readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                *state.lock() = if result.is_ok() {
                    TimerState::Ready
                } else {
                    TimerState::Idle
                };
            });
    }

    /// Elapsed milliseconds if the readback completed.
    pub fn try_read(&self, period_ns: f32) -> Option<f64> {
        let mut state = self.state.lock();
        if *state != TimerState::Ready {
            return None;
        }
        let elapsed = {
            let view = self.readback.slice(..).get_mapped_range();
            let stamps: &[u64] = bytemuck::cast_slice(&view);
            stamps[1].saturating_sub(stamps[0])
        };
        self.readback.unmap();
        *state = TimerState::Idle;
        Some(elapsed as f64 * period_ns as f64 / 1_000_000.0)
    }
}
