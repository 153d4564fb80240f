//! GPU frame timer ring

use crate::backend::traits::TimerHandle;
use crate::device::RenderDevice;

/// Slots in the ring; a result is read back `TIMER_RING_LEN` frames after it was written
pub const TIMER_RING_LEN: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
struct TimerSlot {
    timer: Option<TimerHandle>,
    written: Option<u64>,
}

/// Ring of GPU timers measuring whole frames of one view.
///
/// Readback never waits: slot `frame % N` is read right before it is reused,
/// and only when it was written exactly `N` frames earlier.
#[derive(Debug, Default)]
pub struct FrameTimerRing {
    slots: [TimerSlot; TIMER_RING_LEN],
    active: Option<usize>,
    last_ms: Option<f64>,
    unsupported: bool,
}

impl FrameTimerRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, device: &mut RenderDevice, frame: u64) {
        if self.unsupported {
            return;
        }
        let index = (frame % TIMER_RING_LEN as u64) as usize;
        let slot = &mut self.slots[index];

        if let (Some(timer), Some(written)) = (slot.timer, slot.written) {
            if frame >= TIMER_RING_LEN as u64 && written == frame - TIMER_RING_LEN as u64 {
                if let Some(ms) = device.resolve_gpu_timer(timer) {
                    self.last_ms = Some(ms);
                }
            }
        }

        let timer = match slot.timer {
            Some(timer) => timer,
            None => match device.create_gpu_timer() {
                Some(timer) => {
                    slot.timer = Some(timer);
                    timer
                }
                None => {
                    log::debug!("GPU timers unavailable; frame timing disabled");
                    self.unsupported = true;
                    return;
                }
            },
        };
        device.begin_gpu_timer(timer);
        slot.written = Some(frame);
        self.active = Some(index);
    }

    pub fn end(&mut self, device: &mut RenderDevice) {
        let Some(index) = self.active.take() else {
            return;
        };
        if let Some(timer) = self.slots[index].timer {
            device.end_gpu_timer(timer);
        }
    }

    /// Most recent GPU frame time read back, in milliseconds
    pub fn last_ms(&self) -> Option<f64> {
        self.last_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::DeviceConfig;

    #[test]
    fn results_are_read_after_a_full_ring() {
        let backend = NullBackend::new(8, 8);
        let counters = backend.counters();
        let mut device = RenderDevice::with_backend(Box::new(backend), DeviceConfig::null(8, 8));
        let mut ring = FrameTimerRing::new();
        for frame in 0..TIMER_RING_LEN as u64 {
            ring.begin(&mut device, frame);
            ring.end(&mut device);
            assert_eq!(ring.last_ms(), None);
        }
        ring.begin(&mut device, TIMER_RING_LEN as u64);
        ring.end(&mut device);
        assert_eq!(ring.last_ms(), Some(0.0));
        assert_eq!(counters.lock().timers_begun, TIMER_RING_LEN + 1);
    }

    #[test]
    fn skipped_frames_are_not_read() {
        let mut device =
            RenderDevice::with_backend(Box::new(NullBackend::new(8, 8)), DeviceConfig::null(8, 8));
        let mut ring = FrameTimerRing::new();
        ring.begin(&mut device, 0);
        ring.end(&mut device);
        // Slot 0 again, but eight frames later.
        ring.begin(&mut device, 8);
        ring.end(&mut device);
        assert_eq!(ring.last_ms(), None);
    }
}
