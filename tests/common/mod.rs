//! Shared setup for the integration tests.
//!
//! Every test drives a [`RenderDevice`] on the [`NullBackend`] and inspects
//! the backend's call counters.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use render_core::{DeviceConfig, NullBackend, NullCounters, RenderDevice};

pub type Counters = Arc<Mutex<NullCounters>>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Null-backed device plus its counters.
pub fn null_device(width: u32, height: u32) -> (RenderDevice, Counters) {
    init_logger();
    let backend = NullBackend::new(width, height);
    let counters = backend.counters();
    let device = RenderDevice::with_backend(Box::new(backend), DeviceConfig::null(width, height));
    (device, counters)
}

/// Snapshot of the counters, so assertions do not hold the lock.
pub fn snapshot(counters: &Counters) -> NullCounters {
    counters.lock().clone()
}

/// Minimal program with one uniform block.
pub const TINT_PROGRAM: &str = r#"
struct Tint {
    color: vec4<f32>,
    strength: f32,
}

@group(0) @binding(0) var<uniform> tint: Tint;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(index & 1u);
    return vec4<f32>(x, 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return tint.color * tint.strength;
}
"#;
