//! Backend abstraction layer
//!
//! Provides the [`GraphicsBackend`] trait that the wgpu and null backends
//! implement, plus backend selection at startup.

pub mod null;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

use std::sync::Arc;

pub use null::{NullBackend, NullCounters};
pub use traits::*;
pub use types::*;

use crate::{BackendPreference, DeviceConfig};
use wgpu_backend::{WgpuBackend, WgpuInit};

/// Create the backend selected by `config.backend`.
///
/// `Auto` tries a hardware adapter first and then the software fallback
/// adapter; the error of the last attempt is returned when all of them fail.
/// The null backend is only created when asked for explicitly.
pub fn create_backend(
    window: Option<Arc<winit::window::Window>>,
    config: &DeviceConfig,
) -> BackendResult<Box<dyn GraphicsBackend>> {
    let (width, height) = match &window {
        Some(window) => {
            let size = window.inner_size();
            (size.width, size.height)
        }
        None => config.headless_size,
    };

    let attempts: &[bool] = match config.backend {
        BackendPreference::Null => {
            log::info!("Using null backend ({}x{})", width, height);
            return Ok(Box::new(NullBackend::new(width, height)));
        }
        BackendPreference::Auto => &[false, true],
        BackendPreference::Hardware => &[false],
        BackendPreference::Software => &[true],
    };

    let mut last_error = BackendError::InitializationFailed("No backend attempted".into());
    for &force_fallback_adapter in attempts {
        let init = WgpuInit {
            window: window.clone(),
            vsync: config.vsync,
            width,
            height,
            force_fallback_adapter,
        };
        match WgpuBackend::new(&init) {
            Ok(backend) => {
                log::info!(
                    "Using wgpu backend on {} ({})",
                    backend.adapter_name(),
                    if force_fallback_adapter { "software" } else { "hardware" }
                );
                return Ok(Box::new(backend));
            }
            Err(e) => {
                log::warn!(
                    "{} adapter unavailable: {}",
                    if force_fallback_adapter { "Software" } else { "Hardware" },
                    e
                );
                last_error = e;
            }
        }
    }

    log::error!("Every backend in the fallback cascade failed");
    Err(last_error)
}
