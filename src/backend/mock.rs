//! Mock enumeration backend for unit and integration testing.
//!
//! Supports scripted per-call results, failure injection, and call counting
//! so tests can drive reconciliation scenarios without hardware.
//!
//! # Example
//!
//! ```rust,ignore
//! use stablecam::backend::{CameraBackend, MockBackend};
//!
//! let backend = MockBackend::new();
//! backend.set_devices(vec![cam_a.clone(), cam_b.clone()]);
//! assert_eq!(backend.enumerate().unwrap().len(), 2);
//!
//! backend.fail_next(2); // next two calls error
//! assert!(backend.enumerate().is_err());
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use super::CameraBackend;
use crate::device::CameraDescriptor;
use crate::error::{CamError, Result};

/// One scripted response for a future `enumerate` call.
enum Scripted {
    Devices(Vec<CameraDescriptor>),
    Failure(String),
}

/// Scriptable in-memory backend.
///
/// By default every call returns the current device list set via
/// [`set_devices`](Self::set_devices). Queued one-shot responses
/// ([`push_result`](Self::push_result), [`fail_next`](Self::fail_next)) take
/// priority and are consumed in order.
#[derive(Default)]
pub struct MockBackend {
    devices: Mutex<Vec<CameraDescriptor>>,
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    always_fail: Mutex<Option<String>>,
}

impl MockBackend {
    /// Create a mock backend that enumerates no devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock backend pre-populated with devices.
    #[must_use]
    pub fn with_devices(devices: Vec<CameraDescriptor>) -> Self {
        let backend = Self::new();
        backend.set_devices(devices);
        backend
    }

    /// Replace the steady-state device list.
    pub fn set_devices(&self, devices: Vec<CameraDescriptor>) {
        trace!(count = devices.len(), "Mock backend device list replaced");
        *self.devices.lock().unwrap() = devices;
    }

    /// Queue one result to be returned ahead of the steady-state list.
    pub fn push_result(&self, devices: Vec<CameraDescriptor>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Devices(devices));
    }

    /// Queue `count` consecutive enumeration failures.
    pub fn fail_next(&self, count: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..count {
            script.push_back(Scripted::Failure("injected enumeration failure".to_string()));
        }
    }

    /// Make every call fail until [`clear_failure`](Self::clear_failure).
    pub fn fail_always(&self, reason: impl Into<String>) {
        *self.always_fail.lock().unwrap() = Some(reason.into());
    }

    /// Stop unconditional failures.
    pub fn clear_failure(&self) {
        *self.always_fail.lock().unwrap() = None;
    }

    /// Number of `enumerate` calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CameraBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn enumerate(&self) -> Result<Vec<CameraDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.always_fail.lock().unwrap().clone() {
            return Err(CamError::Detection {
                platform: self.name(),
                reason,
            });
        }

        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return match scripted {
                Scripted::Devices(devices) => Ok(devices),
                Scripted::Failure(reason) => Err(CamError::Detection {
                    platform: self.name(),
                    reason,
                }),
            };
        }

        Ok(self.devices.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(serial: &str) -> CameraDescriptor {
        CameraDescriptor {
            system_index: 0,
            vendor_id: "046d".to_string(),
            product_id: "085b".to_string(),
            serial_number: Some(serial.to_string()),
            port_path: None,
            label: "mock cam".to_string(),
            platform_data: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_steady_state_devices() {
        let backend = MockBackend::with_devices(vec![camera("A")]);
        assert_eq!(backend.enumerate().unwrap().len(), 1);
        assert_eq!(backend.enumerate().unwrap().len(), 1);
        assert_eq!(backend.call_count(), 2);
    }

    #[test]
    fn test_scripted_results_take_priority() {
        let backend = MockBackend::with_devices(vec![camera("A")]);
        backend.push_result(vec![]);

        assert!(backend.enumerate().unwrap().is_empty());
        assert_eq!(backend.enumerate().unwrap().len(), 1);
    }

    #[test]
    fn test_fail_next() {
        let backend = MockBackend::with_devices(vec![camera("A")]);
        backend.fail_next(2);

        assert!(backend.enumerate().is_err());
        assert!(backend.enumerate().is_err());
        assert!(backend.enumerate().is_ok());
    }

    #[test]
    fn test_fail_always_and_clear() {
        let backend = MockBackend::new();
        backend.fail_always("backend on fire");

        let err = backend.enumerate().unwrap_err();
        assert!(matches!(err, CamError::Detection { platform: "mock", .. }));

        backend.clear_failure();
        assert!(backend.enumerate().is_ok());
    }
}
