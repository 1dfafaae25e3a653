//! Platform enumeration backends.
//!
//! Backends are thin adapters over OS facilities that produce raw
//! [`CameraDescriptor`]s; all identity and state logic lives above this
//! boundary. A backend failure of any OS-specific shape surfaces as the
//! single [`CamError::Detection`] kind.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
pub mod mock;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
pub use linux::LinuxBackend;
#[cfg(target_os = "macos")]
pub use macos::MacOsBackend;
pub use mock::MockBackend;
#[cfg(target_os = "windows")]
pub use windows::WindowsBackend;

use crate::device::CameraDescriptor;
use crate::error::Result;

/// Contract the core consumes from an enumeration backend.
///
/// Implementations should skip individual devices they cannot read rather
/// than failing the whole enumeration; a returned error means the platform
/// could not be queried at all.
pub trait CameraBackend: Send + Sync {
    /// Short platform name used in logs and error context.
    fn name(&self) -> &'static str;

    /// Enumerate currently connected USB cameras.
    fn enumerate(&self) -> Result<Vec<CameraDescriptor>>;
}

/// Select the enumeration backend for the current platform.
#[cfg(target_os = "linux")]
pub fn platform_backend() -> Result<Box<dyn CameraBackend>> {
    Ok(Box::new(LinuxBackend::new()))
}

/// Select the enumeration backend for the current platform.
#[cfg(target_os = "macos")]
pub fn platform_backend() -> Result<Box<dyn CameraBackend>> {
    Ok(Box::new(MacOsBackend::new()))
}

/// Select the enumeration backend for the current platform.
#[cfg(target_os = "windows")]
pub fn platform_backend() -> Result<Box<dyn CameraBackend>> {
    Ok(Box::new(WindowsBackend::new()))
}

/// Select the enumeration backend for the current platform.
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn platform_backend() -> Result<Box<dyn CameraBackend>> {
    Err(crate::error::CamError::UnsupportedPlatform {
        platform: std::env::consts::OS,
    })
}
