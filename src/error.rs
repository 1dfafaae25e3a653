//! Error types for StableCam operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Primary error type for StableCam operations.
///
/// Variants carry structured context fields so callers can branch on the
/// error kind without string matching. Registry failures are split into
/// not-found, permission, corruption, and lock-timeout because the caller
/// reaction differs for each (a permission problem is not fixed by retrying,
/// a lock timeout is).
#[derive(Error, Debug)]
pub enum CamError {
    // Detection errors
    #[error("Camera detection failed on {platform}: {reason}")]
    Detection { platform: &'static str, reason: String },

    #[error("Camera enumeration is not supported on this platform: {platform}")]
    UnsupportedPlatform { platform: &'static str },

    // Registry errors
    #[error("Device not found in registry: {stable_id}")]
    DeviceNotFound { stable_id: String },

    #[error("No permission to access registry at {path}: {reason}")]
    RegistryPermission { path: PathBuf, reason: String },

    #[error("Registry file at {path} is corrupted and could not be recovered: {reason}")]
    RegistryCorruption { path: PathBuf, reason: String },

    #[error("Timed out after {waited:?} waiting for registry lock at {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Registry serialization failed: {0}")]
    RegistrySerialize(#[from] serde_json::Error),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl CamError {
    /// Returns true if the error is worth retrying after a delay.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Detection { .. } | Self::LockTimeout { .. })
    }

    /// Returns a suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::RegistryPermission { .. } => {
                Some("Check ownership and permissions of the registry directory")
            }
            Self::UnsupportedPlatform { .. } => {
                Some("StableCam supports Linux, macOS, and Windows")
            }
            Self::DeviceNotFound { .. } => Some("Run: stablecam list"),
            _ => None,
        }
    }
}

/// Convenience type alias for Results using CamError.
pub type Result<T> = std::result::Result<T, CamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let detection = CamError::Detection {
            platform: "linux",
            reason: "udev unavailable".to_string(),
        };
        assert!(detection.is_transient());

        let not_found = CamError::DeviceNotFound {
            stable_id: "stable-cam-001".to_string(),
        };
        assert!(!not_found.is_transient());
    }

    #[test]
    fn test_error_display_includes_context() {
        let err = CamError::DeviceNotFound {
            stable_id: "stable-cam-042".to_string(),
        };
        assert!(err.to_string().contains("stable-cam-042"));

        let err = CamError::LockTimeout {
            path: PathBuf::from("/tmp/registry.json.lock"),
            waited: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("registry.json.lock"));
    }

    #[test]
    fn test_suggestions() {
        let err = CamError::DeviceNotFound {
            stable_id: "stable-cam-001".to_string(),
        };
        assert_eq!(err.suggestion(), Some("Run: stablecam list"));

        let err = CamError::Other("misc".to_string());
        assert!(err.suggestion().is_none());
    }
}
