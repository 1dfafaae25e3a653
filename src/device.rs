//! Core device types: raw descriptors, hardware fingerprints, and
//! registered camera records.
//!
//! The identity model is deliberately layered. A [`CameraDescriptor`] is what
//! a platform backend reports for one enumeration pass and is never persisted
//! as-is; its [`fingerprint`](CameraDescriptor::fingerprint) collapses the
//! hardware identifiers into a matchable string; a [`RegisteredCamera`] is the
//! durable record keyed by a stable ID that outlives re-enumeration.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state of a registered camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device was present in the most recent enumeration.
    Connected,
    /// Device is registered but not currently enumerable.
    Disconnected,
    /// Device is in a fault state reported by the operator or tooling.
    Error,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A USB camera as reported by a platform backend for one enumeration pass.
///
/// `system_index` is the OS-assigned slot number and is valid only for the
/// session that produced it; it is excluded from serialization so it can
/// never leak into the registry file as ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    /// OS-assigned device slot (e.g., the N in /dev/videoN). Transient.
    #[serde(skip)]
    pub system_index: u32,
    /// USB vendor ID as a 4-hex-digit lowercase string.
    pub vendor_id: String,
    /// USB product ID as a 4-hex-digit lowercase string.
    pub product_id: String,
    /// Device serial number, when the hardware reports one.
    pub serial_number: Option<String>,
    /// Physical bus/port location; stable until the device is moved.
    pub port_path: Option<String>,
    /// Human-readable device name.
    pub label: String,
    /// OS-specific extra fields, preserved but not interpreted.
    #[serde(default)]
    pub platform_data: serde_json::Map<String, serde_json::Value>,
}

impl CameraDescriptor {
    /// Derive the hardware fingerprint used to match this device against
    /// previously registered records.
    ///
    /// Identity is resolved in strict priority order:
    ///
    /// 1. `serial:<serial_number>` when a non-empty serial is present. This
    ///    survives port moves.
    /// 2. `vid-pid-port:<vid>:<pid>:<port>` when a port path is known. This
    ///    survives re-enumeration but not physical moves.
    /// 3. `vid-pid-hash:<vid>:<pid>:<salt>` with a random 8-hex-char salt.
    ///    No stable identity is available; such a device registers as new on
    ///    every detection pass.
    ///
    /// Tiers 1 and 2 are deterministic: calling this twice on descriptors
    /// with the same serial (or the same vid/pid/port) yields identical
    /// strings. Tier 3 is intentionally not.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        if let Some(serial) = self.serial_number.as_deref()
            && !serial.is_empty()
        {
            return format!("serial:{serial}");
        }

        if let Some(port) = self.port_path.as_deref()
            && !port.is_empty()
        {
            return format!("vid-pid-port:{}:{}:{port}", self.vendor_id, self.product_id);
        }

        let salt: u32 = rand::random();
        format!("vid-pid-hash:{}:{}:{salt:08x}", self.vendor_id, self.product_id)
    }

    /// Whether this descriptor carries a deterministic identity signal
    /// (serial number or port path).
    #[must_use]
    pub fn has_stable_identity(&self) -> bool {
        self.serial_number.as_deref().is_some_and(|s| !s.is_empty())
            || self.port_path.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// A camera in the persistent registry, keyed by its stable ID.
///
/// Serializes flat (descriptor fields inline) to match the registry file
/// format; `system_index` inside the descriptor is skipped and reattached at
/// runtime from live detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredCamera {
    /// Persistent, human-readable identifier (`stable-cam-NNN`). Never
    /// changes once assigned.
    pub stable_id: String,
    /// Last-known hardware descriptor.
    #[serde(flatten)]
    pub device_info: CameraDescriptor,
    /// Current connection state.
    pub status: DeviceStatus,
    /// When the device was first registered. Immutable.
    pub registered_at: DateTime<Utc>,
    /// Timestamp of the last transition into Connected; None if the device
    /// has never connected since registration.
    pub last_seen: Option<DateTime<Utc>>,
}

impl RegisteredCamera {
    /// Hardware fingerprint of the last-known descriptor.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.device_info.fingerprint()
    }

    /// Whether the device is currently marked connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == DeviceStatus::Connected
    }
}

/// Allocate the next free stable ID.
///
/// IDs have the form `stable-cam-NNN` (zero-padded, starting at 001) and are
/// gap-filling: the smallest unused N is reused, so a registry holding 001
/// and 003 hands out 002 next.
#[must_use]
pub fn allocate_stable_id(existing: &BTreeSet<String>) -> String {
    let mut counter: u32 = 1;
    loop {
        let candidate = format!("stable-cam-{counter:03}");
        if !existing.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
