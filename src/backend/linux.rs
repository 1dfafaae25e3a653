//! Linux camera enumeration via `/dev/video*` and sysfs.
//!
//! Walks each video4linux node's sysfs device link upward to the owning USB
//! device directory, which carries `idVendor`, `idProduct`, and (when the
//! hardware reports one) `serial`. The USB sysfs path doubles as the port
//! path: it encodes the physical topology and changes only when the device
//! is plugged into a different port.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use super::CameraBackend;
use crate::device::CameraDescriptor;
use crate::error::{CamError, Result};

const SYSFS_V4L_DIR: &str = "/sys/class/video4linux";

/// Linux backend reading video4linux sysfs entries.
#[derive(Default)]
pub struct LinuxBackend {
    sysfs_root: Option<PathBuf>,
}

impl LinuxBackend {
    /// Create a backend using the real sysfs root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend reading from an alternate sysfs root (for tests).
    #[must_use]
    pub fn with_sysfs_root(root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: Some(root.into()),
        }
    }

    fn sysfs_dir(&self) -> PathBuf {
        self.sysfs_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(SYSFS_V4L_DIR))
    }

    fn describe_node(&self, entry: &Path) -> Option<CameraDescriptor> {
        let name = entry.file_name()?.to_str()?;
        let system_index: u32 = name.strip_prefix("video")?.parse().ok()?;

        let label = read_trimmed(&entry.join("name"))
            .unwrap_or_else(|| format!("Camera video{system_index}"));

        // Follow the device link toward the USB device that owns this node.
        let device_link = entry.join("device");
        let real_device = fs::canonicalize(&device_link).ok();
        let usb = real_device.as_deref().and_then(find_usb_ancestor);

        let (vendor_id, product_id, serial_number, port_path) = match usb.as_deref() {
            Some(usb_dir) => (
                read_trimmed(&usb_dir.join("idVendor")).unwrap_or_else(|| "unknown".to_string()),
                read_trimmed(&usb_dir.join("idProduct")).unwrap_or_else(|| "unknown".to_string()),
                read_trimmed(&usb_dir.join("serial")).filter(|s| !s.is_empty()),
                Some(usb_dir.to_string_lossy().into_owned()),
            ),
            None => ("unknown".to_string(), "unknown".to_string(), None, None),
        };

        let mut platform_data = serde_json::Map::new();
        platform_data.insert(
            "device_path".to_string(),
            format!("/dev/video{system_index}").into(),
        );
        platform_data.insert("subsystem".to_string(), "video4linux".into());
        if let Some(driver) = real_device
            .as_deref()
            .and_then(|d| read_link_name(&d.join("driver")))
        {
            platform_data.insert("driver".to_string(), driver.into());
        }

        trace!(%system_index, %vendor_id, %product_id, "Described video node");
        Some(CameraDescriptor {
            system_index,
            vendor_id,
            product_id,
            serial_number,
            port_path,
            label,
            platform_data,
        })
    }
}

impl CameraBackend for LinuxBackend {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn enumerate(&self) -> Result<Vec<CameraDescriptor>> {
        let dir = self.sysfs_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            // No video4linux class directory means no cameras, not a failure.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "No video4linux sysfs directory");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(CamError::Detection {
                    platform: self.name(),
                    reason: format!("cannot read {}: {e}", dir.display()),
                });
            }
        };

        let mut cameras: Vec<CameraDescriptor> = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            match self.describe_node(&path) {
                Some(camera) => cameras.push(camera),
                None => {
                    warn!(node = %path.display(), "Skipping unreadable video node");
                }
            }
        }

        cameras.sort_by_key(|c| c.system_index);
        debug!(count = cameras.len(), "Enumerated Linux cameras");
        Ok(cameras)
    }
}

/// Read a sysfs attribute file, trimming trailing whitespace.
fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Resolve a symlink and return its target's final component.
fn read_link_name(path: &Path) -> Option<String> {
    fs::read_link(path)
        .ok()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Walk a sysfs device path upward to the directory describing the owning
/// USB device (the one carrying `idVendor`/`idProduct`).
fn find_usb_ancestor(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start.to_path_buf());
    while let Some(dir) = current {
        if dir.join("idVendor").is_file() && dir.join("idProduct").is_file() {
            return Some(dir);
        }
        current = dir.parent().map(Path::to_path_buf);
    }
    None
}
