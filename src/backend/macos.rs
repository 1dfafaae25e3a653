//! macOS camera enumeration via the `system_profiler` USB tree.
//!
//! Shells out to `system_profiler SPUSBDataType -json` and walks the nested
//! device tree looking for camera-like entries. Vendor and product IDs come
//! back in mixed formats (`0x046d  (Logitech Inc.)`, decimal, bare hex) and
//! are normalized to 4-hex-digit lowercase. The `location_id` serves as the
//! port path.

use std::process::Command;

use tracing::{debug, warn};

use super::CameraBackend;
use crate::device::CameraDescriptor;
use crate::error::{CamError, Result};

const CAMERA_KEYWORDS: [&str; 4] = ["camera", "webcam", "facetime", "video"];

/// macOS backend wrapping `system_profiler`.
#[derive(Default)]
pub struct MacOsBackend;

impl MacOsBackend {
    /// Create the backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn query_usb_tree(&self) -> Result<serde_json::Value> {
        let output = Command::new("system_profiler")
            .args(["SPUSBDataType", "-json"])
            .output()
            .map_err(|e| CamError::Detection {
                platform: self.name(),
                reason: format!("failed to run system_profiler: {e}"),
            })?;

        if !output.status.success() {
            return Err(CamError::Detection {
                platform: self.name(),
                reason: format!(
                    "system_profiler exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| CamError::Detection {
            platform: self.name(),
            reason: format!("unparseable system_profiler output: {e}"),
        })
    }
}

impl CameraBackend for MacOsBackend {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn enumerate(&self) -> Result<Vec<CameraDescriptor>> {
        let tree = self.query_usb_tree()?;
        let mut items = Vec::new();
        if let Some(roots) = tree.get("SPUSBDataType").and_then(|v| v.as_array()) {
            for root in roots {
                collect_camera_items(root, &mut items);
            }
        }

        let cameras: Vec<CameraDescriptor> = items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match describe_item(index, item) {
                Some(camera) => Some(camera),
                None => {
                    warn!(index, "Skipping camera item with unusable fields");
                    None
                }
            })
            .collect();

        debug!(count = cameras.len(), "Enumerated macOS cameras");
        Ok(cameras)
    }
}

/// Depth-first walk of the USB tree collecting camera-like leaf items.
fn collect_camera_items(node: &serde_json::Value, out: &mut Vec<serde_json::Value>) {
    if let Some(name) = node.get("_name").and_then(|v| v.as_str()) {
        let lowered = name.to_lowercase();
        if CAMERA_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            out.push(node.clone());
        }
    }
    if let Some(children) = node.get("_items").and_then(|v| v.as_array()) {
        for child in children {
            collect_camera_items(child, out);
        }
    }
}

fn describe_item(index: usize, item: &serde_json::Value) -> Option<CameraDescriptor> {
    let label = item
        .get("_name")
        .and_then(|v| v.as_str())
        .unwrap_or("USB Camera")
        .to_string();

    let vendor_id = item
        .get("vendor_id")
        .and_then(|v| v.as_str())
        .map_or_else(|| "unknown".to_string(), normalize_id);
    let product_id = item
        .get("product_id")
        .and_then(|v| v.as_str())
        .map_or_else(|| "unknown".to_string(), normalize_id);

    let serial_number = item
        .get("serial_num")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    // "0x14200000 / 2" -> "0x14200000"
    let port_path = item
        .get("location_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.split_whitespace().next())
        .map(ToString::to_string);

    let mut platform_data = serde_json::Map::new();
    platform_data.insert("source".to_string(), "system_profiler".into());
    if let Some(manufacturer) = item.get("manufacturer").and_then(|v| v.as_str()) {
        platform_data.insert("manufacturer".to_string(), manufacturer.into());
    }

    Some(CameraDescriptor {
        system_index: u32::try_from(index).ok()?,
        vendor_id,
        product_id,
        serial_number,
        port_path,
        label,
        platform_data,
    })
}

/// Normalize the various ID spellings system_profiler emits to 4-hex-digit
/// lowercase: `0x046d  (Logitech Inc.)`, `046D`, or decimal `1133`.
fn normalize_id(raw: &str) -> String {
    let token = raw.split_whitespace().next().unwrap_or(raw);
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        if let Ok(value) = u16::from_str_radix(hex, 16) {
            return format!("{value:04x}");
        }
    }
    if let Ok(value) = u16::from_str_radix(token, 16) {
        return format!("{value:04x}");
    }
    if let Ok(value) = token.parse::<u16>() {
        return format!("{value:04x}");
    }
    token.to_lowercase()
}
