//! Windows camera enumeration via PowerShell CIM queries.
//!
//! Shells out to PowerShell for `Win32_PnPEntity` instances in the `Camera`
//! or `Image` device classes and parses the identity triplet out of each
//! `PNPDeviceID` (`USB\VID_xxxx&PID_yyyy\<serial-or-instance>`). The trailing
//! path segment is treated as a serial number only when it does not look
//! like a bus-assigned instance ID.

use std::process::Command;

use tracing::{debug, warn};

use super::CameraBackend;
use crate::device::CameraDescriptor;
use crate::error::{CamError, Result};

const PS_QUERY: &str = r"Get-CimInstance Win32_PnPEntity | Where-Object { $_.PNPClass -in @('Camera','Image') -and $_.PNPDeviceID -like 'USB*' } | Select-Object Name, PNPDeviceID, Status | ConvertTo-Json -Compress";

/// Windows backend wrapping PowerShell CIM queries.
#[derive(Default)]
pub struct WindowsBackend;

impl WindowsBackend {
    /// Create the backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn query_pnp_entities(&self) -> Result<Vec<serde_json::Value>> {
        let output = Command::new("powershell")
            .args(["-NoProfile", "-Command", PS_QUERY])
            .output()
            .map_err(|e| CamError::Detection {
                platform: self.name(),
                reason: format!("failed to run powershell: {e}"),
            })?;

        if !output.status.success() {
            return Err(CamError::Detection {
                platform: self.name(),
                reason: format!(
                    "powershell exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        // ConvertTo-Json emits a bare object for a single result.
        let value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|e| CamError::Detection {
                platform: self.name(),
                reason: format!("unparseable powershell output: {e}"),
            })?;
        Ok(match value {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        })
    }
}

impl CameraBackend for WindowsBackend {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn enumerate(&self) -> Result<Vec<CameraDescriptor>> {
        let entities = self.query_pnp_entities()?;

        let cameras: Vec<CameraDescriptor> = entities
            .iter()
            .enumerate()
            .filter_map(|(index, entity)| match describe_entity(index, entity) {
                Some(camera) => Some(camera),
                None => {
                    warn!(index, "Skipping PnP entity with unusable fields");
                    None
                }
            })
            .collect();

        debug!(count = cameras.len(), "Enumerated Windows cameras");
        Ok(cameras)
    }
}

fn describe_entity(index: usize, entity: &serde_json::Value) -> Option<CameraDescriptor> {
    let pnp_device_id = entity.get("PNPDeviceID").and_then(|v| v.as_str())?;
    let label = entity
        .get("Name")
        .and_then(|v| v.as_str())
        .unwrap_or("USB Camera")
        .to_string();

    let (vendor_id, product_id, serial_number) = parse_pnp_device_id(pnp_device_id);

    let mut platform_data = serde_json::Map::new();
    platform_data.insert("pnp_device_id".to_string(), pnp_device_id.into());
    if let Some(status) = entity.get("Status").and_then(|v| v.as_str()) {
        platform_data.insert("status".to_string(), status.into());
    }

    Some(CameraDescriptor {
        system_index: u32::try_from(index).ok()?,
        vendor_id,
        product_id,
        serial_number,
        // The instance path encodes the hub/port topology on Windows.
        port_path: Some(pnp_device_id.to_string()),
        label,
        platform_data,
    })
}

/// Parse `USB\VID_xxxx&PID_yyyy\<tail>` into (vendor, product, serial).
///
/// The tail is a device serial only when Windows did not synthesize it; a
/// synthesized instance ID is all digits and `&` separators.
fn parse_pnp_device_id(device_id: &str) -> (String, String, Option<String>) {
    let mut vendor_id = "unknown".to_string();
    let mut product_id = "unknown".to_string();

    let upper = device_id.to_uppercase();
    if let Some(pos) = upper.find("VID_") {
        let candidate = &device_id[pos + 4..(pos + 8).min(device_id.len())];
        if candidate.len() == 4 && candidate.chars().all(|c| c.is_ascii_hexdigit()) {
            vendor_id = candidate.to_lowercase();
        }
    }
    if let Some(pos) = upper.find("PID_") {
        let candidate = &device_id[pos + 4..(pos + 8).min(device_id.len())];
        if candidate.len() == 4 && candidate.chars().all(|c| c.is_ascii_hexdigit()) {
            product_id = candidate.to_lowercase();
        }
    }

    let serial_number = device_id
        .rsplit('\\')
        .next()
        .map(str::trim)
        .filter(|tail| {
            !tail.is_empty() && !tail.chars().all(|c| c.is_ascii_digit() || c == '&')
        })
        .map(ToString::to_string);

    (vendor_id, product_id, serial_number)
}
