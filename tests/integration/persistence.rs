//! Integration tests for registry durability and recovery.
//!
//! Tests exercise the on-disk JSON document across process-style restarts
//! (drop and reopen), including corruption handling.

use std::fs;

use tempfile::TempDir;

use stablecam::{CameraDescriptor, CameraRegistry, DeviceStatus};

fn camera(serial: &str, index: u32) -> CameraDescriptor {
    CameraDescriptor {
        system_index: index,
        vendor_id: "046d".to_string(),
        product_id: "085b".to_string(),
        serial_number: Some(serial.to_string()),
        port_path: Some(format!("/sys/bus/usb/devices/1-{index}")),
        label: format!("Camera {serial}"),
        platform_data: serde_json::Map::new(),
    }
}

// ===== Durability Across Restarts =====

#[test]
fn test_ids_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.json");

    let id_a;
    let id_b;
    {
        let registry = CameraRegistry::open(&path).unwrap();
        id_a = registry.register(&camera("AAA", 0)).unwrap();
        id_b = registry.register(&camera("BBB", 1)).unwrap();
    }

    let registry = CameraRegistry::open(&path).unwrap();
    assert_eq!(registry.get_all().unwrap().len(), 2);

    // Same hardware keeps its ID even at a different system index.
    let again = registry.register(&camera("AAA", 5)).unwrap();
    assert_eq!(again, id_a);
    assert_ne!(id_a, id_b);
}

#[test]
fn test_status_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.json");

    let id = {
        let registry = CameraRegistry::open(&path).unwrap();
        let id = registry.register(&camera("AAA", 0)).unwrap();
        registry
            .update_status(&id, DeviceStatus::Disconnected)
            .unwrap();
        id
    };

    let registry = CameraRegistry::open(&path).unwrap();
    let record = registry.get_by_id(&id).unwrap().unwrap();
    assert_eq!(record.status, DeviceStatus::Disconnected);
}

// ===== On-Disk Format =====

#[test]
fn test_registry_file_is_flat_json() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.json");

    let registry = CameraRegistry::open(&path).unwrap();
    let id = registry.register(&camera("AAA", 0)).unwrap();

    let document: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

    assert_eq!(document["version"], "1.0");
    assert!(document["created_at"].is_string());
    assert!(document["last_modified"].is_string());

    let record = &document["devices"][&id];
    // Hardware fields sit directly on the record, not nested.
    assert_eq!(record["vendor_id"], "046d");
    assert_eq!(record["serial_number"], "AAA");
    assert_eq!(record["status"], "connected");
    // The OS enumeration index is transient and never written.
    assert!(record.get("system_index").is_none());
}

// ===== Corruption Recovery =====

#[test]
fn test_corrupt_registry_backed_up_and_reset() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.json");

    {
        let registry = CameraRegistry::open(&path).unwrap();
        registry.register(&camera("AAA", 0)).unwrap();
    }
    fs::write(&path, "{ this is not json").unwrap();

    let registry = CameraRegistry::open(&path).unwrap();
    // No parseable backup exists yet, so the registry starts empty and IDs
    // restart from the beginning.
    assert!(registry.get_all().unwrap().is_empty());
    let id = registry.register(&camera("BBB", 0)).unwrap();
    assert_eq!(id, "stable-cam-001");

    // The corrupt payload was preserved for debugging.
    let backups: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_name().to_string_lossy().contains("corrupt"))
        .collect();
    assert_eq!(backups.len(), 1);
    let saved = fs::read_to_string(backups[0].path()).unwrap();
    assert_eq!(saved, "{ this is not json");
}

#[test]
fn test_recovery_restores_newest_parseable_backup() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.json");

    {
        let registry = CameraRegistry::open(&path).unwrap();
        registry.register(&camera("AAA", 0)).unwrap();
    }

    // An earlier corruption event left a valid snapshot behind.
    let snapshot = fs::read_to_string(&path).unwrap();
    fs::write(
        temp.path().join("registry.json.corrupt-20200101T000000000"),
        &snapshot,
    )
    .unwrap();

    fs::write(&path, "garbage").unwrap();

    let registry = CameraRegistry::open(&path).unwrap();
    let devices = registry.get_all().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(
        devices[0].device_info.serial_number.as_deref(),
        Some("AAA")
    );
}

#[test]
fn test_missing_required_keys_is_corruption() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.json");

    // Valid JSON, wrong shape: no version/devices keys.
    fs::write(&path, r#"{"cameras": []}"#).unwrap();

    let registry = CameraRegistry::open(&path).unwrap();
    assert!(registry.get_all().unwrap().is_empty());

    let backed_up = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(std::result::Result::ok)
        .any(|e| e.file_name().to_string_lossy().contains("corrupt"));
    assert!(backed_up);
}
