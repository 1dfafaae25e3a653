//! Integration tests for the orchestrator and monitoring loop.
//!
//! Tests drive the full stack (backend -> registry -> events) with the mock
//! backend standing in for hardware.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use stablecam::backend::{CameraBackend, MockBackend};
use stablecam::{
    CameraDescriptor, CameraRegistry, DeviceStatus, EventKind, MonitorOptions, RegisteredCamera,
    Result, StableCam,
};

fn camera(serial: &str, index: u32) -> CameraDescriptor {
    CameraDescriptor {
        system_index: index,
        vendor_id: "046d".to_string(),
        product_id: "085b".to_string(),
        serial_number: Some(serial.to_string()),
        port_path: None,
        label: format!("Camera {serial}"),
        platform_data: serde_json::Map::new(),
    }
}

/// Keeps a handle on the mock while the orchestrator owns the boxed backend.
struct SharedBackend(Arc<MockBackend>);

impl CameraBackend for SharedBackend {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn enumerate(&self) -> Result<Vec<CameraDescriptor>> {
        self.0.enumerate()
    }
}

fn orchestrator(temp: &TempDir, mock: &Arc<MockBackend>) -> StableCam {
    let registry = CameraRegistry::open(temp.path().join("registry.json")).unwrap();
    StableCam::with_parts(
        Box::new(SharedBackend(Arc::clone(mock))),
        registry,
        MonitorOptions {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        },
    )
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

// ===== Registration Semantics =====

#[test]
fn test_register_is_idempotent_across_instances() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockBackend::new());

    let first = orchestrator(&temp, &mock);
    let id = first.register(&camera("AAA", 0)).unwrap();
    drop(first);

    let second = orchestrator(&temp, &mock);
    assert_eq!(second.register(&camera("AAA", 2)).unwrap(), id);
    assert_eq!(second.list().len(), 1);
}

#[test]
fn test_devices_without_stable_identity_always_register_fresh() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockBackend::new());
    let cam = orchestrator(&temp, &mock);

    let anonymous = CameraDescriptor {
        serial_number: None,
        port_path: None,
        ..camera("ignored", 0)
    };

    let first = cam.register(&anonymous).unwrap();
    let second = cam.register(&anonymous).unwrap();
    assert_ne!(first, second);
    assert_eq!(cam.list().len(), 2);
}

#[test]
fn test_get_by_id_tracks_live_index_after_reconcile() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockBackend::with_devices(vec![camera("AAA", 7)]));
    let cam = orchestrator(&temp, &mock);

    let id = cam.register(&camera("AAA", 0)).unwrap();
    cam.reconcile_once().unwrap();

    let record = cam.get_by_id(&id).unwrap().unwrap();
    assert_eq!(record.device_info.system_index, 7);
}

// ===== Monitoring Loop =====

#[test]
fn test_unplug_and_replug_emits_ordered_events() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockBackend::with_devices(vec![
        camera("AAA", 0),
        camera("BBB", 1),
    ]));
    let cam = orchestrator(&temp, &mock);

    let id_a = cam.register(&camera("AAA", 0)).unwrap();
    let id_b = cam.register(&camera("BBB", 1)).unwrap();

    let log: Arc<Mutex<Vec<(EventKind, String)>>> = Arc::new(Mutex::new(Vec::new()));
    for kind in EventKind::ALL {
        let log = Arc::clone(&log);
        cam.subscribe(
            kind,
            Arc::new(move |device: &RegisteredCamera| {
                log.lock().unwrap().push((kind, device.stable_id.clone()));
            }),
        );
    }

    cam.start().unwrap();

    // Unplug B.
    mock.set_devices(vec![camera("AAA", 0)]);
    assert!(wait_until(Duration::from_secs(5), || {
        log.lock()
            .unwrap()
            .iter()
            .any(|(kind, id)| *kind == EventKind::Disconnect && id == &id_b)
    }));

    // Plug B back in.
    mock.set_devices(vec![camera("AAA", 0), camera("BBB", 3)]);
    assert!(wait_until(Duration::from_secs(5), || {
        log.lock()
            .unwrap()
            .iter()
            .any(|(kind, id)| *kind == EventKind::Connect && id == &id_b)
    }));

    cam.stop();

    let log = log.lock().unwrap();
    // A never changed state, so it never appears.
    assert!(log.iter().all(|(_, id)| id != &id_a));

    // For B: disconnect before reconnect, each paired with a status change.
    let b_events: Vec<EventKind> = log
        .iter()
        .filter(|(_, id)| id == &id_b)
        .map(|(kind, _)| *kind)
        .collect();
    assert_eq!(
        b_events,
        vec![
            EventKind::Disconnect,
            EventKind::StatusChange,
            EventKind::Connect,
            EventKind::StatusChange,
        ]
    );

    assert_eq!(
        cam.get_by_id(&id_b).unwrap().unwrap().status,
        DeviceStatus::Connected
    );
}

#[test]
fn test_loop_survives_transient_backend_failures() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockBackend::with_devices(vec![camera("AAA", 0)]));
    let cam = orchestrator(&temp, &mock);
    let id = cam.register(&camera("AAA", 0)).unwrap();

    cam.start().unwrap();
    mock.fail_next(3);
    mock.set_devices(vec![]);

    // Despite the injected failures the loop keeps going and eventually
    // notices the unplug.
    assert!(wait_until(Duration::from_secs(5), || {
        cam.get_by_id(&id)
            .map(|record| {
                record.is_some_and(|r| r.status == DeviceStatus::Disconnected)
            })
            .unwrap_or(false)
    }));
    assert!(cam.is_running());
    cam.stop();
    assert!(!cam.is_running());
}

#[test]
fn test_loop_gives_up_on_persistent_failures() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockBackend::new());
    mock.fail_always("no usb stack");

    let registry = CameraRegistry::open(temp.path().join("registry.json")).unwrap();
    let cam = StableCam::with_parts(
        Box::new(SharedBackend(Arc::clone(&mock))),
        registry,
        MonitorOptions {
            poll_interval: Duration::from_millis(1),
            max_consecutive_failures: 3,
            max_backoff: Duration::from_millis(2),
            stop_grace: Duration::from_secs(1),
        },
    );

    cam.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || !cam.is_running()));
    // At least the threshold number of attempts happened before giving up.
    assert!(mock.call_count() >= 3);
}
