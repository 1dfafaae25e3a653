//! Monitor/orchestrator: the public face of StableCam.
//!
//! Bridges live hardware enumeration to the registry and event bus, and runs
//! the background reconciliation loop. All public methods are safe to call
//! concurrently with the running loop: persisted state is guarded by the
//! registry's file-lock discipline, the in-memory overlay by a single coarse
//! mutex.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::backend::{CameraBackend, platform_backend};
use crate::device::{CameraDescriptor, DeviceStatus, RegisteredCamera};
use crate::error::{CamError, Result};
use crate::events::{EventBus, EventHandler, EventKind};
use crate::registry::CameraRegistry;

/// Tunables for the background monitoring loop.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Delay between reconciliation ticks when healthy (default: 2s).
    pub poll_interval: Duration,
    /// Consecutive detection failures after which the loop stops itself
    /// (default: 10).
    pub max_consecutive_failures: u32,
    /// Ceiling for the exponential backoff delay (default: 30s).
    pub max_backoff: Duration,
    /// How long `stop()` waits for the worker to exit (default: 5s).
    pub stop_grace: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_consecutive_failures: 10,
            max_backoff: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl MonitorOptions {
    /// Delay before the next tick given the consecutive-failure count.
    ///
    /// Healthy loops poll at `poll_interval`; each consecutive failure
    /// doubles the delay, capped at `max_backoff`.
    #[must_use]
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.poll_interval;
        }
        let factor = 2u32.saturating_pow(consecutive_failures.min(16));
        self.poll_interval
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Cooperative stop signal with an interruptible wait.
///
/// The worker sleeps on the condvar rather than a plain `sleep`, so `stop()`
/// wakes it immediately instead of after the current poll delay.
#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    fn reset(&self) {
        *self.stopped.lock().expect("stop signal lock poisoned") = false;
    }

    fn trigger(&self) {
        *self.stopped.lock().expect("stop signal lock poisoned") = true;
        self.condvar.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.stopped.lock().expect("stop signal lock poisoned")
    }

    /// Wait up to `timeout`, returning early (and true) if stop was
    /// requested.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.stopped.lock().expect("stop signal lock poisoned");
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .expect("stop signal lock poisoned");
        *guard
    }
}

/// State shared between the public API and the background worker.
struct Shared {
    registry: CameraRegistry,
    backend: Box<dyn CameraBackend>,
    events: EventBus,
    /// Live descriptors (with transient system_index) keyed by stable ID,
    /// rebuilt every reconciliation tick. Never persisted.
    live: Mutex<HashMap<String, CameraDescriptor>>,
}

impl Shared {
    fn detect(&self) -> Result<Vec<CameraDescriptor>> {
        match self.backend.enumerate() {
            Ok(devices) => {
                debug!(count = devices.len(), "Detected camera devices");
                Ok(devices)
            }
            // Present one uniform detection-error kind regardless of the
            // OS-specific failure shape.
            Err(e @ CamError::Detection { .. }) => Err(e),
            Err(other) => Err(CamError::Detection {
                platform: self.backend.name(),
                reason: other.to_string(),
            }),
        }
    }

    /// One reconciliation pass over a consistent detect()+list() snapshot.
    ///
    /// Transitions for different devices are independent; a registry failure
    /// on one record is logged and does not abort the others. Only snapshot
    /// acquisition failures fail the tick (and feed the loop's backoff).
    fn reconcile_once(&self) -> Result<()> {
        let detected = self.detect()?;
        let registered = self.registry.get_all()?;

        let live_by_fingerprint: HashMap<String, &CameraDescriptor> = detected
            .iter()
            .map(|descriptor| (descriptor.fingerprint(), descriptor))
            .collect();

        for mut record in registered {
            let stable_id = record.stable_id.clone();

            if let Some(descriptor) = live_by_fingerprint.get(&record.fingerprint()) {
                self.live
                    .lock()
                    .expect("live overlay lock poisoned")
                    .insert(stable_id.clone(), (*descriptor).clone());

                if record.device_info.platform_data != descriptor.platform_data {
                    if let Err(e) =
                        self.registry
                            .update_platform_data(&stable_id, &descriptor.platform_data)
                    {
                        warn!(%stable_id, error = %e, "Failed to persist platform data");
                    }
                }

                if record.status != DeviceStatus::Connected {
                    if let Err(e) = self.registry.update_status(&stable_id, DeviceStatus::Connected)
                    {
                        warn!(%stable_id, error = %e, "Failed to persist connect transition");
                        continue;
                    }
                    info!(%stable_id, "Device connected");
                    let payload = self.event_payload(&record, Some(descriptor));
                    self.events.emit(EventKind::Connect, &payload);
                    self.events.emit(EventKind::StatusChange, &payload);
                }
            } else if record.status == DeviceStatus::Connected {
                self.live
                    .lock()
                    .expect("live overlay lock poisoned")
                    .remove(&stable_id);

                if let Err(e) = self.registry.update_status(&stable_id, DeviceStatus::Disconnected)
                {
                    warn!(%stable_id, error = %e, "Failed to persist disconnect transition");
                    continue;
                }
                info!(%stable_id, "Device disconnected");
                record.status = DeviceStatus::Disconnected;
                self.events.emit(EventKind::Disconnect, &record);
                self.events.emit(EventKind::StatusChange, &record);
            }
        }

        Ok(())
    }

    /// Build the event payload for a connect transition: the persisted
    /// record with the live descriptor's transient fields overlaid.
    fn event_payload(
        &self,
        record: &RegisteredCamera,
        descriptor: Option<&CameraDescriptor>,
    ) -> RegisteredCamera {
        let mut payload = record.clone();
        payload.status = DeviceStatus::Connected;
        payload.last_seen = Some(chrono::Utc::now());
        if let Some(descriptor) = descriptor {
            payload.device_info.system_index = descriptor.system_index;
            payload.device_info.platform_data = descriptor.platform_data.clone();
        }
        payload
    }
}

/// Main orchestrator integrating detection, registry, and events.
///
/// # Example
///
/// ```rust,ignore
/// let cam = StableCam::new()?;
/// cam.subscribe(EventKind::Connect, Arc::new(|device| {
///     println!("connected: {}", device.stable_id);
/// }));
/// cam.start()?;
/// ```
pub struct StableCam {
    shared: Arc<Shared>,
    options: MonitorOptions,
    stop: Arc<StopSignal>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StableCam {
    /// Create an orchestrator with the platform backend and the default
    /// registry location.
    pub fn new() -> Result<Self> {
        Ok(Self::with_parts(
            platform_backend()?,
            CameraRegistry::open_default()?,
            MonitorOptions::default(),
        ))
    }

    /// Create an orchestrator with the platform backend and an explicit
    /// registry path.
    pub fn with_registry_path(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::with_parts(
            platform_backend()?,
            CameraRegistry::open(path)?,
            MonitorOptions::default(),
        ))
    }

    /// Create an orchestrator from explicit parts. This is the injection
    /// seam used by tests and embedders.
    #[must_use]
    pub fn with_parts(
        backend: Box<dyn CameraBackend>,
        registry: CameraRegistry,
        options: MonitorOptions,
    ) -> Self {
        debug!(registry = %registry.path().display(), backend = backend.name(), "StableCam initialized");
        Self {
            shared: Arc::new(Shared {
                registry,
                backend,
                events: EventBus::new(),
                live: Mutex::new(HashMap::new()),
            }),
            options,
            stop: Arc::new(StopSignal::default()),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Override the poll interval. Takes effect the next time the loop is
    /// started.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.options.poll_interval = interval;
    }

    /// Detect currently connected cameras. Does not touch the registry.
    pub fn detect(&self) -> Result<Vec<CameraDescriptor>> {
        self.shared.detect()
    }

    /// Register a device, returning its stable ID.
    ///
    /// If the fingerprint already matches a registered record, that record
    /// is marked Connected and its existing ID returned without emitting
    /// events; a genuinely new registration emits a connect + status-change
    /// pair.
    pub fn register(&self, descriptor: &CameraDescriptor) -> Result<String> {
        if let Some(existing) = self.shared.registry.find_by_hardware_id(descriptor)? {
            self.shared
                .registry
                .update_status(&existing.stable_id, DeviceStatus::Connected)?;
            self.shared
                .live
                .lock()
                .expect("live overlay lock poisoned")
                .insert(existing.stable_id.clone(), descriptor.clone());
            info!(stable_id = %existing.stable_id, "Device already registered");
            return Ok(existing.stable_id);
        }

        let stable_id = self.shared.registry.register(descriptor)?;
        self.shared
            .live
            .lock()
            .expect("live overlay lock poisoned")
            .insert(stable_id.clone(), descriptor.clone());

        if let Some(record) = self.shared.registry.get_by_id(&stable_id)? {
            let payload = self.shared.event_payload(&record, Some(descriptor));
            self.shared.events.emit(EventKind::Connect, &payload);
            self.shared.events.emit(EventKind::StatusChange, &payload);
        }

        Ok(stable_id)
    }

    /// All registered devices.
    ///
    /// Best-effort: registry failures are logged and yield an empty list
    /// rather than propagating. This is the one call site that favors
    /// availability over strict error propagation, for UI listing purposes.
    #[must_use]
    pub fn list(&self) -> Vec<RegisteredCamera> {
        match self.shared.registry.get_all() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Failed to list registered devices");
                Vec::new()
            }
        }
    }

    /// Look up a device by stable ID, overlaying the live system index and
    /// platform data when the device is currently tracked as connected.
    pub fn get_by_id(&self, stable_id: &str) -> Result<Option<RegisteredCamera>> {
        let Some(mut record) = self.shared.registry.get_by_id(stable_id)? else {
            return Ok(None);
        };

        let live = self.shared.live.lock().expect("live overlay lock poisoned");
        if let Some(descriptor) = live.get(stable_id) {
            record.device_info.system_index = descriptor.system_index;
            record.device_info.platform_data = descriptor.platform_data.clone();
        }
        Ok(Some(record))
    }

    /// Subscribe a handler to device events.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        self.shared.events.subscribe(kind, handler);
    }

    /// Remove a previously subscribed handler.
    pub fn unsubscribe(&self, kind: EventKind, handler: &EventHandler) {
        self.shared.events.unsubscribe(kind, handler);
    }

    /// Run one reconciliation tick synchronously.
    ///
    /// The background loop calls this on every poll; it is public so
    /// embedders (and tests) can drive reconciliation on their own schedule.
    pub fn reconcile_once(&self) -> Result<()> {
        self.shared.reconcile_once()
    }

    /// Whether the background loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the background monitoring loop.
    ///
    /// Idempotent: calling while already running logs a warning and returns.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Monitoring already running");
            return Ok(());
        }
        self.stop.reset();

        let shared = Arc::clone(&self.shared);
        let options = self.options.clone();
        let stop = Arc::clone(&self.stop);
        let running = Arc::clone(&self.running);

        let handle = std::thread::Builder::new()
            .name("stablecam-monitor".to_string())
            .spawn(move || monitor_loop(&shared, &options, &stop, &running))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CamError::Io(e)
            })?;

        *self.worker.lock().expect("worker lock poisoned") = Some(handle);
        info!("Started device monitoring");
        Ok(())
    }

    /// Stop the background monitoring loop.
    ///
    /// Signals the worker cooperatively and waits up to the configured grace
    /// period; a worker that does not exit promptly is logged and detached,
    /// never force-killed mid-write.
    pub fn stop(&self) {
        let handle = self.worker.lock().expect("worker lock poisoned").take();
        if handle.is_none() && !self.running.load(Ordering::SeqCst) {
            warn!("Monitoring not running");
            return;
        }

        self.stop.trigger();
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = handle {
            let deadline = Instant::now() + self.options.stop_grace;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("Monitor thread did not stop gracefully");
            }
        }
        info!("Stopped device monitoring");
    }
}

impl Drop for StableCam {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

/// Background worker: reconcile, back off on failure, self-stop after too
/// many consecutive failures.
fn monitor_loop(
    shared: &Arc<Shared>,
    options: &MonitorOptions,
    stop: &Arc<StopSignal>,
    running: &Arc<AtomicBool>,
) {
    debug!("Device monitoring loop started");
    let mut consecutive_failures: u32 = 0;

    while !stop.is_set() {
        match shared.reconcile_once() {
            Ok(()) => consecutive_failures = 0,
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    error = %e,
                    consecutive_failures,
                    "Reconciliation tick failed"
                );
                if consecutive_failures >= options.max_consecutive_failures {
                    // Operator-visible: the absence of further events must
                    // be explainable.
                    error!(
                        consecutive_failures,
                        threshold = options.max_consecutive_failures,
                        "Detection keeps failing, stopping device monitoring"
                    );
                    break;
                }
            }
        }

        if stop.wait_timeout(options.backoff_delay(consecutive_failures)) {
            break;
        }
    }

    running.store(false, Ordering::SeqCst);
    debug!("Device monitoring loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn descriptor(serial: &str, index: u32) -> CameraDescriptor {
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

    fn orchestrator(temp: &TempDir, backend: MockBackend) -> StableCam {
        let registry = CameraRegistry::open(temp.path().join("registry.json")).unwrap();
        StableCam::with_parts(Box::new(backend), registry, MonitorOptions::default())
    }

    /// Counts events per kind and records affected stable IDs.
    struct EventProbe {
        counts: Arc<Mutex<HashMap<EventKind, Vec<String>>>>,
    }

    impl EventProbe {
        fn attach(cam: &StableCam) -> Self {
            let counts: Arc<Mutex<HashMap<EventKind, Vec<String>>>> =
                Arc::new(Mutex::new(HashMap::new()));
            for kind in EventKind::ALL {
                let counts = Arc::clone(&counts);
                cam.subscribe(
                    kind,
                    Arc::new(move |device: &RegisteredCamera| {
                        counts
                            .lock()
                            .unwrap()
                            .entry(kind)
                            .or_default()
                            .push(device.stable_id.clone());
                    }),
                );
            }
            Self { counts }
        }

        fn take(&self, kind: EventKind) -> Vec<String> {
            self.counts
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .unwrap_or_default()
        }

        fn reset(&self) {
            self.counts.lock().unwrap().clear();
        }
    }

    #[test]
    fn test_detect_delegates_to_backend() {
        let temp = TempDir::new().unwrap();
        let backend = MockBackend::with_devices(vec![descriptor("A", 0), descriptor("B", 1)]);
        let cam = orchestrator(&temp, backend);

        let detected = cam.detect().unwrap();
        assert_eq!(detected.len(), 2);
    }

    #[test]
    fn test_detect_error_is_uniform() {
        let temp = TempDir::new().unwrap();
        let backend = MockBackend::new();
        backend.fail_always("usb subsystem gone");
        let cam = orchestrator(&temp, backend);

        let err = cam.detect().unwrap_err();
        assert!(matches!(err, CamError::Detection { .. }));
    }

    #[test]
    fn test_register_new_emits_connect_and_status_change() {
        let temp = TempDir::new().unwrap();
        let cam = orchestrator(&temp, MockBackend::new());
        let probe = EventProbe::attach(&cam);

        let id = cam.register(&descriptor("A", 0)).unwrap();
        assert_eq!(probe.take(EventKind::Connect), vec![id.clone()]);
        assert_eq!(probe.take(EventKind::StatusChange), vec![id]);
        assert!(probe.take(EventKind::Disconnect).is_empty());
    }

    #[test]
    fn test_register_existing_returns_same_id_without_events() {
        let temp = TempDir::new().unwrap();
        let cam = orchestrator(&temp, MockBackend::new());

        let first = cam.register(&descriptor("A", 0)).unwrap();
        let probe = EventProbe::attach(&cam);
        let second = cam.register(&descriptor("A", 3)).unwrap();

        assert_eq!(first, second);
        assert!(probe.take(EventKind::Connect).is_empty());
        assert_eq!(cam.list().len(), 1);
    }

    #[test]
    fn test_get_by_id_overlays_live_system_index() {
        let temp = TempDir::new().unwrap();
        let cam = orchestrator(&temp, MockBackend::new());

        let id = cam.register(&descriptor("A", 5)).unwrap();
        let record = cam.get_by_id(&id).unwrap().unwrap();
        // Persisted as 0, overlaid from the live cache as 5.
        assert_eq!(record.device_info.system_index, 5);

        assert!(cam.get_by_id("stable-cam-999").unwrap().is_none());
    }

    #[test]
    fn test_reconciliation_disconnect_and_reconnect() {
        let temp = TempDir::new().unwrap();
        let backend = MockBackend::with_devices(vec![
            descriptor("A", 0),
            descriptor("B", 1),
            descriptor("C", 2),
        ]);
        let cam = orchestrator(&temp, backend);

        let id_a = cam.register(&descriptor("A", 0)).unwrap();
        let id_b = cam.register(&descriptor("B", 1)).unwrap();
        let id_c = cam.register(&descriptor("C", 2)).unwrap();
        let probe = EventProbe::attach(&cam);

        // Tick 1: all three present, everything already Connected: silence.
        cam.reconcile_once().unwrap();
        assert!(probe.take(EventKind::StatusChange).is_empty());

        // Tick 2: B vanishes.
        let registry = CameraRegistry::open(temp.path().join("registry.json")).unwrap();
        let cam2 = StableCam::with_parts(
            Box::new(MockBackend::with_devices(vec![
                descriptor("A", 0),
                descriptor("C", 2),
            ])),
            registry,
            MonitorOptions::default(),
        );
        let probe2 = EventProbe::attach(&cam2);
        cam2.reconcile_once().unwrap();

        assert_eq!(probe2.take(EventKind::Disconnect), vec![id_b.clone()]);
        assert_eq!(probe2.take(EventKind::StatusChange), vec![id_b.clone()]);
        assert_eq!(
            cam2.get_by_id(&id_b).unwrap().unwrap().status,
            DeviceStatus::Disconnected
        );
        assert_eq!(
            cam2.get_by_id(&id_a).unwrap().unwrap().status,
            DeviceStatus::Connected
        );

        // Tick 3: B returns.
        probe2.reset();
        let registry = CameraRegistry::open(temp.path().join("registry.json")).unwrap();
        let cam3 = StableCam::with_parts(
            Box::new(MockBackend::with_devices(vec![
                descriptor("A", 0),
                descriptor("B", 4),
                descriptor("C", 2),
            ])),
            registry,
            MonitorOptions::default(),
        );
        let probe3 = EventProbe::attach(&cam3);
        cam3.reconcile_once().unwrap();

        assert_eq!(probe3.take(EventKind::Connect), vec![id_b.clone()]);
        assert_eq!(probe3.take(EventKind::StatusChange), vec![id_b.clone()]);
        let record = cam3.get_by_id(&id_b).unwrap().unwrap();
        assert_eq!(record.status, DeviceStatus::Connected);
        // Reconnected at a different system index; overlay tracks it.
        assert_eq!(record.device_info.system_index, 4);
        assert_eq!(
            cam3.get_by_id(&id_c).unwrap().unwrap().status,
            DeviceStatus::Connected
        );
    }

    #[test]
    fn test_reconcile_persists_changed_platform_data() {
        let temp = TempDir::new().unwrap();

        let mut with_driver = descriptor("A", 0);
        with_driver
            .platform_data
            .insert("driver".to_string(), "uvcvideo".into());

        let backend = MockBackend::with_devices(vec![with_driver.clone()]);
        let cam = orchestrator(&temp, backend);
        cam.register(&descriptor("A", 0)).unwrap();

        cam.reconcile_once().unwrap();

        let record = cam.get_by_id("stable-cam-001").unwrap().unwrap();
        assert_eq!(
            record.device_info.platform_data.get("driver"),
            Some(&serde_json::Value::from("uvcvideo"))
        );
    }

    #[test]
    fn test_reconcile_fails_tick_on_detection_error() {
        let temp = TempDir::new().unwrap();
        let backend = MockBackend::new();
        backend.fail_always("broken");
        let cam = orchestrator(&temp, backend);

        assert!(cam.reconcile_once().is_err());
    }

    #[test]
    fn test_backoff_delay_schedule() {
        let options = MonitorOptions {
            poll_interval: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            ..Default::default()
        };

        assert_eq!(options.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(options.backoff_delay(1), Duration::from_secs(4));
        assert_eq!(options.backoff_delay(2), Duration::from_secs(8));
        assert_eq!(options.backoff_delay(3), Duration::from_secs(16));
        // Capped at the ceiling.
        assert_eq!(options.backoff_delay(4), Duration::from_secs(30));
        assert_eq!(options.backoff_delay(30), Duration::from_secs(30));
    }

    #[test]
    fn test_loop_self_stops_after_failure_threshold() {
        let temp = TempDir::new().unwrap();
        let backend = MockBackend::new();
        backend.fail_always("permanently broken");

        let registry = CameraRegistry::open(temp.path().join("registry.json")).unwrap();
        let cam = StableCam::with_parts(
            Box::new(backend),
            registry,
            MonitorOptions {
                poll_interval: Duration::from_millis(1),
                max_consecutive_failures: 3,
                max_backoff: Duration::from_millis(2),
                stop_grace: Duration::from_secs(1),
            },
        );

        cam.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while cam.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!cam.is_running(), "loop must stop itself on a broken backend");
    }

    #[test]
    fn test_failure_counter_resets_on_success() {
        let temp = TempDir::new().unwrap();
        let backend = MockBackend::new();
        // Two failures, then steady success: must not trip a threshold of 3.
        backend.fail_next(2);

        let registry = CameraRegistry::open(temp.path().join("registry.json")).unwrap();
        let cam = StableCam::with_parts(
            Box::new(backend),
            registry,
            MonitorOptions {
                poll_interval: Duration::from_millis(1),
                max_consecutive_failures: 3,
                max_backoff: Duration::from_millis(2),
                stop_grace: Duration::from_secs(1),
            },
        );

        cam.start().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(cam.is_running(), "recovered backend must keep the loop alive");
        cam.stop();
    }

    #[test]
    fn test_start_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let cam = orchestrator(&temp, MockBackend::new());

        cam.start().unwrap();
        cam.start().unwrap(); // warns, does not spawn a second worker
        assert!(cam.is_running());
        cam.stop();
        assert!(!cam.is_running());
    }

    #[test]
    fn test_stop_when_not_running_is_harmless() {
        let temp = TempDir::new().unwrap();
        let cam = orchestrator(&temp, MockBackend::new());
        cam.stop();
        assert!(!cam.is_running());
    }

    /// Lets a test keep a handle on the mock while the orchestrator owns the
    /// boxed backend.
    struct SharedBackend(Arc<MockBackend>);

    impl CameraBackend for SharedBackend {
        fn name(&self) -> &'static str {
            self.0.name()
        }

        fn enumerate(&self) -> Result<Vec<CameraDescriptor>> {
            self.0.enumerate()
        }
    }

    #[test]
    fn test_monitoring_loop_emits_events_end_to_end() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockBackend::with_devices(vec![descriptor("A", 0)]));
        let registry = CameraRegistry::open(temp.path().join("registry.json")).unwrap();
        let cam = StableCam::with_parts(
            Box::new(SharedBackend(Arc::clone(&mock))),
            registry,
            MonitorOptions {
                poll_interval: Duration::from_millis(5),
                ..Default::default()
            },
        );

        let id = cam.register(&descriptor("A", 0)).unwrap();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let disconnects_clone = Arc::clone(&disconnects);
        cam.subscribe(
            EventKind::Disconnect,
            Arc::new(move |_| {
                disconnects_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        cam.start().unwrap();

        // Unplug the only camera; the loop should notice within a few ticks.
        mock.set_devices(vec![]);

        let deadline = Instant::now() + Duration::from_secs(5);
        while disconnects.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        cam.stop();

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        let record = cam.get_by_id(&id).unwrap().unwrap();
        assert_eq!(record.status, DeviceStatus::Disconnected);
    }
}
