//! Persistent device registry with crash-safe JSON storage.
//!
//! The registry file is the sole source of truth for stable-ID assignments.
//! Every mutation runs under an exclusive advisory file lock (the sole
//! mutual-exclusion mechanism across process boundaries) and is written with
//! an atomic temp-write/verify/rename protocol, so a reader can never observe
//! a half-written document. Corrupt files are backed up and recovery is
//! attempted from prior backups before falling back to an empty registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::device::{CameraDescriptor, DeviceStatus, RegisteredCamera, allocate_stable_id};
use crate::error::{CamError, Result};

/// Format version written to new registry files.
pub const REGISTRY_VERSION: &str = "1.0";

/// Default registry location relative to the home directory.
pub const DEFAULT_REGISTRY_RELATIVE: &str = ".stablecam/registry.json";

/// Infix used for timestamped backups of corrupt registry files.
const BACKUP_INFIX: &str = ".corrupt-";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// On-disk registry document.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    version: String,
    devices: BTreeMap<String, RegisteredCamera>,
    #[serde(default = "default_timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    last_modified: DateTime<Utc>,
}

impl RegistryDocument {
    fn empty() -> Self {
        let now = Utc::now();
        Self {
            version: REGISTRY_VERSION.to_string(),
            devices: BTreeMap::new(),
            created_at: now,
            last_modified: now,
        }
    }
}

/// Advisory lock held for the duration of one registry operation.
///
/// Dropping the guard releases the lock.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Durable, corruption-resistant store of registered cameras.
///
/// Safe to use from multiple threads and multiple processes pointed at the
/// same file; cross-process exclusion relies entirely on the advisory lock
/// taken per operation.
pub struct CameraRegistry {
    path: PathBuf,
    dir: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl CameraRegistry {
    /// Open (creating if necessary) the registry at the default location,
    /// `~/.stablecam/registry.json`.
    pub fn open_default() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CamError::Other("Could not determine home directory".to_string()))?;
        Self::open(home.join(DEFAULT_REGISTRY_RELATIVE))
    }

    /// Open (creating if necessary) a registry at an explicit path.
    ///
    /// Creates the parent directory, initializes an empty document when the
    /// file does not exist, and runs corruption recovery when it exists but
    /// does not parse.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let mut lock_name = path
            .file_name()
            .map_or_else(|| "registry.json".into(), ToOwned::to_owned);
        lock_name.push(".lock");
        let lock_path = dir.join(lock_name);

        let registry = Self {
            path,
            dir,
            lock_path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };

        fs::create_dir_all(&registry.dir).map_err(|e| registry.classify_io(e))?;

        // Initialize or recover eagerly so later reads start from a valid
        // document.
        let _guard = registry.acquire_lock()?;
        let (doc, dirty) = registry.load_or_recover()?;
        if dirty {
            registry.write_atomic(&doc)?;
        }
        drop(_guard);

        debug!(path = %registry.path.display(), "Opened camera registry");
        Ok(registry)
    }

    /// Override the bounded wait applied to lock acquisition.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Path of the backing registry file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // === Public contract ===

    /// Register a device, assigning a stable ID.
    ///
    /// Idempotent by hardware fingerprint: if a record with a matching
    /// fingerprint already exists, its status is set to Connected and its
    /// existing stable ID is returned. Otherwise the smallest unused
    /// `stable-cam-NNN` is allocated and a Connected record persisted. The
    /// whole check-then-allocate-then-persist sequence holds the exclusive
    /// lock, so concurrent callers cannot allocate the same ID.
    pub fn register(&self, descriptor: &CameraDescriptor) -> Result<String> {
        self.with_document(|doc, dirty| {
            let fingerprint = descriptor.fingerprint();

            if let Some(existing) = doc
                .devices
                .values_mut()
                .find(|record| record.fingerprint() == fingerprint)
            {
                existing.status = DeviceStatus::Connected;
                existing.last_seen = Some(Utc::now());
                *dirty = true;
                info!(
                    stable_id = %existing.stable_id,
                    "Device already registered, marked connected"
                );
                return Ok(existing.stable_id.clone());
            }

            let existing_ids: BTreeSet<String> = doc.devices.keys().cloned().collect();
            let stable_id = allocate_stable_id(&existing_ids);
            let now = Utc::now();
            let record = RegisteredCamera {
                stable_id: stable_id.clone(),
                device_info: descriptor.clone(),
                status: DeviceStatus::Connected,
                registered_at: now,
                last_seen: Some(now),
            };
            doc.devices.insert(stable_id.clone(), record);
            *dirty = true;

            info!(%stable_id, label = %descriptor.label, "Registered new device");
            Ok(stable_id)
        })
    }

    /// All registered devices, in no guaranteed order.
    pub fn get_all(&self) -> Result<Vec<RegisteredCamera>> {
        self.with_document(|doc, _| Ok(doc.devices.values().cloned().collect()))
    }

    /// Look up one device by stable ID.
    pub fn get_by_id(&self, stable_id: &str) -> Result<Option<RegisteredCamera>> {
        self.with_document(|doc, _| Ok(doc.devices.get(stable_id).cloned()))
    }

    /// Update the status of a registered device.
    ///
    /// Setting Connected also refreshes `last_seen`. Fails with
    /// [`CamError::DeviceNotFound`] for unknown IDs.
    pub fn update_status(&self, stable_id: &str, status: DeviceStatus) -> Result<()> {
        self.with_document(|doc, dirty| {
            let record = doc
                .devices
                .get_mut(stable_id)
                .ok_or_else(|| CamError::DeviceNotFound {
                    stable_id: stable_id.to_string(),
                })?;

            record.status = status;
            if status == DeviceStatus::Connected {
                record.last_seen = Some(Utc::now());
            }
            *dirty = true;

            debug!(%stable_id, %status, "Updated device status");
            Ok(())
        })
    }

    /// Replace the persisted `platform_data` for a device when it changed.
    ///
    /// Returns whether a write happened. `system_index` is deliberately not
    /// part of this update; it is never persisted as authoritative.
    pub fn update_platform_data(
        &self,
        stable_id: &str,
        platform_data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        self.with_document(|doc, dirty| {
            let record = doc
                .devices
                .get_mut(stable_id)
                .ok_or_else(|| CamError::DeviceNotFound {
                    stable_id: stable_id.to_string(),
                })?;

            if &record.device_info.platform_data == platform_data {
                return Ok(false);
            }
            record.device_info.platform_data = platform_data.clone();
            *dirty = true;
            debug!(%stable_id, "Persisted updated platform data");
            Ok(true)
        })
    }

    /// Find a registered device whose fingerprint matches the descriptor's.
    ///
    /// Linear scan; tier-3 (salted) fingerprints never match anything, by
    /// design.
    pub fn find_by_hardware_id(
        &self,
        descriptor: &CameraDescriptor,
    ) -> Result<Option<RegisteredCamera>> {
        let fingerprint = descriptor.fingerprint();
        self.with_document(|doc, _| {
            Ok(doc
                .devices
                .values()
                .find(|record| record.fingerprint() == fingerprint)
                .cloned())
        })
    }

    // === Locking ===

    /// Acquire the exclusive advisory lock with a bounded wait.
    ///
    /// The lock lives on a sibling `.lock` file rather than the registry
    /// file itself so the atomic rename-replace never swaps the locked inode
    /// out from under a concurrent holder.
    fn acquire_lock(&self) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| self.classify_io(e))?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock() {
                Ok(()) => return Ok(LockGuard { file }),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        warn!(path = %self.lock_path.display(), "Registry lock acquisition timed out");
                        return Err(CamError::LockTimeout {
                            path: self.lock_path.clone(),
                            waited: self.lock_timeout,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(TryLockError::Error(e)) => return Err(self.classify_io(e)),
            }
        }
    }

    /// Run one operation against the locked, loaded document, persisting it
    /// afterwards when the operation (or corruption recovery) dirtied it.
    fn with_document<T>(
        &self,
        op: impl FnOnce(&mut RegistryDocument, &mut bool) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.acquire_lock()?;
        let (mut doc, mut dirty) = self.load_or_recover()?;
        let out = op(&mut doc, &mut dirty)?;
        if dirty {
            self.write_atomic(&doc)?;
        }
        Ok(out)
    }

    // === Persistence protocol ===

    /// Load the registry document, running corruption recovery if needed.
    ///
    /// The returned flag is true when the document differs from what is on
    /// disk (fresh, or recovered) and must be persisted.
    fn load_or_recover(&self) -> Result<(RegistryDocument, bool)> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Registry file missing, starting empty");
                return Ok((RegistryDocument::empty(), true));
            }
            Err(e) => return Err(self.classify_io(e)),
        };

        match parse_document(&bytes) {
            Ok(doc) => Ok((doc, false)),
            Err(reason) => {
                warn!(
                    path = %self.path.display(),
                    %reason,
                    "Registry file is corrupt, attempting recovery"
                );
                Ok((self.recover_from_corruption(&reason)?, true))
            }
        }
    }

    /// Corruption recovery state machine: back up the corrupt file, then try
    /// prior backups newest-first, then fall back to an empty registry.
    ///
    /// Best effort by design: recent writes that never made it into a backup
    /// may be lost, but the registry never refuses to start.
    fn recover_from_corruption(&self, reason: &str) -> Result<RegistryDocument> {
        let backup_path = self.backup_path_for_now();
        fs::copy(&self.path, &backup_path).map_err(|e| self.classify_io(e))?;
        warn!(
            backup = %backup_path.display(),
            %reason,
            "Backed up corrupt registry file"
        );

        for candidate in self.backup_candidates()? {
            if candidate == backup_path {
                continue;
            }
            let Ok(bytes) = fs::read(&candidate) else {
                continue;
            };
            match parse_document(&bytes) {
                Ok(doc) => {
                    warn!(
                        restored_from = %candidate.display(),
                        devices = doc.devices.len(),
                        "Recovered registry from backup"
                    );
                    return Ok(doc);
                }
                Err(parse_err) => {
                    debug!(
                        candidate = %candidate.display(),
                        reason = %parse_err,
                        "Backup candidate did not parse"
                    );
                }
            }
        }

        warn!("No usable backup found, starting with an empty registry");
        Ok(RegistryDocument::empty())
    }

    fn backup_path_for_now(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| "registry.json".into(), ToOwned::to_owned);
        name.push(format!("{BACKUP_INFIX}{stamp}"));
        self.dir.join(name)
    }

    /// Timestamped backups in the registry directory, newest first.
    fn backup_candidates(&self) -> Result<Vec<PathBuf>> {
        let prefix = {
            let mut name = self
                .path
                .file_name()
                .map_or_else(|| "registry.json".into(), ToOwned::to_owned);
            name.push(BACKUP_INFIX);
            name.to_string_lossy().into_owned()
        };

        let mut candidates: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map_err(|e| self.classify_io(e))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(&prefix))
            })
            .collect();

        // Backup names embed a sortable timestamp; newest first.
        candidates.sort();
        candidates.reverse();
        Ok(candidates)
    }

    /// Atomic-replace write: temp file in the same directory, flush and sync
    /// to stable storage, verify the temp parses back, then rename over the
    /// target.
    fn write_atomic(&self, doc: &RegistryDocument) -> Result<()> {
        let mut out = RegistryDocument {
            version: doc.version.clone(),
            devices: doc.devices.clone(),
            created_at: doc.created_at,
            last_modified: Utc::now(),
        };
        if out.version.is_empty() {
            out.version = REGISTRY_VERSION.to_string();
        }

        let json = serde_json::to_string_pretty(&out)?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| self.classify_io(e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.flush())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| self.classify_io(e))?;

        let written = fs::read(tmp.path()).map_err(|e| self.classify_io(e))?;
        parse_document(&written).map_err(|reason| CamError::RegistryCorruption {
            path: tmp.path().to_path_buf(),
            reason: format!("verification of written registry failed: {reason}"),
        })?;

        tmp.persist(&self.path)
            .map_err(|e| self.classify_io(e.error))?;
        debug!(path = %self.path.display(), devices = out.devices.len(), "Persisted registry");
        Ok(())
    }

    /// Distinguish permission problems from other IO failures so callers do
    /// not treat "no write access" like "the file was garbled".
    fn classify_io(&self, e: std::io::Error) -> CamError {
        if e.kind() == ErrorKind::PermissionDenied {
            CamError::RegistryPermission {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        } else {
            CamError::Io(e)
        }
    }
}

/// Parse and shape-check a registry document.
///
/// Requires a JSON object with a string `version` and an object `devices`;
/// each record must carry its required fields. Failures are reported as a
/// reason string so the caller can route them into the recovery path.
fn parse_document(bytes: &[u8]) -> std::result::Result<RegistryDocument, String> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {e}"))?;

    let obj = value
        .as_object()
        .ok_or_else(|| "top-level value is not an object".to_string())?;
    if !obj.get("version").is_some_and(serde_json::Value::is_string) {
        return Err("missing required key: version".to_string());
    }
    if !obj.get("devices").is_some_and(serde_json::Value::is_object) {
        return Err("missing required key: devices".to_string());
    }

    serde_json::from_value(value).map_err(|e| format!("invalid device record: {e}"))
}
