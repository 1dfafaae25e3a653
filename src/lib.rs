//! StableCam library - persistent stable IDs for USB cameras.
//!
//! Cameras are fingerprinted by hardware identity (serial number when
//! available, physical port otherwise) and assigned stable IDs of the form
//! `stable-cam-001` that survive re-enumeration, reboots, and port-index
//! shuffles. The registry is a crash-safe JSON file; a background monitor
//! reconciles it against live hardware and publishes connect/disconnect
//! events.
//!
//! # Modules
//!
//! - `backend`: Platform enumeration backends (Linux/macOS/Windows/mock)
//! - `device`: Device descriptors, fingerprints, and stable ID allocation
//! - `error`: Error types with user-recoverable hints
//! - `events`: Connect/disconnect/status-change event bus
//! - `monitor`: The `StableCam` orchestrator and monitoring loop
//! - `registry`: Persistent camera registry with corruption recovery
#![forbid(unsafe_code)]

pub mod backend;
pub mod cli;
pub mod device;
pub mod error;
pub mod events;
pub mod logging;
pub mod monitor;
pub mod registry;

pub use backend::CameraBackend;
pub use device::{CameraDescriptor, DeviceStatus, RegisteredCamera};
pub use error::{CamError, Result};
pub use events::{EventBus, EventHandler, EventKind};
pub use monitor::{MonitorOptions, StableCam};
pub use registry::CameraRegistry;
