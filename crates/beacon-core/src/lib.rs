//! # beacon-core
//!
//! Core logic for the beacon-tracker service.
//!
//! This crate provides:
//! - Beacon identity and nearest-first ordering
//! - The background tracking loop with nearest-beacon change detection
//! - Scanner settings with a permissive, clamped mutation protocol
//! - A retrying cache over durable JSON storage
//! - Pluggable change notifications (callback, event bus, webhook)
//!
//! ## Architecture
//!
//! - [`beacon`] - Beacon value type, identity, ordering and change test
//! - [`tracker`] - Tracking loop lifecycle and per-cycle bookkeeping
//! - [`scanner`] - Scan cycle executor (radio or simulated)
//! - [`radio`] - Radio capability and iBeacon frame parsing
//! - [`settings`] - Scanner settings store and mutation policy
//! - [`cache`] - Read/write-with-retry over [`storage`]
//! - [`storage`] - Durable key/value JSON storage
//! - [`notify`] - Notification sinks
//! - [`config`] - Application configuration loading and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod beacon;
pub mod cache;
pub mod config;
pub mod error;
pub mod notify;
pub mod radio;
pub mod scanner;
pub mod settings;
pub mod storage;
pub mod tracker;
pub mod types;

// Re-export primary types for convenience
pub use beacon::{nearest_changed, order_by_proximity, Beacon};
pub use cache::{CacheStore, RetryPolicy, BEACONS_DATA_KEY, SCANNER_SETTINGS_KEY};
pub use config::{AppConfig, ConfigError, ConfigResult, NotifyConfig, NotifyMode};
pub use error::{BeaconError, Result};
pub use notify::{
    build_sink, BeaconEvent, CallbackSink, EventBusSink, EventKind, NotificationSink, NullSink,
    WebhookSink,
};
#[cfg(feature = "bluetooth")]
pub use radio::BluezRadio;
pub use radio::{parse_ibeacon, BeaconRadio, Observation};
pub use scanner::{ScanExecutor, SIMULATED_ADDRESSES};
pub use settings::{ScannerSettings, SettingsStore, SettingsUpdate, MAX_SCAN_TICK, MIN_SCAN_TICK};
pub use storage::{default_data_dir, FileStorage, MemoryStorage, Storage};
pub use tracker::{CycleOutcome, Tracker, TrackingState};
pub use types::{ScannerStatus, Snapshot};
