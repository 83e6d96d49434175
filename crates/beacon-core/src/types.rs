//! Shared types and OpenAPI schemas.
//!
//! The [`Snapshot`] is the only view of tracking state that leaves the worker.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::beacon::Beacon;

/// Rendered tracking state as exposed to readers and notification sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Snapshot {
    /// Strongest beacon of the latest cycle, if any.
    #[serde(default)]
    pub nearest_beacon: Option<Beacon>,

    /// Nearest beacon of the cycle before the latest one.
    #[serde(default)]
    pub last_nearest_beacon: Option<Beacon>,

    /// Every beacon of the latest cycle, nearest first.
    #[serde(default)]
    pub beacons_list: Vec<Beacon>,
}

/// Whether the tracking loop is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScannerStatus {
    /// The worker task is alive.
    Running,
    /// No worker task exists.
    Stopped,
}

impl ScannerStatus {
    /// Status matching a running flag.
    #[must_use]
    pub const fn from_running(running: bool) -> Self {
        if running {
            Self::Running
        } else {
            Self::Stopped
        }
    }
}
