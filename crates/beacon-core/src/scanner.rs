//! Scan cycle executor.
//!
//! One call to [`ScanExecutor::scan`] is one scan cycle: it takes exactly
//! `scan_tick` seconds and returns the deduplicated, unsorted beacons observed
//! in that window. The cycle length is the loop's pacing; there is no separate
//! timer.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

use crate::beacon::{dedup_first_seen, Beacon};
use crate::error::{BeaconError, Result};
use crate::radio::BeaconRadio;
use crate::settings::ScannerSettings;

/// Addresses of the simulated beacon roster.
pub const SIMULATED_ADDRESSES: [&str; 3] = ["11:11:11", "22:22:22", "33:33:33"];

/// Runs real or simulated scan cycles.
#[derive(Clone, Default)]
pub struct ScanExecutor {
    radio: Option<Arc<dyn BeaconRadio>>,
}

impl std::fmt::Debug for ScanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanExecutor")
            .field("radio_available", &self.radio.is_some())
            .finish()
    }
}

impl ScanExecutor {
    /// Executor backed by `radio` for real scans.
    pub fn new(radio: Arc<dyn BeaconRadio>) -> Self {
        Self { radio: Some(radio) }
    }

    /// Executor without a radio; only simulated scans succeed.
    #[must_use]
    pub fn simulated_only() -> Self {
        Self::default()
    }

    /// Whether real scans can run.
    #[must_use]
    pub fn has_radio(&self) -> bool {
        self.radio.is_some()
    }

    /// Run one scan cycle with `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ScanUnavailable`] if a real scan is requested and
    /// the radio is missing or the session cannot start.
    pub async fn scan(&self, settings: &ScannerSettings) -> Result<Vec<Beacon>> {
        let tick = Duration::from_secs(settings.scan_tick);
        if settings.fake_scan {
            sleep(tick).await;
            return Ok(simulated_roster(&settings.uuid_filter));
        }

        let radio = self
            .radio
            .as_ref()
            .ok_or_else(|| BeaconError::ScanUnavailable("no Bluetooth radio configured".into()))?;
        radio_scan(radio.as_ref(), &settings.uuid_filter, tick).await
    }
}

/// Collect observations from `radio` for `duration`.
async fn radio_scan(radio: &dyn BeaconRadio, namespace: &str, duration: Duration) -> Result<Vec<Beacon>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    radio.start_session(namespace, tx).await?;
    sleep(duration).await;
    radio.stop_session().await;

    let mut observed = Vec::new();
    while let Ok(obs) = rx.try_recv() {
        observed.push(Beacon::from(obs));
    }
    debug!(count = observed.len(), "Radio session finished");
    Ok(dedup_first_seen(observed))
}

/// The fixed three-beacon roster with random signal strengths in `[-100, -1]`.
#[must_use]
pub fn simulated_roster(uuid_filter: &str) -> Vec<Beacon> {
    let mut rng = rand::rng();
    SIMULATED_ADDRESSES
        .iter()
        .zip(1u16..)
        .map(|(address, minor)| {
            Beacon::new(*address, uuid_filter, 11, minor, -50, rng.random_range(-100..=-1))
        })
        .collect()
}
