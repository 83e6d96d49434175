//! The beacon tracking loop.
//!
//! A [`Tracker`] is either stopped or running one background worker task. Each
//! worker cycle reads the current settings, runs a scan, shifts the nearest
//! beacon, notifies on change and writes the rendered snapshot to the cache:
//!
//! ```text
//!  settings ──► scan (scan_tick s) ──► dedup + sort ──► shift nearest
//!                                                          │
//!                           cache write ◄── render ◄───────┤
//!                                                          ├─► notify (nearest changed)
//!                                                          └─► beacons_read (list changed)
//! ```
//!
//! Nothing inside a cycle can stop the loop. A failed scan counts as zero
//! beacons after waiting out the tick. Failed notifications and cache writes
//! are logged. The stop signal is only observed between cycles, so an
//! in-flight scan always completes.
//!
//! Lifecycle operations (start, stop, settings updates) hold one lock for
//! their whole duration, including the bounded join in stop. At most one
//! worker, and so one radio session, exists at any time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::beacon::{nearest_changed, order_by_proximity, Beacon};
use crate::cache::{CacheStore, BEACONS_DATA_KEY};
use crate::notify::NotificationSink;
use crate::scanner::ScanExecutor;
use crate::settings::{ScannerSettings, SettingsStore, SettingsUpdate, MAX_SCAN_TICK, MIN_SCAN_TICK};
use crate::types::{ScannerStatus, Snapshot};

/// How long an idle worker (run flag off) waits before checking settings again.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(MIN_SCAN_TICK);

/// Upper bound on how long [`Tracker::stop`] waits for the worker.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(MAX_SCAN_TICK);

/// The worker's own memory between cycles.
#[derive(Debug, Clone, Default)]
pub struct TrackingState {
    /// Beacons of the latest cycle, nearest first.
    pub beacons_list: Vec<Beacon>,
    /// Nearest beacon of the latest cycle.
    pub nearest_beacon: Option<Beacon>,
    /// Nearest beacon of the cycle before.
    pub last_nearest_beacon: Option<Beacon>,
}

/// What one cycle changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// The nearest beacon differs from the previous cycle's.
    pub nearest_changed: bool,
    /// The list is non-empty and differs, by identity and order, from the
    /// previous cycle's.
    pub beacons_changed: bool,
}

impl TrackingState {
    /// Record a cycle's observations and report what changed.
    pub fn advance(&mut self, observed: Vec<Beacon>) -> CycleOutcome {
        let previous = std::mem::replace(&mut self.beacons_list, order_by_proximity(observed));
        self.last_nearest_beacon = self.nearest_beacon.take();
        self.nearest_beacon = self.beacons_list.first().cloned();
        CycleOutcome {
            nearest_changed: nearest_changed(
                self.last_nearest_beacon.as_ref(),
                self.nearest_beacon.as_ref(),
            ),
            beacons_changed: !self.beacons_list.is_empty() && self.beacons_list != previous,
        }
    }

    /// Render the state for readers.
    #[must_use]
    pub fn render(&self) -> Snapshot {
        Snapshot {
            nearest_beacon: self.nearest_beacon.clone(),
            last_nearest_beacon: self.last_nearest_beacon.clone(),
            beacons_list: self.beacons_list.clone(),
        }
    }
}

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Collaborators shared by the tracker and its worker task.
struct Shared {
    settings: Arc<SettingsStore>,
    cache: CacheStore,
    executor: ScanExecutor,
    sink: Arc<dyn NotificationSink>,
}

/// Owns the tracking loop lifecycle.
pub struct Tracker {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    // Readable without the lifecycle lock; stays set until a stop has joined.
    running: AtomicBool,
}

impl Tracker {
    /// Create a stopped tracker.
    pub fn new(
        settings: Arc<SettingsStore>,
        cache: CacheStore,
        executor: ScanExecutor,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                cache,
                executor,
                sink,
            }),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Settings store driving the loop.
    #[must_use]
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.shared.settings
    }

    /// Write an empty snapshot so readers never see a missing cache entry.
    pub async fn reset_snapshot(&self) {
        if let Err(e) = self
            .shared
            .cache
            .write(BEACONS_DATA_KEY, &Snapshot::default())
            .await
        {
            warn!(error = %e, "Initial beacon snapshot not persisted");
        }
    }

    /// Start the worker if it is not running.
    ///
    /// Waits for any stop in progress to finish first.
    pub async fn start(&self) {
        let mut slot = self.worker.lock().await;
        self.spawn_locked(&mut slot);
    }

    /// Stop the worker and wait for it, at most [`STOP_TIMEOUT`].
    ///
    /// A worker still busy after the timeout is aborted, so no scan is in flight
    /// once this returns.
    pub async fn stop(&self) {
        let mut slot = self.worker.lock().await;
        self.join_locked(&mut slot).await;
    }

    /// Whether the worker is alive. A stopping worker counts as running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        match self.worker.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(|w| !w.handle.is_finished()),
            // A lifecycle change is in progress; report the last settled state.
            Err(_) => self.running.load(Ordering::SeqCst),
        }
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ScannerStatus {
        ScannerStatus::from_running(self.is_running())
    }

    /// Current settings.
    pub async fn get_settings(&self) -> ScannerSettings {
        self.shared.settings.get().await
    }

    /// Apply a settings update, then start or stop the loop so that it matches
    /// the stored `run_flag`.
    pub async fn update_settings(&self, patch: &Value) -> SettingsUpdate {
        let mut slot = self.worker.lock().await;
        let update = self.shared.settings.update(patch).await;
        if update.current.run_flag {
            self.spawn_locked(&mut slot);
        } else {
            self.join_locked(&mut slot).await;
        }
        update
    }

    /// Bring the loop in line with the stored `run_flag`, e.g. at boot.
    pub async fn sync_with_settings(&self) {
        self.update_settings(&Value::Null).await;
    }

    /// Latest snapshot written by the worker.
    pub async fn read_snapshot(&self) -> Snapshot {
        self.shared.cache.read(BEACONS_DATA_KEY).await
    }

    fn spawn_locked(&self, slot: &mut Option<Worker>) {
        if slot.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Tracker already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { shared.run(stop_rx).await });
        *slot = Some(Worker { stop_tx, handle });
        self.running.store(true, Ordering::SeqCst);
        info!("Beacon tracker started");
    }

    async fn join_locked(&self, slot: &mut Option<Worker>) {
        let Some(Worker { stop_tx, mut handle }) = slot.take() else {
            return;
        };

        let _ = stop_tx.send(true);
        match timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => info!("Beacon tracker stopped"),
            Ok(Err(e)) => warn!(error = %e, "Beacon tracker worker ended abnormally"),
            Err(_) => {
                warn!(timeout = ?STOP_TIMEOUT, "Beacon tracker did not stop in time, aborting");
                handle.abort();
                // Wait for the cancellation to land before reporting stopped.
                let _ = handle.await;
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Shared {
    async fn run(&self, mut stop_rx: watch::Receiver<bool>) {
        let mut state = TrackingState::default();
        loop {
            if *stop_rx.borrow() {
                break;
            }

            let settings = self.settings.get().await;
            if !settings.run_flag {
                tokio::select! {
                    changed = stop_rx.changed() => if changed.is_err() { break },
                    () = sleep(IDLE_POLL_INTERVAL) => {}
                }
                continue;
            }

            self.cycle(&mut state, &settings).await;
        }
        debug!("Tracker worker exiting");
    }

    async fn cycle(&self, state: &mut TrackingState, settings: &ScannerSettings) {
        let observed = match self.executor.scan(settings).await {
            Ok(beacons) => beacons,
            Err(e) => {
                if e.is_scan_error() {
                    warn!(error = %e, "Radio unavailable, treating cycle as empty");
                } else {
                    error!(error = %e, "Scan failed, treating cycle as empty");
                }
                // Keep the cycle length so a missing radio does not spin the loop.
                sleep(Duration::from_secs(settings.scan_tick)).await;
                Vec::new()
            }
        };

        let outcome = state.advance(observed);
        match &state.nearest_beacon {
            Some(nearest) => debug!(
                mac_address = %nearest.mac_address,
                rssi = nearest.rssi,
                count = state.beacons_list.len(),
                "Scan cycle complete"
            ),
            None => debug!("No beacons found in this scan"),
        }

        let snapshot = state.render();
        if outcome.nearest_changed {
            info!(nearest = ?snapshot.nearest_beacon.as_ref().map(|b| &b.mac_address), "Nearest beacon changed");
            if let Err(e) = self.sink.notify(&snapshot).await {
                warn!(error = %e, "Nearest beacon notification failed");
            }
        }
        if outcome.beacons_changed {
            if let Err(e) = self.sink.beacons_read(&snapshot).await {
                warn!(error = %e, "Beacons read notification failed");
            }
        }

        if let Err(e) = self.cache.write(BEACONS_DATA_KEY, &snapshot).await {
            warn!(error = %e, "Beacon snapshot not cached this cycle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(mac: &str, minor: u16, rssi: i16) -> Beacon {
        Beacon::new(mac, "u", 11, minor, -50, rssi)
    }

    #[test]
    fn test_first_cycle_with_beacons_is_a_change() {
        let mut state = TrackingState::default();
        let outcome = state.advance(vec![beacon("11:11:11", 1, -70), beacon("22:22:22", 2, -30)]);
        assert!(outcome.nearest_changed);
        assert!(outcome.beacons_changed);
        assert_eq!(state.nearest_beacon.as_ref().unwrap().mac_address, "22:22:22");
        assert!(state.last_nearest_beacon.is_none());
    }

    #[test]
    fn test_last_nearest_tracks_previous_cycle() {
        let mut state = TrackingState::default();
        state.advance(vec![beacon("11:11:11", 1, -30)]);
        assert!(!state.advance(vec![beacon("11:11:11", 1, -45)]).nearest_changed);
        assert_eq!(state.last_nearest_beacon.as_ref().unwrap().rssi, -30);

        assert!(state.advance(vec![beacon("11:11:11", 1, -90), beacon("33:33:33", 3, -20)]).nearest_changed);
        assert_eq!(state.last_nearest_beacon.as_ref().unwrap().mac_address, "11:11:11");
        assert_eq!(state.nearest_beacon.as_ref().unwrap().mac_address, "33:33:33");
    }

    #[test]
    fn test_empty_cycles() {
        let mut state = TrackingState::default();
        assert_eq!(state.advance(Vec::new()), CycleOutcome::default());

        state.advance(vec![beacon("11:11:11", 1, -30)]);
        let outcome = state.advance(Vec::new());
        assert!(outcome.nearest_changed);
        assert!(!outcome.beacons_changed);
        assert!(state.nearest_beacon.is_none());
        assert!(state.last_nearest_beacon.is_some());
        assert!(!state.advance(Vec::new()).nearest_changed);
    }

    #[test]
    fn test_beacons_changed_follows_identity_and_order() {
        let mut state = TrackingState::default();
        state.advance(vec![beacon("11:11:11", 1, -30), beacon("22:22:22", 2, -60)]);

        // Same beacons, same order, new RSSI: identity-wise unchanged.
        let outcome = state.advance(vec![beacon("11:11:11", 1, -35), beacon("22:22:22", 2, -65)]);
        assert_eq!(outcome, CycleOutcome::default());

        // Reordering puts a new beacon first.
        let outcome = state.advance(vec![beacon("11:11:11", 1, -70), beacon("22:22:22", 2, -20)]);
        assert!(outcome.beacons_changed);
        assert!(outcome.nearest_changed);

        // A beacon joining behind the nearest changes the list only.
        let outcome = state.advance(vec![
            beacon("11:11:11", 1, -70),
            beacon("22:22:22", 2, -20),
            beacon("33:33:33", 3, -90),
        ]);
        assert!(outcome.beacons_changed);
        assert!(!outcome.nearest_changed);
    }

    #[test]
    fn test_render_exposes_all_three_fields() {
        let mut state = TrackingState::default();
        state.advance(vec![beacon("11:11:11", 1, -30), beacon("11:11:11", 1, -10)]);
        let snapshot = state.render();
        assert_eq!(snapshot.beacons_list.len(), 1);
        assert_eq!(snapshot.nearest_beacon.unwrap().rssi, -30);
        assert!(snapshot.last_nearest_beacon.is_none());
    }
}
