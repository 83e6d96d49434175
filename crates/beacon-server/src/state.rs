//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use beacon_core::{
    build_sink, AppConfig, CacheStore, EventBusSink, NotifyMode, ScanExecutor, ScannerSettings,
    SettingsStore, Storage, Tracker,
};
use tracing::info;

/// Buffered events per slow event-bus subscriber.
const EVENT_BUS_CAPACITY: usize = 64;

/// Shared application state handle.
pub type SharedState = Arc<AppState>;

/// Everything the handlers need.
pub struct AppState {
    /// The tracking loop and its settings.
    pub tracker: Arc<Tracker>,
    /// Event bus for nearest-beacon changes.
    pub events: EventBusSink,
    /// Whether real scans can run.
    pub radio_available: bool,
    started_at: Instant,
}

impl AppState {
    /// Wire the tracker from `config` on top of `storage` and `executor`.
    ///
    /// Restores persisted settings (configuration fills in when there are none)
    /// and seeds an empty snapshot.
    /// The loop itself is not started; call [`Tracker::sync_with_settings`].
    ///
    /// # Errors
    ///
    /// Returns an error if the notification sink cannot be built.
    pub async fn build(
        config: &AppConfig,
        storage: Arc<dyn Storage>,
        executor: ScanExecutor,
    ) -> anyhow::Result<SharedState> {
        let cache = CacheStore::new(storage, config.storage.retry_policy());
        let initial = ScannerSettings::from_config(&config.scanner, config.notify.target.clone());
        let settings = Arc::new(SettingsStore::initialize(initial, cache.clone()).await);

        let events = EventBusSink::new(EVENT_BUS_CAPACITY);
        let sink = build_sink(&config.notify, Arc::clone(&settings), &events)?;
        if config.notify.mode == NotifyMode::EventBus {
            spawn_event_logger(&events);
        }

        let radio_available = executor.has_radio();
        let tracker = Arc::new(Tracker::new(settings, cache, executor, sink));
        tracker.reset_snapshot().await;

        info!(
            notify_mode = ?config.notify.mode,
            radio_available,
            "Application state ready"
        );

        Ok(Arc::new(Self {
            tracker,
            events,
            radio_available,
            started_at: Instant::now(),
        }))
    }

    /// Seconds since the state was built.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Log every published event until the bus closes.
fn spawn_event_logger(events: &EventBusSink) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(
                    kind = ?event.kind,
                    actor = %event.actor,
                    nearest = ?event.data.nearest_beacon.as_ref().map(|b| &b.mac_address),
                    "Beacon event"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
