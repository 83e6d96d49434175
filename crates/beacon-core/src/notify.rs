//! Nearest-beacon change notifications.
//!
//! The tracking loop hands every change to one [`NotificationSink`]. Which
//! binding is used is decided once, from [`NotifyConfig`], by [`build_sink`].
//! Sinks may fail; the loop logs the failure and moves on.
//!
//! Besides nearest-beacon changes the loop reports every cycle whose beacon
//! list changed. Only the event bus forwards those, and it mutes them unless
//! asked otherwise.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::config::{NotifyConfig, NotifyMode};
use crate::error::{BeaconError, Result};
use crate::settings::SettingsStore;
use crate::types::Snapshot;

/// Receives rendered snapshots when the nearest beacon changes.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one change.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::NotificationFailure`] when delivery fails.
    async fn notify(&self, snapshot: &Snapshot) -> Result<()>;

    /// A cycle observed a non-empty beacon list different from the last one.
    ///
    /// Ignored unless the binding overrides it.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::NotificationFailure`] when delivery fails.
    async fn beacons_read(&self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }
}

type Callback = dyn Fn(&Snapshot) + Send + Sync;

/// Invokes an in-process callback synchronously from the worker.
pub struct CallbackSink {
    callback: Box<Callback>,
}

impl CallbackSink {
    /// Wrap `callback`.
    pub fn new(callback: impl Fn(&Snapshot) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Callback that logs the new nearest beacon.
    #[must_use]
    pub fn logging() -> Self {
        Self::new(|snapshot| {
            info!(nearest = ?snapshot.nearest_beacon, "Nearest beacon changed");
        })
    }
}

#[async_trait]
impl NotificationSink for CallbackSink {
    async fn notify(&self, snapshot: &Snapshot) -> Result<()> {
        (self.callback)(snapshot);
        Ok(())
    }
}

/// Kind of event published on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// The nearest beacon changed.
    NearestBeaconChange,
    /// The observed beacon list changed.
    BeaconsRead,
}

/// Envelope published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BeaconEvent {
    /// Component that raised the event.
    pub actor: String,
    /// Intended audience.
    pub target: String,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// When the event was raised.
    pub time: DateTime<Utc>,
    /// Snapshot at the time of the change.
    pub data: Snapshot,
}

impl BeaconEvent {
    fn new(kind: EventKind, snapshot: Snapshot) -> Self {
        Self {
            actor: "beacon_tracker".to_string(),
            target: "system".to_string(),
            kind,
            time: Utc::now(),
            data: snapshot,
        }
    }

    /// Event announcing a nearest-beacon change.
    #[must_use]
    pub fn nearest_changed(snapshot: Snapshot) -> Self {
        Self::new(EventKind::NearestBeaconChange, snapshot)
    }

    /// Event announcing a changed beacon list.
    #[must_use]
    pub fn beacons_read(snapshot: Snapshot) -> Self {
        Self::new(EventKind::BeaconsRead, snapshot)
    }
}

/// Publishes change events on a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBusSink {
    sender: broadcast::Sender<BeaconEvent>,
    muted: HashSet<EventKind>,
}

impl EventBusSink {
    /// Create a bus buffering up to `capacity` events per slow subscriber.
    ///
    /// [`EventKind::BeaconsRead`] starts muted; it fires on most cycles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            muted: HashSet::from([EventKind::BeaconsRead]),
        }
    }

    /// Never publish events of `kind`.
    #[must_use]
    pub fn mute(mut self, kind: EventKind) -> Self {
        self.muted.insert(kind);
        self
    }

    /// Publish events of `kind` again.
    #[must_use]
    pub fn unmute(mut self, kind: EventKind) -> Self {
        self.muted.remove(&kind);
        self
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BeaconEvent> {
        self.sender.subscribe()
    }

    /// Publish `event`; having no subscribers is not an error.
    pub fn publish(&self, event: BeaconEvent) {
        if self.muted.contains(&event.kind) {
            return;
        }
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "Published beacon event"),
            Err(_) => debug!("Beacon event published with no subscribers"),
        }
    }
}

#[async_trait]
impl NotificationSink for EventBusSink {
    async fn notify(&self, snapshot: &Snapshot) -> Result<()> {
        self.publish(BeaconEvent::nearest_changed(snapshot.clone()));
        Ok(())
    }

    async fn beacons_read(&self, snapshot: &Snapshot) -> Result<()> {
        self.publish(BeaconEvent::beacons_read(snapshot.clone()));
        Ok(())
    }
}

/// POSTs the snapshot as JSON to the settings' `notify_target`.
pub struct WebhookSink {
    client: reqwest::Client,
    settings: Arc<SettingsStore>,
}

impl WebhookSink {
    /// Create a webhook sink reading its target from `settings` on every change.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: Arc<SettingsStore>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("beacon-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, snapshot: &Snapshot) -> Result<()> {
        let Some(target) = self.settings.get().await.notify_target else {
            debug!("No notify target configured, skipping webhook");
            return Ok(());
        };

        let response = self
            .client
            .post(&target)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(snapshot)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BeaconError::NotificationFailure(format!(
                "webhook {target} answered {status}"
            )));
        }
        debug!(%target, %status, "Webhook delivered");
        Ok(())
    }
}

/// Build the sink selected by `config`.
///
/// In event-bus mode the returned sink publishes on `events`, so subscribers
/// obtained from it see the changes.
///
/// # Errors
///
/// Returns an error if the webhook client cannot be built.
pub fn build_sink(
    config: &NotifyConfig,
    settings: Arc<SettingsStore>,
    events: &EventBusSink,
) -> Result<Arc<dyn NotificationSink>> {
    let sink: Arc<dyn NotificationSink> = match config.mode {
        NotifyMode::None => Arc::new(NullSink),
        NotifyMode::Callback => Arc::new(CallbackSink::logging()),
        NotifyMode::EventBus => Arc::new(events.clone()),
        NotifyMode::Webhook => Arc::new(WebhookSink::new(settings, config.timeout())?),
    };
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::Beacon;
    use crate::cache::{CacheStore, RetryPolicy};
    use crate::settings::ScannerSettings;
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn snapshot() -> Snapshot {
        Snapshot {
            nearest_beacon: Some(Beacon::new("11:11:11", "u", 11, 1, -50, -30)),
            last_nearest_beacon: None,
            beacons_list: vec![Beacon::new("11:11:11", "u", 11, 1, -50, -30)],
        }
    }

    async fn settings_store(target: Option<&str>) -> Arc<SettingsStore> {
        let cache = CacheStore::new(Arc::new(MemoryStorage::new()), RetryPolicy::new(1, Duration::ZERO));
        let settings = ScannerSettings {
            notify_target: target.map(str::to_string),
            ..ScannerSettings::default()
        };
        Arc::new(SettingsStore::initialize(settings, cache).await)
    }

    #[tokio::test]
    async fn test_callback_sink_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sink = CallbackSink::new(move |snap| {
            assert!(snap.nearest_beacon.is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sink.notify(&snapshot()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBusSink::new(8);
        let mut rx = bus.subscribe();

        bus.notify(&snapshot()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::NearestBeaconChange);
        assert_eq!(event.actor, "beacon_tracker");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "NEAREST_BEACON_CHANGE");
        assert_eq!(json["data"]["nearest_beacon"]["mac_address"], "11:11:11");
    }

    #[tokio::test]
    async fn test_event_bus_without_subscribers_is_ok() {
        let bus = EventBusSink::new(8);
        assert!(bus.notify(&snapshot()).await.is_ok());
    }

    #[tokio::test]
    async fn test_muted_events_are_dropped() {
        let bus = EventBusSink::new(8).mute(EventKind::NearestBeaconChange);
        let mut rx = bus.subscribe();
        bus.notify(&snapshot()).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_beacons_read_is_muted_by_default() {
        let bus = EventBusSink::new(8);
        let mut rx = bus.subscribe();
        bus.beacons_read(&snapshot()).await.unwrap();
        assert!(rx.try_recv().is_err());

        // Muting one kind leaves the other flowing.
        bus.notify(&snapshot()).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::NearestBeaconChange);
    }

    #[tokio::test]
    async fn test_unmuted_beacons_read_is_published() {
        let bus = EventBusSink::new(8).unmute(EventKind::BeaconsRead);
        let mut rx = bus.subscribe();
        bus.beacons_read(&snapshot()).await.unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::BeaconsRead);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BEACONS_READ");
        assert_eq!(json["data"]["beacons_list"][0]["mac_address"], "11:11:11");
    }

    #[tokio::test]
    async fn test_other_sinks_ignore_beacons_read() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sink = CallbackSink::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.beacons_read(&snapshot()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(NullSink.beacons_read(&snapshot()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_without_target_is_skipped() {
        let sink = WebhookSink::new(settings_store(None).await, Duration::from_secs(1)).unwrap();
        assert!(sink.notify(&snapshot()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_notification_failure() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let store = settings_store(Some("http://127.0.0.1:9/hook")).await;
        let sink = WebhookSink::new(store, Duration::from_secs(1)).unwrap();
        let err = sink.notify(&snapshot()).await.unwrap_err();
        assert!(matches!(err, BeaconError::NotificationFailure(_)));
    }

    #[tokio::test]
    async fn test_build_sink_for_each_mode() {
        let store = settings_store(None).await;
        let events = EventBusSink::new(8);
        for mode in [
            NotifyMode::None,
            NotifyMode::Callback,
            NotifyMode::EventBus,
            NotifyMode::Webhook,
        ] {
            let config = NotifyConfig {
                mode,
                ..NotifyConfig::default()
            };
            let sink = build_sink(&config, store.clone(), &events).unwrap();
            assert!(sink.notify(&snapshot()).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_event_bus_mode_shares_the_given_bus() {
        let events = EventBusSink::new(8);
        let mut rx = events.subscribe();
        let config = NotifyConfig {
            mode: NotifyMode::EventBus,
            ..NotifyConfig::default()
        };
        let sink = build_sink(&config, settings_store(None).await, &events).unwrap();

        sink.notify(&snapshot()).await.unwrap();
        assert!(rx.recv().await.is_ok());
    }
}
