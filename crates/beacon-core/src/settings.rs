//! Scanner settings and the permissive mutation protocol.
//!
//! Updates arrive as loosely-typed JSON objects. Each recognized key is applied
//! according to [`FIELD_POLICIES`]; unknown keys are skipped and keys with the
//! wrong JSON type are reported as [`BeaconError::InvalidSettingsField`] and
//! skipped too. The rest of the update still applies.
//!
//! Settings survive restarts: [`SettingsStore::initialize`] prefers the stored
//! record over the configured defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::cache::{CacheStore, SCANNER_SETTINGS_KEY};
use crate::config::ScannerConfig;
use crate::error::BeaconError;

/// Shortest allowed scan cycle, in seconds.
pub const MIN_SCAN_TICK: u64 = 1;

/// Longest allowed scan cycle, in seconds.
pub const MAX_SCAN_TICK: u64 = 10;

/// Clamp a requested scan tick into `[MIN_SCAN_TICK, MAX_SCAN_TICK]`.
#[must_use]
pub fn clamp_scan_tick(requested: i64) -> u64 {
    u64::try_from(requested).map_or(MIN_SCAN_TICK, |tick| tick.clamp(MIN_SCAN_TICK, MAX_SCAN_TICK))
}

/// Mutable scan parameters.
///
/// Missing fields in a stored record take their default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
#[schema(example = json!({
    "uuid_filter": "ffffffff-bbbb-cccc-dddd-eeeeeeeeeeee",
    "scan_tick": 3,
    "run_flag": true,
    "fake_scan": false,
    "notify_target": null
}))]
pub struct ScannerSettings {
    /// Beacon namespace to match.
    pub uuid_filter: String,

    /// Scan cycle length in seconds, always within `[1, 10]`.
    #[schema(minimum = 1, maximum = 10)]
    pub scan_tick: u64,

    /// Whether the tracking loop should be scanning.
    pub run_flag: bool,

    /// Whether to use the simulated beacon roster.
    pub fake_scan: bool,

    /// Webhook URL for nearest-beacon changes.
    pub notify_target: Option<String>,
}

impl ScannerSettings {
    /// Initial settings from configuration, with the scan tick clamped.
    #[must_use]
    pub fn from_config(config: &ScannerConfig, notify_target: Option<String>) -> Self {
        Self {
            uuid_filter: config.uuid_filter.clone(),
            scan_tick: config.scan_tick.clamp(MIN_SCAN_TICK, MAX_SCAN_TICK),
            run_flag: config.run_flag,
            fake_scan: config.fake_scan,
            notify_target,
        }
    }
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self::from_config(&ScannerConfig::default(), None)
    }
}

/// How one settings key is accepted.
pub struct FieldPolicy {
    /// Lowercase JSON key.
    pub key: &'static str,
    /// Expected JSON type, for error reporting.
    pub expected: &'static str,
    /// Applies the value; returns `false` when the type does not match.
    pub apply: fn(&mut ScannerSettings, &Value) -> bool,
}

/// The accepted settings keys and how each one is applied.
pub const FIELD_POLICIES: &[FieldPolicy] = &[
    FieldPolicy {
        key: "uuid_filter",
        expected: "string",
        apply: |settings, value| match value {
            Value::String(s) => {
                settings.uuid_filter.clone_from(s);
                true
            }
            _ => false,
        },
    },
    FieldPolicy {
        key: "scan_tick",
        expected: "integer",
        apply: |settings, value| {
            if let Some(tick) = value.as_i64() {
                settings.scan_tick = clamp_scan_tick(tick);
                true
            } else if value.as_u64().is_some() {
                settings.scan_tick = MAX_SCAN_TICK;
                true
            } else {
                false
            }
        },
    },
    FieldPolicy {
        key: "run_flag",
        expected: "boolean",
        apply: |settings, value| {
            value.as_bool().is_some_and(|flag| {
                settings.run_flag = flag;
                true
            })
        },
    },
    FieldPolicy {
        key: "fake_scan",
        expected: "boolean",
        apply: |settings, value| {
            value.as_bool().is_some_and(|flag| {
                settings.fake_scan = flag;
                true
            })
        },
    },
    FieldPolicy {
        key: "notify_target",
        expected: "string",
        apply: |settings, value| match value {
            Value::String(s) if s.is_empty() => {
                settings.notify_target = None;
                true
            }
            Value::String(s) => {
                settings.notify_target = Some(s.clone());
                true
            }
            _ => false,
        },
    },
];

/// Apply a sparse, loosely-typed update to `settings`.
///
/// Keys are matched case-insensitively. Returns the rejected fields.
pub fn apply_patch(settings: &mut ScannerSettings, patch: &Map<String, Value>) -> Vec<BeaconError> {
    let mut rejected = Vec::new();
    for (raw_key, value) in patch {
        let key = raw_key.to_lowercase();
        let Some(policy) = FIELD_POLICIES.iter().find(|p| p.key == key) else {
            debug!(field = %raw_key, "Ignoring unknown settings field");
            continue;
        };
        if (policy.apply)(settings, value) {
            debug!(field = policy.key, value = %value, "Settings field updated");
        } else {
            let err = BeaconError::InvalidSettingsField {
                field: raw_key.clone(),
                expected: policy.expected,
            };
            debug!(error = %err, "Ignoring settings field");
            rejected.push(err);
        }
    }
    rejected
}

/// Outcome of a settings update.
#[derive(Debug)]
pub struct SettingsUpdate {
    /// Settings before the update.
    pub previous: ScannerSettings,
    /// Settings as stored after the update.
    pub current: ScannerSettings,
    /// Fields that were present but had the wrong type.
    pub rejected: Vec<BeaconError>,
}

impl SettingsUpdate {
    /// Whether anything changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    /// The new run flag, if it flipped.
    #[must_use]
    pub fn run_flag_change(&self) -> Option<bool> {
        (self.previous.run_flag != self.current.run_flag).then_some(self.current.run_flag)
    }
}

/// Holds the current settings and keeps durable storage in sync.
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<ScannerSettings>,
    // Serializes updates so persisted records land in update order.
    writer: Mutex<()>,
    cache: CacheStore,
}

impl SettingsStore {
    /// Create a store from the persisted settings, or from `initial` when none
    /// can be read, and persist the result.
    ///
    /// A stored `scan_tick` outside `[MIN_SCAN_TICK, MAX_SCAN_TICK]` is clamped.
    pub async fn initialize(initial: ScannerSettings, cache: CacheStore) -> Self {
        let settings = match cache.try_read::<ScannerSettings>(SCANNER_SETTINGS_KEY).await {
            Some(stored) => {
                info!(settings = ?stored, "Restored persisted scanner settings");
                ScannerSettings {
                    scan_tick: stored.scan_tick.clamp(MIN_SCAN_TICK, MAX_SCAN_TICK),
                    ..stored
                }
            }
            None => {
                info!(settings = ?initial, "Initializing scanner settings");
                initial
            }
        };

        if let Err(e) = cache.write(SCANNER_SETTINGS_KEY, &settings).await {
            warn!(error = %e, "Initial scanner settings were not persisted");
        }
        Self {
            current: RwLock::new(settings),
            writer: Mutex::new(()),
            cache,
        }
    }

    /// Current settings.
    pub async fn get(&self) -> ScannerSettings {
        self.current.read().await.clone()
    }

    /// Apply a sparse update and persist the result if it changed.
    ///
    /// A non-object `patch` changes nothing. The new values are visible to
    /// readers before they are persisted; persistence failures are logged and
    /// the in-memory settings keep the new values.
    pub async fn update(&self, patch: &Value) -> SettingsUpdate {
        let _writer = self.writer.lock().await;
        let (previous, next, rejected) = {
            let mut guard = self.current.write().await;
            let previous = guard.clone();
            let mut next = previous.clone();

            let rejected = match patch {
                Value::Object(fields) => apply_patch(&mut next, fields),
                other => {
                    debug!(body = %other, "Settings update is not an object, ignoring");
                    Vec::new()
                }
            };
            guard.clone_from(&next);
            (previous, next, rejected)
        };

        if next != previous {
            info!(settings = ?next, "Updated scanner settings");
            if let Err(e) = self.cache.write(SCANNER_SETTINGS_KEY, &next).await {
                warn!(error = %e, "Scanner settings not persisted, keeping them in memory");
            }
        }

        SettingsUpdate {
            previous,
            current: next,
            rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RetryPolicy;
    use crate::error::Result;
    use crate::storage::{MemoryStorage, Storage};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Storage whose writes always fail.
    struct ReadOnlyStorage;

    impl Storage for ReadOnlyStorage {
        fn put(&self, _key: &str, _value: &Value) -> Result<()> {
            Err(BeaconError::Io(std::io::Error::other("read-only filesystem")))
        }

        fn get(&self, _key: &str) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    async fn store_with(storage: Arc<MemoryStorage>) -> SettingsStore {
        let cache = CacheStore::new(storage, RetryPolicy::new(1, Duration::ZERO));
        SettingsStore::initialize(ScannerSettings::default(), cache).await
    }

    #[test]
    fn test_clamp_scan_tick() {
        assert_eq!(clamp_scan_tick(0), MIN_SCAN_TICK);
        assert_eq!(clamp_scan_tick(-5), MIN_SCAN_TICK);
        assert_eq!(clamp_scan_tick(11), MAX_SCAN_TICK);
        assert_eq!(clamp_scan_tick(4), 4);
    }

    #[tokio::test]
    async fn test_scan_tick_is_clamped_on_update() {
        let store = store_with(Arc::new(MemoryStorage::new())).await;

        let below = i64::try_from(MIN_SCAN_TICK).unwrap() - 1;
        assert_eq!(store.update(&json!({"scan_tick": below})).await.current.scan_tick, MIN_SCAN_TICK);

        let above = i64::try_from(MAX_SCAN_TICK).unwrap() + 1;
        assert_eq!(store.update(&json!({"scan_tick": above})).await.current.scan_tick, MAX_SCAN_TICK);

        assert_eq!(store.update(&json!({"scan_tick": 7})).await.current.scan_tick, 7);
        assert_eq!(store.update(&json!({"scan_tick": u64::MAX})).await.current.scan_tick, MAX_SCAN_TICK);
    }

    #[tokio::test]
    async fn test_mistyped_and_unknown_fields_are_ignored() {
        let store = store_with(Arc::new(MemoryStorage::new())).await;

        let update = store
            .update(&json!({
                "scan_tick": "5",
                "run_flag": 1,
                "colour": "blue",
                "fake_scan": true
            }))
            .await;

        assert_eq!(update.current.scan_tick, ScannerSettings::default().scan_tick);
        assert!(!update.current.run_flag);
        assert!(update.current.fake_scan);
        assert_eq!(update.rejected.len(), 2);
        assert!(update
            .rejected
            .iter()
            .all(|e| matches!(e, BeaconError::InvalidSettingsField { .. })));
    }

    #[tokio::test]
    async fn test_keys_are_case_insensitive() {
        let store = store_with(Arc::new(MemoryStorage::new())).await;
        let update = store.update(&json!({"UUID_FILTER": "abc", "Run_Flag": true})).await;
        assert_eq!(update.current.uuid_filter, "abc");
        assert_eq!(update.run_flag_change(), Some(true));
    }

    #[tokio::test]
    async fn test_changed_settings_are_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(storage.clone()).await;

        store
            .update(&json!({"notify_target": "http://localhost:9000/hook"}))
            .await;
        let stored = storage.get(SCANNER_SETTINGS_KEY).unwrap().unwrap();
        assert_eq!(stored["notify_target"], "http://localhost:9000/hook");

        let cleared = store.update(&json!({"notify_target": ""})).await;
        assert_eq!(cleared.current.notify_target, None);
    }

    #[tokio::test]
    async fn test_unchanged_settings_skip_the_write() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(storage.clone()).await;
        storage.put(SCANNER_SETTINGS_KEY, &json!("sentinel")).unwrap();

        let update = store.update(&json!({"scan_tick": DEFAULT_TICK})).await;
        assert!(!update.changed());
        assert_eq!(storage.get(SCANNER_SETTINGS_KEY).unwrap(), Some(json!("sentinel")));
    }

    const DEFAULT_TICK: u64 = crate::config::DEFAULT_SCAN_TICK;

    #[tokio::test]
    async fn test_non_object_patch_changes_nothing() {
        let store = store_with(Arc::new(MemoryStorage::new())).await;
        let update = store.update(&json!([1, 2, 3])).await;
        assert!(!update.changed());
        assert!(update.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_restart_restores_persisted_settings() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(storage.clone()).await;
        store
            .update(&json!({"scan_tick": 7, "run_flag": true, "uuid_filter": "abc"}))
            .await;
        drop(store);

        let restarted = store_with(storage.clone()).await;
        let settings = restarted.get().await;
        assert_eq!(settings.scan_tick, 7);
        assert!(settings.run_flag);
        assert_eq!(settings.uuid_filter, "abc");
    }

    #[tokio::test]
    async fn test_restored_scan_tick_is_clamped() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put(SCANNER_SETTINGS_KEY, &json!({"scan_tick": 50, "fake_scan": true}))
            .unwrap();

        let store = store_with(storage.clone()).await;
        let settings = store.get().await;
        assert_eq!(settings.scan_tick, MAX_SCAN_TICK);
        assert!(settings.fake_scan);
        // The clamped record is written back.
        assert_eq!(storage.get(SCANNER_SETTINGS_KEY).unwrap().unwrap()["scan_tick"], MAX_SCAN_TICK);
    }

    #[tokio::test]
    async fn test_unreadable_record_falls_back_to_initial() {
        let storage = Arc::new(MemoryStorage::new());
        storage.put(SCANNER_SETTINGS_KEY, &json!("not settings")).unwrap();

        let store = store_with(storage).await;
        assert_eq!(store.get().await, ScannerSettings::default());
    }

    #[tokio::test]
    async fn test_readers_are_not_blocked_by_slow_persistence() {
        let cache = CacheStore::new(Arc::new(ReadOnlyStorage), RetryPolicy::new(5, Duration::from_millis(200)));
        let store = Arc::new(SettingsStore::initialize(ScannerSettings::default(), cache).await);

        let writer = Arc::clone(&store);
        let update = tokio::spawn(async move { writer.update(&json!({"scan_tick": 9})).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The update is still retrying its write, yet readers see the new value.
        let started = Instant::now();
        assert_eq!(store.get().await.scan_tick, 9);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!update.is_finished());

        assert_eq!(update.await.unwrap().current.scan_tick, 9);
    }

    #[test]
    fn test_from_config_clamps_tick() {
        let config = ScannerConfig {
            scan_tick: 60,
            ..ScannerConfig::default()
        };
        assert_eq!(ScannerSettings::from_config(&config, None).scan_tick, MAX_SCAN_TICK);
    }
}
