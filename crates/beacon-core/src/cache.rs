//! Read/write-with-retry wrapper over [`Storage`].
//!
//! The tracking loop must not stall or crash on a transient filesystem hiccup,
//! so every access is retried a bounded number of times with a fixed backoff.
//! Writes that still fail are abandoned with a warning; reads that still fail
//! fall back to the type's default value.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::error::{BeaconError, Result};
use crate::storage::Storage;

/// Cache key of the rendered beacon snapshot.
pub const BEACONS_DATA_KEY: &str = "beacons_data";

/// Cache key of the persisted scanner settings.
pub const SCANNER_SETTINGS_KEY: &str = "scanner_settings";

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub attempts: u32,
    /// Delay between two attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy; `attempts` is raised to 1 if zero.
    #[must_use]
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }
}

/// Snapshot and settings cache backed by durable storage.
#[derive(Clone)]
pub struct CacheStore {
    storage: Arc<dyn Storage>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Wrap a storage backend with the given retry policy.
    pub fn new(storage: Arc<dyn Storage>, retry: RetryPolicy) -> Self {
        Self { storage, retry }
    }

    /// Retry policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Serialize `value` and store it under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::PersistenceFailure`] once every attempt failed.
    /// Callers log it and carry on.
    pub async fn write<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_value(value)?;
        let mut last_error = String::new();

        for attempt in 1..=self.retry.attempts {
            match self.storage.put(key, &json) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(key, attempt, error = %e, "Cache write failed, retrying");
                    last_error = e.to_string();
                }
            }
            if attempt < self.retry.attempts {
                sleep(self.retry.backoff).await;
            }
        }

        error!(key, attempts = self.retry.attempts, "Cache write abandoned");
        Err(BeaconError::PersistenceFailure {
            key: key.to_string(),
            attempts: self.retry.attempts,
            message: last_error,
        })
    }

    /// Load the value stored under `key`.
    ///
    /// Returns `T::default()` when nothing is stored or when every attempt failed.
    pub async fn read<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.try_read(key).await.unwrap_or_default()
    }

    /// Load the value stored under `key`, distinguishing "nothing stored" and
    /// "storage unavailable" from a successful read.
    pub async fn try_read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        for attempt in 1..=self.retry.attempts {
            let outcome = self.storage.get(key).and_then(|value| {
                value
                    .map(serde_json::from_value::<T>)
                    .transpose()
                    .map_err(BeaconError::from)
            });
            match outcome {
                Ok(value) => return value,
                Err(e) => warn!(key, attempt, error = %e, "Cache read failed, retrying"),
            }
            if attempt < self.retry.attempts {
                sleep(self.retry.backoff).await;
            }
        }

        error!(key, attempts = self.retry.attempts, "Cache read abandoned, using default");
        None
    }
}
