//! Radio capability used by real scans.
//!
//! A [`BeaconRadio`] runs one scan session at a time: it is started with a
//! namespace filter and a channel, pushes every matching advertisement into the
//! channel, and is stopped at the end of the cycle.
//!
//! With the `bluetooth` feature, [`BluezRadio`] implements the capability on top
//! of BlueZ through `bluer`. Only Linux is supported.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::beacon::Beacon;
use crate::error::Result;

/// Apple's Bluetooth SIG company identifier.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// iBeacon frame type and length bytes following the company identifier.
const IBEACON_PREFIX: [u8; 2] = [0x02, 0x15];

/// Length of the iBeacon manufacturer payload.
const IBEACON_PAYLOAD_LEN: usize = 23;

/// One advertisement delivered during a radio session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Advertiser address.
    pub address: String,
    /// Measured signal strength in dBm.
    pub rssi: i16,
    /// Beacon namespace.
    pub uuid: String,
    /// Major group number.
    pub major: u16,
    /// Minor group number.
    pub minor: u16,
    /// Calibrated signal strength in dBm.
    pub tx_power: i16,
}

impl From<Observation> for Beacon {
    fn from(obs: Observation) -> Self {
        Self::new(obs.address, obs.uuid, obs.major, obs.minor, obs.tx_power, obs.rssi)
    }
}

/// Decoded iBeacon manufacturer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IBeaconFrame {
    /// Beacon namespace.
    pub uuid: Uuid,
    /// Major group number.
    pub major: u16,
    /// Minor group number.
    pub minor: u16,
    /// Calibrated signal strength in dBm.
    pub tx_power: i8,
}

impl IBeaconFrame {
    /// Whether the frame belongs to `namespace` (case-insensitive UUID match).
    #[must_use]
    pub fn matches(&self, namespace: &str) -> bool {
        Uuid::parse_str(namespace).is_ok_and(|wanted| wanted == self.uuid)
    }

    /// Build the observation for this frame as seen from `address` at `rssi`.
    #[must_use]
    pub fn observe(&self, address: impl Into<String>, rssi: i16) -> Observation {
        Observation {
            address: address.into(),
            rssi,
            uuid: self.uuid.hyphenated().to_string(),
            major: self.major,
            minor: self.minor,
            tx_power: i16::from(self.tx_power),
        }
    }
}

/// Decode an iBeacon advertisement from manufacturer-specific data.
///
/// Returns `None` for other company identifiers or malformed payloads.
#[must_use]
pub fn parse_ibeacon(company_id: u16, data: &[u8]) -> Option<IBeaconFrame> {
    if company_id != APPLE_COMPANY_ID || data.len() < IBEACON_PAYLOAD_LEN {
        return None;
    }
    if data[..2] != IBEACON_PREFIX {
        return None;
    }
    let uuid = Uuid::from_slice(&data[2..18]).ok()?;
    Some(IBeaconFrame {
        uuid,
        major: u16::from_be_bytes([data[18], data[19]]),
        minor: u16::from_be_bytes([data[20], data[21]]),
        tx_power: i8::from_be_bytes([data[22]]),
    })
}

/// A radio able to run beacon scan sessions.
#[async_trait]
pub trait BeaconRadio: Send + Sync {
    /// Start delivering advertisements of `namespace` into `observations`.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ScanUnavailable`](crate::error::BeaconError::ScanUnavailable)
    /// if the session cannot start.
    async fn start_session(
        &self,
        namespace: &str,
        observations: mpsc::UnboundedSender<Observation>,
    ) -> Result<()>;

    /// Stop the running session, if any.
    async fn stop_session(&self);
}

#[cfg(feature = "bluetooth")]
pub use bluez::BluezRadio;

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
    use futures::{pin_mut, StreamExt};
    use tokio::sync::{mpsc, Mutex};
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};

    use super::{parse_ibeacon, BeaconRadio, Observation};
    use crate::error::{BeaconError, Result};

    /// BlueZ-backed radio.
    pub struct BluezRadio {
        adapter: Adapter,
        session_task: Mutex<Option<JoinHandle<()>>>,
        // Keeps the D-Bus connection alive for the adapter.
        _session: Session,
    }

    impl BluezRadio {
        /// Connect to BlueZ and power on the default adapter.
        ///
        /// # Errors
        ///
        /// Returns [`BeaconError::ScanUnavailable`] if BlueZ or the adapter cannot be reached.
        pub async fn new() -> Result<Self> {
            let session = Session::new().await.map_err(unavailable)?;
            let adapter = session.default_adapter().await.map_err(unavailable)?;
            adapter.set_powered(true).await.map_err(unavailable)?;
            info!(adapter = adapter.name(), "Bluetooth adapter ready");
            Ok(Self {
                adapter,
                session_task: Mutex::new(None),
                _session: session,
            })
        }
    }

    fn unavailable(err: bluer::Error) -> BeaconError {
        BeaconError::ScanUnavailable(err.to_string())
    }

    async fn read_observation(adapter: &Adapter, address: Address, namespace: &str) -> Option<Observation> {
        let device = adapter.device(address).ok()?;
        let rssi = device.rssi().await.ok()??;
        let manufacturer: HashMap<u16, Vec<u8>> = device.manufacturer_data().await.ok()??;
        manufacturer
            .iter()
            .filter_map(|(company, data)| parse_ibeacon(*company, data))
            .find(|frame| frame.matches(namespace))
            .map(|frame| frame.observe(address.to_string(), rssi))
    }

    #[async_trait]
    impl BeaconRadio for BluezRadio {
        async fn start_session(
            &self,
            namespace: &str,
            observations: mpsc::UnboundedSender<Observation>,
        ) -> Result<()> {
            self.stop_session().await;

            self.adapter
                .set_discovery_filter(DiscoveryFilter {
                    transport: DiscoveryTransport::Le,
                    duplicate_data: true,
                    ..Default::default()
                })
                .await
                .map_err(unavailable)?;
            let events = self.adapter.discover_devices().await.map_err(unavailable)?;

            let adapter = self.adapter.clone();
            let namespace = namespace.to_string();
            let task = tokio::spawn(async move {
                pin_mut!(events);
                while let Some(event) = events.next().await {
                    if let AdapterEvent::DeviceAdded(address) = event {
                        match read_observation(&adapter, address, &namespace).await {
                            Some(obs) => {
                                if observations.send(obs).is_err() {
                                    break;
                                }
                            }
                            None => debug!(%address, "Ignoring non-matching advertiser"),
                        }
                    }
                }
                warn!("Bluetooth discovery stream ended");
            });

            *self.session_task.lock().await = Some(task);
            Ok(())
        }

        async fn stop_session(&self) {
            if let Some(task) = self.session_task.lock().await.take() {
                // Dropping the discovery stream inside the task ends discovery.
                task.abort();
            }
        }
    }
}
