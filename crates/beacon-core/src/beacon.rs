//! Beacon identity and ordering.
//!
//! A [`Beacon`] is one iBeacon advertisement observed during a scan cycle.
//! Two observations are the same beacon when `(mac_address, major, minor)`
//! match; the namespace UUID, calibrated tx power and measured RSSI are not part
//! of the identity.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One observed beacon.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "mac_address": "C4:7C:8D:6A:12:34",
    "uuid": "ffffffff-bbbb-cccc-dddd-eeeeeeeeeeee",
    "major": 11,
    "minor": 1,
    "tx_power": -50,
    "rssi": -62
}))]
pub struct Beacon {
    /// Bluetooth address of the advertiser.
    #[schema(example = "C4:7C:8D:6A:12:34")]
    pub mac_address: String,

    /// Beacon namespace.
    #[schema(example = "ffffffff-bbbb-cccc-dddd-eeeeeeeeeeee")]
    pub uuid: String,

    /// Major group number.
    pub major: u16,

    /// Minor group number.
    pub minor: u16,

    /// Calibrated signal strength at one meter, in dBm.
    #[schema(example = -50)]
    pub tx_power: i16,

    /// Measured signal strength in dBm. Closer to zero means nearer.
    #[schema(example = -62)]
    pub rssi: i16,
}

impl Beacon {
    /// Create a beacon observation.
    pub fn new(
        mac_address: impl Into<String>,
        uuid: impl Into<String>,
        major: u16,
        minor: u16,
        tx_power: i16,
        rssi: i16,
    ) -> Self {
        Self {
            mac_address: mac_address.into(),
            uuid: uuid.into(),
            major,
            minor,
            tx_power,
            rssi,
        }
    }

    /// The identity tuple `(mac_address, major, minor)`.
    #[must_use]
    pub fn identity(&self) -> (&str, u16, u16) {
        (&self.mac_address, self.major, self.minor)
    }

    /// Nearest-first ordering: descending RSSI, ties broken by identity.
    #[must_use]
    pub fn proximity_cmp(&self, other: &Self) -> Ordering {
        other
            .rssi
            .cmp(&self.rssi)
            .then_with(|| self.identity().cmp(&other.identity()))
    }
}

impl PartialEq for Beacon {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Beacon {}

impl Hash for Beacon {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// Collapse repeated observations of the same beacon, keeping the first one seen.
#[must_use]
pub fn dedup_first_seen(beacons: Vec<Beacon>) -> Vec<Beacon> {
    let mut seen = std::collections::HashSet::with_capacity(beacons.len());
    let mut unique = Vec::with_capacity(beacons.len());
    for beacon in beacons {
        if seen.insert(beacon.clone()) {
            unique.push(beacon);
        }
    }
    unique
}

/// Deduplicate and sort a cycle's observations nearest-first.
#[must_use]
pub fn order_by_proximity(beacons: Vec<Beacon>) -> Vec<Beacon> {
    let mut ordered = dedup_first_seen(beacons);
    ordered.sort_by(Beacon::proximity_cmp);
    ordered
}

/// Whether the nearest beacon changed between two cycles.
///
/// True when exactly one side is absent, or both are present with different identities.
#[must_use]
pub fn nearest_changed(previous: Option<&Beacon>, current: Option<&Beacon>) -> bool {
    match (previous, current) {
        (None, None) => false,
        (Some(prev), Some(curr)) => prev != curr,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(mac: &str, minor: u16, rssi: i16) -> Beacon {
        Beacon::new(mac, "ffffffff-bbbb-cccc-dddd-eeeeeeeeeeee", 11, minor, -50, rssi)
    }

    #[test]
    fn test_identity_ignores_signal_and_namespace() {
        let a = Beacon::new("11:11:11", "uuid-a", 1, 2, -50, -40);
        let b = Beacon::new("11:11:11", "uuid-b", 1, 2, -59, -90);
        assert_eq!(a, b);

        let c = Beacon::new("11:11:11", "uuid-a", 1, 3, -50, -40);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sort_places_strongest_rssi_first() {
        let ordered = order_by_proximity(vec![
            beacon("11:11:11", 1, -80),
            beacon("22:22:22", 2, -30),
            beacon("33:33:33", 3, -55),
        ]);
        let rssis: Vec<i16> = ordered.iter().map(|b| b.rssi).collect();
        assert_eq!(rssis, vec![-30, -55, -80]);
    }

    #[test]
    fn test_ties_are_deterministic() {
        let forward = order_by_proximity(vec![beacon("22:22:22", 2, -40), beacon("11:11:11", 1, -40)]);
        let backward = order_by_proximity(vec![beacon("11:11:11", 1, -40), beacon("22:22:22", 2, -40)]);
        assert_eq!(forward[0].mac_address, backward[0].mac_address);
        assert_eq!(forward[0].mac_address, "11:11:11");
    }

    #[test]
    fn test_dedup_keeps_first_seen() {
        let unique = dedup_first_seen(vec![
            beacon("11:11:11", 1, -70),
            beacon("11:11:11", 1, -20),
            beacon("22:22:22", 2, -60),
        ]);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].rssi, -70);
    }

    #[test]
    fn test_nearest_changed_truth_table() {
        let a = beacon("11:11:11", 1, -40);
        let a_weaker = beacon("11:11:11", 1, -90);
        let b = beacon("22:22:22", 2, -40);

        assert!(!nearest_changed(None, None));
        assert!(nearest_changed(None, Some(&b)));
        assert!(nearest_changed(Some(&b), None));
        assert!(nearest_changed(Some(&a), Some(&b)));
        assert!(!nearest_changed(Some(&a), Some(&a_weaker)));
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(beacon("11:11:11", 1, -40)).unwrap();
        assert_eq!(json["mac_address"], "11:11:11");
        assert_eq!(json["tx_power"], -50);
        assert_eq!(json["rssi"], -40);
    }
}
