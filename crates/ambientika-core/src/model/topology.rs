// ── Remote topology ──
//
// House → zone → room → device, rebuilt wholesale from every fetch.
// Nothing here is mutated after a `Snapshot` is published.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ambientika_api::{HouseDto, WireRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{HouseId, RoomId, ZoneId};

// ── Roles ────────────────────────────────────────────────────────────

/// A device's role within its zone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    /// Same airflow direction as the master.
    SlaveMirrored,
    /// Opposite airflow direction to the master.
    SlaveOpposite,
}

impl Role {
    pub fn is_master(self) -> bool {
        self == Self::Master
    }

    pub fn slave_variant(self) -> Option<SlaveVariant> {
        match self {
            Self::Master => None,
            Self::SlaveMirrored => Some(SlaveVariant::Mirrored),
            Self::SlaveOpposite => Some(SlaveVariant::Opposite),
        }
    }
}

impl From<WireRole> for Role {
    fn from(role: WireRole) -> Self {
        match role {
            WireRole::Master => Self::Master,
            WireRole::SlaveEqualMaster => Self::SlaveMirrored,
            WireRole::SlaveOppositeMaster => Self::SlaveOpposite,
        }
    }
}

impl From<Role> for WireRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Master => Self::Master,
            Role::SlaveMirrored => Self::SlaveEqualMaster,
            Role::SlaveOpposite => Self::SlaveOppositeMaster,
        }
    }
}

/// Physical relationship of a slave to its zone master.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SlaveVariant {
    Mirrored,
    Opposite,
}

impl SlaveVariant {
    pub fn role(self) -> Role {
        match self {
            Self::Mirrored => Role::SlaveMirrored,
            Self::Opposite => Role::SlaveOpposite,
        }
    }
}

/// One device whose role disagrees between representations, or with what
/// a patch asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDivergence {
    pub serial: String,
    /// Role the patch wrote; `None` when observed in a fetched payload.
    pub expected: Option<Role>,
    /// Role in the flat `rooms[].devices[]` array (`None` = missing).
    pub flat: Option<Role>,
    /// Role in the nested `zones[].rooms[].devices[]` array.
    pub nested: Option<Role>,
}

// ── Device state ─────────────────────────────────────────────────────

/// User-configurable settings. Authoritative only on a zone master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub operating_mode: Option<String>,
    pub fan_speed: Option<u8>,
    pub humidity_level: Option<u8>,
    pub light_sensor_level: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub air_quality: Option<String>,
    pub filters_status: Option<String>,
    pub filter_remaining_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub serial: String,
    pub name: Option<String>,
    pub role: Role,
    pub zone_id: ZoneId,
    pub room_id: RoomId,
    pub telemetry: Option<Telemetry>,
    pub settings: Option<DeviceSettings>,
    /// Telemetry and settings were carried over from an earlier snapshot.
    #[serde(default)]
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub zone_id: Option<ZoneId>,
    pub device_serials: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub index: i64,
    pub name: String,
    pub room_ids: Vec<RoomId>,
    /// Disagreements between the flat and nested role arrays in the fetch.
    pub role_divergence: Vec<RoleDivergence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct House {
    pub id: HouseId,
    pub name: String,
    pub zone_ids: Vec<ZoneId>,
}

// ── Snapshot ─────────────────────────────────────────────────────────

/// Immutable view of one house, shared by every step of a run.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub house: House,
    pub zones: BTreeMap<ZoneId, Zone>,
    pub rooms: BTreeMap<RoomId, Room>,
    pub devices: BTreeMap<String, Device>,
    pub fetched_at: DateTime<Utc>,
    /// Only a complete snapshot may retire mapping entries.
    pub complete: bool,
    /// The payload this snapshot was built from; role patches are rendered
    /// against it.
    pub payload: Arc<HouseDto>,
}

impl Snapshot {
    /// Devices of a zone, ordered by serial.
    pub fn zone_devices(&self, zone_id: ZoneId) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(move |d| d.zone_id == zone_id)
    }

    pub fn zone_masters(&self, zone_id: ZoneId) -> Vec<&Device> {
        self.zone_devices(zone_id)
            .filter(|d| d.role.is_master())
            .collect()
    }

    /// Zones with zero masters, more than one, or divergent role arrays.
    pub fn ambiguous_zones(&self) -> BTreeSet<ZoneId> {
        self.zones
            .values()
            .filter(|z| !z.role_divergence.is_empty() || self.zone_masters(z.id).len() != 1)
            .map(|z| z.id)
            .collect()
    }

    pub fn zone_rooms(&self, zone_id: ZoneId) -> impl Iterator<Item = &Room> {
        self.rooms.values().filter(move |r| r.zone_id == Some(zone_id))
    }

    /// Rooms that no zone claims.
    pub fn unzoned_rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values().filter(|r| r.zone_id.is_none())
    }

    /// A copy that can never trigger pruning.
    pub fn as_partial(&self) -> Self {
        let mut copy = self.clone();
        copy.complete = false;
        copy
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_wire_round_trip() {
        for role in [Role::Master, Role::SlaveMirrored, Role::SlaveOpposite] {
            assert_eq!(Role::from(WireRole::from(role)), role);
        }
    }

    #[test]
    fn variant_parses_from_config() {
        assert_eq!(SlaveVariant::from_str("Mirrored").unwrap(), SlaveVariant::Mirrored);
        assert_eq!(SlaveVariant::from_str("opposite").unwrap().role(), Role::SlaveOpposite);
        assert!(SlaveVariant::from_str("sideways").is_err());
    }

    #[test]
    fn role_display_is_snake_case() {
        assert_eq!(Role::SlaveMirrored.to_string(), "slave_mirrored");
    }
}
