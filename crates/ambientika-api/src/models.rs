// Wire models for the Ambientika cloud service.
//
// Every object keeps the fields we don't model in `extra` so that a payload
// read from the service can be rewritten and sent back without dropping
// anything. Field names follow the service's camelCase JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

// ── House topology ──────────────────────────────────────────────────

/// A house as returned by `GET House/houses-info`.
///
/// Device roles appear twice: once in the flat `rooms[].devices[]` array and
/// once in the nested `zones[].rooms[].devices[]` array. Older accounts have
/// no `zones` array at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseDto {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rooms: Vec<RoomDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<ZoneDto>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub devices: Vec<DeviceDto>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub rooms: Vec<RoomDto>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ZoneDto {
    /// Stable identifier: the explicit id, else the zone index.
    pub fn key(&self) -> Option<i64> {
        self.id.or(self.zone_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub serial_number: String,
    pub role: WireRole,
    #[serde(default)]
    pub zone_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ── Roles ───────────────────────────────────────────────────────────

/// Device role as spelled on the wire.
///
/// Reads accept the canonical names plus the lowercase legacy aliases;
/// a bare `slave` means the opposite-airflow variant. Writes always use the
/// canonical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireRole {
    Master,
    SlaveEqualMaster,
    SlaveOppositeMaster,
}

impl WireRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Master => "Master",
            Self::SlaveEqualMaster => "SlaveEqualMaster",
            Self::SlaveOppositeMaster => "SlaveOppositeMaster",
        }
    }

    /// Parse a role name, tolerating legacy spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "master" => Some(Self::Master),
            "slaveequalmaster" | "slave_equal_master" => Some(Self::SlaveEqualMaster),
            "slaveoppositemaster" | "slave_opposite_master" | "slave" => {
                Some(Self::SlaveOppositeMaster)
            }
            _ => None,
        }
    }
}

impl fmt::Display for WireRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WireRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WireRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| de::Error::custom(format!("unknown device role: {raw}")))
    }
}

// ── Telemetry ───────────────────────────────────────────────────────

/// Response of `GET Device/device-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<Level>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_level: Option<Level>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_sensor_level: Option<Level>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_remaining_pct: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A setting level that the service reports either numerically or by name.
///
/// Names resolve to `Off=0, Low=1, Medium=2, High=3` (fan speed, light
/// sensor) and `Dry=0, Normal=1, Moist=2` (humidity level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Level(pub u8);

impl Level {
    pub fn from_name(name: &str) -> Option<Self> {
        let value = match name.trim().to_ascii_lowercase().as_str() {
            "off" | "dry" => 0,
            "low" | "normal" => 1,
            "medium" | "moist" => 2,
            "high" => 3,
            other => return other.parse().ok().map(Self),
        };
        Some(Self(value))
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LevelVisitor;

        impl Visitor<'_> for LevelVisitor {
            type Value = Level;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a level number or name")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Level, E> {
                u8::try_from(v)
                    .map(Level)
                    .map_err(|_| E::custom(format!("level out of range: {v}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Level, E> {
                u8::try_from(v)
                    .map(Level)
                    .map_err(|_| E::custom(format!("level out of range: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Level, E> {
                Level::from_name(v).ok_or_else(|| E::custom(format!("unknown level: {v}")))
            }
        }

        deserializer.deserialize_any(LevelVisitor)
    }
}

// ── Auth ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct AuthRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthResponse {
    pub jwt_token: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_aliases_parse() {
        assert_eq!(WireRole::parse("master"), Some(WireRole::Master));
        assert_eq!(WireRole::parse("slave"), Some(WireRole::SlaveOppositeMaster));
        assert_eq!(
            WireRole::parse("SlaveEqualMaster"),
            Some(WireRole::SlaveEqualMaster)
        );
        assert_eq!(WireRole::parse("boss"), None);
    }

    #[test]
    fn role_writes_canonical_name() {
        let v = serde_json::to_value(WireRole::SlaveOppositeMaster).unwrap();
        assert_eq!(v, json!("SlaveOppositeMaster"));
    }

    #[test]
    fn level_accepts_numbers_and_names() {
        let levels: Vec<Level> = serde_json::from_value(json!([2, "High", "dry", "moist"])).unwrap();
        assert_eq!(levels, vec![Level(2), Level(3), Level(0), Level(2)]);
        assert!(serde_json::from_value::<Level>(json!("Turbo")).is_err());
    }

    #[test]
    fn house_keeps_unknown_fields() {
        let raw = json!({
            "id": 7,
            "name": "Home",
            "ownerId": 42,
            "rooms": [{
                "id": 1,
                "name": "Kitchen",
                "devices": [{
                    "serialNumber": "abc",
                    "role": "Master",
                    "zoneIndex": 0,
                    "deviceType": "Ambientika",
                }]
            }]
        });
        let house: HouseDto = serde_json::from_value(raw.clone()).unwrap();
        assert!(house.zones.is_none());
        assert_eq!(house.rooms[0].devices[0].extra["deviceType"], json!("Ambientika"));

        let back = serde_json::to_value(&house).unwrap();
        assert_eq!(back["ownerId"], json!(42));
        assert_eq!(back["rooms"][0]["devices"][0]["deviceType"], json!("Ambientika"));
    }
}
