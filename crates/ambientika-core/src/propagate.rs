// ── Zone master propagation ──
//
// Read-side only: what each device should display, taken from its zone's
// master. No remote calls and nothing persisted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{DeviceSettings, Snapshot, ZoneId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplaySource {
    /// A master shows its own settings.
    Own,
    /// A slave mirrors the settings of its zone's master.
    ZoneMaster { master_serial: String },
    /// The zone's master is ambiguous; the slave shows its own
    /// last-known settings.
    LastKnown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayValues {
    pub serial: String,
    pub zone_id: ZoneId,
    pub settings: Option<DeviceSettings>,
    pub source: DisplaySource,
}

/// Display values for every device plus the zones flagged ambiguous.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propagation {
    pub values: BTreeMap<String, DisplayValues>,
    pub ambiguous_zones: BTreeSet<ZoneId>,
}

/// Derive what every device should display.
///
/// Never fails: a zone without exactly one master, with divergent role
/// arrays, or listed in `flagged` (a role write that did not verify) is
/// reported ambiguous and its slaves fall back to their own settings.
pub fn derive_display_values(snapshot: &Snapshot, flagged: &BTreeSet<ZoneId>) -> Propagation {
    let mut ambiguous_zones = snapshot.ambiguous_zones();
    ambiguous_zones.extend(flagged.iter().filter(|z| snapshot.zones.contains_key(*z)));

    let masters: BTreeMap<ZoneId, (&str, Option<&DeviceSettings>)> = snapshot
        .zones
        .keys()
        .filter(|z| !ambiguous_zones.contains(z))
        .filter_map(|&z| {
            let master = snapshot.zone_masters(z).into_iter().next()?;
            Some((z, (master.serial.as_str(), master.settings.as_ref())))
        })
        .collect();

    let values = snapshot
        .devices
        .values()
        .map(|device| {
            let (settings, source) = if device.role.is_master() {
                (device.settings.clone(), DisplaySource::Own)
            } else if let Some(&(master, settings)) = masters.get(&device.zone_id) {
                (
                    settings.cloned(),
                    DisplaySource::ZoneMaster {
                        master_serial: master.to_owned(),
                    },
                )
            } else {
                (device.settings.clone(), DisplaySource::LastKnown)
            };
            (
                device.serial.clone(),
                DisplayValues {
                    serial: device.serial.clone(),
                    zone_id: device.zone_id,
                    settings,
                    source,
                },
            )
        })
        .collect();

    Propagation {
        values,
        ambiguous_zones,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::snapshot::build_snapshot;
    use serde_json::json;

    fn snapshot(roles: [&str; 3]) -> Snapshot {
        let mut snap = build_snapshot(
            serde_json::from_value(json!({
                "id": 1,
                "rooms": [{ "id": 1, "name": "Hall", "devices": [
                    { "serialNumber": "a", "role": roles[0], "zoneIndex": 0 },
                    { "serialNumber": "b", "role": roles[1], "zoneIndex": 0 },
                    { "serialNumber": "c", "role": roles[2], "zoneIndex": 1 }
                ]}]
            }))
            .unwrap(),
        );
        for (serial, fan) in [("a", 2), ("b", 1), ("c", 0)] {
            snap.devices.get_mut(serial).unwrap().settings = Some(DeviceSettings {
                fan_speed: Some(fan),
                ..DeviceSettings::default()
            });
        }
        snap
    }

    #[test]
    fn slave_follows_master_of_its_zone() {
        let prop = derive_display_values(
            &snapshot(["Master", "SlaveEqualMaster", "Master"]),
            &BTreeSet::new(),
        );
        let b = &prop.values["b"];
        assert_eq!(b.settings.as_ref().unwrap().fan_speed, Some(2));
        assert_eq!(
            b.source,
            DisplaySource::ZoneMaster {
                master_serial: "a".into()
            }
        );
        assert_eq!(prop.values["c"].source, DisplaySource::Own);
        assert!(prop.ambiguous_zones.is_empty());
    }

    #[test]
    fn zone_without_master_falls_back_to_own_settings() {
        let prop = derive_display_values(
            &snapshot(["SlaveEqualMaster", "SlaveOppositeMaster", "Master"]),
            &BTreeSet::new(),
        );
        let b = &prop.values["b"];
        assert_eq!(b.source, DisplaySource::LastKnown);
        assert_eq!(b.settings.as_ref().unwrap().fan_speed, Some(1));
        assert!(prop.ambiguous_zones.contains(&ZoneId(0)));
    }

    #[test]
    fn zone_with_two_masters_is_flagged() {
        let prop =
            derive_display_values(&snapshot(["Master", "Master", "Master"]), &BTreeSet::new());
        assert!(prop.ambiguous_zones.contains(&ZoneId(0)));
        assert_eq!(prop.values["a"].source, DisplaySource::Own);
        assert!(!prop.ambiguous_zones.contains(&ZoneId(1)));
    }

    #[test]
    fn flagged_zone_slaves_show_own_settings() {
        let flagged = BTreeSet::from([ZoneId(0), ZoneId(9)]);
        let prop = derive_display_values(
            &snapshot(["Master", "SlaveEqualMaster", "Master"]),
            &flagged,
        );
        let b = &prop.values["b"];
        assert_eq!(b.source, DisplaySource::LastKnown);
        assert_eq!(b.settings.as_ref().unwrap().fan_speed, Some(1));
        assert_eq!(prop.values["a"].source, DisplaySource::Own);
        // zones the snapshot does not know are not reported
        assert_eq!(prop.ambiguous_zones, BTreeSet::from([ZoneId(0)]));
    }
}
