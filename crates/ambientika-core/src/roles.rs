// ── Role consistency resolver ──
//
// A zone's roles are computed once as a single assignment map and then
// rendered into both array shapes of the house payload. Neither array is
// ever edited on its own.

use std::collections::BTreeMap;
use std::time::Duration;

use ambientika_api::{HouseDto, RoomDto, WireRole};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::model::{HouseId, Role, RoleDivergence, RoomId, SlaveVariant, Snapshot, ZoneId};
use crate::remote::DeviceService;
use crate::retry::BackoffPolicy;
use crate::snapshot::{flat_roles, nested_roles};

/// A complete, consistent set of role assignments for one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePatch {
    pub house_id: HouseId,
    pub zone_id: ZoneId,
    pub new_master: String,
    /// Every device of the zone, keyed by serial.
    pub assignments: BTreeMap<String, Role>,
    /// Both arrays already hold exactly these roles.
    pub noop: bool,
}

/// Compute the patch that makes `new_master` the only master of `zone_id`.
///
/// Other devices of the zone get a slave variant: the configured variant
/// of their room if there is one; for the outgoing master, the variant the
/// new master held; otherwise their current variant; otherwise opposite.
pub fn plan_role_change(
    snapshot: &Snapshot,
    zone_id: ZoneId,
    new_master: &str,
    room_variants: &BTreeMap<RoomId, SlaveVariant>,
) -> Result<RolePatch, CoreError> {
    let invalid = |reason: &str| CoreError::InvalidTarget {
        zone_id,
        serial: new_master.to_owned(),
        reason: reason.to_owned(),
    };

    if !snapshot.zones.contains_key(&zone_id) {
        return Err(invalid("zone does not exist"));
    }
    let target = snapshot
        .devices
        .get(new_master)
        .ok_or_else(|| invalid("device does not exist"))?;
    if target.zone_id != zone_id {
        return Err(invalid(&format!(
            "device belongs to zone {}",
            target.zone_id
        )));
    }

    let handed_down = target.role.slave_variant();
    let assignments: BTreeMap<String, Role> = snapshot
        .zone_devices(zone_id)
        .map(|device| {
            let role = if device.serial == new_master {
                Role::Master
            } else {
                room_variants
                    .get(&device.room_id)
                    .copied()
                    .or_else(|| {
                        device
                            .role
                            .is_master()
                            .then_some(handed_down)
                            .flatten()
                    })
                    .or_else(|| device.role.slave_variant())
                    .unwrap_or(SlaveVariant::Opposite)
                    .role()
            };
            (device.serial.clone(), role)
        })
        .collect();

    let mut patch = RolePatch {
        house_id: snapshot.house.id,
        zone_id,
        new_master: new_master.to_owned(),
        assignments,
        noop: false,
    };
    patch.noop = patch.verify(&snapshot.payload).is_empty();
    Ok(patch)
}

impl RolePatch {
    pub fn changes(&self, snapshot: &Snapshot) -> Vec<(String, Role, Role)> {
        self.assignments
            .iter()
            .filter_map(|(serial, &role)| {
                let current = snapshot.devices.get(serial)?.role;
                (current != role).then(|| (serial.clone(), current, role))
            })
            .collect()
    }

    /// The payload with this patch applied to both role arrays.
    pub fn render(&self, house: &HouseDto) -> HouseDto {
        let mut out = house.clone();
        self.render_rooms(&mut out.rooms);
        if let Some(zones) = out.zones.as_mut() {
            for zone in zones {
                self.render_rooms(&mut zone.rooms);
            }
        }
        out
    }

    fn render_rooms(&self, rooms: &mut [RoomDto]) {
        for device in rooms.iter_mut().flat_map(|r| r.devices.iter_mut()) {
            if let Some(&role) = self.assignments.get(&device.serial_number) {
                device.role = WireRole::from(role);
            }
        }
    }

    /// Devices whose role in `house` differs from the patch, in either array.
    ///
    /// When the payload has no nested array only the flat one is checked.
    pub fn verify(&self, house: &HouseDto) -> Vec<RoleDivergence> {
        let flat = flat_roles(house);
        let nested = nested_roles(house);

        self.assignments
            .iter()
            .filter_map(|(serial, &expected)| {
                let f = flat.get(serial).copied();
                let n = nested.as_ref().and_then(|m| m.get(serial).copied());
                let nested_ok = nested.is_none() || n == Some(expected);
                (f != Some(expected) || !nested_ok).then(|| RoleDivergence {
                    serial: serial.clone(),
                    expected: Some(expected),
                    flat: f,
                    nested: n,
                })
            })
            .collect()
    }
}

/// How a patch reached the service.
#[derive(Debug, Clone)]
pub enum RoleApplyOutcome {
    /// Nothing to write.
    Unchanged,
    /// Combined write accepted and the re-fetched payload agrees.
    Applied { refreshed: HouseDto },
    /// Combined endpoint missing; the legacy write was accepted and must be
    /// verified on the next refresh.
    LegacyPending,
}

/// Write a patch and verify it.
///
/// Writes are never interrupted half-way by cancellation. A rejected
/// write is not retried; a post-write mismatch is reported as
/// `RolePatchDivergence` and left for a fresh resolver run.
pub async fn apply_role_patch(
    service: &dyn DeviceService,
    backoff: &BackoffPolicy,
    timeout: Duration,
    patch: &RolePatch,
    current: &HouseDto,
) -> Result<RoleApplyOutcome, CoreError> {
    if patch.noop {
        info!(zone_id = %patch.zone_id, serial = %patch.new_master, "roles already consistent");
        return Ok(RoleApplyOutcome::Unchanged);
    }

    let payload = patch.render(current);
    let combined = backoff
        .retry("apply_device_config", timeout, || {
            service.apply_device_config(&payload)
        })
        .await;

    match combined {
        Ok(()) => {}
        Err(CoreError::EndpointUnavailable { path }) => {
            warn!(
                zone_id = %patch.zone_id,
                %path,
                "combined role write unavailable, falling back to legacy write"
            );
            backoff
                .retry("apply_legacy_roles", timeout, || {
                    service.apply_legacy_roles(&payload)
                })
                .await?;
            return Ok(RoleApplyOutcome::LegacyPending);
        }
        Err(e) => return Err(e),
    }

    let refreshed = backoff
        .retry("fetch_house_topology", timeout, || {
            service.fetch_house_topology(patch.house_id)
        })
        .await?;

    let divergences = patch.verify(&refreshed);
    if divergences.is_empty() {
        info!(
            zone_id = %patch.zone_id,
            serial = %patch.new_master,
            devices = patch.assignments.len(),
            "role patch applied"
        );
        return Ok(RoleApplyOutcome::Applied { refreshed });
    }

    log_divergences(patch.zone_id, &divergences);
    Err(CoreError::RolePatchDivergence {
        zone_id: patch.zone_id,
        divergences,
    })
}

pub(crate) fn log_divergences(zone_id: ZoneId, divergences: &[RoleDivergence]) {
    for d in divergences {
        warn!(
            %zone_id,
            serial = %d.serial,
            expected = ?d.expected,
            flat = ?d.flat,
            nested = ?d.nested,
            "role representations diverge"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::snapshot::build_snapshot;
    use serde_json::json;

    fn house() -> HouseDto {
        serde_json::from_value(json!({
            "id": 4,
            "name": "Home",
            "rooms": [
                { "id": 1, "name": "Living", "devices": [
                    { "serialNumber": "xxx", "role": "Master", "zoneIndex": 1 },
                    { "serialNumber": "yyy", "role": "SlaveEqualMaster", "zoneIndex": 1 }
                ]},
                { "id": 2, "name": "Bedroom", "devices": [
                    { "serialNumber": "zzz", "role": "SlaveOppositeMaster", "zoneIndex": 1 },
                    { "serialNumber": "other", "role": "Master", "zoneIndex": 2 }
                ]}
            ],
            "zones": [
                { "zoneIndex": 1, "name": "Ground", "rooms": [
                    { "id": 1, "name": "Living", "devices": [
                        { "serialNumber": "xxx", "role": "Master", "zoneIndex": 1 },
                        { "serialNumber": "yyy", "role": "SlaveEqualMaster", "zoneIndex": 1 }
                    ]},
                    { "id": 2, "name": "Bedroom", "devices": [
                        { "serialNumber": "zzz", "role": "SlaveOppositeMaster", "zoneIndex": 1 }
                    ]}
                ]},
                { "zoneIndex": 2, "name": "Upstairs", "rooms": [
                    { "id": 2, "name": "Bedroom", "devices": [
                        { "serialNumber": "other", "role": "Master", "zoneIndex": 2 }
                    ]}
                ]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn swap_hands_variant_to_outgoing_master() {
        let snap = build_snapshot(house());
        let patch = plan_role_change(&snap, ZoneId(1), "yyy", &BTreeMap::new()).unwrap();

        assert!(!patch.noop);
        assert_eq!(patch.assignments["yyy"], Role::Master);
        assert_eq!(patch.assignments["xxx"], Role::SlaveMirrored);
        assert_eq!(patch.assignments["zzz"], Role::SlaveOpposite);
        assert!(!patch.assignments.contains_key("other"));
    }

    #[test]
    fn configured_room_variant_wins() {
        let snap = build_snapshot(house());
        let variants = BTreeMap::from([(RoomId(1), SlaveVariant::Opposite)]);
        let patch = plan_role_change(&snap, ZoneId(1), "zzz", &variants).unwrap();

        assert_eq!(patch.assignments["zzz"], Role::Master);
        assert_eq!(patch.assignments["xxx"], Role::SlaveOpposite);
        assert_eq!(patch.assignments["yyy"], Role::SlaveOpposite);
    }

    #[test]
    fn rendered_payload_agrees_in_both_arrays() {
        let snap = build_snapshot(house());
        let patch = plan_role_change(&snap, ZoneId(1), "yyy", &BTreeMap::new()).unwrap();
        let rendered = patch.render(&snap.payload);

        assert!(patch.verify(&rendered).is_empty());
        assert_eq!(flat_roles(&rendered), nested_roles(&rendered).unwrap());
        // untouched zone keeps its master
        assert_eq!(flat_roles(&rendered)["other"], Role::Master);
    }

    #[test]
    fn current_master_yields_noop() {
        let snap = build_snapshot(house());
        let patch = plan_role_change(&snap, ZoneId(1), "xxx", &BTreeMap::new()).unwrap();
        assert!(patch.noop);
        assert!(patch.changes(&snap).is_empty());
    }

    #[test]
    fn target_outside_zone_is_invalid() {
        let snap = build_snapshot(house());
        let err = plan_role_change(&snap, ZoneId(1), "other", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTarget { .. }));

        let err = plan_role_change(&snap, ZoneId(9), "xxx", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTarget { .. }));
    }

    #[test]
    fn verify_reports_one_sided_write() {
        let snap = build_snapshot(house());
        let patch = plan_role_change(&snap, ZoneId(1), "yyy", &BTreeMap::new()).unwrap();

        let mut half = snap.payload.as_ref().clone();
        patch.render_rooms(&mut half.rooms);
        let divergences = patch.verify(&half);

        assert_eq!(divergences.len(), 2);
        let yyy = divergences.iter().find(|d| d.serial == "yyy").unwrap();
        assert_eq!(yyy.expected, Some(Role::Master));
        assert_eq!(yyy.flat, Some(Role::Master));
        assert_eq!(yyy.nested, Some(Role::SlaveMirrored));
    }
}
