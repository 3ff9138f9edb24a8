// ── Snapshot construction ──
//
// Projects a house payload into the typed topology. Zones come from the
// nested `zones` array when the service sends one; any device zone index
// not covered there gets a synthesized `Zone {index}`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ambientika_api::{DeviceDto, DeviceStatusDto, HouseDto};
use chrono::Utc;
use tracing::warn;

use crate::model::{
    Device, DeviceSettings, House, HouseId, Role, RoleDivergence, Room, RoomId, Snapshot,
    Telemetry, Zone, ZoneId,
};

/// Build a snapshot from a successfully fetched payload.
///
/// The snapshot is complete only if the house has at least one room: an
/// empty answer is more likely a service glitch than a house with
/// everything removed.
pub fn build_snapshot(payload: HouseDto) -> Snapshot {
    let mut zones: BTreeMap<ZoneId, Zone> = BTreeMap::new();
    let mut index_to_zone: BTreeMap<i64, ZoneId> = BTreeMap::new();
    let mut nested_room_zone: BTreeMap<RoomId, ZoneId> = BTreeMap::new();

    for (position, dto) in payload.zones.iter().flatten().enumerate() {
        let fallback = i64::try_from(position).unwrap_or(i64::MAX);
        let index = dto.zone_index.or(dto.id).unwrap_or(fallback);
        let id = ZoneId(dto.key().unwrap_or(fallback));
        let name = dto
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Zone {index}"));
        index_to_zone.insert(index, id);
        for room in &dto.rooms {
            nested_room_zone.insert(RoomId(room.id), id);
        }
        zones.insert(
            id,
            Zone {
                id,
                index,
                name,
                room_ids: Vec::new(),
                role_divergence: Vec::new(),
            },
        );
    }

    let mut rooms: BTreeMap<RoomId, Room> = BTreeMap::new();
    let mut devices: BTreeMap<String, Device> = BTreeMap::new();

    for room_dto in &payload.rooms {
        let room_id = RoomId(room_dto.id);
        let mut serials = Vec::with_capacity(room_dto.devices.len());

        for dto in &room_dto.devices {
            let zone_id = *index_to_zone.entry(dto.zone_index).or_insert_with(|| {
                let id = ZoneId(dto.zone_index);
                zones.entry(id).or_insert_with(|| Zone {
                    id,
                    index: dto.zone_index,
                    name: format!("Zone {}", dto.zone_index),
                    room_ids: Vec::new(),
                    role_divergence: Vec::new(),
                });
                id
            });
            if devices.contains_key(&dto.serial_number) {
                warn!(serial = %dto.serial_number, "device listed in more than one room");
                continue;
            }
            serials.push(dto.serial_number.clone());
            devices.insert(dto.serial_number.clone(), device_from_dto(dto, zone_id, room_id));
        }

        let zone_id = nested_room_zone.get(&room_id).copied().or_else(|| {
            serials
                .first()
                .and_then(|s| devices.get(s))
                .map(|d| d.zone_id)
        });

        rooms.insert(
            room_id,
            Room {
                id: room_id,
                name: room_dto.name.clone(),
                zone_id,
                device_serials: serials,
            },
        );
    }

    for room in rooms.values() {
        if let Some(zone) = room.zone_id.and_then(|z| zones.get_mut(&z)) {
            zone.room_ids.push(room.id);
        }
    }

    for divergence in observed_divergence(&payload) {
        let zone = devices
            .get(&divergence.serial)
            .map(|d| d.zone_id)
            .or_else(|| nested_zone_of(&payload, &divergence.serial));
        if let Some(zone) = zone.and_then(|z| zones.get_mut(&z)) {
            zone.role_divergence.push(divergence);
        }
    }

    let complete = !payload.rooms.is_empty();
    let house = House {
        id: HouseId(payload.id),
        name: payload.name.clone(),
        zone_ids: zones.keys().copied().collect(),
    };

    Snapshot {
        house,
        zones,
        rooms,
        devices,
        fetched_at: Utc::now(),
        complete,
        payload: Arc::new(payload),
    }
}

fn device_from_dto(dto: &DeviceDto, zone_id: ZoneId, room_id: RoomId) -> Device {
    Device {
        serial: dto.serial_number.clone(),
        name: dto.name.clone(),
        role: dto.role.into(),
        zone_id,
        room_id: dto.room_id.map_or(room_id, RoomId),
        telemetry: None,
        settings: None,
        stale: false,
    }
}

fn nested_zone_of(payload: &HouseDto, serial: &str) -> Option<ZoneId> {
    payload.zones.iter().flatten().find_map(|z| {
        z.rooms
            .iter()
            .flat_map(|r| &r.devices)
            .find(|d| d.serial_number == serial)
            .and(z.key().map(ZoneId))
    })
}

/// Roles as written in the flat array.
pub fn flat_roles(payload: &HouseDto) -> BTreeMap<String, Role> {
    payload
        .rooms
        .iter()
        .flat_map(|r| &r.devices)
        .map(|d| (d.serial_number.clone(), d.role.into()))
        .collect()
}

/// Roles as written in the nested array, or `None` if it is absent.
pub fn nested_roles(payload: &HouseDto) -> Option<BTreeMap<String, Role>> {
    payload.zones.as_ref().map(|zones| {
        zones
            .iter()
            .flat_map(|z| &z.rooms)
            .flat_map(|r| &r.devices)
            .map(|d| (d.serial_number.clone(), d.role.into()))
            .collect()
    })
}

/// Devices whose role differs between the two arrays of a payload.
pub fn observed_divergence(payload: &HouseDto) -> Vec<RoleDivergence> {
    let Some(nested) = nested_roles(payload) else {
        return Vec::new();
    };
    let flat = flat_roles(payload);

    let serials: BTreeSet<&String> = flat.keys().chain(nested.keys()).collect();
    serials
        .into_iter()
        .filter_map(|serial| {
            let f = flat.get(serial).copied();
            let n = nested.get(serial).copied();
            (f != n).then(|| RoleDivergence {
                serial: serial.clone(),
                expected: None,
                flat: f,
                nested: n,
            })
        })
        .collect()
}

/// Split a device status response into telemetry and settings.
pub fn telemetry_from_dto(dto: &DeviceStatusDto) -> (Telemetry, DeviceSettings) {
    let telemetry = Telemetry {
        temperature: dto.temperature,
        humidity: dto.humidity,
        air_quality: dto.air_quality.clone(),
        filters_status: dto.filters_status.clone(),
        filter_remaining_pct: dto.filter_remaining_pct,
    };
    let settings = DeviceSettings {
        operating_mode: dto.operating_mode.clone(),
        fan_speed: dto.fan_speed.map(|l| l.0),
        humidity_level: dto.humidity_level.map(|l| l.0),
        light_sensor_level: dto.light_sensor_level.map(|l| l.0),
    };
    (telemetry, settings)
}
