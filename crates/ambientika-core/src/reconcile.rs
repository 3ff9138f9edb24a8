// ── Area/floor reconciliation ──
//
// Diffs a snapshot against the mapping table and the local registry.
// Only objects the table owns are ever renamed, moved, assigned to, or
// deleted. Work proceeds zone by zone and stops at a zone boundary when
// cancellation is requested.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncOptions;
use crate::error::CoreError;
use crate::model::{
    Area, Floor, LocalId, MappingEntry, MappingKey, MappingTable, NameCollision, RemoteKind,
    Room, RoomId, RunCounts, Snapshot, Zone, ZoneId,
};
use crate::registry::LocalRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub counts: RunCounts,
    pub collisions: Vec<NameCollision>,
    /// Stopped at a zone boundary; pruning was skipped.
    pub cancelled: bool,
    /// Stale entries were considered for retirement.
    pub pruned: bool,
}

/// First of `name`, `name (2)`, `name (3)`, ... not in `taken`
/// (case-insensitive).
pub fn unique_name<'a>(name: &str, taken: impl Iterator<Item = &'a str> + Clone) -> String {
    let free = |candidate: &str| {
        !taken
            .clone()
            .any(|t| t.eq_ignore_ascii_case(candidate))
    };
    if free(name) {
        return name.to_owned();
    }
    (2u32..)
        .map(|n| format!("{name} ({n})"))
        .find(|candidate| free(candidate))
        .unwrap_or_else(|| name.to_owned())
}

/// Working state for one reconcile pass.
struct Pass<'a> {
    registry: &'a dyn LocalRegistry,
    table: &'a mut MappingTable,
    options: &'a SyncOptions,
    floors: Vec<Floor>,
    areas: Vec<Area>,
    result: ReconcileResult,
}

/// A registry call failed part-way through a pass. `partial` holds what
/// was done before it, including objects already created and mapped.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct ReconcileError {
    #[source]
    pub source: CoreError,
    pub partial: ReconcileResult,
}

impl From<CoreError> for ReconcileError {
    fn from(source: CoreError) -> Self {
        Self {
            source,
            partial: ReconcileResult::default(),
        }
    }
}

/// Bring the local hierarchy in line with `snapshot`.
pub async fn reconcile(
    snapshot: &Snapshot,
    table: &mut MappingTable,
    registry: &dyn LocalRegistry,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<ReconcileResult, ReconcileError> {
    let floors = registry.floors().await?;
    let areas = registry.areas().await?;
    let mut pass = Pass {
        registry,
        table,
        options,
        floors,
        areas,
        result: ReconcileResult::default(),
    };

    let outcome = pass.run(snapshot, cancel).await;
    pass.result.counts.conflicts = u32::try_from(pass.result.collisions.len()).unwrap_or(u32::MAX);
    match outcome {
        Ok(()) => Ok(pass.result),
        Err(source) => Err(ReconcileError {
            source,
            partial: pass.result,
        }),
    }
}

impl Pass<'_> {
    async fn run(
        &mut self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        self.drop_orphaned_entries();

        for zone in snapshot.zones.values() {
            if cancel.is_cancelled() {
                info!(zone_id = %zone.id, "reconcile cancelled before zone");
                self.result.cancelled = true;
                return Ok(());
            }

            let floor = if self.options.sync_zones_to_floors {
                self.ensure_floor(zone).await?
            } else {
                None
            };

            for room in snapshot.zone_rooms(zone.id) {
                self.sync_room(snapshot, room, floor.as_ref()).await?;
            }
        }

        let unzoned: Vec<&Room> = snapshot.unzoned_rooms().collect();
        if !unzoned.is_empty() {
            if cancel.is_cancelled() {
                self.result.cancelled = true;
                return Ok(());
            }
            for room in unzoned {
                self.sync_room(snapshot, room, None).await?;
            }
        }

        if snapshot.complete {
            self.prune(snapshot).await?;
            self.result.pruned = true;
        } else {
            debug!("snapshot incomplete, not pruning mapping entries");
        }
        Ok(())
    }

    /// Forget entries whose local object was deleted out of band.
    fn drop_orphaned_entries(&mut self) {
        for key in self.table.keys() {
            let Some(entry) = self.table.get(key) else {
                continue;
            };
            let exists = match key.kind {
                RemoteKind::Zone => self.floors.iter().any(|f| f.id == entry.local_id),
                RemoteKind::Room => self.areas.iter().any(|a| a.id == entry.local_id),
            };
            if !exists {
                warn!(
                    kind = %key.kind,
                    remote_id = key.remote_id,
                    local_id = %entry.local_id,
                    "mapped local object is gone, dropping entry"
                );
                self.table.remove(key);
            }
        }
    }

    fn record_collision(&mut self, kind: RemoteKind, remote_id: i64, requested: &str, assigned: &str) {
        info!(%kind, remote_id, requested, assigned, "local name taken, using suffix");
        self.result.collisions.push(NameCollision {
            kind,
            remote_id,
            requested: requested.to_owned(),
            assigned: assigned.to_owned(),
        });
    }

    fn floor_name_for(&self, name: &str, own: Option<&LocalId>) -> String {
        unique_name(
            name,
            self.floors
                .iter()
                .filter(|f| Some(&f.id) != own)
                .map(|f| f.name.as_str()),
        )
    }

    fn area_name_for(&self, name: &str, own: Option<&LocalId>) -> String {
        unique_name(
            name,
            self.areas
                .iter()
                .filter(|a| Some(&a.id) != own)
                .map(|a| a.name.as_str()),
        )
    }

    // ── Floors ───────────────────────────────────────────────────────

    async fn ensure_floor(&mut self, zone: &Zone) -> Result<Option<LocalId>, CoreError> {
        let key = MappingKey::zone(zone.id.0);

        if let Some(entry) = self.table.get(key).cloned() {
            let current = self
                .floors
                .iter()
                .find(|f| f.id == entry.local_id)
                .map(|f| f.name.clone())
                .unwrap_or_default();
            let remote_renamed = entry.last_seen_name != zone.name;
            let target = self.floor_name_for(&zone.name, Some(&entry.local_id));

            if (remote_renamed || self.options.force_resync) && target != current {
                self.registry.rename_floor(&entry.local_id, &target).await?;
                if let Some(floor) = self.floors.iter_mut().find(|f| f.id == entry.local_id) {
                    floor.name.clone_from(&target);
                }
                if target != zone.name {
                    self.record_collision(RemoteKind::Zone, zone.id.0, &zone.name, &target);
                }
                info!(zone_id = %zone.id, from = %current, to = %target, "floor renamed");
                self.result.counts.updated += 1;
            } else {
                self.result.counts.skipped += 1;
            }
            if let Some(e) = self.table.get_mut(key) {
                e.last_seen_name.clone_from(&zone.name);
            }
            return Ok(Some(entry.local_id));
        }

        if !self.options.create_missing_floors {
            debug!(zone_id = %zone.id, "no floor mapped and creation disabled");
            self.result.counts.skipped += 1;
            return Ok(None);
        }

        let name = self.floor_name_for(&zone.name, None);
        if name != zone.name {
            self.record_collision(RemoteKind::Zone, zone.id.0, &zone.name, &name);
        }
        let floor = self.registry.create_floor(&name).await?;
        info!(zone_id = %zone.id, floor_id = %floor.id, name = %floor.name, "floor created");
        self.table.insert(MappingEntry {
            kind: RemoteKind::Zone,
            remote_id: zone.id.0,
            local_id: floor.id.clone(),
            last_seen_name: zone.name.clone(),
        });
        let id = floor.id.clone();
        self.floors.push(floor);
        self.result.counts.created += 1;
        Ok(Some(id))
    }

    // ── Areas ────────────────────────────────────────────────────────

    async fn sync_room(
        &mut self,
        snapshot: &Snapshot,
        room: &Room,
        floor: Option<&LocalId>,
    ) -> Result<(), CoreError> {
        if !self.options.sync_rooms_to_areas {
            return Ok(());
        }
        let Some(area) = self.ensure_area(room, floor).await? else {
            return Ok(());
        };

        for serial in &room.device_serials {
            if !snapshot.devices.contains_key(serial) {
                continue;
            }
            if self.registry.device_area(serial).await?.as_ref() == Some(&area) {
                continue;
            }
            self.registry.assign_device_area(serial, &area).await?;
            debug!(%serial, area_id = %area, "device assigned to area");
            self.result.counts.devices_assigned += 1;
        }
        Ok(())
    }

    async fn ensure_area(
        &mut self,
        room: &Room,
        floor: Option<&LocalId>,
    ) -> Result<Option<LocalId>, CoreError> {
        let key = MappingKey::room(room.id.0);

        if let Some(entry) = self.table.get(key).cloned() {
            let Some(area) = self.areas.iter().find(|a| a.id == entry.local_id).cloned() else {
                return Ok(None);
            };
            let remote_renamed = entry.last_seen_name != room.name;
            let target = self.area_name_for(&room.name, Some(&area.id));
            let rename = (remote_renamed || self.options.force_resync) && target != area.name;
            // only move areas when floors are being managed
            let target_floor = if self.options.sync_zones_to_floors {
                floor.cloned().or_else(|| area.floor_id.clone())
            } else {
                area.floor_id.clone()
            };
            let moved = target_floor != area.floor_id;

            if rename || moved {
                let name = if rename { target.clone() } else { area.name.clone() };
                self.registry
                    .update_area(&area.id, &name, target_floor.as_ref())
                    .await?;
                if let Some(a) = self.areas.iter_mut().find(|a| a.id == area.id) {
                    a.name.clone_from(&name);
                    a.floor_id.clone_from(&target_floor);
                }
                if rename && target != room.name {
                    self.record_collision(RemoteKind::Room, room.id.0, &room.name, &target);
                }
                info!(room_id = %room.id, area_id = %area.id, name = %name, moved, "area updated");
                self.result.counts.updated += 1;
            } else {
                self.result.counts.skipped += 1;
            }
            if let Some(e) = self.table.get_mut(key) {
                e.last_seen_name.clone_from(&room.name);
            }
            return Ok(Some(area.id));
        }

        if !self.options.create_missing_areas {
            debug!(room_id = %room.id, "no area mapped and creation disabled");
            self.result.counts.skipped += 1;
            return Ok(None);
        }

        let name = self.area_name_for(&room.name, None);
        if name != room.name {
            self.record_collision(RemoteKind::Room, room.id.0, &room.name, &name);
        }
        let area = self.registry.create_area(&name, floor).await?;
        info!(room_id = %room.id, area_id = %area.id, name = %area.name, "area created");
        self.table.insert(MappingEntry {
            kind: RemoteKind::Room,
            remote_id: room.id.0,
            local_id: area.id.clone(),
            last_seen_name: room.name.clone(),
        });
        let id = area.id.clone();
        self.areas.push(area);
        self.result.counts.created += 1;
        Ok(Some(id))
    }

    // ── Pruning ──────────────────────────────────────────────────────

    async fn prune(&mut self, snapshot: &Snapshot) -> Result<(), CoreError> {
        for key in self.table.keys() {
            let present = match key.kind {
                RemoteKind::Zone => snapshot.zones.contains_key(&ZoneId(key.remote_id)),
                RemoteKind::Room => snapshot.rooms.contains_key(&RoomId(key.remote_id)),
            };
            if present {
                continue;
            }
            let Some(entry) = self.table.remove(key) else {
                continue;
            };
            match key.kind {
                RemoteKind::Zone => {
                    self.registry.delete_floor(&entry.local_id).await?;
                    self.floors.retain(|f| f.id != entry.local_id);
                }
                RemoteKind::Room => {
                    self.registry.delete_area(&entry.local_id).await?;
                    self.areas.retain(|a| a.id != entry.local_id);
                }
            }
            info!(
                kind = %key.kind,
                remote_id = key.remote_id,
                local_id = %entry.local_id,
                name = %entry.last_seen_name,
                "remote object gone, local object retired"
            );
            self.result.counts.retired += 1;
        }
        Ok(())
    }
}
