// ── Runtime engine configuration ──
//
// Describes *what* to sync and *how hard* to try. Built by the CLI from
// its profile config and handed to `ZoneSync`; core never reads files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{HouseId, RoomId, SlaveVariant};
use crate::retry::BackoffPolicy;

/// Which parts of the local hierarchy a run maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub sync_zones_to_floors: bool,
    pub sync_rooms_to_areas: bool,
    pub create_missing_floors: bool,
    pub create_missing_areas: bool,
    /// Re-apply canonical names to every owned floor/area and reload the
    /// mapping table from storage.
    pub force_resync: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            sync_zones_to_floors: true,
            sync_rooms_to_areas: true,
            create_missing_floors: true,
            create_missing_areas: true,
            force_resync: false,
        }
    }
}

impl SyncOptions {
    /// Set both create flags at once.
    pub fn create_missing(mut self, create: bool) -> Self {
        self.create_missing_floors = create;
        self.create_missing_areas = create;
        self
    }
}

/// Configuration for one house's sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub house_id: HouseId,
    /// Default options for periodic runs.
    pub options: SyncOptions,
    pub backoff: BackoffPolicy,
    /// Per-attempt timeout for remote calls.
    pub remote_timeout: Duration,
    /// Periodic run interval. Zero disables the periodic task.
    pub interval: Duration,
    /// Slave variant for devices in a given room, when a master change has
    /// to assign one.
    pub room_variants: BTreeMap<RoomId, SlaveVariant>,
    /// How many finished runs to keep.
    pub history_limit: usize,
}

impl EngineConfig {
    pub fn new(house_id: HouseId) -> Self {
        Self {
            house_id,
            options: SyncOptions::default(),
            backoff: BackoffPolicy::default(),
            remote_timeout: Duration::from_secs(30),
            interval: Duration::from_secs(15 * 60),
            room_variants: BTreeMap::new(),
            history_limit: 20,
        }
    }
}
