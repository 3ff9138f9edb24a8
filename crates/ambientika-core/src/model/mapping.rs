// ── Persisted id mapping ──
//
// The only state with identity across runs and restarts: which local
// floor/area stands for which remote zone/room. Never rebuilt from names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::Display;

use super::ids::{HouseId, LocalId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    Zone,
    Room,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MappingKey {
    pub kind: RemoteKind,
    pub remote_id: i64,
}

impl MappingKey {
    pub fn zone(remote_id: i64) -> Self {
        Self {
            kind: RemoteKind::Zone,
            remote_id,
        }
    }

    pub fn room(remote_id: i64) -> Self {
        Self {
            kind: RemoteKind::Room,
            remote_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub kind: RemoteKind,
    pub remote_id: i64,
    pub local_id: LocalId,
    pub last_seen_name: String,
}

impl MappingEntry {
    pub fn key(&self) -> MappingKey {
        MappingKey {
            kind: self.kind,
            remote_id: self.remote_id,
        }
    }
}

/// Mapping table for one house.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredTable", into = "StoredTable")]
pub struct MappingTable {
    house_id: HouseId,
    entries: BTreeMap<MappingKey, MappingEntry>,
}

/// On-disk shape: a flat entry list.
#[derive(Serialize, Deserialize)]
struct StoredTable {
    house_id: HouseId,
    #[serde(default)]
    entries: Vec<MappingEntry>,
}

impl From<StoredTable> for MappingTable {
    fn from(stored: StoredTable) -> Self {
        let mut table = MappingTable::new(stored.house_id);
        for entry in stored.entries {
            table.insert(entry);
        }
        table
    }
}

impl From<MappingTable> for StoredTable {
    fn from(table: MappingTable) -> Self {
        Self {
            house_id: table.house_id,
            entries: table.entries.into_values().collect(),
        }
    }
}

impl MappingTable {
    pub fn new(house_id: HouseId) -> Self {
        Self {
            house_id,
            entries: BTreeMap::new(),
        }
    }

    pub fn house_id(&self) -> HouseId {
        self.house_id
    }

    pub fn get(&self, key: MappingKey) -> Option<&MappingEntry> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: MappingKey) -> Option<&mut MappingEntry> {
        self.entries.get_mut(&key)
    }

    pub fn insert(&mut self, entry: MappingEntry) -> Option<MappingEntry> {
        self.entries.insert(entry.key(), entry)
    }

    pub fn remove(&mut self, key: MappingKey) -> Option<MappingEntry> {
        self.entries.remove(&key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }

    pub fn keys(&self) -> Vec<MappingKey> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry points at this local object.
    pub fn owns(&self, local_id: &LocalId) -> bool {
        self.entries.values().any(|e| &e.local_id == local_id)
    }
}
