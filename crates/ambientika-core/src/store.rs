// ── Mapping table persistence ──
//
// One JSON document per house. Writes go to a temp file first and are
// renamed into place so a crash never leaves a half-written table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{HouseId, MappingTable};

#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Load the table for a house. A missing table is an empty one; an
    /// unreadable one is `MappingTableCorruption`.
    async fn load(&self, house_id: HouseId) -> Result<MappingTable, CoreError>;

    async fn save(&self, table: &MappingTable) -> Result<(), CoreError>;
}

fn decode(location: &str, raw: &str) -> Result<MappingTable, CoreError> {
    serde_json::from_str(raw).map_err(|e| CoreError::MappingTableCorruption {
        location: location.to_owned(),
        message: e.to_string(),
    })
}

fn encode(table: &MappingTable) -> Result<String, CoreError> {
    serde_json::to_string_pretty(table).map_err(|e| CoreError::Persistence {
        message: format!("failed to serialize mapping table: {e}"),
    })
}

// ── File store ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JsonFileMappingStore {
    dir: PathBuf,
}

impl JsonFileMappingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, house_id: HouseId) -> PathBuf {
        self.dir.join(format!("mapping-{house_id}.json"))
    }
}

#[async_trait]
impl MappingStore for JsonFileMappingStore {
    async fn load(&self, house_id: HouseId) -> Result<MappingTable, CoreError> {
        let path = self.path_for(house_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no mapping table yet");
                return Ok(MappingTable::new(house_id));
            }
            Err(e) => {
                return Err(CoreError::MappingTableCorruption {
                    location: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };

        let table = decode(&path.display().to_string(), &raw)?;
        if table.house_id() != house_id {
            return Err(CoreError::MappingTableCorruption {
                location: path.display().to_string(),
                message: format!("table belongs to house {}", table.house_id()),
            });
        }
        Ok(table)
    }

    async fn save(&self, table: &MappingTable) -> Result<(), CoreError> {
        let persistence = |e: std::io::Error| CoreError::Persistence {
            message: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(persistence)?;
        let path = self.path_for(table.house_id());
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encode(table)?)
            .await
            .map_err(persistence)?;
        tokio::fs::rename(&tmp, &path).await.map_err(persistence)?;
        debug!(path = %path.display(), entries = table.len(), "mapping table saved");
        Ok(())
    }
}

// ── Memory store ─────────────────────────────────────────────────────

/// Keeps serialized tables in memory, so corruption can be simulated.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    tables: Mutex<BTreeMap<HouseId, String>>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored document with raw text.
    pub async fn put_raw(&self, house_id: HouseId, raw: impl Into<String>) {
        self.tables.lock().await.insert(house_id, raw.into());
    }

    pub async fn raw(&self, house_id: HouseId) -> Option<String> {
        self.tables.lock().await.get(&house_id).cloned()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn load(&self, house_id: HouseId) -> Result<MappingTable, CoreError> {
        match self.tables.lock().await.get(&house_id) {
            Some(raw) => decode(&format!("memory:{house_id}"), raw),
            None => Ok(MappingTable::new(house_id)),
        }
    }

    async fn save(&self, table: &MappingTable) -> Result<(), CoreError> {
        let raw = encode(table)?;
        self.tables.lock().await.insert(table.house_id(), raw);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{LocalId, MappingEntry, MappingKey, RemoteKind};

    fn table() -> MappingTable {
        let mut table = MappingTable::new(HouseId(5));
        table.insert(MappingEntry {
            kind: RemoteKind::Room,
            remote_id: 12,
            local_id: LocalId::new("area_1"),
            last_seen_name: "Office".into(),
        });
        table
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMappingStore::new(dir.path().join("state"));

        assert!(store.load(HouseId(5)).await.unwrap().is_empty());
        store.save(&table()).await.unwrap();

        let loaded = store.load(HouseId(5)).await.unwrap();
        assert_eq!(loaded, table());
        assert!(!store.path_for(HouseId(5)).with_extension("json.tmp").exists());
        assert_eq!(
            loaded.get(MappingKey::room(12)).unwrap().local_id,
            LocalId::new("area_1")
        );
    }

    #[tokio::test]
    async fn unreadable_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMappingStore::new(dir.path());
        std::fs::write(store.path_for(HouseId(5)), "{ not json").unwrap();

        let err = store.load(HouseId(5)).await.unwrap_err();
        assert!(matches!(err, CoreError::MappingTableCorruption { .. }));
    }

    #[tokio::test]
    async fn table_for_other_house_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMappingStore::new(dir.path());
        store.save(&table()).await.unwrap();
        std::fs::rename(store.path_for(HouseId(5)), store.path_for(HouseId(6))).unwrap();

        let err = store.load(HouseId(6)).await.unwrap_err();
        assert!(matches!(err, CoreError::MappingTableCorruption { .. }));
    }

    #[tokio::test]
    async fn memory_store_reports_corruption() {
        let store = MemoryMappingStore::new();
        store.put_raw(HouseId(5), "garbage").await;
        assert!(store.load(HouseId(5)).await.is_err());

        store.save(&table()).await.unwrap();
        assert_eq!(store.load(HouseId(5)).await.unwrap(), table());
    }
}
