// ── Local registry seam ──
//
// Create/rename/delete primitives of the host platform's floor and area
// registries, plus device-to-area assignment. `MemoryRegistry` is the
// in-process implementation; the CLI persists its state between runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{Area, Floor, LocalId};

#[async_trait]
pub trait LocalRegistry: Send + Sync {
    async fn floors(&self) -> Result<Vec<Floor>, CoreError>;
    async fn areas(&self) -> Result<Vec<Area>, CoreError>;

    async fn create_floor(&self, name: &str) -> Result<Floor, CoreError>;
    async fn rename_floor(&self, id: &LocalId, name: &str) -> Result<(), CoreError>;
    async fn delete_floor(&self, id: &LocalId) -> Result<(), CoreError>;

    async fn create_area(&self, name: &str, floor_id: Option<&LocalId>) -> Result<Area, CoreError>;
    async fn update_area(
        &self,
        id: &LocalId,
        name: &str,
        floor_id: Option<&LocalId>,
    ) -> Result<(), CoreError>;
    async fn delete_area(&self, id: &LocalId) -> Result<(), CoreError>;

    async fn device_area(&self, serial: &str) -> Result<Option<LocalId>, CoreError>;
    /// Idempotent: assigning a device to its current area is a no-op.
    async fn assign_device_area(&self, serial: &str, area_id: &LocalId) -> Result<(), CoreError>;
}

/// Serializable contents of a `MemoryRegistry`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default)]
    pub floors: Vec<Floor>,
    #[serde(default)]
    pub areas: Vec<Area>,
    #[serde(default)]
    pub device_areas: BTreeMap<String, LocalId>,
}

/// In-memory floor/area registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: RegistryState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn state(&self) -> RegistryState {
        self.state.lock().await.clone()
    }

    fn not_found(kind: &str, id: &LocalId) -> CoreError {
        CoreError::Registry {
            message: format!("{kind} {id} does not exist"),
        }
    }
}

#[async_trait]
impl LocalRegistry for MemoryRegistry {
    async fn floors(&self) -> Result<Vec<Floor>, CoreError> {
        Ok(self.state.lock().await.floors.clone())
    }

    async fn areas(&self) -> Result<Vec<Area>, CoreError> {
        Ok(self.state.lock().await.areas.clone())
    }

    async fn create_floor(&self, name: &str) -> Result<Floor, CoreError> {
        let floor = Floor {
            id: LocalId(format!("floor_{}", Uuid::new_v4().simple())),
            name: name.to_owned(),
        };
        self.state.lock().await.floors.push(floor.clone());
        Ok(floor)
    }

    async fn rename_floor(&self, id: &LocalId, name: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let floor = state
            .floors
            .iter_mut()
            .find(|f| &f.id == id)
            .ok_or_else(|| Self::not_found("floor", id))?;
        name.clone_into(&mut floor.name);
        Ok(())
    }

    async fn delete_floor(&self, id: &LocalId) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        state.floors.retain(|f| &f.id != id);
        for area in &mut state.areas {
            if area.floor_id.as_ref() == Some(id) {
                area.floor_id = None;
            }
        }
        Ok(())
    }

    async fn create_area(&self, name: &str, floor_id: Option<&LocalId>) -> Result<Area, CoreError> {
        let area = Area {
            id: LocalId(format!("area_{}", Uuid::new_v4().simple())),
            name: name.to_owned(),
            floor_id: floor_id.cloned(),
        };
        self.state.lock().await.areas.push(area.clone());
        Ok(area)
    }

    async fn update_area(
        &self,
        id: &LocalId,
        name: &str,
        floor_id: Option<&LocalId>,
    ) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let area = state
            .areas
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| Self::not_found("area", id))?;
        name.clone_into(&mut area.name);
        area.floor_id = floor_id.cloned();
        Ok(())
    }

    async fn delete_area(&self, id: &LocalId) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        state.areas.retain(|a| &a.id != id);
        state.device_areas.retain(|_, area| area != id);
        Ok(())
    }

    async fn device_area(&self, serial: &str) -> Result<Option<LocalId>, CoreError> {
        Ok(self.state.lock().await.device_areas.get(serial).cloned())
    }

    async fn assign_device_area(&self, serial: &str, area_id: &LocalId) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if !state.areas.iter().any(|a| &a.id == area_id) {
            return Err(Self::not_found("area", area_id));
        }
        state
            .device_areas
            .insert(serial.to_owned(), area_id.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deleting_a_floor_detaches_its_areas() {
        let registry = MemoryRegistry::new();
        let floor = registry.create_floor("Upstairs").await.unwrap();
        let area = registry.create_area("Bedroom", Some(&floor.id)).await.unwrap();
        registry.delete_floor(&floor.id).await.unwrap();

        let areas = registry.areas().await.unwrap();
        assert_eq!(areas[0].id, area.id);
        assert_eq!(areas[0].floor_id, None);
    }

    #[tokio::test]
    async fn assignment_requires_existing_area() {
        let registry = MemoryRegistry::new();
        let err = registry
            .assign_device_area("xxx", &LocalId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Registry { .. }));
    }

    #[tokio::test]
    async fn state_round_trips_through_json() {
        let registry = MemoryRegistry::new();
        let area = registry.create_area("Kitchen", None).await.unwrap();
        registry.assign_device_area("xxx", &area.id).await.unwrap();

        let json = serde_json::to_string(&registry.state().await).unwrap();
        let restored = MemoryRegistry::from_state(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.device_area("xxx").await.unwrap(), Some(area.id));
    }
}
