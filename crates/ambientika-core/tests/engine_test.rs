// End-to-end tests for `ZoneSync` against an in-process device service.
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::Semaphore;

use ambientika_api::{DeviceStatusDto, HouseDto};
use ambientika_core::{
    Area, BackoffPolicy, CoreError, DeviceService, DisplaySource, EngineConfig, FixedJitter, Floor,
    HouseId, LocalId, LocalRegistry, MappingKey, MappingStore, MemoryMappingStore, MemoryRegistry, Role, RunRequest,
    RunStatus, RunStep, StepStatus, SyncOptions, ZoneId, ZoneSync,
};

// ── Fake device service ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// The service updates both role arrays.
    Both,
    /// The service only updates the flat rooms array.
    FlatOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopologyMode {
    Ok,
    Unavailable,
    Unauthorized,
    Empty,
}

struct FakeService {
    house: StdMutex<HouseDto>,
    fan: StdMutex<BTreeMap<String, u8>>,
    failing_telemetry: StdMutex<BTreeSet<String>>,
    topology: StdMutex<TopologyMode>,
    write_mode: StdMutex<WriteMode>,
    combined_missing: AtomicBool,
    telemetry_refused: AtomicBool,
    writes_refused: AtomicBool,
    writes: StdMutex<Vec<&'static str>>,
    topology_calls: AtomicU32,
    gated: AtomicBool,
    gate: Semaphore,
}

impl FakeService {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            house: StdMutex::new(serde_json::from_value(house_json()).unwrap()),
            fan: StdMutex::new(
                [("xxx", 2), ("yyy", 1), ("zzz", 1), ("www", 3)]
                    .into_iter()
                    .map(|(s, f)| (s.to_owned(), f))
                    .collect(),
            ),
            failing_telemetry: StdMutex::new(BTreeSet::new()),
            topology: StdMutex::new(TopologyMode::Ok),
            write_mode: StdMutex::new(WriteMode::Both),
            combined_missing: AtomicBool::new(false),
            telemetry_refused: AtomicBool::new(false),
            writes_refused: AtomicBool::new(false),
            writes: StdMutex::new(Vec::new()),
            topology_calls: AtomicU32::new(0),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
        })
    }

    fn set_topology(&self, mode: TopologyMode) {
        *self.topology.lock().unwrap() = mode;
    }

    fn set_fan(&self, serial: &str, fan: u8) {
        self.fan.lock().unwrap().insert(serial.to_owned(), fan);
    }

    fn house(&self) -> HouseDto {
        self.house.lock().unwrap().clone()
    }

    fn store(&self, payload: &HouseDto) {
        let mut house = self.house.lock().unwrap();
        match *self.write_mode.lock().unwrap() {
            WriteMode::Both => *house = payload.clone(),
            WriteMode::FlatOnly => house.rooms.clone_from(&payload.rooms),
        }
    }

    fn release(&self) {
        self.gate.add_permits(16);
    }
}

#[async_trait]
impl DeviceService for FakeService {
    async fn fetch_house_topology(&self, _house_id: HouseId) -> Result<HouseDto, CoreError> {
        self.topology_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.acquire().await.unwrap().forget();
        }
        let mode = *self.topology.lock().unwrap();
        match mode {
            TopologyMode::Ok => Ok(self.house()),
            TopologyMode::Unavailable => Err(CoreError::Unavailable {
                message: "502 Bad Gateway".into(),
            }),
            TopologyMode::Unauthorized => Err(CoreError::Unauthorized {
                message: "token refused".into(),
            }),
            TopologyMode::Empty => Ok(serde_json::from_value(json!({ "id": 7, "rooms": [] })).unwrap()),
        }
    }

    async fn apply_device_config(&self, payload: &HouseDto) -> Result<(), CoreError> {
        if self.writes_refused.load(Ordering::SeqCst) {
            return Err(CoreError::Unauthorized {
                message: "session revoked".into(),
            });
        }
        if self.combined_missing.load(Ordering::SeqCst) {
            return Err(CoreError::EndpointUnavailable {
                path: "Device/apply-config".into(),
            });
        }
        self.writes.lock().unwrap().push("combined");
        self.store(payload);
        Ok(())
    }

    async fn apply_legacy_roles(&self, payload: &HouseDto) -> Result<(), CoreError> {
        self.writes.lock().unwrap().push("legacy");
        self.store(payload);
        Ok(())
    }

    async fn fetch_device_telemetry(&self, serial: &str) -> Result<DeviceStatusDto, CoreError> {
        if self.telemetry_refused.load(Ordering::SeqCst) {
            return Err(CoreError::Unauthorized {
                message: "session revoked".into(),
            });
        }
        if self.failing_telemetry.lock().unwrap().contains(serial) {
            return Err(CoreError::Unavailable {
                message: format!("{serial} offline"),
            });
        }
        let fan = self.fan.lock().unwrap().get(serial).copied().unwrap_or(0);
        Ok(serde_json::from_value(json!({
            "operatingMode": "Auto",
            "fanSpeed": fan,
            "humidityLevel": "Normal",
            "temperature": 21.5,
            "humidity": 48.0
        }))
        .unwrap())
    }
}

// ── Registry that stops accepting new areas ─────────────────────────

struct FlakyRegistry {
    inner: MemoryRegistry,
    /// Area creations still allowed before the registry starts failing.
    areas_left: AtomicU32,
}

#[async_trait]
impl LocalRegistry for FlakyRegistry {
    async fn floors(&self) -> Result<Vec<Floor>, CoreError> {
        self.inner.floors().await
    }

    async fn areas(&self) -> Result<Vec<Area>, CoreError> {
        self.inner.areas().await
    }

    async fn create_floor(&self, name: &str) -> Result<Floor, CoreError> {
        self.inner.create_floor(name).await
    }

    async fn rename_floor(&self, id: &LocalId, name: &str) -> Result<(), CoreError> {
        self.inner.rename_floor(id, name).await
    }

    async fn delete_floor(&self, id: &LocalId) -> Result<(), CoreError> {
        self.inner.delete_floor(id).await
    }

    async fn create_area(&self, name: &str, floor_id: Option<&LocalId>) -> Result<Area, CoreError> {
        let allowed = self
            .areas_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(CoreError::Registry {
                message: "area registry is read-only".into(),
            });
        }
        self.inner.create_area(name, floor_id).await
    }

    async fn update_area(
        &self,
        id: &LocalId,
        name: &str,
        floor_id: Option<&LocalId>,
    ) -> Result<(), CoreError> {
        self.inner.update_area(id, name, floor_id).await
    }

    async fn delete_area(&self, id: &LocalId) -> Result<(), CoreError> {
        self.inner.delete_area(id).await
    }

    async fn device_area(&self, serial: &str) -> Result<Option<LocalId>, CoreError> {
        self.inner.device_area(serial).await
    }

    async fn assign_device_area(&self, serial: &str, area_id: &LocalId) -> Result<(), CoreError> {
        self.inner.assign_device_area(serial, area_id).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn device(serial: &str, role: &str, zone: i64) -> serde_json::Value {
    json!({ "serialNumber": serial, "role": role, "zoneIndex": zone })
}

fn house_json() -> serde_json::Value {
    let living = json!({ "id": 1, "name": "Living", "devices": [
        device("xxx", "Master", 1),
        device("yyy", "SlaveEqualMaster", 1)
    ]});
    let kitchen = json!({ "id": 2, "name": "Kitchen", "devices": [
        device("zzz", "SlaveOppositeMaster", 1)
    ]});
    let bedroom = json!({ "id": 3, "name": "Bedroom", "devices": [
        device("www", "Master", 2)
    ]});
    json!({
        "id": 7,
        "name": "Home",
        "rooms": [living, kitchen, bedroom],
        "zones": [
            { "zoneIndex": 1, "name": "Ground Floor", "rooms": [living, kitchen] },
            { "zoneIndex": 2, "name": "First Floor", "rooms": [bedroom] }
        ]
    })
}

struct Harness {
    service: Arc<FakeService>,
    registry: Arc<MemoryRegistry>,
    store: Arc<MemoryMappingStore>,
    engine: ZoneSync,
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::new(HouseId(7));
    config.backoff = BackoffPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        max_attempts: 2,
        ..BackoffPolicy::default()
    }
    .with_jitter(Arc::new(FixedJitter(0.0)));
    config.remote_timeout = Duration::from_secs(5);
    config.interval = Duration::ZERO;
    config
}

fn harness_with(config: EngineConfig, registry: MemoryRegistry) -> Harness {
    let service = FakeService::new();
    let registry = Arc::new(registry);
    let store = Arc::new(MemoryMappingStore::new());
    let engine = ZoneSync::new(config, service.clone(), registry.clone(), store.clone());
    Harness {
        service,
        registry,
        store,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(config(), MemoryRegistry::new())
}

fn manual() -> RunRequest {
    RunRequest::manual(SyncOptions::default())
}

fn step_status(record: &ambientika_core::RunRecord, step: RunStep) -> StepStatus {
    record.step(step).unwrap().status
}

// ── Scheduling ──────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_triggers_share_one_run() {
    let h = harness();
    h.service.gated.store(true, Ordering::SeqCst);

    let (a, b, ()) = tokio::join!(
        h.engine.trigger_run(manual()),
        h.engine.trigger_run(manual()),
        async {
            tokio::task::yield_now().await;
            h.service.release();
        }
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.id, b.id);
    assert_eq!(h.engine.run_count(), 1);
    assert_eq!(h.service.topology_calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn try_trigger_reports_the_run_in_flight() {
    let h = harness();
    h.service.gated.store(true, Ordering::SeqCst);

    let first = h.engine.try_trigger_run(manual()).await;
    let second = h.engine.try_trigger_run(manual()).await;
    assert_eq!(first.id, second.id);
    assert_eq!(first.status, RunStatus::Running);
    assert!(h.engine.is_running().await);

    h.service.release();
    let finished = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(finished.id, first.id);
    assert!(!h.engine.is_running().await);
    assert_eq!(h.engine.history().await.len(), 1);
}

#[tokio::test]
async fn cancelled_run_stops_before_reconciling() {
    let h = harness();
    h.service.gated.store(true, Ordering::SeqCst);

    let started = h.engine.try_trigger_run(manual()).await;
    assert!(h.engine.cancel_current_run().await);
    h.service.release();
    let record = h.engine.trigger_run(manual()).await.unwrap();

    assert_eq!(record.id, started.id);
    assert!(record.cancelled);
    assert_eq!(record.status, RunStatus::Partial);
    assert_eq!(step_status(&record, RunStep::Reconcile), StepStatus::Failed);
    assert!(h.registry.floors().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn periodic_task_fires_on_interval() {
    let mut config = config();
    config.interval = Duration::from_secs(60);
    let h = harness_with(config, MemoryRegistry::new());

    h.engine.start().await;
    tokio::time::sleep(Duration::from_secs(130)).await;
    h.engine.shutdown().await;

    assert_eq!(h.engine.run_count(), 2);
    let history = h.engine.history().await;
    assert!(history.iter().all(|r| r.trigger == ambientika_core::RunTrigger::Periodic));
}

// ── Reconciliation ──────────────────────────────────────────────────

#[tokio::test]
async fn first_run_builds_hierarchy_and_second_is_idempotent() {
    let h = harness();

    let first = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(first.counts.created, 5);
    assert_eq!(first.counts.devices_assigned, 4);

    let state = h.registry.state().await;
    let mut floors: Vec<_> = state.floors.iter().map(|f| f.name.as_str()).collect();
    floors.sort_unstable();
    assert_eq!(floors, ["First Floor", "Ground Floor"]);

    let second = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(second.counts.created, 0);
    assert_eq!(second.counts.updated, 0);
    assert_eq!(second.counts.devices_assigned, 0);
    assert_eq!(second.counts.skipped, 5);
    assert_eq!(h.registry.state().await, state);

    let table = h.engine.mapping_table().await.unwrap();
    assert_eq!(table.len(), 5);
    let saved = h.store.load(HouseId(7)).await.unwrap();
    assert_eq!(saved, table);
}

#[tokio::test]
async fn taken_floor_name_gets_suffix_and_is_left_alone() {
    let registry = MemoryRegistry::new();
    let existing = registry.create_floor("Ground Floor").await.unwrap();
    let h = harness_with(config(), registry);

    let record = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(record.counts.conflicts, 1);
    assert_eq!(record.collisions[0].assigned, "Ground Floor (2)");

    let floors = h.registry.floors().await.unwrap();
    assert!(floors.iter().any(|f| f.id == existing.id && f.name == "Ground Floor"));
    assert!(floors.iter().any(|f| f.name == "Ground Floor (2)"));

    let again = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(again.counts.created, 0);
    assert_eq!(h.registry.floors().await.unwrap().len(), 3);
}

#[tokio::test]
async fn zones_sharing_a_taken_name_get_distinct_suffixes() {
    let registry = MemoryRegistry::new();
    let existing = registry.create_floor("Ground Floor").await.unwrap();
    let h = harness_with(config(), registry);
    h.service.house.lock().unwrap().zones.as_mut().unwrap()[1].name = Some("Ground Floor".into());

    let record = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(record.counts.conflicts, 2);

    let mut names: Vec<_> = h
        .registry
        .floors()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    names.sort_unstable();
    assert_eq!(names, ["Ground Floor", "Ground Floor (2)", "Ground Floor (3)"]);
    let floors = h.registry.floors().await.unwrap();
    assert!(floors.iter().any(|f| f.id == existing.id && f.name == "Ground Floor"));

    let again = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(again.counts.created, 0);
    assert_eq!(again.counts.updated, 0);
    assert_eq!(h.registry.floors().await.unwrap().len(), 3);
}

#[tokio::test]
async fn registry_failure_keeps_counts_of_work_done() {
    let service = FakeService::new();
    let registry = Arc::new(FlakyRegistry {
        inner: MemoryRegistry::new(),
        areas_left: AtomicU32::new(1),
    });
    let store = Arc::new(MemoryMappingStore::new());
    let engine = ZoneSync::new(config(), service.clone(), registry.clone(), store.clone());

    let record = engine.trigger_run(manual()).await.unwrap();
    assert_eq!(record.status, RunStatus::Partial);
    assert_eq!(step_status(&record, RunStep::Reconcile), StepStatus::Failed);
    // floor "Ground Floor" and area "Living" went through before "Kitchen" failed
    assert_eq!(record.counts.created, 2);
    assert_eq!(store.load(HouseId(7)).await.unwrap().len(), 2);
    // no sync time for zones that were not fully reconciled
    assert!(engine.get_zone_status()[&ZoneId(1)].last_synced_at.is_none());

    registry.areas_left.store(u32::MAX, Ordering::SeqCst);
    let healed = engine.trigger_run(manual()).await.unwrap();
    assert_eq!(healed.status, RunStatus::Succeeded);
    assert_eq!(healed.counts.created, 3);
    assert_eq!(registry.floors().await.unwrap().len(), 2);
    assert_eq!(registry.areas().await.unwrap().len(), 3);
}

#[tokio::test]
async fn failed_fetch_does_not_refresh_sync_time() {
    let h = harness();
    h.engine.trigger_run(manual()).await.unwrap();
    let synced = h.engine.get_zone_status()[&ZoneId(1)].last_synced_at;
    assert!(synced.is_some());

    h.service.set_topology(TopologyMode::Unavailable);
    let failed = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(h.engine.get_zone_status()[&ZoneId(1)].last_synced_at, synced);
}

#[tokio::test]
async fn failed_or_empty_fetch_never_retires() {
    let h = harness();
    h.engine.trigger_run(manual()).await.unwrap();
    let state = h.registry.state().await;

    h.service.set_topology(TopologyMode::Unavailable);
    let failed = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.counts.retired, 0);
    assert_eq!(h.registry.state().await, state);

    h.service.set_topology(TopologyMode::Empty);
    let empty = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(empty.counts.retired, 0);
    assert_eq!(h.registry.state().await, state);
    assert_eq!(h.engine.mapping_table().await.unwrap().len(), 5);
}

#[tokio::test]
async fn room_removed_remotely_is_retired() {
    let h = harness();
    h.engine.trigger_run(manual()).await.unwrap();

    {
        let mut house = h.service.house.lock().unwrap();
        house.rooms.retain(|r| r.id != 2);
        for zone in house.zones.iter_mut().flatten() {
            zone.rooms.retain(|r| r.id != 2);
        }
    }
    let record = h.engine.trigger_run(manual()).await.unwrap();

    assert_eq!(record.counts.retired, 1);
    let areas = h.registry.areas().await.unwrap();
    assert!(!areas.iter().any(|a| a.name == "Kitchen"));
    assert!(h.engine.mapping_table().await.unwrap().get(MappingKey::room(2)).is_none());
}

#[tokio::test]
async fn remote_rename_follows_to_owned_floor() {
    let h = harness();
    h.engine.trigger_run(manual()).await.unwrap();

    h.service.house.lock().unwrap().zones.as_mut().unwrap()[0].name = Some("Downstairs".into());
    let record = h.engine.trigger_run(manual()).await.unwrap();

    assert_eq!(record.counts.updated, 1);
    let floors = h.registry.floors().await.unwrap();
    assert!(floors.iter().any(|f| f.name == "Downstairs"));
    assert!(!floors.iter().any(|f| f.name == "Ground Floor"));
}

#[tokio::test]
async fn corrupt_table_is_replaced_with_fresh_one() {
    let h = harness();
    h.store.put_raw(HouseId(7), "{ not json").await;

    let record = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.counts.created, 5);
    assert_eq!(h.store.load(HouseId(7)).await.unwrap().len(), 5);
}

#[tokio::test]
async fn unauthorized_fails_run_without_local_changes() {
    let h = harness();
    h.service.set_topology(TopologyMode::Unauthorized);

    let record = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.unwrap().contains("Unauthorized"));
    assert!(h.registry.floors().await.unwrap().is_empty());
    // not retried
    assert_eq!(h.service.topology_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unauthorized_telemetry_ends_the_run() {
    let h = harness();
    h.service.telemetry_refused.store(true, Ordering::SeqCst);

    let record = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.as_deref().unwrap().contains("Unauthorized"));
    assert_eq!(step_status(&record, RunStep::Telemetry), StepStatus::Failed);
    assert_ne!(step_status(&record, RunStep::Reconcile), StepStatus::Succeeded);
    assert_eq!(record.counts.created, 0);
    assert!(h.registry.floors().await.unwrap().is_empty());
    assert!(h.engine.snapshot().is_none());
}

#[tokio::test]
async fn unauthorized_role_write_ends_the_run() {
    let h = harness();
    h.engine.trigger_run(manual()).await.unwrap();
    let state = h.registry.state().await;
    h.service.writes_refused.store(true, Ordering::SeqCst);

    let record = h.engine.set_zone_master(ZoneId(1), "yyy").await.unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.is_some());
    assert_eq!(step_status(&record, RunStep::Roles), StepStatus::Failed);
    assert_ne!(step_status(&record, RunStep::Reconcile), StepStatus::Succeeded);
    assert_eq!(h.registry.state().await, state);
    assert_eq!(h.engine.snapshot().unwrap().devices["xxx"].role, Role::Master);
}

#[tokio::test]
async fn sync_zones_honours_creation_flags() {
    let h = harness();
    let record = h.engine.sync_zones(false, false, true).await.unwrap();

    assert_eq!(record.trigger, ambientika_core::RunTrigger::Manual);
    assert!(h.registry.floors().await.unwrap().is_empty());
    assert_eq!(h.registry.areas().await.unwrap().len(), 3);
}

// ── Telemetry + propagation ─────────────────────────────────────────

#[tokio::test]
async fn slaves_follow_master_settings() {
    let h = harness();
    h.engine.trigger_run(manual()).await.unwrap();

    let display = h.engine.display_values();
    let yyy = &display.values["yyy"];
    assert_eq!(yyy.settings.as_ref().unwrap().fan_speed, Some(2));
    assert_eq!(
        yyy.source,
        DisplaySource::ZoneMaster {
            master_serial: "xxx".into()
        }
    );

    h.service.set_fan("xxx", 3);
    h.engine.trigger_run(manual()).await.unwrap();

    let display = h.engine.display_values();
    assert_eq!(display.values["yyy"].settings.as_ref().unwrap().fan_speed, Some(3));
    assert_eq!(display.values["zzz"].settings.as_ref().unwrap().fan_speed, Some(3));
    assert_eq!(display.values["www"].source, DisplaySource::Own);
}

#[tokio::test]
async fn telemetry_failure_keeps_last_known_values() {
    let h = harness();
    h.engine.trigger_run(manual()).await.unwrap();

    h.service.failing_telemetry.lock().unwrap().insert("yyy".into());
    h.service.set_fan("yyy", 0);
    let record = h.engine.trigger_run(manual()).await.unwrap();

    assert_eq!(record.status, RunStatus::Partial);
    assert_eq!(step_status(&record, RunStep::Telemetry), StepStatus::Failed);
    assert_eq!(step_status(&record, RunStep::Reconcile), StepStatus::Succeeded);

    let snapshot = h.engine.snapshot().unwrap();
    let yyy = &snapshot.devices["yyy"];
    assert!(yyy.stale);
    assert_eq!(yyy.settings.as_ref().unwrap().fan_speed, Some(1));
}

// ── Role changes ────────────────────────────────────────────────────

#[tokio::test]
async fn master_swap_writes_both_arrays() {
    let h = harness();
    h.engine.trigger_run(manual()).await.unwrap();

    let record = h.engine.set_zone_master(ZoneId(1), "yyy").await.unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(step_status(&record, RunStep::Roles), StepStatus::Succeeded);
    assert_eq!(*h.service.writes.lock().unwrap(), ["combined"]);

    let snapshot = h.engine.snapshot().unwrap();
    assert_eq!(snapshot.devices["yyy"].role, Role::Master);
    assert_eq!(snapshot.devices["xxx"].role, Role::SlaveMirrored);
    assert_eq!(snapshot.devices["zzz"].role, Role::SlaveOpposite);
    assert!(snapshot.ambiguous_zones().is_empty());

    let status = h.engine.get_zone_status();
    assert_eq!(status[&ZoneId(1)].master_serial.as_deref(), Some("yyy"));
    assert!(!status[&ZoneId(1)].ambiguous_master);
}

#[tokio::test]
async fn current_master_is_a_noop() {
    let h = harness();
    let record = h.engine.set_zone_master(ZoneId(1), "xxx").await.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(h.service.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_target_fails_roles_step_only() {
    let h = harness();
    let record = h.engine.set_zone_master(ZoneId(1), "www").await.unwrap();

    assert_eq!(record.status, RunStatus::Partial);
    assert_eq!(step_status(&record, RunStep::Roles), StepStatus::Failed);
    assert_eq!(step_status(&record, RunStep::Reconcile), StepStatus::Succeeded);
    assert!(h.service.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_combined_endpoint_falls_back_and_verifies_later() {
    let h = harness();
    h.service.combined_missing.store(true, Ordering::SeqCst);

    let record = h.engine.set_zone_master(ZoneId(1), "yyy").await.unwrap();
    assert_eq!(step_status(&record, RunStep::Roles), StepStatus::Succeeded);
    assert_eq!(*h.service.writes.lock().unwrap(), ["legacy"]);

    let next = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(next.status, RunStatus::Succeeded);
    assert!(next.ambiguous_zones.is_empty());
    assert_eq!(h.engine.snapshot().unwrap().devices["yyy"].role, Role::Master);
}

#[tokio::test]
async fn legacy_write_that_never_lands_is_flagged_next_run() {
    let h = harness();
    h.service.combined_missing.store(true, Ordering::SeqCst);
    *h.service.write_mode.lock().unwrap() = WriteMode::FlatOnly;

    let record = h.engine.set_zone_master(ZoneId(1), "yyy").await.unwrap();
    assert_eq!(step_status(&record, RunStep::Roles), StepStatus::Succeeded);
    assert_eq!(*h.service.writes.lock().unwrap(), ["legacy"]);

    let next = h.engine.trigger_run(manual()).await.unwrap();
    assert_eq!(next.status, RunStatus::Partial);
    let roles = next.step(RunStep::Roles).unwrap();
    assert_eq!(roles.status, StepStatus::Failed);
    assert!(roles.error.as_deref().unwrap().contains("diverged"));
    assert_eq!(next.ambiguous_zones, vec![ZoneId(1)]);
    assert!(h.engine.get_zone_status()[&ZoneId(1)].ambiguous_master);
    assert_eq!(h.engine.display_values().values["zzz"].source, DisplaySource::LastKnown);
}

#[tokio::test]
async fn one_sided_write_is_flagged_as_divergence() {
    let h = harness();
    *h.service.write_mode.lock().unwrap() = WriteMode::FlatOnly;

    let record = h.engine.set_zone_master(ZoneId(1), "yyy").await.unwrap();

    assert_eq!(record.status, RunStatus::Partial);
    let roles = record.step(RunStep::Roles).unwrap();
    assert_eq!(roles.status, StepStatus::Failed);
    assert!(roles.error.as_deref().unwrap().contains("diverged"));
    assert_eq!(record.ambiguous_zones, vec![ZoneId(1)]);
    assert!(h.engine.get_zone_status()[&ZoneId(1)].ambiguous_master);
    // the untouched zone is still consistent
    assert!(!h.engine.get_zone_status()[&ZoneId(2)].ambiguous_master);

    // slaves stop mirroring the outgoing master
    let display = h.engine.display_values();
    assert!(display.ambiguous_zones.contains(&ZoneId(1)));
    assert_eq!(display.values["yyy"].source, DisplaySource::LastKnown);
    assert_eq!(display.values["yyy"].settings.as_ref().unwrap().fan_speed, Some(1));
    assert_eq!(display.values["zzz"].source, DisplaySource::LastKnown);
    assert_eq!(display.values["xxx"].source, DisplaySource::Own);
}
