// ── Zone sync engine ──
//
// Per-house reconciliation context. Serializes runs behind a single-flight
// guard, executes each run on its own task (a dropped caller never cancels
// a run mid-write), and publishes the latest snapshot, display values, and
// zone status for readers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use ambientika_api::DeviceStatusDto;

use crate::config::{EngineConfig, SyncOptions};
use crate::error::CoreError;
use crate::model::{
    MappingTable, RunRecord, RunStep, RunTrigger, Snapshot, StepStatus, ZoneId,
};
use crate::propagate::{Propagation, derive_display_values};
use crate::reconcile::reconcile;
use crate::registry::LocalRegistry;
use crate::remote::DeviceService;
use crate::roles::{RoleApplyOutcome, RolePatch, apply_role_patch, log_divergences, plan_role_change};
use crate::snapshot::{build_snapshot, telemetry_from_dto};
use crate::store::MappingStore;

// ── Public types ─────────────────────────────────────────────────────

/// Run state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running { run_id: Uuid },
}

/// Make `serial` the master of `zone_id` during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChange {
    pub zone_id: ZoneId,
    pub serial: String,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub trigger: RunTrigger,
    pub options: SyncOptions,
    pub role_change: Option<RoleChange>,
}

impl RunRequest {
    pub fn periodic(options: SyncOptions) -> Self {
        Self {
            trigger: RunTrigger::Periodic,
            options,
            role_change: None,
        }
    }

    pub fn manual(options: SyncOptions) -> Self {
        Self {
            trigger: RunTrigger::Manual,
            options,
            role_change: None,
        }
    }
}

/// Per-zone status exposed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneStatus {
    pub zone_id: ZoneId,
    pub name: String,
    pub master_serial: Option<String>,
    pub ambiguous_master: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// How a run step failed.
enum StepError {
    /// Ends the run: nothing after this step is attempted.
    Fatal(CoreError),
    /// Recorded on the step; the run carries on.
    Failed(String),
}

// ── ZoneSync ─────────────────────────────────────────────────────────

/// Sync engine for one house.
///
/// Cheaply cloneable via `Arc<Inner>`. At most one run executes at a time;
/// concurrent triggers observe the run already in flight.
#[derive(Clone)]
pub struct ZoneSync {
    inner: Arc<Inner>,
}

struct InFlight {
    record: RunRecord,
    cancel: CancellationToken,
    done: watch::Receiver<Option<RunRecord>>,
}

struct Inner {
    config: EngineConfig,
    remote: Arc<dyn DeviceService>,
    registry: Arc<dyn LocalRegistry>,
    store: Arc<dyn MappingStore>,
    /// Loaded on first use. Single writer: the reconcile step.
    table: RwLock<Option<MappingTable>>,
    snapshot: ArcSwapOption<Snapshot>,
    display: ArcSwap<Propagation>,
    zone_status: ArcSwap<BTreeMap<ZoneId, ZoneStatus>>,
    /// Legacy role writes awaiting verification on the next refresh.
    pending_legacy: Mutex<Vec<RolePatch>>,
    in_flight: Mutex<Option<InFlight>>,
    history: Mutex<VecDeque<RunRecord>>,
    run_state: watch::Sender<RunState>,
    run_count: AtomicU64,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ZoneSync {
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn DeviceService>,
        registry: Arc<dyn LocalRegistry>,
        store: Arc<dyn MappingStore>,
    ) -> Self {
        let (run_state, _) = watch::channel(RunState::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                remote,
                registry,
                store,
                table: RwLock::new(None),
                snapshot: ArcSwapOption::empty(),
                display: ArcSwap::from_pointee(Propagation::default()),
                zone_status: ArcSwap::from_pointee(BTreeMap::new()),
                pending_legacy: Mutex::new(Vec::new()),
                in_flight: Mutex::new(None),
                history: Mutex::new(VecDeque::new()),
                run_state,
                run_count: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Triggers ─────────────────────────────────────────────────────

    /// Start a run, or join the one in flight, and wait for its record.
    pub async fn trigger_run(&self, request: RunRequest) -> Result<RunRecord, CoreError> {
        let (_, mut done, _) = self.start_or_join(request).await;
        wait_done(&mut done).await
    }

    /// Start a run, or observe the one in flight, without waiting.
    /// Returns the record as it stands (status `running`).
    pub async fn try_trigger_run(&self, request: RunRequest) -> RunRecord {
        self.start_or_join(request).await.0
    }

    /// Manual sync with per-call creation flags.
    pub async fn sync_zones(
        &self,
        force_resync: bool,
        create_missing_floors: bool,
        create_missing_areas: bool,
    ) -> Result<RunRecord, CoreError> {
        let options = SyncOptions {
            force_resync,
            create_missing_floors,
            create_missing_areas,
            ..self.inner.config.options
        };
        self.trigger_run(RunRequest::manual(options)).await
    }

    /// Make `serial` the master of `zone_id`.
    ///
    /// Goes through the single-flight guard like any run, but never piggybacks
    /// on an unrelated run: if one is in flight, it is awaited first.
    pub async fn set_zone_master(
        &self,
        zone_id: ZoneId,
        serial: impl Into<String>,
    ) -> Result<RunRecord, CoreError> {
        let request = RunRequest {
            role_change: Some(RoleChange {
                zone_id,
                serial: serial.into(),
            }),
            ..RunRequest::manual(self.inner.config.options)
        };
        loop {
            let (_, mut done, started) = self.start_or_join(request.clone()).await;
            let record = wait_done(&mut done).await?;
            if started {
                return Ok(record);
            }
        }
    }

    /// Ask the in-flight run to stop before its next zone.
    pub async fn cancel_current_run(&self) -> bool {
        match self.inner.in_flight.lock().await.as_ref() {
            Some(flight) => {
                info!(run_id = %flight.record.id, "cancellation requested");
                flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    // ── Observers ────────────────────────────────────────────────────

    pub async fn is_running(&self) -> bool {
        self.inner.in_flight.lock().await.is_some()
    }

    pub async fn current_run(&self) -> Option<RunRecord> {
        self.inner
            .in_flight
            .lock()
            .await
            .as_ref()
            .map(|f| f.record.clone())
    }

    /// Number of runs actually started (joins do not count).
    pub fn run_count(&self) -> u64 {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Finished runs, oldest first.
    pub async fn history(&self) -> Vec<RunRecord> {
        self.inner.history.lock().await.iter().cloned().collect()
    }

    pub async fn last_run(&self) -> Option<RunRecord> {
        self.inner.history.lock().await.back().cloned()
    }

    pub fn subscribe_run_state(&self) -> watch::Receiver<RunState> {
        self.inner.run_state.subscribe()
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.snapshot.load_full()
    }

    pub fn display_values(&self) -> Arc<Propagation> {
        self.inner.display.load_full()
    }

    pub fn get_zone_status(&self) -> BTreeMap<ZoneId, ZoneStatus> {
        (**self.inner.zone_status.load()).clone()
    }

    pub async fn mapping_table(&self) -> Option<MappingTable> {
        self.inner.table.read().await.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the periodic trigger. A zero interval disables it.
    pub async fn start(&self) {
        let period = self.inner.config.interval;
        if period.is_zero() {
            debug!("periodic sync disabled");
            return;
        }
        let engine = self.clone();
        let cancel = self.inner.cancel.clone();
        self.inner
            .task_handles
            .lock()
            .await
            .push(tokio::spawn(periodic_task(engine, period, cancel)));
        info!(house_id = %self.inner.config.house_id, ?period, "periodic sync started");
    }

    /// Stop the periodic task and let any in-flight run wind down.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        let done = self
            .inner
            .in_flight
            .lock()
            .await
            .as_ref()
            .map(|f| f.done.clone());
        if let Some(mut done) = done {
            let _ = wait_done(&mut done).await;
        }
        debug!("zone sync shut down");
    }

    // ── Single-flight ────────────────────────────────────────────────

    async fn start_or_join(
        &self,
        request: RunRequest,
    ) -> (RunRecord, watch::Receiver<Option<RunRecord>>, bool) {
        let mut slot = self.inner.in_flight.lock().await;
        if let Some(flight) = slot.as_ref() {
            debug!(run_id = %flight.record.id, "run already in flight, joining");
            return (flight.record.clone(), flight.done.clone(), false);
        }

        let record = RunRecord::start(self.inner.config.house_id, request.trigger);
        let cancel = self.inner.cancel.child_token();
        let (done_tx, done_rx) = watch::channel(None);
        *slot = Some(InFlight {
            record: record.clone(),
            cancel: cancel.clone(),
            done: done_rx.clone(),
        });
        self.inner.run_count.fetch_add(1, Ordering::SeqCst);
        self.inner
            .run_state
            .send_replace(RunState::Running { run_id: record.id });
        drop(slot);

        let span = info_span!(
            "sync_run",
            run_id = %record.id,
            house_id = %record.house_id,
            trigger = %record.trigger,
        );
        let engine = self.clone();
        let initial = record.clone();
        tokio::spawn(
            async move {
                let finished = engine.execute(initial, request, cancel).await;
                engine.finish_run(finished.clone()).await;
                let _ = done_tx.send(Some(finished));
            }
            .instrument(span),
        );

        (record, done_rx, true)
    }

    async fn finish_run(&self, record: RunRecord) {
        {
            let mut history = self.inner.history.lock().await;
            history.push_back(record);
            while history.len() > self.inner.config.history_limit.max(1) {
                history.pop_front();
            }
        }
        *self.inner.in_flight.lock().await = None;
        self.inner.run_state.send_replace(RunState::Idle);
    }

    // ── Run body ─────────────────────────────────────────────────────

    async fn execute(
        &self,
        mut record: RunRecord,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> RunRecord {
        let inner = &self.inner;
        let cfg = &inner.config;
        info!(options = ?request.options, "sync run started");

        // topology
        let previous = inner.snapshot.load_full();
        let fetched = cfg
            .backoff
            .retry("fetch_house_topology", cfg.remote_timeout, || {
                inner.remote.fetch_house_topology(cfg.house_id)
            })
            .await;

        let (mut snapshot, topology_ok) = match fetched {
            Ok(payload) => {
                record.succeed(RunStep::Topology);
                (build_snapshot(payload), true)
            }
            Err(e) if e.is_unauthorized() => return abort(record, RunStep::Topology, &e),
            Err(e) => {
                warn!(error = %e, "topology fetch failed");
                record.fail(RunStep::Topology, &e);
                let Some(known) = previous.as_deref() else {
                    record.finish();
                    return record;
                };
                // keep the local hierarchy current with what we already know
                (known.as_partial(), false)
            }
        };

        if topology_ok {
            match self
                .refresh_telemetry(&mut snapshot, previous.as_deref(), &cancel)
                .await
            {
                Ok(()) => record.succeed(RunStep::Telemetry),
                Err(StepError::Fatal(e)) => return abort(record, RunStep::Telemetry, &e),
                Err(StepError::Failed(message)) => record.fail(RunStep::Telemetry, message),
            }
        }

        // roles
        let mut flagged: BTreeSet<ZoneId> = BTreeSet::new();
        if topology_ok {
            match self
                .check_roles(&mut snapshot, request.role_change.as_ref(), &mut flagged)
                .await
            {
                Ok(()) => record.succeed(RunStep::Roles),
                Err(StepError::Fatal(e)) => return abort(record, RunStep::Roles, &e),
                Err(StepError::Failed(message)) => record.fail(RunStep::Roles, message),
            }
        } else if request.role_change.is_some() {
            record.fail(RunStep::Roles, "topology unavailable, role change not attempted");
        }

        // reconcile + persist
        let reconciled = self
            .reconcile_step(&snapshot, &request.options, &cancel, &mut record)
            .await;

        // propagate
        let propagation = derive_display_values(&snapshot, &flagged);
        flagged.extend(propagation.ambiguous_zones.iter().copied());
        record.ambiguous_zones = flagged.iter().copied().collect();
        self.publish_zone_status(&snapshot, &flagged, topology_ok && reconciled);
        inner.display.store(Arc::new(propagation));
        if topology_ok {
            inner.snapshot.store(Some(Arc::new(snapshot)));
        }
        record.succeed(RunStep::Propagate);

        record.finish();
        info!(
            status = %record.status,
            created = record.counts.created,
            updated = record.counts.updated,
            skipped = record.counts.skipped,
            conflicts = record.counts.conflicts,
            retired = record.counts.retired,
            "sync run finished"
        );
        record
    }

    /// Fetch telemetry zone by zone, concurrently across zones. Devices
    /// whose fetch fails keep what the previous snapshot knew. A refused
    /// session is fatal.
    async fn refresh_telemetry(
        &self,
        snapshot: &mut Snapshot,
        previous: Option<&Snapshot>,
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        let inner = &self.inner;
        let cfg = &inner.config;

        let mut by_zone: BTreeMap<ZoneId, Vec<String>> = BTreeMap::new();
        for device in snapshot.devices.values() {
            by_zone
                .entry(device.zone_id)
                .or_default()
                .push(device.serial.clone());
        }

        let zone_fetches = by_zone.into_values().map(|serials| async move {
            let mut results: Vec<(String, Result<DeviceStatusDto, CoreError>)> = Vec::new();
            if cancel.is_cancelled() {
                return results;
            }
            for serial in serials {
                let status = cfg
                    .backoff
                    .retry("fetch_device_telemetry", cfg.remote_timeout, || {
                        inner.remote.fetch_device_telemetry(&serial)
                    })
                    .await;
                let refused = status.as_ref().is_err_and(CoreError::is_unauthorized);
                results.push((serial, status));
                if refused {
                    break;
                }
            }
            results
        });
        let results: Vec<_> = join_all(zone_fetches).await.into_iter().flatten().collect();

        let mut failed = 0usize;
        let mut last_error = None;
        for (serial, status) in results {
            let Some(device) = snapshot.devices.get_mut(&serial) else {
                continue;
            };
            match status {
                Err(e) if e.is_unauthorized() => return Err(StepError::Fatal(e)),
                Ok(dto) => {
                    let (telemetry, settings) = telemetry_from_dto(&dto);
                    device.telemetry = Some(telemetry);
                    device.settings = Some(settings);
                    device.stale = false;
                }
                Err(e) => {
                    warn!(%serial, error = %e, "telemetry fetch failed, keeping last known values");
                    if let Some(prev) = previous.and_then(|p| p.devices.get(&serial)) {
                        device.telemetry.clone_from(&prev.telemetry);
                        device.settings.clone_from(&prev.settings);
                    }
                    device.stale = true;
                    failed += 1;
                    last_error = Some(e.to_string());
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(StepError::Failed("cancelled".into()));
        }
        match last_error {
            None => Ok(()),
            Some(e) => Err(StepError::Failed(format!(
                "telemetry failed for {failed} of {} device(s): {e}",
                snapshot.devices.len()
            ))),
        }
    }

    /// Verify pending legacy writes, apply a requested role change, and
    /// report zones whose role data is inconsistent.
    async fn check_roles(
        &self,
        snapshot: &mut Snapshot,
        change: Option<&RoleChange>,
        flagged: &mut BTreeSet<ZoneId>,
    ) -> Result<(), StepError> {
        let inner = &self.inner;
        let cfg = &inner.config;
        let mut errors: Vec<String> = Vec::new();

        let pending: Vec<RolePatch> = inner.pending_legacy.lock().await.drain(..).collect();
        for patch in pending {
            let divergences = patch.verify(&snapshot.payload);
            if divergences.is_empty() {
                info!(zone_id = %patch.zone_id, "legacy role write converged");
            } else {
                log_divergences(patch.zone_id, &divergences);
                flagged.insert(patch.zone_id);
                errors.push(
                    CoreError::RolePatchDivergence {
                        zone_id: patch.zone_id,
                        divergences,
                    }
                    .to_string(),
                );
            }
        }

        if let Some(change) = change {
            let outcome = match plan_role_change(
                snapshot,
                change.zone_id,
                &change.serial,
                &cfg.room_variants,
            ) {
                Ok(patch) => apply_role_patch(
                    inner.remote.as_ref(),
                    &cfg.backoff,
                    cfg.remote_timeout,
                    &patch,
                    &snapshot.payload,
                )
                .await
                .map(|outcome| (patch, outcome)),
                Err(e) => Err(e),
            };

            match outcome {
                Ok((_, RoleApplyOutcome::Unchanged)) => {}
                Ok((_, RoleApplyOutcome::Applied { refreshed })) => {
                    let mut fresh = build_snapshot(refreshed);
                    for device in fresh.devices.values_mut() {
                        if let Some(known) = snapshot.devices.get(&device.serial) {
                            device.telemetry.clone_from(&known.telemetry);
                            device.settings.clone_from(&known.settings);
                            device.stale = known.stale;
                        }
                    }
                    *snapshot = fresh;
                }
                Ok((patch, RoleApplyOutcome::LegacyPending)) => {
                    inner.pending_legacy.lock().await.push(patch);
                }
                Err(e) if e.is_unauthorized() => return Err(StepError::Fatal(e)),
                Err(e) => {
                    warn!(zone_id = %change.zone_id, serial = %change.serial, error = %e, "role change failed");
                    if let CoreError::RolePatchDivergence { zone_id, .. } = &e {
                        flagged.insert(*zone_id);
                    }
                    errors.push(e.to_string());
                }
            }
        }

        for zone_id in snapshot.ambiguous_zones() {
            let masters = snapshot.zone_masters(zone_id).len();
            warn!(%zone_id, masters, "zone has no single master");
            if let Some(zone) = snapshot.zones.get(&zone_id) {
                log_divergences(zone_id, &zone.role_divergence);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StepError::Failed(errors.join("; ")))
        }
    }

    /// Run the reconciler under the table's write lock, then persist the
    /// table if it changed. Returns whether every zone was reconciled.
    async fn reconcile_step(
        &self,
        snapshot: &Snapshot,
        options: &SyncOptions,
        cancel: &CancellationToken,
        record: &mut RunRecord,
    ) -> bool {
        let inner = &self.inner;
        let mut guard = inner.table.write().await;
        if options.force_resync || guard.is_none() {
            *guard = Some(self.load_table().await);
        }
        let Some(table) = guard.as_mut() else {
            record.fail(RunStep::Reconcile, "mapping table unavailable");
            return false;
        };

        let before = table.clone();
        let complete = match reconcile(snapshot, table, inner.registry.as_ref(), options, cancel).await
        {
            Ok(result) => {
                record.counts = result.counts;
                record.collisions = result.collisions;
                if result.cancelled {
                    record.cancelled = true;
                    record.fail(RunStep::Reconcile, "cancelled before all zones were processed");
                    false
                } else {
                    record.succeed(RunStep::Reconcile);
                    true
                }
            }
            Err(e) => {
                warn!(
                    error = %e.source,
                    created = e.partial.counts.created,
                    "reconcile failed part-way"
                );
                record.counts = e.partial.counts;
                record.collisions = e.partial.collisions;
                record.fail(RunStep::Reconcile, &e.source);
                false
            }
        };

        if *table == before {
            record.mark(RunStep::Persist, StepStatus::Succeeded, None);
        } else {
            match inner.store.save(table).await {
                Ok(()) => record.succeed(RunStep::Persist),
                Err(e) => {
                    warn!(error = %e, "mapping table not saved");
                    record.fail(RunStep::Persist, &e);
                }
            }
        }
        complete
    }

    async fn load_table(&self) -> MappingTable {
        let house_id = self.inner.config.house_id;
        match self.inner.store.load(house_id).await {
            Ok(table) => {
                debug!(entries = table.len(), "mapping table loaded");
                table
            }
            Err(e) => {
                warn!(error = %e, "mapping table unusable, starting from an empty table");
                MappingTable::new(house_id)
            }
        }
    }

    fn publish_zone_status(&self, snapshot: &Snapshot, flagged: &BTreeSet<ZoneId>, synced: bool) {
        let previous = self.inner.zone_status.load();
        let now = Utc::now();
        let status = snapshot
            .zones
            .values()
            .map(|zone| {
                let masters = snapshot.zone_masters(zone.id);
                let master_serial = match masters.as_slice() {
                    [only] => Some(only.serial.clone()),
                    _ => None,
                };
                let last_synced_at = if synced {
                    Some(now)
                } else {
                    previous.get(&zone.id).and_then(|s| s.last_synced_at)
                };
                (
                    zone.id,
                    ZoneStatus {
                        zone_id: zone.id,
                        name: zone.name.clone(),
                        master_serial,
                        ambiguous_master: flagged.contains(&zone.id),
                        last_synced_at,
                    },
                )
            })
            .collect();
        self.inner.zone_status.store(Arc::new(status));
    }
}

/// End a run on a fatal error. Later steps are not attempted and nothing
/// is published.
fn abort(mut record: RunRecord, step: RunStep, error: &CoreError) -> RunRecord {
    warn!(%step, error = %error, "run aborted");
    record.fail(step, error);
    record.error = Some(error.to_string());
    record.finish();
    record
}

async fn wait_done(done: &mut watch::Receiver<Option<RunRecord>>) -> Result<RunRecord, CoreError> {
    let value = done
        .wait_for(Option::is_some)
        .await
        .map_err(|_| CoreError::Internal("run task ended without a record".into()))?;
    (*value)
        .clone()
        .ok_or_else(|| CoreError::Internal("run finished without a record".into()))
}

/// Fire a run every `period`; ticks that find a run active are skipped.
async fn periodic_task(engine: ZoneSync, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if engine.is_running().await {
                    debug!("previous run still active, skipping tick");
                    continue;
                }
                let request = RunRequest::periodic(engine.inner.config.options);
                match engine.trigger_run(request).await {
                    Ok(record) => debug!(status = %record.status, "periodic run finished"),
                    Err(e) => warn!(error = %e, "periodic run failed"),
                }
            }
        }
    }
}
