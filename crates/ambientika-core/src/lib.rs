// ambientika-core: Zone sync engine between ambientika-api and a local floor/area registry.

pub mod config;
pub mod error;
pub mod model;
pub mod propagate;
pub mod reconcile;
pub mod registry;
pub mod remote;
pub mod retry;
pub mod roles;
pub mod snapshot;
pub mod store;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{EngineConfig, SyncOptions};
pub use error::CoreError;
pub use propagate::{DisplaySource, DisplayValues, Propagation, derive_display_values};
pub use reconcile::{ReconcileError, ReconcileResult, reconcile};
pub use registry::{LocalRegistry, MemoryRegistry, RegistryState};
pub use remote::{CloudService, DeviceService};
pub use retry::{BackoffPolicy, FixedJitter, JitterSource, RandomJitter};
pub use roles::{RoleApplyOutcome, RolePatch, apply_role_patch, plan_role_change};
pub use snapshot::build_snapshot;
pub use store::{JsonFileMappingStore, MappingStore, MemoryMappingStore};
pub use sync::{RoleChange, RunRequest, RunState, ZoneStatus, ZoneSync};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Remote topology
    Device, DeviceSettings, House, HouseId, Role, RoleDivergence, Room, RoomId, SlaveVariant,
    Snapshot, Telemetry, Zone, ZoneId,
    // Local hierarchy + mapping
    Area, Floor, LocalId, MappingEntry, MappingKey, MappingTable, RemoteKind,
    // Run bookkeeping
    NameCollision, RunCounts, RunRecord, RunStatus, RunStep, RunTrigger, StepOutcome, StepStatus,
};
