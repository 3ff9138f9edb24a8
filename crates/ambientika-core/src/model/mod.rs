// ── Domain model ──
//
// Remote topology (house/zone/room/device), the local floor/area
// projection, the persisted mapping table, and run bookkeeping.

pub mod ids;
pub mod local;
pub mod mapping;
pub mod run;
pub mod topology;

pub use ids::{HouseId, LocalId, RoomId, ZoneId};
pub use local::{Area, Floor};
pub use mapping::{MappingEntry, MappingKey, MappingTable, RemoteKind};
pub use run::{
    NameCollision, RunCounts, RunRecord, RunStatus, RunStep, RunTrigger, StepOutcome, StepStatus,
};
pub use topology::{
    Device, DeviceSettings, House, Role, RoleDivergence, Room, SlaveVariant, Snapshot, Telemetry,
    Zone,
};
