// ── Run records ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::ids::{HouseId, ZoneId};
use super::mapping::RemoteKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Periodic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStep {
    Topology,
    Telemetry,
    Roles,
    Reconcile,
    Persist,
    Propagate,
}

impl RunStep {
    pub const ALL: [RunStep; 6] = [
        Self::Topology,
        Self::Telemetry,
        Self::Roles,
        Self::Reconcile,
        Self::Persist,
        Self::Propagate,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: RunStep,
    pub status: StepStatus,
    pub error: Option<String>,
}

/// A local name that was taken and had to be suffixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCollision {
    pub kind: RemoteKind,
    pub remote_id: i64,
    pub requested: String,
    pub assigned: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub conflicts: u32,
    pub devices_assigned: u32,
    pub retired: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub house_id: HouseId,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: RunCounts,
    pub collisions: Vec<NameCollision>,
    pub ambiguous_zones: Vec<ZoneId>,
    pub steps: Vec<StepOutcome>,
    /// Fatal error, if the run failed outright.
    pub error: Option<String>,
    pub cancelled: bool,
}

impl RunRecord {
    pub fn start(house_id: HouseId, trigger: RunTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            house_id,
            trigger,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            counts: RunCounts::default(),
            collisions: Vec::new(),
            ambiguous_zones: Vec::new(),
            steps: RunStep::ALL
                .iter()
                .map(|&step| StepOutcome {
                    step,
                    status: StepStatus::Skipped,
                    error: None,
                })
                .collect(),
            error: None,
            cancelled: false,
        }
    }

    pub fn step(&self, step: RunStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step)
    }

    pub fn mark(&mut self, step: RunStep, status: StepStatus, error: Option<String>) {
        if let Some(outcome) = self.steps.iter_mut().find(|s| s.step == step) {
            outcome.status = status;
            outcome.error = error;
        }
    }

    pub fn succeed(&mut self, step: RunStep) {
        self.mark(step, StepStatus::Succeeded, None);
    }

    pub fn fail(&mut self, step: RunStep, error: impl ToString) {
        self.mark(step, StepStatus::Failed, Some(error.to_string()));
    }

    /// Close the record. A failed topology fetch fails the run; any other
    /// failed step makes it partial.
    pub fn finish(&mut self) {
        let topology_failed = self
            .step(RunStep::Topology)
            .is_some_and(|s| s.status == StepStatus::Failed);
        let any_failed = self.steps.iter().any(|s| s.status == StepStatus::Failed);

        self.status = if topology_failed || self.error.is_some() {
            RunStatus::Failed
        } else if any_failed || self.cancelled {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}
