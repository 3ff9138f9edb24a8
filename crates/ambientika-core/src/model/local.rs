// ── Local hierarchy ──

use serde::{Deserialize, Serialize};

use super::ids::LocalId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Floor {
    pub id: LocalId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: LocalId,
    pub name: String,
    pub floor_id: Option<LocalId>,
}
