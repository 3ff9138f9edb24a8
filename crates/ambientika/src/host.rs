//! The CLI as host platform.
//!
//! Owns the local floor/area registry and keeps it, the run history, and
//! the latest zone status and display values as JSON files in the
//! profile's state directory so that offline commands can read them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use ambientika_api::AmbientikaClient;
use ambientika_core::{
    CloudService, JsonFileMappingStore, MemoryRegistry, Propagation, RegistryState, RunRecord,
    ZoneId, ZoneStatus, ZoneSync,
};

use crate::config::{Account, Resolved};
use crate::error::CliError;

/// Finished runs kept on disk.
const RUN_HISTORY: usize = 20;

// ── State files ─────────────────────────────────────────────────────

pub struct StateFiles {
    dir: PathBuf,
}

impl StateFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub async fn registry(&self) -> Result<RegistryState, CliError> {
        Ok(read_json(&self.path("registry.json")).await?.unwrap_or_default())
    }

    pub async fn runs(&self) -> Result<Vec<RunRecord>, CliError> {
        Ok(read_json(&self.path("runs.json")).await?.unwrap_or_default())
    }

    pub async fn zone_status(&self) -> Result<Option<BTreeMap<ZoneId, ZoneStatus>>, CliError> {
        read_json(&self.path("zones.json")).await
    }

    pub async fn display(&self) -> Result<Option<Propagation>, CliError> {
        read_json(&self.path("display.json")).await
    }

    async fn save_registry(&self, state: &RegistryState) -> Result<(), CliError> {
        write_json(&self.path("registry.json"), state).await
    }

    /// Append finished runs, keeping the newest `RUN_HISTORY`.
    async fn append_runs(&self, records: &[RunRecord]) -> Result<(), CliError> {
        let mut runs = self.runs().await?;
        for record in records {
            if !runs.iter().any(|r| r.id == record.id) {
                runs.push(record.clone());
            }
        }
        let excess = runs.len().saturating_sub(RUN_HISTORY);
        runs.drain(..excess);
        write_json(&self.path("runs.json"), &runs).await
    }

    async fn save_zone_status(&self, status: &BTreeMap<ZoneId, ZoneStatus>) -> Result<(), CliError> {
        write_json(&self.path("zones.json"), status).await
    }

    async fn save_display(&self, display: &Propagation) -> Result<(), CliError> {
        write_json(&self.path("display.json"), display).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CliError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw).map_err(|e| {
            CliError::State {
                message: format!("{} is unreadable: {e}", path.display()),
            }
        })?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write through a temp file so readers never see half a document.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "state file written");
    Ok(())
}

// ── Cloud session ───────────────────────────────────────────────────

pub fn cloud_service(account: &Account) -> Result<Arc<CloudService>, CliError> {
    let client = AmbientikaClient::new(&account.client).map_err(ambientika_core::CoreError::from)?;
    Ok(Arc::new(CloudService::new(
        Arc::new(client),
        account.username.clone(),
        account.password.clone(),
    )))
}

// ── Host ────────────────────────────────────────────────────────────

/// A sync engine wired to the cloud and to the file-backed registry.
pub struct Host {
    pub engine: ZoneSync,
    pub profile_name: String,
    registry: Arc<MemoryRegistry>,
    files: StateFiles,
}

impl Host {
    pub async fn open(resolved: Resolved) -> Result<Self, CliError> {
        let files = StateFiles::new(resolved.state_dir);
        let registry = Arc::new(MemoryRegistry::from_state(files.registry().await?));
        let store = Arc::new(JsonFileMappingStore::new(files.dir()));
        let cloud = cloud_service(&resolved.account)?;

        debug!(
            profile = %resolved.account.profile_name,
            house_id = %resolved.engine.house_id,
            state_dir = %files.dir().display(),
            "opening host"
        );
        let engine = ZoneSync::new(resolved.engine, cloud, registry.clone(), store);

        Ok(Self {
            engine,
            profile_name: resolved.account.profile_name,
            registry,
            files,
        })
    }

    /// Flush registry, run history, zone status, and display values.
    pub async fn persist(&self) -> Result<(), CliError> {
        self.files.save_registry(&self.registry.state().await).await?;
        self.files.append_runs(&self.engine.history().await).await?;
        if self.engine.snapshot().is_some() {
            self.files
                .save_zone_status(&self.engine.get_zone_status())
                .await?;
            self.files
                .save_display(self.engine.display_values().as_ref())
                .await?;
        }
        Ok(())
    }
}
