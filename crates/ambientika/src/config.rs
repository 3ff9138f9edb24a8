//! CLI configuration: thin wrapper around `ambientika_config`.
//!
//! Re-exports the shared types and adds resolution that respects
//! `GlobalOpts` flag overrides (--api-url, --house, --timeout).

use std::path::PathBuf;

use secrecy::SecretString;

use ambientika_api::ClientConfig;
use ambientika_core::EngineConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use ambientika_config::{
    Config, Profile, config_path, load_config, load_config_or_default, save_config,
};

/// Cloud account settings, enough to talk to the service.
pub struct Account {
    pub profile_name: String,
    pub client: ClientConfig,
    pub username: String,
    pub password: SecretString,
}

/// Everything needed to stand up a sync engine for one profile.
pub struct Resolved {
    pub account: Account,
    pub engine: EngineConfig,
    pub state_dir: PathBuf,
}

/// Where a profile keeps its local state. Needs no credentials.
pub struct LocalState {
    pub profile_name: String,
    pub house_id: Option<i64>,
    pub state_dir: PathBuf,
}

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.profile_name(global.profile.as_deref())
}

/// Pick the active profile, falling back to flags/env alone when no
/// profile is configured at all.
fn active_profile(global: &GlobalOpts, cfg: &Config, name: &str) -> Result<Profile, CliError> {
    if let Some(profile) = cfg.profiles.get(name) {
        return Ok(profile.clone());
    }
    if cfg.profiles.is_empty() {
        if global.house.is_some() || std::env::var("AMBIENTIKA_USERNAME").is_ok() {
            return Ok(Profile::default());
        }
        return Err(CliError::NoConfig {
            path: config_path().display().to_string(),
        });
    }
    let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
    available.sort();
    Err(CliError::ProfileNotFound {
        name: name.into(),
        available: available.join(", "),
    })
}

/// Load config and the active profile with flag overrides applied.
fn load_profile(global: &GlobalOpts) -> Result<(Config, String, Profile), CliError> {
    let cfg = load_config()?;
    let profile_name = active_profile_name(global, &cfg);
    let mut profile = active_profile(global, &cfg, &profile_name)?;

    if let Some(ref url) = global.api_url {
        profile.api_url = Some(url.clone());
    }
    if let Some(house) = global.house {
        profile.house_id = Some(house);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }
    Ok((cfg, profile_name, profile))
}

pub fn resolve_state(global: &GlobalOpts) -> Result<LocalState, CliError> {
    let (_, profile_name, profile) = load_profile(global)?;
    let state_dir = ambientika_config::state_dir(&profile, &profile_name);
    Ok(LocalState {
        profile_name,
        house_id: profile.house_id,
        state_dir,
    })
}

fn account_for(cfg: &Config, profile_name: String, profile: &Profile) -> Result<Account, CliError> {
    let client = ambientika_config::profile_to_client_config(profile, &cfg.defaults)?;
    let username = ambientika_config::resolve_username(profile, &profile_name)?;
    let password = ambientika_config::resolve_password(profile, &profile_name)?;
    Ok(Account {
        profile_name,
        client,
        username,
        password,
    })
}

pub fn resolve_account(global: &GlobalOpts) -> Result<Account, CliError> {
    let (cfg, profile_name, profile) = load_profile(global)?;
    account_for(&cfg, profile_name, &profile)
}

/// Translate the active profile + global flags into engine and client
/// settings. CLI flag overrides take priority over profile values.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let (cfg, profile_name, profile) = load_profile(global)?;
    let engine =
        ambientika_config::profile_to_engine_config(&profile, &profile_name, &cfg.defaults)?;
    let state_dir = ambientika_config::state_dir(&profile, &profile_name);
    let account = account_for(&cfg, profile_name, &profile)?;

    Ok(Resolved {
        account,
        engine,
        state_dir,
    })
}
