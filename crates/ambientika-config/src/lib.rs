//! Configuration for the Ambientika zone sync CLI.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation into `ambientika_core::EngineConfig` and
//! `ambientika_api::ClientConfig`. The CLI adds `GlobalOpts`-aware
//! overrides on top.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ambientika_api::{ClientConfig, DEFAULT_BASE_URL, TlsMode};
use ambientika_core::{BackoffPolicy, EngineConfig, HouseId, RoomId, SlaveVariant, SyncOptions};

/// Keyring service name for stored passwords.
pub const KEYRING_SERVICE: &str = "ambientika";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named house profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use: explicit override, else the configured
    /// default, else `"default"`.
    pub fn profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

/// A named house profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Cloud service base URL. Defaults to the public Ambientika endpoint.
    pub api_url: Option<String>,

    /// House to mirror.
    pub house_id: Option<i64>,

    pub username: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Slave variant per remote room id: `"mirrored"` or `"opposite"`.
    #[serde(default)]
    pub room_variants: BTreeMap<String, String>,

    /// Where the mapping table and local registry live.
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncSettings {
    #[serde(default = "default_true")]
    pub auto_sync: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_true")]
    pub sync_zones_to_floors: bool,
    #[serde(default = "default_true")]
    pub sync_rooms_to_areas: bool,
    #[serde(default = "default_true")]
    pub create_missing_floors: bool,
    #[serde(default = "default_true")]
    pub create_missing_areas: bool,
}

fn default_interval_minutes() -> u64 {
    15
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync: true,
            interval_minutes: default_interval_minutes(),
            sync_zones_to_floors: true,
            sync_rooms_to_areas: true,
            create_missing_floors: true,
            create_missing_areas: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    4
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("eu", "ambientika", "ambientika")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.extend(parts);
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".config", "ambientika", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory holding a profile's mapping table and local registry.
pub fn state_dir(profile: &Profile, profile_name: &str) -> PathBuf {
    if let Some(ref dir) = profile.state_dir {
        return dir.clone();
    }
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "ambientika", profile_name]),
        |dirs| dirs.data_dir().join(profile_name),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file, still overlaid with `AMBIENTIKA_*` env.
///
/// Nested keys use a double underscore:
/// `AMBIENTIKA_PROFILES__HOME__HOUSE_ID=42`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("AMBIENTIKA_").split("__"));

    Ok(figment.extract()?)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(
        KEYRING_SERVICE,
        &format!("{profile_name}/password"),
    )?)
}

pub fn resolve_username(profile: &Profile, profile_name: &str) -> Result<String, ConfigError> {
    profile
        .username
        .clone()
        .or_else(|| std::env::var("AMBIENTIKA_USERNAME").ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })
}

/// Resolve the account password without CLI flags.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }
    if let Ok(val) = std::env::var("AMBIENTIKA_PASSWORD") {
        return Ok(SecretString::from(val));
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a profile's password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(password)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Connection settings for the cloud client.
pub fn profile_to_client_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let raw = profile.api_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let base_url: url::Url = raw
        .parse()
        .map_err(|_| invalid("api_url", format!("invalid URL: {raw}")))?;

    let tls = profile
        .ca_cert
        .clone()
        .map_or(TlsMode::System, TlsMode::CustomCa);

    Ok(ClientConfig {
        base_url,
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    })
}

/// Room id → slave variant, validated.
pub fn parse_room_variants(
    raw: &BTreeMap<String, String>,
) -> Result<BTreeMap<RoomId, SlaveVariant>, ConfigError> {
    raw.iter()
        .map(|(room, variant)| {
            let id: i64 = room
                .trim()
                .parse()
                .map_err(|_| invalid("room_variants", format!("room id '{room}' is not a number")))?;
            let variant = SlaveVariant::from_str(variant.trim()).map_err(|_| {
                invalid(
                    "room_variants",
                    format!("expected 'mirrored' or 'opposite' for room {id}, got '{variant}'"),
                )
            })?;
            Ok((RoomId(id), variant))
        })
        .collect()
}

/// Build the engine configuration for a profile.
pub fn profile_to_engine_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<EngineConfig, ConfigError> {
    let house_id = profile.house_id.ok_or_else(|| {
        invalid(
            "house_id",
            format!("profile '{profile_name}' has no house_id (list them with `ambientika houses`)"),
        )
    })?;

    let sync = &profile.sync;
    if sync.auto_sync && sync.interval_minutes == 0 {
        return Err(invalid("sync.interval_minutes", "must be at least 1"));
    }
    let retry = &profile.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts", "must be at least 1"));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(invalid(
            "retry.base_delay_ms",
            "must not exceed retry.max_delay_ms",
        ));
    }

    let mut config = EngineConfig::new(HouseId(house_id));
    config.options = SyncOptions {
        sync_zones_to_floors: sync.sync_zones_to_floors,
        sync_rooms_to_areas: sync.sync_rooms_to_areas,
        create_missing_floors: sync.create_missing_floors,
        create_missing_areas: sync.create_missing_areas,
        force_resync: false,
    };
    config.backoff = BackoffPolicy {
        base_delay: Duration::from_millis(retry.base_delay_ms),
        max_delay: Duration::from_millis(retry.max_delay_ms),
        max_attempts: retry.max_attempts,
        ..BackoffPolicy::default()
    };
    config.remote_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.interval = if sync.auto_sync {
        Duration::from_secs(sync.interval_minutes.saturating_mul(60))
    } else {
        Duration::ZERO
    };
    config.room_variants = parse_room_variants(&profile.room_variants)?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
output = "json"

[profiles.home]
house_id = 42
username = "me@example.com"
password = "hunter2"
timeout = 10

[profiles.home.sync]
auto_sync = false
create_missing_areas = false

[profiles.home.retry]
max_attempts = 2

[profiles.home.room_variants]
"7" = "mirrored"
"#;

    fn sample() -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        load_config_from(&path).unwrap()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert_eq!(cfg.defaults.output, "table");
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn profile_settings_fill_engine_config() {
        let cfg = sample();
        let name = cfg.profile_name(None);
        assert_eq!(name, "home");

        let profile = cfg.profile(&name).unwrap();
        assert_eq!(profile.sync.interval_minutes, 15);

        let engine = profile_to_engine_config(profile, &name, &cfg.defaults).unwrap();
        assert_eq!(engine.house_id, HouseId(42));
        assert_eq!(engine.interval, Duration::ZERO);
        assert!(engine.options.create_missing_floors);
        assert!(!engine.options.create_missing_areas);
        assert_eq!(engine.backoff.max_attempts, 2);
        assert_eq!(engine.backoff.base_delay, Duration::from_millis(500));
        assert_eq!(engine.remote_timeout, Duration::from_secs(10));
        assert_eq!(engine.room_variants[&RoomId(7)], SlaveVariant::Mirrored);
    }

    #[test]
    fn client_config_defaults_to_public_endpoint() {
        let cfg = sample();
        let client = profile_to_client_config(cfg.profile("home").unwrap(), &cfg.defaults).unwrap();
        assert_eq!(client.base_url.as_str(), DEFAULT_BASE_URL);
        assert!(matches!(client.tls, TlsMode::System));
    }

    #[test]
    fn house_id_is_required() {
        let err = profile_to_engine_config(&Profile::default(), "x", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "house_id"));
    }

    #[test]
    fn bad_room_variant_is_rejected() {
        let raw = BTreeMap::from([("3".to_owned(), "sideways".to_owned())]);
        assert!(parse_room_variants(&raw).is_err());
        let raw = BTreeMap::from([("kitchen".to_owned(), "opposite".to_owned())]);
        assert!(parse_room_variants(&raw).is_err());
    }

    #[test]
    fn plaintext_password_is_last_resort() {
        let cfg = sample();
        let profile = cfg.profile("home").unwrap();
        // an unknown profile name has no keyring entry
        let secret = resolve_password(profile, "ambientika-test-no-such-profile");
        if std::env::var("AMBIENTIKA_PASSWORD").is_err() {
            use secrecy::ExposeSecret;
            assert_eq!(secret.unwrap().expose_secret(), "hunter2");
        }
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                house_id: Some(9),
                username: Some("u".into()),
                ..Profile::default()
            },
        );
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profile("default").unwrap().house_id, Some(9));
        assert!(matches!(
            loaded.profile("other"),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }
}
