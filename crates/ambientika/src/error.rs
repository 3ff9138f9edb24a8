//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use ambientika_config::ConfigError;
use ambientika_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    /// The run finished, but some steps failed.
    pub const PARTIAL: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Ambientika cloud service is unavailable: {message}")]
    #[diagnostic(
        code(ambientika::unavailable),
        help(
            "The service did not answer after retrying.\n\
             Check your network, or raise retry.max_attempts in your profile."
        )
    )]
    Unavailable { message: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(ambientika::timeout),
        help("Increase timeout with --timeout or in your profile.")
    )]
    Timeout { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed for profile '{profile}'")]
    #[diagnostic(
        code(ambientika::auth_failed),
        help(
            "Verify the username and password of your Ambientika account.\n\
             Run: ambientika config set-password --profile {profile}"
        )
    )]
    AuthFailed { profile: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(ambientika::no_credentials),
        help(
            "Configure credentials with: ambientika config init\n\
             Or set AMBIENTIKA_USERNAME and AMBIENTIKA_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(ambientika::not_found),
        help("Run: ambientika {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Roles ────────────────────────────────────────────────────────
    #[error("Role change rejected: {message}")]
    #[diagnostic(
        code(ambientika::role_rejected),
        help("The service refused the new roles. Run `ambientika status` to review the zone.")
    )]
    RoleRejected { message: String },

    #[error("Run finished with failed steps: {summary}")]
    #[diagnostic(
        code(ambientika::partial_run),
        help("Run with -v for details, or `ambientika status` to inspect the last run.")
    )]
    PartialRun { summary: String },

    // ── Local state ──────────────────────────────────────────────────
    #[error("Local state error: {message}")]
    #[diagnostic(code(ambientika::state))]
    State { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ambientika::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(ambientika::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: ambientika config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(ambientika::no_config),
        help(
            "Create one with: ambientika config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(ambientika::config))]
    Config(ConfigError),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Operation '{action}' requires confirmation")]
    #[diagnostic(
        code(ambientika::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(ambientika::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(ambientika::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unavailable { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } | Self::NoConfig { .. } => {
                exit_code::NOT_FOUND
            }
            Self::RoleRejected { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::PartialRun { .. } => exit_code::PARTIAL,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unauthorized { .. } => CliError::AuthFailed {
                profile: "current".into(),
            },
            CoreError::Unavailable { message } => CliError::Unavailable { message },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::EndpointUnavailable { path } => CliError::Unavailable {
                message: format!("endpoint {path} is not offered by this service"),
            },
            CoreError::RoleWriteRejected { message, .. } => CliError::RoleRejected { message },
            e @ CoreError::RolePatchDivergence { .. } => CliError::RoleRejected {
                message: e.to_string(),
            },
            CoreError::InvalidTarget {
                zone_id,
                serial,
                reason,
            } => CliError::Validation {
                field: "serial".into(),
                reason: format!("{serial} cannot be master of zone {zone_id}: {reason}"),
            },
            e @ (CoreError::MappingTableCorruption { .. }
            | CoreError::Registry { .. }
            | CoreError::Persistence { .. }) => CliError::State {
                message: e.to_string(),
            },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: "(none)".into(),
            },
            other => CliError::Config(other),
        }
    }
}
