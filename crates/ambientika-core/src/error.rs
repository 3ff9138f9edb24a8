// ── Core error types ──
//
// The sync engine's error taxonomy. Consumers never see HTTP status codes
// or JSON parse failures directly: the `From<ambientika_api::Error>` impl
// folds transport-layer errors into the categories the run scheduler
// reasons about (fatal, transient, rejected).

use thiserror::Error;

use crate::model::{RoleDivergence, ZoneId};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Remote errors ────────────────────────────────────────────────
    /// Credentials or session refused. Fatal for a run, never retried.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The cloud service could not be reached or could not serve the request.
    #[error("Remote service unavailable: {message}")]
    Unavailable { message: String },

    #[error("Remote call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The combined write endpoint is missing on this deployment.
    #[error("Endpoint unavailable: {path}")]
    EndpointUnavailable { path: String },

    // ── Role consistency ─────────────────────────────────────────────
    #[error("Role write rejected by remote service: {message}")]
    RoleWriteRejected { status: Option<u16>, message: String },

    /// Post-write verification found the flat and nested role arrays
    /// disagreeing with the patch.
    #[error("Role patch for zone {zone_id} diverged on {} device(s)", divergences.len())]
    RolePatchDivergence {
        zone_id: ZoneId,
        divergences: Vec<RoleDivergence>,
    },

    #[error("Invalid role target {serial} in zone {zone_id}: {reason}")]
    InvalidTarget {
        zone_id: ZoneId,
        serial: String,
        reason: String,
    },

    // ── Local state ──────────────────────────────────────────────────
    #[error("Mapping table at {location} is unreadable: {message}")]
    MappingTableCorruption { location: String, message: String },

    #[error("Local registry error: {message}")]
    Registry { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the failed call is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ambientika_api::Error> for CoreError {
    fn from(err: ambientika_api::Error) -> Self {
        use ambientika_api::Error as Api;

        let transient = err.is_transient();
        match err {
            Api::Authentication { message } => CoreError::Unauthorized { message },
            Api::Unauthorized => CoreError::Unauthorized {
                message: "session token refused".into(),
            },
            Api::NotAuthenticated => CoreError::Unauthorized {
                message: "no session token".into(),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Transport(e) => {
                if transient {
                    CoreError::Unavailable {
                        message: e.to_string(),
                    }
                } else {
                    CoreError::Internal(format!("HTTP transport error: {e}"))
                }
            }
            Api::Unavailable { message } => CoreError::Unavailable { message },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(message) => CoreError::Config {
                message: format!("TLS error: {message}"),
            },
            Api::Rejected { status, message } => CoreError::RoleWriteRejected {
                status: Some(status),
                message,
            },
            Api::EndpointUnavailable { path, .. } => CoreError::EndpointUnavailable { path },
            Api::Api { status, message } => {
                if transient {
                    CoreError::Unavailable {
                        message: format!("HTTP {status}: {message}"),
                    }
                } else {
                    CoreError::Internal(format!("API error (HTTP {status}): {message}"))
                }
            }
            Api::HouseNotFound { house_id } => CoreError::Config {
                message: format!("house {house_id} is not part of this account"),
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
