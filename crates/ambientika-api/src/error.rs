use thiserror::Error;

/// Top-level error type for the `ambientika-api` crate.
///
/// Covers every failure mode of the cloud service surface: authentication,
/// transport, write rejections, and payload decoding.
/// `ambientika-core` maps these onto its sync error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login failed (wrong credentials, locked account, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The service refused the bearer token (expired or revoked).
    #[error("Unauthorized -- re-authentication required")]
    Unauthorized,

    /// A request was attempted before `authenticate()` succeeded.
    #[error("Not authenticated")]
    NotAuthenticated,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The service is reachable but could not serve the request right now.
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    // ── Service responses ───────────────────────────────────────────
    /// A write was refused by the service (validation, conflict, ...).
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The endpoint does not exist on this deployment of the service.
    #[error("Endpoint {path} unavailable (HTTP {status})")]
    EndpointUnavailable { path: String, status: u16 },

    /// Any other non-success response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The requested house is not part of this account.
    #[error("House {house_id} not found")]
    HouseNotFound { house_id: i64 },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if credentials or the session token were refused.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::Unauthorized | Self::NotAuthenticated
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::Unavailable { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns `true` if the endpoint itself is missing (used to pick a
    /// fallback write path).
    pub fn is_endpoint_unavailable(&self) -> bool {
        matches!(self, Self::EndpointUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Api {
            status: 503,
            message: "maintenance".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn rejections_are_not_transient() {
        let err = Error::Rejected {
            status: 422,
            message: "invalid role".into(),
        };
        assert!(!err.is_transient());
        assert!(!err.is_endpoint_unavailable());
    }

    #[test]
    fn unauthorized_is_never_retried() {
        assert!(Error::Unauthorized.is_unauthorized());
        assert!(!Error::Unauthorized.is_transient());
    }
}
