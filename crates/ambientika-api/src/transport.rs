// Transport configuration for building the reqwest::Client used by
// `AmbientikaClient`.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::Error;

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
}

/// Connection settings for the cloud service.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("ambientika/", env!("CARGO_PKG_VERSION")));

        if let TlsMode::CustomCa(path) = &self.tls {
            let cert_pem = std::fs::read(path)
                .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&cert_pem)
                .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
