// Ambientika cloud HTTP client
//
// Wraps `reqwest::Client` with bearer-token auth, URL construction, and
// status-code mapping. Write endpoints distinguish "the service refused
// this payload" from "this deployment has no such endpoint" so callers can
// choose a fallback path.

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{AuthRequest, AuthResponse, DeviceStatusDto, HouseDto};
use crate::transport::ClientConfig;

/// Whether a request reads or writes; affects how 4xx codes are mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Async client for the Ambientika cloud device service.
pub struct AmbientikaClient {
    http: reqwest::Client,
    base_url: Url,
    token: RwLock<Option<SecretString>>,
    timeout_secs: u64,
}

impl AmbientikaClient {
    /// Build a client from a `ClientConfig`.
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let http = config.build_client()?;
        Ok(Self {
            http,
            base_url: normalize_base(config.base_url.clone()),
            token: RwLock::new(None),
            timeout_secs: config.timeout.as_secs(),
        })
    }

    /// Build a client around an existing `reqwest::Client`.
    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = normalize_base(Url::parse(base_url)?);
        Ok(Self {
            http,
            base_url,
            token: RwLock::new(None),
            timeout_secs: 30,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether a session token is currently held.
    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Install a token obtained elsewhere.
    pub async fn set_token(&self, token: SecretString) {
        *self.token.write().await = Some(token);
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Log in and keep the returned JWT for subsequent requests.
    pub async fn authenticate(&self, username: &str, password: &SecretString) -> Result<(), Error> {
        let url = self.url("users/authenticate")?;
        debug!("POST {}", url);

        let body = AuthRequest {
            username,
            password: password.expose_secret(),
        };
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status == StatusCode::BAD_REQUEST
        {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: if message.is_empty() {
                    format!("login refused (HTTP {})", status.as_u16())
                } else {
                    message
                },
            });
        }

        let auth: AuthResponse = self.decode(resp, "users/authenticate", Access::Read).await?;
        *self.token.write().await = Some(SecretString::from(auth.jwt_token));
        debug!("authenticated against {}", self.base_url);
        Ok(())
    }

    /// All houses visible to this account.
    pub async fn houses(&self) -> Result<Vec<HouseDto>, Error> {
        self.send(Method::GET, "House/houses-info", None::<&()>, &[], Access::Read)
            .await
    }

    /// One house by id.
    pub async fn fetch_house(&self, house_id: i64) -> Result<HouseDto, Error> {
        self.houses()
            .await?
            .into_iter()
            .find(|h| h.id == house_id)
            .ok_or(Error::HouseNotFound { house_id })
    }

    /// Live telemetry and configured settings of a single device.
    pub async fn device_status(&self, serial: &str) -> Result<DeviceStatusDto, Error> {
        self.send(
            Method::GET,
            "Device/device-status",
            None::<&()>,
            &[("deviceSerialNumber", serial)],
            Access::Read,
        )
        .await
    }

    /// Combined write of a full house payload (flat and nested role arrays).
    pub async fn apply_config(&self, house: &HouseDto) -> Result<(), Error> {
        self.send_unit(Method::POST, "Device/apply-config", house).await
    }

    /// Legacy single-array write: only the flat rooms array is sent.
    pub async fn put_house(&self, house: &HouseDto) -> Result<(), Error> {
        let mut flat = house.clone();
        flat.zones = None;
        let path = format!("houses/{}", house.id);
        self.send_unit(Method::PUT, &path, &flat).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::RequestBuilder, Error> {
        let url = self.url(path)?;
        debug!("{} {}", method, url);

        let token = self.token.read().await;
        let token = token.as_ref().ok_or(Error::NotAuthenticated)?;
        let mut builder = self
            .http
            .request(method, url)
            .bearer_auth(token.expose_secret());
        if !query.is_empty() {
            builder = builder.query(query);
        }
        Ok(builder)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl Serialize>,
        query: &[(&str, &str)],
        access: Access,
    ) -> Result<T, Error> {
        let mut builder = self.request(method, path, query).await?;
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let resp = builder.send().await.map_err(|e| self.map_transport(e))?;
        self.decode(resp, path, access).await
    }

    async fn send_unit(&self, method: Method, path: &str, body: &impl Serialize) -> Result<(), Error> {
        let resp = self
            .request(method, path, &[])
            .await?
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(map_status(status, text, path, Access::Write))
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
        path: &str,
        access: Access,
    ) -> Result<T, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_transport(e))?;

        if !status.is_success() {
            return Err(map_status(status, body, path, access));
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            Error::Transport(err)
        }
    }
}

/// Make sure `join()` appends to the base path rather than replacing its
/// last segment.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn map_status(status: StatusCode, body: String, path: &str, access: Access) -> Error {
    let code = status.as_u16();
    match (code, access) {
        (401 | 403, _) => Error::Unauthorized,
        (400 | 409 | 422, Access::Write) => Error::Rejected {
            status: code,
            message: body,
        },
        (404 | 405 | 501, Access::Write) => Error::EndpointUnavailable {
            path: path.to_owned(),
            status: code,
        },
        (503, _) => Error::Unavailable {
            message: if body.is_empty() {
                "HTTP 503".into()
            } else {
                body
            },
        },
        _ => Error::Api {
            status: code,
            message: body,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = normalize_base(Url::parse("https://host:4521/api").unwrap());
        assert_eq!(url.join("House/houses-info").unwrap().path(), "/api/House/houses-info");
    }

    #[test]
    fn write_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, String::new(), "Device/apply-config", Access::Write),
            Error::EndpointUnavailable { status: 404, .. }
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, String::new(), "House/houses-info", Access::Read),
            Error::Api { status: 404, .. }
        ));
        assert!(matches!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, "bad role".into(), "x", Access::Write),
            Error::Rejected { status: 422, .. }
        ));
        assert!(matches!(
            map_status(StatusCode::FORBIDDEN, String::new(), "x", Access::Read),
            Error::Unauthorized
        ));
    }
}
