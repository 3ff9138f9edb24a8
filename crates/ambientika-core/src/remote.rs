// ── Remote device service seam ──
//
// The engine talks to the cloud only through `DeviceService`, so tests
// and alternative hosts can substitute their own implementation.

use std::future::Future;
use std::sync::Arc;

use ambientika_api::{AmbientikaClient, DeviceStatusDto, HouseDto};
use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::HouseId;

/// What the sync engine needs from the cloud device service.
#[async_trait]
pub trait DeviceService: Send + Sync {
    /// Current house payload, both role arrays included.
    async fn fetch_house_topology(&self, house_id: HouseId) -> Result<HouseDto, CoreError>;

    /// Combined write carrying both the flat and nested role arrays.
    async fn apply_device_config(&self, payload: &HouseDto) -> Result<(), CoreError>;

    /// Legacy write that only understands the flat rooms array.
    async fn apply_legacy_roles(&self, payload: &HouseDto) -> Result<(), CoreError>;

    async fn fetch_device_telemetry(&self, serial: &str) -> Result<DeviceStatusDto, CoreError>;
}

/// `DeviceService` over the real HTTP client.
///
/// Logs in lazily, and once more when the service refuses a token that
/// has since expired. A second refusal is reported as `Unauthorized`.
pub struct CloudService {
    client: Arc<AmbientikaClient>,
    username: String,
    password: SecretString,
    login: Mutex<()>,
}

impl CloudService {
    pub fn new(client: Arc<AmbientikaClient>, username: String, password: SecretString) -> Self {
        Self {
            client,
            username,
            password,
            login: Mutex::new(()),
        }
    }

    pub fn client(&self) -> &AmbientikaClient {
        &self.client
    }

    /// Every house visible to the account.
    pub async fn list_houses(&self) -> Result<Vec<HouseDto>, CoreError> {
        self.call(|c| c.houses()).await
    }

    async fn ensure_login(&self, force: bool) -> Result<(), CoreError> {
        let _guard = self.login.lock().await;
        if !force && self.client.is_authenticated().await {
            return Ok(());
        }
        debug!(username = %self.username, "logging in to cloud service");
        self.client
            .authenticate(&self.username, &self.password)
            .await?;
        info!("cloud session established");
        Ok(())
    }

    /// Run a call, re-authenticating once if the token was refused.
    async fn call<'a, T, F, Fut>(&'a self, op: F) -> Result<T, CoreError>
    where
        F: Fn(&'a AmbientikaClient) -> Fut,
        Fut: Future<Output = Result<T, ambientika_api::Error>>,
    {
        self.ensure_login(false).await?;
        match op(self.client.as_ref()).await {
            Err(ambientika_api::Error::Unauthorized) => {
                self.ensure_login(true).await?;
                Ok(op(self.client.as_ref()).await?)
            }
            other => Ok(other?),
        }
    }
}

#[async_trait]
impl DeviceService for CloudService {
    async fn fetch_house_topology(&self, house_id: HouseId) -> Result<HouseDto, CoreError> {
        self.call(|c| c.fetch_house(house_id.0)).await
    }

    async fn apply_device_config(&self, payload: &HouseDto) -> Result<(), CoreError> {
        self.call(|c| c.apply_config(payload)).await
    }

    async fn apply_legacy_roles(&self, payload: &HouseDto) -> Result<(), CoreError> {
        self.call(|c| c.put_house(payload)).await
    }

    async fn fetch_device_telemetry(&self, serial: &str) -> Result<DeviceStatusDto, CoreError> {
        self.call(|c| c.device_status(serial)).await
    }
}
