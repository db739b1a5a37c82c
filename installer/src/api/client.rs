// Installer backend API client
//
// `InstallerBackend` is the seam between the wizard and the node's installer API. Production code
// uses `HttpInstallerBackend`; the sequencer/poller tests use in-memory stubs.

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use url::Url;

use super::error::ApiError;
use crate::config::BackendSettings;
use crate::models::requests::{ConfigureIdmgRequest, InitializationRequest, InstallRequest};
use crate::models::responses::{BackendInfo, CertificateStatus};

pub const PATH_INFO: &str = "installation/api/info";
pub const PATH_CSR: &str = "installation/api/csr";
pub const PATH_INSTALL: &str = "installation/api/installer";
pub const PATH_CONFIGURE_IDMG: &str = "installation/api/configurerIdmg";
pub const PATH_CERTIFICATE_STATUS: &str = "installation/api/etatCertificatWeb";
pub const PATH_INITIALIZE: &str = "installation/api/initialisation";

#[async_trait]
pub trait InstallerBackend: Send + Sync {
    /// Current node snapshot (retried on transient failures).
    async fn info(&self) -> Result<BackendInfo, ApiError>;

    /// Single reachability check against the info endpoint. Certificate errors are ignored.
    async fn check_reachable(&self, timeout: Duration) -> Result<(), ApiError>;

    /// Instance CSR (PEM text).
    async fn csr(&self) -> Result<String, ApiError>;

    async fn install(&self, req: &InstallRequest) -> Result<(), ApiError>;

    async fn configure_idmg(&self, req: &ConfigureIdmgRequest) -> Result<(), ApiError>;

    async fn certificate_status(&self) -> Result<CertificateStatus, ApiError>;

    async fn initialize(&self, req: &InitializationRequest) -> Result<(), ApiError>;
}

pub struct HttpInstallerBackend {
    client: reqwest::Client,
    /// Used only for reachability checks. The node swaps its TLS certificate while it
    /// restarts, so verification is always off here.
    reachability_client: reqwest::Client,
    base: Url,
    info_retries: usize,
}

impl HttpInstallerBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self, ApiError> {
        let mut base = Url::parse(settings.base_url.trim())?;
        // Url::join replaces the last segment unless the base ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()?;
        let reachability_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            reachability_client,
            base,
            info_retries: settings.info_retries,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        debug!("[PHASE: api] [STEP: get] GET {}", url);
        let resp = self.client.get(url).send().await?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn post_json<B: Serialize + ?Sized + Sync>(&self, url: Url, body: &B) -> Result<(), ApiError> {
        debug!("[PHASE: api] [STEP: post] POST {}", url);
        let resp = self.client.post(url).json(body).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(
        "[PHASE: api] [STEP: response] Backend answered HTTP {}",
        status.as_u16()
    );
    Err(ApiError::rejected(status.as_u16(), &body))
}

#[async_trait]
impl InstallerBackend for HttpInstallerBackend {
    async fn info(&self) -> Result<BackendInfo, ApiError> {
        let url = self.endpoint(PATH_INFO)?;

        let retry_strategy = ExponentialBackoff::from_millis(150)
            .factor(2)
            .max_delay(Duration::from_secs(2))
            .take(self.info_retries)
            .map(jitter);

        RetryIf::spawn(
            retry_strategy,
            || self.get_json::<BackendInfo>(url.clone()),
            ApiError::is_transient,
        )
        .await
    }

    async fn check_reachable(&self, timeout: Duration) -> Result<(), ApiError> {
        let url = self.endpoint(PATH_INFO)?;
        let resp = self
            .reachability_client
            .get(url)
            .timeout(timeout)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn csr(&self) -> Result<String, ApiError> {
        let url = self.endpoint(PATH_CSR)?;
        let resp = self.client.get(url).send().await?;
        let resp = check_status(resp).await?;
        let text = resp.text().await?;
        if !text.contains("BEGIN CERTIFICATE REQUEST") {
            return Err(ApiError::Decode(
                "CSR endpoint did not return a PEM certificate request".to_string(),
            ));
        }
        Ok(text)
    }

    async fn install(&self, req: &InstallRequest) -> Result<(), ApiError> {
        self.post_json(self.endpoint(PATH_INSTALL)?, req).await
    }

    async fn configure_idmg(&self, req: &ConfigureIdmgRequest) -> Result<(), ApiError> {
        self.post_json(self.endpoint(PATH_CONFIGURE_IDMG)?, req)
            .await
    }

    async fn certificate_status(&self) -> Result<CertificateStatus, ApiError> {
        self.get_json(self.endpoint(PATH_CERTIFICATE_STATUS)?)
            .await
    }

    async fn initialize(&self, req: &InitializationRequest) -> Result<(), ApiError> {
        self.post_json(self.endpoint(PATH_INITIALIZE)?, req).await
    }
}
