//! HTTP implementation of the hub registry client.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{HubClient, HubError, Result, ServerCertificateUpload, SigningKeyUpload};
use crate::secrets::SecretString;

/// Hub client configuration
#[derive(Debug, Clone)]
pub struct HubClientConfig {
    /// Base URL of the hub API (e.g., "https://hub.example.com/api")
    pub base_url: Url,

    /// Participant identifier used in every path
    pub dfsp_id: String,

    /// Optional bearer token
    pub token: Option<SecretString>,

    /// Request timeout
    pub timeout: Duration,
}

/// Uploads public credential material to the hub over HTTP.
#[derive(Debug, Clone)]
pub struct HttpHubClient {
    client: Client,
    config: HubClientConfig,
}

impl HttpHubClient {
    pub fn new(config: HubClientConfig) -> Result<Self> {
        if config.dfsp_id.is_empty() {
            return Err(HubError::Config("DFSP id cannot be empty".to_string()));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, resource: &str) -> Result<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HubError::Config(format!("{} cannot be a base URL", self.config.base_url)))?
            .pop_if_empty()
            .extend(["dfsps", self.config.dfsp_id.as_str(), resource]);
        Ok(url)
    }

    async fn post<T: Serialize>(&self, resource: &str, body: &T) -> Result<()> {
        let url = self.endpoint(resource)?;
        debug!(url = %url, "POST to hub");

        let mut request = self.client.post(url).json(body);
        if let Some(ref token) = self.config.token {
            request = request.bearer_auth(token.expose_secret());
        }
        check_status(request.send().await?).await
    }
}

async fn check_status(response: Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(HubError::Status { status: status.as_u16(), body })
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn upload_signing_key(&self, upload: &SigningKeyUpload) -> Result<()> {
        self.post("jwscerts", upload).await
    }

    async fn upload_server_certificate(&self, upload: &ServerCertificateUpload) -> Result<()> {
        self.post("servercerts", upload).await
    }
}
