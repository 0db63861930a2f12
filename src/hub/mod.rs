//! Hub certificate registry client.
//!
//! The hub keeps the public half of every participant credential. Uploads
//! go through the [`HubClient`] trait so the lifecycle engine can run against
//! an in-process fake.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::{HttpHubClient, HubClientConfig};

/// Errors returned by hub uploads.
#[derive(thiserror::Error, Debug)]
pub enum HubError {
    /// The request could not be sent or the response not read.
    #[error("Hub request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The hub answered with a non-success status.
    #[error("Hub returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Hub client configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HubError>;

/// Body of `POST /dfsps/{dfspId}/jwscerts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningKeyUpload {
    pub public_key: String,
    /// Unix seconds
    pub created_at: i64,
}

/// Body of `POST /dfsps/{dfspId}/servercerts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCertificateUpload {
    pub root_certificate: String,
    /// Concatenated PEM intermediates
    pub intermediate_chain: String,
    pub server_certificate: String,
}

#[async_trait]
pub trait HubClient: Send + Sync {
    async fn upload_signing_key(&self, upload: &SigningKeyUpload) -> Result<()>;

    async fn upload_server_certificate(&self, upload: &ServerCertificateUpload) -> Result<()>;
}
