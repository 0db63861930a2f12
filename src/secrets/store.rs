//! Credential-material operations the lifecycle engine needs from a secrets backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::Result;
use super::types::SecretString;

/// A freshly generated signing key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// SPKI PEM public key
    pub public_key: String,
    /// PKCS#8 PEM private key
    pub private_key: SecretString,
    /// Unix seconds at generation time
    pub created_at: i64,
}

/// Parameters for a server certificate issued by the PKI engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrParams {
    pub common_name: String,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    /// Backend TTL string such as `"720h"`; the role default applies when unset.
    #[serde(default)]
    pub ttl: Option<String>,
}

/// Key and certificate issued by the PKI engine in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub server_certificate: String,
    pub private_key: SecretString,
    pub intermediate_chain: Vec<String>,
    pub root_certificate: String,
    /// Unix seconds
    pub expiration: i64,
}

/// Result of signing an externally generated CSR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedCertificate {
    pub certificate: String,
    pub issuing_ca: String,
    pub serial_number: String,
}

/// Subject for a freshly generated root CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaSubject {
    pub common_name: String,
    pub ttl: Option<String>,
}

/// Exported root CA material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateAuthority {
    pub certificate: String,
    pub private_key: SecretString,
}

/// Health as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub initialized: bool,
    pub sealed: bool,
    pub standby: bool,
    pub version: Option<String>,
    /// Set when the health request itself failed.
    pub error: Option<String>,
}

impl BackendHealth {
    /// Synthesized status for a backend that could not be reached.
    pub fn down(error: impl Into<String>) -> Self {
        Self {
            initialized: false,
            sealed: true,
            standby: false,
            version: None,
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && self.initialized && !self.sealed
    }
}

/// Secrets backend as seen by the lifecycle engine.
///
/// Implemented by [`SecretSession`](super::SecretSession) for Vault and by
/// [`MemorySecretStore`](super::MemorySecretStore) for local runs. Tests
/// provide scripted fakes.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Generate an RSA key pair; `created_at` is the current time in seconds.
    async fn generate_key_pair(&self) -> Result<KeyPair>;

    async fn issue_server_certificate(&self, params: &CsrParams) -> Result<IssuedCertificate>;

    /// Sign an external PEM CSR under the service's own common name.
    async fn sign_certificate_request(&self, csr_pem: &str) -> Result<SignedCertificate>;

    /// Replace the root CA. Any prior root is deleted first.
    async fn create_certificate_authority(&self, subject: &CaSubject)
        -> Result<CertificateAuthority>;

    async fn delete_certificate_authority(&self) -> Result<()>;

    /// Returns `None` when the key does not exist.
    async fn read_secret(&self, key: &str) -> Result<Option<Value>>;

    async fn write_secret(&self, key: &str, value: &Value) -> Result<()>;

    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Never fails; an unreachable backend is reported as [`BackendHealth::down`].
    async fn health_check(&self) -> BackendHealth;
}
