//! Wire-level access to the secrets backend.
//!
//! [`BackendTransport`] is the boundary between the session (token lifecycle,
//! refresh-and-retry) and the protocol that talks to the backend. Every call
//! except `authenticate` and `health` takes the session token explicitly.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use super::error::{Result, SecretsError};
use super::store::{
    BackendHealth, CaSubject, CertificateAuthority, CsrParams, IssuedCertificate, SignedCertificate,
};
use super::types::SecretString;

/// Resolved authentication method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    AppRole { mount: String, role_id: String, secret_id: SecretString },
    /// Kubernetes workload identity; the service account JWT is read from `jwt_path` on every login.
    Kubernetes { mount: String, role: String, jwt_path: PathBuf },
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AppRole { .. } => "approle",
            Self::Kubernetes { .. } => "kubernetes",
        }
    }
}

/// Raw authentication settings as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub approle_mount: String,
    pub role_id: Option<String>,
    pub secret_id: Option<SecretString>,
    pub kubernetes_mount: String,
    pub kubernetes_role: Option<String>,
    pub kubernetes_token_path: PathBuf,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            approle_mount: "approle".to_string(),
            role_id: None,
            secret_id: None,
            kubernetes_mount: "kubernetes".to_string(),
            kubernetes_role: None,
            kubernetes_token_path: PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/token",
            ),
        }
    }
}

impl AuthSettings {
    /// Pick exactly one method. AppRole wins when both are configured.
    pub fn resolve(&self) -> Result<AuthMethod> {
        let approle = match (&self.role_id, &self.secret_id) {
            (Some(role_id), Some(secret_id)) => Some(AuthMethod::AppRole {
                mount: self.approle_mount.clone(),
                role_id: role_id.clone(),
                secret_id: secret_id.clone(),
            }),
            _ => None,
        };
        let kubernetes = self.kubernetes_role.as_ref().map(|role| AuthMethod::Kubernetes {
            mount: self.kubernetes_mount.clone(),
            role: role.clone(),
            jwt_path: self.kubernetes_token_path.clone(),
        });

        match (approle, kubernetes) {
            (Some(approle), Some(_)) => {
                tracing::warn!(
                    "Both AppRole and Kubernetes authentication configured, using AppRole"
                );
                Ok(approle)
            }
            (Some(approle), None) => Ok(approle),
            (None, Some(kubernetes)) => Ok(kubernetes),
            (None, None) => Err(SecretsError::UnsupportedAuthMethod),
        }
    }
}

/// Token issued by a successful login.
#[derive(Debug, Clone)]
pub struct AuthLease {
    pub token: SecretString,
    pub lease_duration: Duration,
}

/// Protocol operations against the secrets and PKI backend.
///
/// Errors must be classified: missing keys as [`SecretsError::NotFound`],
/// rejected tokens as [`SecretsError::Unauthorized`].
#[async_trait]
pub trait BackendTransport: Send + Sync + 'static {
    async fn authenticate(&self, method: &AuthMethod) -> Result<AuthLease>;

    async fn read(&self, token: &SecretString, key: &str) -> Result<Value>;

    async fn write(&self, token: &SecretString, key: &str, value: &Value) -> Result<()>;

    async fn delete(&self, token: &SecretString, key: &str) -> Result<()>;

    async fn issue_certificate(
        &self,
        token: &SecretString,
        params: &CsrParams,
    ) -> Result<IssuedCertificate>;

    async fn sign_csr(
        &self,
        token: &SecretString,
        csr_pem: &str,
        common_name: &str,
    ) -> Result<SignedCertificate>;

    async fn generate_root(
        &self,
        token: &SecretString,
        subject: &CaSubject,
    ) -> Result<CertificateAuthority>;

    async fn delete_root(&self, token: &SecretString) -> Result<()>;

    /// Unauthenticated health check.
    async fn health(&self) -> Result<BackendHealth>;
}
