//! HashiCorp Vault transport.
//!
//! Implements [`BackendTransport`] over `vaultrs`: AppRole and Kubernetes
//! login, KV v2 for JSON secrets and the PKI engine for server certificates,
//! CSR signing and the root CA.
//!
//! `vaultrs` drops the exported private key from root CA responses, so root
//! generation calls the PKI endpoint directly with `reqwest`.
//!
//! # Configuration
//!
//! - `VAULT_ADDR`: Vault server address
//! - `VAULT_NAMESPACE`: optional Enterprise namespace
//! - KV and PKI mount paths plus PKI role names (see [`VaultConfig`])
//!
//! # Security
//!
//! - Tokens are held as [`SecretString`] and never logged
//! - Exported private keys are wrapped before leaving this module

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use vaultrs::api::pki::requests::{GenerateCertificateRequestBuilder, SignCertificateRequestBuilder};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::{kv2, pki};

use super::error::{Result, SecretsError};
use super::store::{
    BackendHealth, CaSubject, CertificateAuthority, CsrParams, IssuedCertificate, SignedCertificate,
};
use super::transport::{AuthLease, AuthMethod, BackendTransport};
use super::types::SecretString;

/// Connection and mount settings for Vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    pub address: String,

    /// Vault namespace (for Enterprise multi-tenancy)
    pub namespace: Option<String>,

    /// KV v2 mount path (default: "secret")
    #[serde(default = "default_kv_mount")]
    pub kv_mount: String,

    /// PKI secrets engine mount path (default: "pki")
    #[serde(default = "default_pki_mount")]
    pub pki_mount: String,

    /// PKI role used to issue server certificates
    #[serde(default = "default_server_role")]
    pub pki_server_role: String,

    /// PKI role used to sign external CSRs
    #[serde(default = "default_client_role")]
    pub pki_client_role: String,

    /// Request timeout
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

fn default_kv_mount() -> String {
    "secret".to_string()
}

fn default_pki_mount() -> String {
    "pki".to_string()
}

fn default_server_role() -> String {
    "server".to_string()
}

fn default_client_role() -> String {
    "client".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            namespace: None,
            kv_mount: default_kv_mount(),
            pki_mount: default_pki_mount(),
            pki_server_role: default_server_role(),
            pki_client_role: default_client_role(),
            timeout: default_timeout(),
        }
    }
}

/// Vault client bound to one token.
struct TokenClient {
    token: SecretString,
    client: Arc<VaultClient>,
}

/// [`BackendTransport`] backed by HashiCorp Vault.
///
/// Keeps one unauthenticated client for login and health, and caches the
/// client for the most recent token.
pub struct VaultTransport {
    config: VaultConfig,
    login_client: VaultClient,
    token_client: RwLock<Option<TokenClient>>,
    http: reqwest::Client,
}

impl std::fmt::Debug for VaultTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultTransport")
            .field("address", &self.config.address)
            .field("kv_mount", &self.config.kv_mount)
            .field("pki_mount", &self.config.pki_mount)
            .field("client", &"[VaultClient]")
            .finish()
    }
}

impl VaultTransport {
    /// Creates the transport. No request is made until the first login.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::ConfigError`] if the address is empty or settings are invalid
    /// - [`SecretsError::ConnectionFailed`] if the HTTP client cannot be built
    pub fn new(config: VaultConfig) -> Result<Self> {
        if config.address.is_empty() {
            return Err(SecretsError::config_error("Vault address cannot be empty"));
        }
        let login_client = build_client(&config, None)?;
        let http = reqwest::Client::builder().timeout(config.timeout).build().map_err(|e| {
            SecretsError::connection_failed(format!("Failed to create HTTP client: {}", e))
        })?;
        Ok(Self { config, login_client, token_client: RwLock::new(None), http })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    async fn client_for(&self, token: &SecretString) -> Result<Arc<VaultClient>> {
        if let Some(cached) = self.token_client.read().await.as_ref() {
            if &cached.token == token {
                return Ok(Arc::clone(&cached.client));
            }
        }

        let client = Arc::new(build_client(&self.config, Some(token))?);
        *self.token_client.write().await =
            Some(TokenClient { token: token.clone(), client: Arc::clone(&client) });
        Ok(client)
    }
}

fn build_client(config: &VaultConfig, token: Option<&SecretString>) -> Result<VaultClient> {
    let mut settings_builder = VaultClientSettingsBuilder::default();
    settings_builder.address(&config.address);
    settings_builder.timeout(Some(config.timeout));

    if let Some(token) = token {
        settings_builder.token(token.expose_secret());
    }

    if let Some(ref namespace) = config.namespace {
        settings_builder.namespace(Some(namespace.clone()));
    }

    let settings = settings_builder
        .build()
        .map_err(|e| SecretsError::config_error(format!("Invalid Vault configuration: {}", e)))?;

    VaultClient::new(settings).map_err(|e| {
        SecretsError::connection_failed(format!("Failed to create Vault client: {}", e))
    })
}

/// `data` wrapper around Vault API responses.
#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[derive(Default, Deserialize)]
struct ApiErrors {
    #[serde(default)]
    errors: Vec<String>,
}

/// Root CA returned by `root/generate/exported`.
#[derive(Deserialize)]
struct ExportedRoot {
    certificate: String,
    #[serde(default)]
    serial_number: String,
    private_key: Option<String>,
}

/// Map a `vaultrs` error onto the secrets taxonomy.
fn classify(error: ClientError, key: &str) -> SecretsError {
    match error {
        ClientError::APIError { code, errors } => SecretsError::from_api_status(code, &errors, key),
        other => SecretsError::backend_error(other.to_string()),
    }
}

#[async_trait]
impl BackendTransport for VaultTransport {
    async fn authenticate(&self, method: &AuthMethod) -> Result<AuthLease> {
        let auth = match method {
            AuthMethod::AppRole { mount, role_id, secret_id } => vaultrs::auth::approle::login(
                &self.login_client,
                mount,
                role_id,
                secret_id.expose_secret(),
            )
            .await
            .map_err(|e| {
                SecretsError::authentication_failed(format!("AppRole login failed: {}", e))
            })?,
            AuthMethod::Kubernetes { mount, role, jwt_path } => {
                let jwt = SecretString::new(
                    tokio::fs::read_to_string(jwt_path).await.map_err(|e| {
                        SecretsError::config_error(format!(
                            "Cannot read service account token {}: {}",
                            jwt_path.display(),
                            e
                        ))
                    })?,
                );
                vaultrs::auth::kubernetes::login(
                    &self.login_client,
                    mount,
                    role,
                    jwt.expose_secret().trim(),
                )
                .await
                .map_err(|e| {
                    SecretsError::authentication_failed(format!("Kubernetes login failed: {}", e))
                })?
            }
        };

        Ok(AuthLease {
            token: SecretString::new(auth.client_token),
            lease_duration: Duration::from_secs(auth.lease_duration),
        })
    }

    async fn read(&self, token: &SecretString, key: &str) -> Result<Value> {
        let client = self.client_for(token).await?;
        kv2::read::<Value>(client.as_ref(), &self.config.kv_mount, key)
            .await
            .map_err(|e| classify(e, key))
    }

    async fn write(&self, token: &SecretString, key: &str, value: &Value) -> Result<()> {
        let client = self.client_for(token).await?;
        kv2::set(client.as_ref(), &self.config.kv_mount, key, value).await.map_err(|e| {
            tracing::error!(error = %e, key = %key, "Failed to write secret to Vault");
            classify(e, key)
        })?;
        tracing::debug!(key = %key, mount = %self.config.kv_mount, "Stored secret in Vault");
        Ok(())
    }

    async fn delete(&self, token: &SecretString, key: &str) -> Result<()> {
        let client = self.client_for(token).await?;
        kv2::delete_metadata(client.as_ref(), &self.config.kv_mount, key)
            .await
            .map_err(|e| classify(e, key))
    }

    async fn issue_certificate(
        &self,
        token: &SecretString,
        params: &CsrParams,
    ) -> Result<IssuedCertificate> {
        let client = self.client_for(token).await?;

        let mut opts = GenerateCertificateRequestBuilder::default();
        opts.common_name(params.common_name.clone());
        if !params.dns_names.is_empty() {
            opts.alt_names(params.dns_names.join(","));
        }
        if !params.ip_addresses.is_empty() {
            opts.ip_sans(params.ip_addresses.join(","));
        }
        if let Some(ref ttl) = params.ttl {
            opts.ttl(ttl.clone());
        }

        let response = pki::cert::generate(
            client.as_ref(),
            &self.config.pki_mount,
            &self.config.pki_server_role,
            Some(&mut opts),
        )
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                common_name = %params.common_name,
                "Failed to issue server certificate via Vault PKI"
            );
            classify(e, &self.config.pki_server_role)
        })?;

        let expiration = response.expiration.ok_or_else(|| {
            SecretsError::backend_error("Vault PKI response missing expiration timestamp")
        })?;
        let mut intermediate_chain = response
            .ca_chain
            .filter(|chain| !chain.is_empty())
            .unwrap_or_else(|| vec![response.issuing_ca.clone()]);
        // the chain ends at the root; everything before it is intermediate
        let root_certificate = intermediate_chain.pop().unwrap_or(response.issuing_ca);

        tracing::info!(
            common_name = %params.common_name,
            serial_number = %response.serial_number,
            expiration,
            "Issued server certificate"
        );

        Ok(IssuedCertificate {
            server_certificate: response.certificate,
            private_key: SecretString::new(response.private_key),
            intermediate_chain,
            root_certificate,
            expiration: expiration as i64,
        })
    }

    async fn sign_csr(
        &self,
        token: &SecretString,
        csr_pem: &str,
        common_name: &str,
    ) -> Result<SignedCertificate> {
        let client = self.client_for(token).await?;
        let mut opts = SignCertificateRequestBuilder::default();
        let response = pki::cert::ca::sign(
            client.as_ref(),
            &self.config.pki_mount,
            &self.config.pki_client_role,
            csr_pem,
            common_name,
            Some(&mut opts),
        )
        .await
        .map_err(|e| classify(e, &self.config.pki_client_role))?;

        Ok(SignedCertificate {
            certificate: response.certificate,
            issuing_ca: response.issuing_ca,
            serial_number: response.serial_number,
        })
    }

    async fn generate_root(
        &self,
        token: &SecretString,
        subject: &CaSubject,
    ) -> Result<CertificateAuthority> {
        let url = format!(
            "{}/v1/{}/root/generate/exported",
            self.config.address.trim_end_matches('/'),
            self.config.pki_mount.trim_matches('/')
        );
        let mut body = serde_json::json!({ "common_name": subject.common_name });
        if let Some(ref ttl) = subject.ttl {
            body["ttl"] = Value::String(ttl.clone());
        }

        let mut request =
            self.http.post(&url).header("X-Vault-Token", token.expose_secret()).json(&body);
        if let Some(ref namespace) = self.config.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }

        let response = request.send().await.map_err(|e| {
            SecretsError::connection_failed(format!("Vault root CA request failed: {}", e))
        })?;
        let status = response.status();
        if !status.is_success() {
            let errors = response.json::<ApiErrors>().await.unwrap_or_default().errors;
            return Err(SecretsError::from_api_status(
                status.as_u16(),
                &errors,
                &self.config.pki_mount,
            ));
        }

        let root = response
            .json::<DataEnvelope<ExportedRoot>>()
            .await
            .map_err(|e| SecretsError::backend_error(format!("Unreadable root CA response: {}", e)))?
            .data
            .ok_or_else(|| SecretsError::backend_error("Vault returned no root CA data"))?;
        let private_key = root.private_key.ok_or_else(|| {
            SecretsError::backend_error("Vault did not export the root CA private key")
        })?;

        tracing::info!(
            common_name = %subject.common_name,
            serial_number = %root.serial_number,
            "Generated root CA"
        );

        Ok(CertificateAuthority {
            certificate: root.certificate,
            private_key: SecretString::new(private_key),
        })
    }

    async fn delete_root(&self, token: &SecretString) -> Result<()> {
        let client = self.client_for(token).await?;
        pki::cert::ca::delete(client.as_ref(), &self.config.pki_mount)
            .await
            .map_err(|e| classify(e, &self.config.pki_mount))
    }

    async fn health(&self) -> Result<BackendHealth> {
        let health = vaultrs::sys::health(&self.login_client).await.map_err(|e| {
            SecretsError::connection_failed(format!("Vault health check failed: {}", e))
        })?;
        Ok(BackendHealth {
            initialized: health.initialized,
            sealed: health.sealed,
            standby: health.standby,
            version: Some(health.version),
            error: None,
        })
    }
}
