//! # Configuration Settings
//!
//! Defines the configuration sections for the credential rotator.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::Validate;

use crate::errors::{Error, Result};
use crate::hub::HubClientConfig;
use crate::lifecycle::RotationConfig;
use crate::orchestrator::DEFAULT_STATE_NAMESPACE;
use crate::secrets::{AuthSettings, CsrParams, SecretString, SessionConfig, VaultConfig};

/// Vault connection, authentication and key generation settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VaultSettings {
    #[validate(length(min = 1, message = "Vault address cannot be empty"))]
    pub address: String,
    pub namespace: Option<String>,
    #[validate(length(min = 1, message = "KV mount cannot be empty"))]
    pub kv_mount: String,
    #[validate(length(min = 1, message = "PKI mount cannot be empty"))]
    pub pki_mount: String,
    pub pki_server_role: String,
    pub pki_client_role: String,

    pub approle_mount: String,
    pub role_id: Option<String>,
    pub secret_id: Option<SecretString>,

    pub kubernetes_mount: String,
    pub kubernetes_role: Option<String>,
    pub kubernetes_token_path: PathBuf,

    /// Pause before reconnecting after a rejected token, in milliseconds
    pub token_refresh_delay_ms: u64,

    /// RSA modulus length for signing keys
    #[validate(range(min = 1024, max = 8192, message = "Key length must be between 1024 and 8192"))]
    pub key_length: usize,

    /// Common name used when signing external CSRs
    #[validate(length(min = 1, message = "Common name cannot be empty"))]
    pub common_name: String,
}

impl Default for VaultSettings {
    fn default() -> Self {
        let vault = VaultConfig::default();
        let auth = AuthSettings::default();
        let session = SessionConfig::default();
        Self {
            address: vault.address,
            namespace: None,
            kv_mount: vault.kv_mount,
            pki_mount: vault.pki_mount,
            pki_server_role: vault.pki_server_role,
            pki_client_role: vault.pki_client_role,
            approle_mount: auth.approle_mount,
            role_id: None,
            secret_id: None,
            kubernetes_mount: auth.kubernetes_mount,
            kubernetes_role: None,
            kubernetes_token_path: auth.kubernetes_token_path,
            token_refresh_delay_ms: session.token_refresh_delay.as_millis() as u64,
            key_length: session.key_length,
            common_name: session.common_name,
        }
    }
}

impl VaultSettings {
    pub fn vault_config(&self) -> VaultConfig {
        VaultConfig {
            address: self.address.clone(),
            namespace: self.namespace.clone(),
            kv_mount: self.kv_mount.clone(),
            pki_mount: self.pki_mount.clone(),
            pki_server_role: self.pki_server_role.clone(),
            pki_client_role: self.pki_client_role.clone(),
            ..VaultConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            auth: AuthSettings {
                approle_mount: self.approle_mount.clone(),
                role_id: self.role_id.clone(),
                secret_id: self.secret_id.clone(),
                kubernetes_mount: self.kubernetes_mount.clone(),
                kubernetes_role: self.kubernetes_role.clone(),
                kubernetes_token_path: self.kubernetes_token_path.clone(),
            },
            key_length: self.key_length,
            common_name: self.common_name.clone(),
            token_refresh_delay: Duration::from_millis(self.token_refresh_delay_ms),
        }
    }
}

/// Rotation schedule and state persistence
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RotationSettings {
    #[validate(nested)]
    pub policy: RotationConfig,

    #[validate(length(min = 1, message = "State namespace cannot be empty"))]
    pub state_namespace: String,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            policy: RotationConfig::default(),
            state_namespace: DEFAULT_STATE_NAMESPACE.to_string(),
        }
    }
}

/// Hub registry connection. Only required by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HubSettings {
    pub url: Option<String>,
    pub dfsp_id: Option<String>,
    pub token: Option<SecretString>,
    #[validate(range(min = 1, max = 300, message = "Hub timeout must be between 1 and 300 seconds"))]
    pub timeout_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self { url: None, dfsp_id: None, token: None, timeout_secs: 30 }
    }
}

impl HubSettings {
    pub fn client_config(&self) -> Result<HubClientConfig> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| Error::config("ROTATOR_HUB_URL is required"))?;
        let base_url =
            Url::parse(url).map_err(|e| Error::config(format!("Invalid hub URL: {}", e)))?;
        let dfsp_id = self
            .dfsp_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::config("ROTATOR_DFSP_ID is required"))?;

        Ok(HubClientConfig {
            base_url,
            dfsp_id,
            token: self.token.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

/// Server certificate credential
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ServerCertSettings {
    pub enabled: bool,
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<String>,
    pub ttl: Option<String>,
}

impl ServerCertSettings {
    pub fn csr_params(&self) -> Result<CsrParams> {
        let common_name = self
            .common_name
            .clone()
            .filter(|cn| !cn.is_empty())
            .ok_or_else(|| Error::config("ROTATOR_SERVER_CERT_CN is required for server certificates"))?;
        Ok(CsrParams {
            common_name,
            dns_names: self.dns_names.clone(),
            ip_addresses: self.ip_addresses.clone(),
            ttl: self.ttl.clone(),
        })
    }
}

/// Where configuration updates are written
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OutputSettings {
    pub dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self { dir: PathBuf::from("./config-out") }
    }
}

/// Control API server
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiSettings {
    pub enabled: bool,
    #[validate(length(min = 1, message = "API bind address cannot be empty"))]
    pub bind_address: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self { enabled: true, bind_address: "127.0.0.1:9090".to_string() }
    }
}

impl ApiSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address
            .parse()
            .map_err(|e| Error::config(format!("Invalid API address '{}': {}", self.bind_address, e)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(Error::config(format!("Unknown log format '{}'", other))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LoggingSettings {
    pub format: LogFormat,
    /// Filter directives, as in `RUST_LOG`
    pub filter: Option<String>,
}
