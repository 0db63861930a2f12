//! # Configuration Management
//!
//! Process configuration is read from `ROTATOR_*` environment variables (plus
//! `VAULT_ADDR`, `VAULT_NAMESPACE` and `RUST_LOG`). A `.env` file is loaded by
//! the binary before [`Config::from_env`] runs.

pub mod settings;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{Error, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::secrets::SecretString;

pub use settings::{
    ApiSettings, HubSettings, LogFormat, LoggingSettings, OutputSettings, RotationSettings,
    ServerCertSettings, VaultSettings,
};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub vault: VaultSettings,

    #[validate(nested)]
    pub rotation: RotationSettings,

    #[validate(nested)]
    pub hub: HubSettings,

    #[validate(nested)]
    pub server_cert: ServerCertSettings,

    #[validate(nested)]
    pub output: OutputSettings,

    #[validate(nested)]
    pub api: ApiSettings,

    #[validate(nested)]
    pub logging: LoggingSettings,
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// Unset or empty variables fall back to their defaults; values that are
    /// set but fail to parse are a configuration error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let vault = VaultSettings {
            address: var("VAULT_ADDR").unwrap_or(defaults.vault.address),
            namespace: var("VAULT_NAMESPACE"),
            kv_mount: var("ROTATOR_VAULT_KV_MOUNT").unwrap_or(defaults.vault.kv_mount),
            pki_mount: var("ROTATOR_VAULT_PKI_MOUNT").unwrap_or(defaults.vault.pki_mount),
            pki_server_role: var("ROTATOR_VAULT_PKI_SERVER_ROLE")
                .unwrap_or(defaults.vault.pki_server_role),
            pki_client_role: var("ROTATOR_VAULT_PKI_CLIENT_ROLE")
                .unwrap_or(defaults.vault.pki_client_role),
            approle_mount: var("ROTATOR_VAULT_APPROLE_MOUNT")
                .unwrap_or(defaults.vault.approle_mount),
            role_id: var("ROTATOR_VAULT_ROLE_ID"),
            secret_id: var("ROTATOR_VAULT_SECRET_ID").map(SecretString::new),
            kubernetes_mount: var("ROTATOR_VAULT_K8S_MOUNT")
                .unwrap_or(defaults.vault.kubernetes_mount),
            kubernetes_role: var("ROTATOR_VAULT_K8S_ROLE"),
            kubernetes_token_path: var("ROTATOR_VAULT_K8S_TOKEN_PATH")
                .map(Into::into)
                .unwrap_or(defaults.vault.kubernetes_token_path),
            token_refresh_delay_ms: parse_var(
                &var,
                "ROTATOR_VAULT_TOKEN_REFRESH_DELAY_MS",
                defaults.vault.token_refresh_delay_ms,
            )?,
            key_length: parse_var(&var, "ROTATOR_KEY_LENGTH", defaults.vault.key_length)?,
            common_name: var("ROTATOR_COMMON_NAME").unwrap_or(defaults.vault.common_name),
        };

        let policy = defaults.rotation.policy;
        let mut rotation = RotationSettings {
            state_namespace: var("ROTATOR_STATE_NAMESPACE")
                .unwrap_or(defaults.rotation.state_namespace),
            ..RotationSettings::default()
        };
        rotation.policy.requested_interval_ms =
            parse_var(&var, "ROTATOR_ROTATION_INTERVAL_MS", policy.requested_interval_ms)?;
        rotation.policy.min_interval_ms =
            parse_var(&var, "ROTATOR_MIN_ROTATION_INTERVAL_MS", policy.min_interval_ms)?;
        rotation.policy.retry_interval_ms =
            parse_var(&var, "ROTATOR_RETRY_INTERVAL_MS", policy.retry_interval_ms)?;

        let hub = HubSettings {
            url: var("ROTATOR_HUB_URL"),
            dfsp_id: var("ROTATOR_DFSP_ID"),
            token: var("ROTATOR_HUB_TOKEN").map(SecretString::new),
            timeout_secs: parse_var(&var, "ROTATOR_HUB_TIMEOUT_SECS", defaults.hub.timeout_secs)?,
        };

        let server_cert = ServerCertSettings {
            enabled: parse_bool(&var, "ROTATOR_SERVER_CERT_ENABLED", false)?,
            common_name: var("ROTATOR_SERVER_CERT_CN"),
            dns_names: var("ROTATOR_SERVER_CERT_DNS").map(|v| split_list(&v)).unwrap_or_default(),
            ip_addresses: var("ROTATOR_SERVER_CERT_IPS").map(|v| split_list(&v)).unwrap_or_default(),
            ttl: var("ROTATOR_SERVER_CERT_TTL"),
        };

        let output = OutputSettings {
            dir: var("ROTATOR_CONFIG_OUTPUT_DIR").map(Into::into).unwrap_or(defaults.output.dir),
        };

        let api = ApiSettings {
            enabled: parse_bool(&var, "ROTATOR_API_ENABLED", defaults.api.enabled)?,
            bind_address: var("ROTATOR_API_BIND").unwrap_or(defaults.api.bind_address),
        };

        let logging = LoggingSettings {
            format: parse_var(&var, "ROTATOR_LOG_FORMAT", defaults.logging.format)?,
            filter: var("RUST_LOG"),
        };

        let config = Self { vault, rotation, hub, server_cert, output, api, logging };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.server_cert.enabled {
            self.server_cert.csr_params()?;
        }

        if self.api.enabled {
            self.api.socket_addr()?;
        }

        if let Some(url) = &self.hub.url {
            url::Url::parse(url)
                .map_err(|e| Error::config(format!("Invalid hub URL '{}': {}", url, e)))?;
        }

        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            rotation: self.rotation.policy,
            state_namespace: self.rotation.state_namespace.clone(),
        }
    }
}

fn parse_var<T, V>(var: &V, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

fn parse_bool<V>(var: &V, key: &str, default: bool) -> Result<bool>
where
    V: Fn(&str) -> Option<String>,
{
    match var(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::config(format!("Invalid {}: expected a boolean, got '{}'", key, v))),
        },
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}
