//! Credential kinds hosted by the lifecycle engine.
//!
//! A kind says how to create a credential, how to publish its public half to
//! the hub, and what configuration change it implies. The machine itself is
//! the same for every kind.

use async_trait::async_trait;
use std::sync::Arc;

use super::record::{CredentialMaterial, CredentialRecord};
use crate::errors::Result;
use crate::hub::{HubClient, ServerCertificateUpload, SigningKeyUpload};
use crate::secrets::{CsrParams, SecretStore};
use crate::sink::ConfigUpdate;

#[async_trait]
pub trait CredentialKind: Send + Sync + 'static {
    /// Machine identity, also the persisted-state key suffix.
    fn id(&self) -> &str;

    async fn create(&self) -> Result<CredentialMaterial>;

    async fn upload(&self, record: &CredentialRecord) -> Result<()>;

    fn config_update(&self, record: &CredentialRecord) -> ConfigUpdate;
}

/// JWS signing key pair, id `jws`.
pub struct JwsSigningKey {
    store: Arc<dyn SecretStore>,
    hub: Arc<dyn HubClient>,
}

impl JwsSigningKey {
    pub const ID: &'static str = "jws";

    pub fn new(store: Arc<dyn SecretStore>, hub: Arc<dyn HubClient>) -> Self {
        Self { store, hub }
    }
}

#[async_trait]
impl CredentialKind for JwsSigningKey {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn create(&self) -> Result<CredentialMaterial> {
        let pair = self.store.generate_key_pair().await?;
        Ok(pair.into())
    }

    async fn upload(&self, record: &CredentialRecord) -> Result<()> {
        let upload =
            SigningKeyUpload { public_key: record.public_key.clone(), created_at: record.created_at };
        self.hub.upload_signing_key(&upload).await?;
        Ok(())
    }

    fn config_update(&self, record: &CredentialRecord) -> ConfigUpdate {
        ConfigUpdate::JwsSigningKey { private_key: record.private_key.clone() }
    }
}

/// TLS server certificate issued by the PKI engine, id `server-cert`.
pub struct ServerCertificate {
    store: Arc<dyn SecretStore>,
    hub: Arc<dyn HubClient>,
    params: CsrParams,
}

impl ServerCertificate {
    pub const ID: &'static str = "server-cert";

    pub fn new(store: Arc<dyn SecretStore>, hub: Arc<dyn HubClient>, params: CsrParams) -> Self {
        Self { store, hub, params }
    }
}

#[async_trait]
impl CredentialKind for ServerCertificate {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn create(&self) -> Result<CredentialMaterial> {
        let issued = self.store.issue_server_certificate(&self.params).await?;
        Ok(CredentialMaterial::from_issued(issued, chrono::Utc::now().timestamp()))
    }

    async fn upload(&self, record: &CredentialRecord) -> Result<()> {
        let (root_certificate, intermediate_chain) = match record.certificate.as_ref() {
            Some(bundle) => (bundle.root_certificate.clone(), bundle.intermediate_chain.concat()),
            None => (String::new(), String::new()),
        };
        let upload = ServerCertificateUpload {
            root_certificate,
            intermediate_chain,
            server_certificate: record.public_key.clone(),
        };
        self.hub.upload_server_certificate(&upload).await?;
        Ok(())
    }

    fn config_update(&self, record: &CredentialRecord) -> ConfigUpdate {
        let (intermediate_chain, root_certificate) = match record.certificate.as_ref() {
            Some(bundle) => (bundle.intermediate_chain.clone(), bundle.root_certificate.clone()),
            None => (Vec::new(), String::new()),
        };
        ConfigUpdate::ServerTls {
            certificate: record.public_key.clone(),
            private_key: record.private_key.clone(),
            intermediate_chain,
            root_certificate,
        }
    }
}
