//! In-process secret store for local development.
//!
//! Keys are real RSA pairs; certificates are placeholders carrying the
//! requested names, since there is no PKI engine behind this store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::error::{Result, SecretsError};
use super::keys::generate_rsa_key_pair;
use super::store::{
    BackendHealth, CaSubject, CertificateAuthority, CsrParams, IssuedCertificate, KeyPair,
    SecretStore, SignedCertificate,
};

const CERTIFICATE_LIFETIME_SECS: i64 = 30 * 24 * 3600;

#[derive(Debug)]
pub struct MemorySecretStore {
    key_length: usize,
    secrets: RwLock<HashMap<String, Value>>,
    root: RwLock<Option<CertificateAuthority>>,
}

impl MemorySecretStore {
    pub fn new(key_length: usize) -> Self {
        Self { key_length, secrets: RwLock::new(HashMap::new()), root: RwLock::new(None) }
    }
}

fn placeholder_pem(label: &str, subject: &str) -> String {
    format!("-----BEGIN CERTIFICATE-----\n{}:{}\n-----END CERTIFICATE-----\n", label, subject)
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn generate_key_pair(&self) -> Result<KeyPair> {
        let bits = self.key_length;
        tokio::task::spawn_blocking(move || generate_rsa_key_pair(bits))
            .await
            .map_err(|e| SecretsError::internal(format!("Key generation task failed: {}", e)))?
    }

    async fn issue_server_certificate(&self, params: &CsrParams) -> Result<IssuedCertificate> {
        let key = self.generate_key_pair().await?;
        let root_certificate = match self.root.read().await.as_ref() {
            Some(root) => root.certificate.clone(),
            None => placeholder_pem("root", "memory-root"),
        };
        Ok(IssuedCertificate {
            server_certificate: placeholder_pem("server", &params.common_name),
            private_key: key.private_key,
            intermediate_chain: vec![placeholder_pem("intermediate", "memory-intermediate")],
            root_certificate,
            expiration: key.created_at + CERTIFICATE_LIFETIME_SECS,
        })
    }

    async fn sign_certificate_request(&self, csr_pem: &str) -> Result<SignedCertificate> {
        if !csr_pem.contains("CERTIFICATE REQUEST") {
            return Err(SecretsError::invalid_value("input is not a PEM certificate request"));
        }
        Ok(SignedCertificate {
            certificate: placeholder_pem("signed", "memory-client"),
            issuing_ca: placeholder_pem("root", "memory-root"),
            serial_number: format!("{:x}", chrono::Utc::now().timestamp_millis()),
        })
    }

    async fn create_certificate_authority(
        &self,
        subject: &CaSubject,
    ) -> Result<CertificateAuthority> {
        let key = self.generate_key_pair().await?;
        let ca = CertificateAuthority {
            certificate: placeholder_pem("root", &subject.common_name),
            private_key: key.private_key,
        };
        *self.root.write().await = Some(ca.clone());
        Ok(ca)
    }

    async fn delete_certificate_authority(&self) -> Result<()> {
        self.root.write().await.take();
        Ok(())
    }

    async fn read_secret(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.secrets.read().await.get(key).cloned())
    }

    async fn write_secret(&self, key: &str, value: &Value) -> Result<()> {
        self.secrets.write().await.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.secrets.write().await.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> BackendHealth {
        BackendHealth {
            initialized: true,
            sealed: false,
            standby: false,
            version: Some(format!("memory-{}", env!("CARGO_PKG_VERSION"))),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_kv_roundtrip_and_missing_key() {
        let store = MemorySecretStore::new(1024);
        assert!(store.read_secret("credential-state/jws").await.unwrap().is_none());

        store.write_secret("credential-state/jws", &json!({"version": 1})).await.unwrap();
        let value = store.read_secret("credential-state/jws").await.unwrap().unwrap();
        assert_eq!(value["version"], 1);

        store.delete_secret("credential-state/jws").await.unwrap();
        assert!(store.read_secret("credential-state/jws").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_issued_certificate_uses_current_root() {
        let store = MemorySecretStore::new(1024);
        let subject = CaSubject { common_name: "Test Root".to_string(), ttl: None };
        let ca = store.create_certificate_authority(&subject).await.unwrap();

        let params = CsrParams { common_name: "dfsp.example".to_string(), ..CsrParams::default() };
        let cert = store.issue_server_certificate(&params).await.unwrap();
        assert_eq!(cert.root_certificate, ca.certificate);
        assert!(cert.server_certificate.contains("dfsp.example"));
    }

    #[tokio::test]
    async fn test_sign_rejects_non_csr() {
        let store = MemorySecretStore::new(1024);
        let err = store.sign_certificate_request("not a csr").await.unwrap_err();
        assert!(matches!(err, SecretsError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_always_healthy() {
        assert!(MemorySecretStore::new(1024).health_check().await.is_healthy());
    }
}
