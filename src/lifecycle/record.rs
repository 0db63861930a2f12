//! Credential records and their persisted form.

use serde::{Deserialize, Serialize};

use crate::secrets::types::serialize_exposed;
use crate::secrets::{IssuedCertificate, KeyPair, SecretString};

/// Snapshot format version written to the secrets backend.
pub const PERSISTED_STATE_VERSION: u32 = 2;

/// Chain material carried by server-certificate credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateBundle {
    pub intermediate_chain: Vec<String>,
    pub root_certificate: String,
    /// Unix seconds
    pub expiration: i64,
}

/// Output of a credential kind's create step, before scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialMaterial {
    pub public_key: String,
    pub private_key: SecretString,
    /// Unix seconds
    pub created_at: i64,
    pub certificate: Option<CertificateBundle>,
}

impl From<KeyPair> for CredentialMaterial {
    fn from(pair: KeyPair) -> Self {
        Self {
            public_key: pair.public_key,
            private_key: pair.private_key,
            created_at: pair.created_at,
            certificate: None,
        }
    }
}

impl CredentialMaterial {
    /// Server certificate material; `public_key` holds the PEM certificate.
    pub fn from_issued(issued: IssuedCertificate, created_at: i64) -> Self {
        Self {
            public_key: issued.server_certificate,
            private_key: issued.private_key,
            created_at,
            certificate: Some(CertificateBundle {
                intermediate_chain: issued.intermediate_chain,
                root_certificate: issued.root_certificate,
                expiration: issued.expiration,
            }),
        }
    }

    pub fn into_record(self, rotates_at: i64) -> CredentialRecord {
        CredentialRecord {
            public_key: self.public_key,
            private_key: self.private_key,
            created_at: self.created_at,
            rotates_at,
            certificate: self.certificate,
        }
    }
}

/// One generation of a credential. Never mutated; rotation produces a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub public_key: String,
    #[serde(serialize_with = "serialize_exposed")]
    pub private_key: SecretString,
    /// Unix seconds
    pub created_at: i64,
    /// Unix milliseconds
    pub rotates_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateBundle>,
}

/// Machine context as stored under `<namespace>/<machine>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMachineState {
    pub version: u32,
    pub machine: String,
    /// Unix milliseconds
    pub saved_at: i64,
    pub record: CredentialRecord,
    /// Whether the hub accepted `record`. Version 1 snapshots lack the
    /// field and are treated as not uploaded.
    #[serde(default)]
    pub uploaded: bool,
}

impl PersistedMachineState {
    pub fn new(machine: impl Into<String>, record: CredentialRecord, uploaded: bool) -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            machine: machine.into(),
            saved_at: chrono::Utc::now().timestamp_millis(),
            record,
            uploaded,
        }
    }

    /// Copy safe for display, with the private key replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.record.private_key = SecretString::new("[REDACTED]");
        copy
    }
}

/// Backend key for a machine's persisted state.
pub fn state_key(namespace: &str, machine: &str) -> String {
    format!("{}/{}", namespace.trim_end_matches('/'), machine)
}
