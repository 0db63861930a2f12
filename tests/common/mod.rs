//! Shared fakes for the integration tests.
//!
//! `ScriptedSecretStore` hands out queued key pairs and can be told to fail;
//! `RecordingHub` records every successful upload.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use credential_rotator::hub::{self, HubClient, HubError, ServerCertificateUpload, SigningKeyUpload};
use credential_rotator::lifecycle::{MachineHandle, MachineStatus, State};
use credential_rotator::secrets::{
    BackendHealth, CaSubject, CertificateAuthority, CsrParams, IssuedCertificate, KeyPair,
    SecretStore, SecretString, SecretsError, SignedCertificate,
};

pub const WAIT: Duration = Duration::from_secs(10);

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn key_pair(tag: &str, created_at: i64) -> KeyPair {
    KeyPair {
        public_key: format!("PUBLIC-{}", tag),
        private_key: SecretString::new(format!("PRIVATE-{}", tag)),
        created_at,
    }
}

#[derive(Default)]
pub struct ScriptedSecretStore {
    key_pairs: Mutex<VecDeque<KeyPair>>,
    generated: AtomicUsize,
    generate_failures: AtomicU32,
    issued: AtomicUsize,
    issue_failures: AtomicU32,
    kv: Mutex<HashMap<String, Value>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    unhealthy: AtomicBool,
}

impl ScriptedSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_pairs(pairs: impl IntoIterator<Item = KeyPair>) -> Self {
        let store = Self::default();
        store.key_pairs.lock().unwrap().extend(pairs);
        store
    }

    pub fn push_key_pair(&self, pair: KeyPair) {
        self.key_pairs.lock().unwrap().push_back(pair);
    }

    /// Fail the next `n` key generations.
    pub fn fail_generations(&self, n: u32) {
        self.generate_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` certificate issuances.
    pub fn fail_issuances(&self, n: u32) {
        self.issue_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    /// Successful key generations.
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    /// Successful certificate issuances.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn stored(&self, key: &str) -> Option<Value> {
        self.kv.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.kv.lock().unwrap().insert(key.to_string(), value);
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

#[async_trait]
impl SecretStore for ScriptedSecretStore {
    async fn generate_key_pair(&self) -> Result<KeyPair, SecretsError> {
        if take_failure(&self.generate_failures) {
            return Err(SecretsError::backend_error("scripted generation failure"));
        }
        let n = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
        let queued = self.key_pairs.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| key_pair(&format!("auto-{}", n), now_secs())))
    }

    async fn issue_server_certificate(
        &self,
        params: &CsrParams,
    ) -> Result<IssuedCertificate, SecretsError> {
        if take_failure(&self.issue_failures) {
            return Err(SecretsError::backend_error("scripted issuance failure"));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedCertificate {
            server_certificate: format!("CERT-{}-{}", params.common_name, n),
            private_key: SecretString::new(format!("TLS-KEY-{}", n)),
            intermediate_chain: vec!["INTERMEDIATE-1".to_string(), "INTERMEDIATE-2".to_string()],
            root_certificate: "ROOT".to_string(),
            expiration: now_secs() + 3600,
        })
    }

    async fn sign_certificate_request(
        &self,
        csr_pem: &str,
    ) -> Result<SignedCertificate, SecretsError> {
        Ok(SignedCertificate {
            certificate: format!("SIGNED({})", csr_pem.trim()),
            issuing_ca: "ROOT".to_string(),
            serial_number: "01".to_string(),
        })
    }

    async fn create_certificate_authority(
        &self,
        subject: &CaSubject,
    ) -> Result<CertificateAuthority, SecretsError> {
        Ok(CertificateAuthority {
            certificate: format!("ROOT-{}", subject.common_name),
            private_key: SecretString::new("ROOT-KEY"),
        })
    }

    async fn delete_certificate_authority(&self) -> Result<(), SecretsError> {
        Ok(())
    }

    async fn read_secret(&self, key: &str) -> Result<Option<Value>, SecretsError> {
        Ok(self.stored(key))
    }

    async fn write_secret(&self, key: &str, value: &Value) -> Result<(), SecretsError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SecretsError::backend_error("scripted write failure"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(key, value.clone());
        Ok(())
    }

    async fn delete_secret(&self, key: &str) -> Result<(), SecretsError> {
        self.kv.lock().unwrap().remove(key);
        Ok(())
    }

    async fn health_check(&self) -> BackendHealth {
        if self.unhealthy.load(Ordering::SeqCst) {
            return BackendHealth::down("scripted outage");
        }
        BackendHealth {
            initialized: true,
            sealed: false,
            standby: false,
            version: Some("scripted".to_string()),
            error: None,
        }
    }
}

#[derive(Default)]
pub struct RecordingHub {
    signing_keys: Mutex<Vec<SigningKeyUpload>>,
    server_certificates: Mutex<Vec<ServerCertificateUpload>>,
    attempts: AtomicUsize,
    failures: AtomicU32,
}

impl RecordingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` uploads of either kind.
    pub fn fail_uploads(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn signing_keys(&self) -> Vec<SigningKeyUpload> {
        self.signing_keys.lock().unwrap().clone()
    }

    pub fn server_certificates(&self) -> Vec<ServerCertificateUpload> {
        self.server_certificates.lock().unwrap().clone()
    }

    fn attempt(&self) -> hub::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failures) {
            return Err(HubError::Status { status: 503, body: "hub unavailable".to_string() });
        }
        Ok(())
    }
}

#[async_trait]
impl HubClient for RecordingHub {
    async fn upload_signing_key(&self, upload: &SigningKeyUpload) -> hub::Result<()> {
        self.attempt()?;
        self.signing_keys.lock().unwrap().push(upload.clone());
        Ok(())
    }

    async fn upload_server_certificate(&self, upload: &ServerCertificateUpload) -> hub::Result<()> {
        self.attempt()?;
        self.server_certificates.lock().unwrap().push(upload.clone());
        Ok(())
    }
}

/// Wait until the machine's status satisfies `predicate`.
pub async fn wait_for_status<F>(handle: &MachineHandle, predicate: F) -> MachineStatus
where
    F: Fn(&MachineStatus) -> bool,
{
    let mut rx = handle.watch();
    let status = tokio::time::timeout(WAIT, rx.wait_for(|status| predicate(status)))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting on '{}', last {:?}", handle.id(), handle.status()))
        .expect("machine stopped");
    status.clone()
}

/// Wait until the machine is Idle holding the credential whose public half is `public_key`.
pub async fn wait_for_idle_with(handle: &MachineHandle, public_key: &str) -> MachineStatus {
    wait_for_status(handle, |status| {
        status.state == State::Idle && status.public_key.as_deref() == Some(public_key)
    })
    .await
}

/// Poll `condition` until it holds.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
