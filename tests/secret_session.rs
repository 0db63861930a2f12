//! Integration tests for the secrets session
//!
//! A fake transport counts logins and rejects tokens on demand so the
//! reconnect, renewal and error-classification behaviour can be observed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use credential_rotator::secrets::{
    AuthLease, AuthMethod, AuthSettings, BackendHealth, BackendTransport, CaSubject,
    CertificateAuthority, CsrParams, IssuedCertificate, SecretSession, SecretStore, SecretString,
    SecretsError, SessionConfig, SignedCertificate,
};

#[derive(Default)]
struct TransportState {
    logins: AtomicUsize,
    rejections: AtomicU32,
    tokens_used: Mutex<Vec<String>>,
    kv: Mutex<HashMap<String, Value>>,
    health_down: AtomicBool,
    root_deleted: AtomicBool,
}

impl TransportState {
    fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    fn tokens_used(&self) -> Vec<String> {
        self.tokens_used.lock().unwrap().clone()
    }
}

struct FakeTransport {
    state: Arc<TransportState>,
    lease: Duration,
    login_delay: Duration,
}

impl FakeTransport {
    /// Record the token and reject it if a rejection is pending.
    fn check(&self, token: &SecretString) -> Result<(), SecretsError> {
        self.state.tokens_used.lock().unwrap().push(token.expose_secret().to_string());
        let rejected = self
            .state
            .rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(SecretsError::unauthorized(403, "permission denied"));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendTransport for FakeTransport {
    async fn authenticate(&self, _method: &AuthMethod) -> Result<AuthLease, SecretsError> {
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }
        let n = self.state.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AuthLease { token: SecretString::new(format!("token-{}", n)), lease_duration: self.lease })
    }

    async fn read(&self, token: &SecretString, key: &str) -> Result<Value, SecretsError> {
        self.check(token)?;
        self.state
            .kv
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| SecretsError::not_found(key))
    }

    async fn write(&self, token: &SecretString, key: &str, value: &Value) -> Result<(), SecretsError> {
        self.check(token)?;
        self.state.kv.lock().unwrap().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, token: &SecretString, key: &str) -> Result<(), SecretsError> {
        self.check(token)?;
        self.state.kv.lock().unwrap().remove(key);
        Ok(())
    }

    async fn issue_certificate(
        &self,
        token: &SecretString,
        params: &CsrParams,
    ) -> Result<IssuedCertificate, SecretsError> {
        self.check(token)?;
        Ok(IssuedCertificate {
            server_certificate: format!("CERT-{}", params.common_name),
            private_key: SecretString::new("KEY"),
            intermediate_chain: Vec::new(),
            root_certificate: "ROOT".to_string(),
            expiration: 0,
        })
    }

    async fn sign_csr(
        &self,
        token: &SecretString,
        _csr_pem: &str,
        common_name: &str,
    ) -> Result<SignedCertificate, SecretsError> {
        self.check(token)?;
        Ok(SignedCertificate {
            certificate: format!("SIGNED-{}", common_name),
            issuing_ca: "ROOT".to_string(),
            serial_number: "01".to_string(),
        })
    }

    async fn generate_root(
        &self,
        token: &SecretString,
        subject: &CaSubject,
    ) -> Result<CertificateAuthority, SecretsError> {
        self.check(token)?;
        Ok(CertificateAuthority {
            certificate: format!("ROOT-{}", subject.common_name),
            private_key: SecretString::new("ROOT-KEY"),
        })
    }

    async fn delete_root(&self, token: &SecretString) -> Result<(), SecretsError> {
        self.check(token)?;
        if self.state.root_deleted.swap(true, Ordering::SeqCst) {
            return Err(SecretsError::not_found("pki/root"));
        }
        Ok(())
    }

    async fn health(&self) -> Result<BackendHealth, SecretsError> {
        if self.state.health_down.load(Ordering::SeqCst) {
            return Err(SecretsError::connection_failed("connection refused"));
        }
        Ok(BackendHealth {
            initialized: true,
            sealed: false,
            standby: false,
            version: Some("1.15.0".to_string()),
            error: None,
        })
    }
}

fn approle() -> AuthSettings {
    AuthSettings {
        role_id: Some("role".to_string()),
        secret_id: Some(SecretString::new("secret")),
        ..AuthSettings::default()
    }
}

fn session_with(
    auth: AuthSettings,
    lease: Duration,
) -> (Arc<SecretSession<FakeTransport>>, Arc<TransportState>) {
    session_with_login_delay(auth, lease, Duration::ZERO)
}

fn session_with_login_delay(
    auth: AuthSettings,
    lease: Duration,
    login_delay: Duration,
) -> (Arc<SecretSession<FakeTransport>>, Arc<TransportState>) {
    let state = Arc::new(TransportState::default());
    let transport = FakeTransport { state: Arc::clone(&state), lease, login_delay };
    let config = SessionConfig {
        auth,
        common_name: "dfsp-client".to_string(),
        token_refresh_delay: Duration::from_millis(10),
        ..SessionConfig::default()
    };
    (SecretSession::new(transport, config), state)
}

fn session() -> (Arc<SecretSession<FakeTransport>>, Arc<TransportState>) {
    session_with(approle(), Duration::ZERO)
}

#[tokio::test]
async fn test_single_rejection_reconnects_and_retries_once() {
    let (session, state) = session();
    state.kv.lock().unwrap().insert("state/jws".to_string(), json!({"v": 1}));
    session.connect().await.unwrap();

    state.rejections.store(1, Ordering::SeqCst);
    let value = session.read_secret("state/jws").await.unwrap();

    assert_eq!(value, Some(json!({"v": 1})));
    assert_eq!(state.logins(), 2);
    assert_eq!(state.tokens_used(), vec!["token-1", "token-2"]);
}

#[tokio::test]
async fn test_second_rejection_propagates_without_another_login() {
    let (session, state) = session();
    session.connect().await.unwrap();

    state.rejections.store(2, Ordering::SeqCst);
    let err = session.write_secret("state/jws", &json!({})).await.unwrap_err();

    assert!(err.is_token_error());
    assert_eq!(state.logins(), 2);
    assert_eq!(state.tokens_used().len(), 2);
}

#[tokio::test]
async fn test_first_operation_logs_in_lazily() {
    let (session, state) = session();
    assert!(session.active_session().await.is_none());

    session.write_secret("k", &json!("v")).await.unwrap();
    session.write_secret("k", &json!("w")).await.unwrap();

    assert_eq!(state.logins(), 1);
    assert!(session.active_session().await.is_some());
}

#[tokio::test]
async fn test_read_missing_key_is_none() {
    let (session, _state) = session();
    assert_eq!(session.read_secret("does/not/exist").await.unwrap(), None);
}

#[tokio::test]
async fn test_delete_secret_removes_value() {
    let (session, state) = session();
    session.write_secret("k", &json!(1)).await.unwrap();
    session.delete_secret("k").await.unwrap();
    assert!(state.kv.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_auth_configuration_is_fatal() {
    let (session, state) = session_with(AuthSettings::default(), Duration::ZERO);

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, SecretsError::UnsupportedAuthMethod));
    assert!(err.is_fatal());
    assert_eq!(state.logins(), 0);
}

#[tokio::test]
async fn test_health_failure_reports_down() {
    let (session, state) = session();
    assert!(session.health_check().await.is_healthy());

    state.health_down.store(true, Ordering::SeqCst);
    let health = session.health_check().await;
    assert!(!health.is_healthy());
    assert!(health.error.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_sign_uses_configured_common_name() {
    let (session, _state) = session();
    let signed = session.sign_certificate_request("CSR").await.unwrap();
    assert_eq!(signed.certificate, "SIGNED-dfsp-client");
}

#[tokio::test]
async fn test_create_ca_tolerates_missing_previous_root() {
    let (session, state) = session();
    state.root_deleted.store(true, Ordering::SeqCst);

    let subject = CaSubject { common_name: "Test Root".to_string(), ttl: None };
    let ca = session.create_certificate_authority(&subject).await.unwrap();
    assert_eq!(ca.certificate, "ROOT-Test Root");
}

#[tokio::test(start_paused = true)]
async fn test_token_renewed_before_lease_expires() {
    let (session, state) = session_with(approle(), Duration::from_secs(90));
    session.connect().await.unwrap();
    assert_eq!(state.logins(), 1);

    // renewal fires 30s before the 90s lease runs out
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(state.logins(), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(state.logins(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_short_lease_renews_at_half_without_spinning() {
    let (session, state) = session_with(approle(), Duration::from_secs(20));
    session.connect().await.unwrap();

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(state.logins(), 1);

    // one renewal per 10s of a 20s lease
    tokio::time::sleep(Duration::from_secs(22)).await;
    assert_eq!(state.logins(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_operations_share_one_login() {
    let (session, state) =
        session_with_login_delay(approle(), Duration::ZERO, Duration::from_millis(50));
    state.kv.lock().unwrap().insert("a".to_string(), json!(1));
    state.kv.lock().unwrap().insert("b".to_string(), json!(2));

    let (a, b) = tokio::join!(session.read_secret("a"), session.read_secret("b"));

    assert_eq!(a.unwrap(), Some(json!(1)));
    assert_eq!(b.unwrap(), Some(json!(2)));
    assert_eq!(state.logins(), 1);
    assert_eq!(state.tokens_used(), vec!["token-1", "token-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_non_expiring_token_is_not_renewed() {
    let (session, state) = session_with(approle(), Duration::ZERO);
    session.connect().await.unwrap();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(state.logins(), 1);
}
