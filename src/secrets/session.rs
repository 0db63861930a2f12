//! Authenticated session against the secrets backend.
//!
//! A [`SecretSession`] logs in with the configured method, renews its token
//! ahead of lease expiry, and wraps every backend call in a single
//! reconnect-and-retry when the backend rejects the token.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{Result, SecretsError};
use super::keys::{generate_rsa_key_pair, DEFAULT_KEY_LENGTH};
use super::store::{
    BackendHealth, CaSubject, CertificateAuthority, CsrParams, IssuedCertificate, KeyPair,
    SecretStore, SignedCertificate,
};
use super::transport::{AuthSettings, BackendTransport};
use super::types::SecretString;

/// Renewal fires this long before the lease runs out.
const RENEWAL_MARGIN: Duration = Duration::from_secs(30);

/// Largest timer delay accepted, 2^31-1 milliseconds.
const MAX_TIMER_DELAY: Duration = Duration::from_millis(i32::MAX as u64);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub auth: AuthSettings,
    /// RSA modulus length for generated signing keys.
    pub key_length: usize,
    /// Common name used when signing external CSRs.
    pub common_name: String,
    /// Pause before reconnecting after a rejected token.
    pub token_refresh_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth: AuthSettings::default(),
            key_length: DEFAULT_KEY_LENGTH,
            common_name: "credential-rotator".to_string(),
            token_refresh_delay: Duration::from_millis(1000),
        }
    }
}

/// Token plus its lease expiry. Replaced wholesale on every login.
#[derive(Debug)]
pub struct ActiveSession {
    pub token: SecretString,
    pub lease_expiry_epoch_ms: i64,
}

/// Delay until the renewal timer fires for a lease of the given length.
///
/// Leases shorter than twice the margin renew at half their length. The
/// result is never below `floor`.
pub fn renewal_delay(lease_duration: Duration, floor: Duration) -> Duration {
    let delay = if lease_duration > RENEWAL_MARGIN * 2 {
        lease_duration - RENEWAL_MARGIN
    } else {
        lease_duration / 2
    };
    delay.max(floor).min(MAX_TIMER_DELAY)
}

pub struct SecretSession<T: BackendTransport> {
    transport: T,
    config: SessionConfig,
    current: RwLock<Option<Arc<ActiveSession>>>,
    connect_lock: Mutex<()>,
    renewal: std::sync::Mutex<Option<(u64, JoinHandle<()>)>>,
    renewal_generation: AtomicU64,
    me: Weak<Self>,
}

impl<T: BackendTransport> std::fmt::Debug for SecretSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSession")
            .field("common_name", &self.config.common_name)
            .field("key_length", &self.config.key_length)
            .finish_non_exhaustive()
    }
}

impl<T: BackendTransport> SecretSession<T> {
    /// Create a session. No login happens until [`connect`](Self::connect) or the first operation.
    pub fn new(transport: T, config: SessionConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            transport,
            config,
            current: RwLock::new(None),
            connect_lock: Mutex::new(()),
            renewal: std::sync::Mutex::new(None),
            renewal_generation: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    /// Log in and replace the active session, re-arming the renewal timer.
    ///
    /// Fails with [`SecretsError::UnsupportedAuthMethod`] when no method is configured.
    pub async fn connect(&self) -> Result<Arc<ActiveSession>> {
        let _guard = self.connect_lock.lock().await;
        self.login().await
    }

    /// Current session, logging in first if there is none.
    pub async fn session(&self) -> Result<Arc<ActiveSession>> {
        if let Some(session) = self.current.read().await.as_ref() {
            return Ok(Arc::clone(session));
        }
        let _guard = self.connect_lock.lock().await;
        // another caller may have logged in while we waited
        if let Some(session) = self.current.read().await.as_ref() {
            return Ok(Arc::clone(session));
        }
        self.login().await
    }

    /// Callers hold `connect_lock`.
    async fn login(&self) -> Result<Arc<ActiveSession>> {
        let method = self.config.auth.resolve()?;
        let lease = self.transport.authenticate(&method).await.map_err(|e| {
            warn!(error = %e, method = method.name(), "Secrets backend login failed");
            e
        })?;

        let lease_ms = i64::try_from(lease.lease_duration.as_millis()).unwrap_or(i64::MAX);
        let session = Arc::new(ActiveSession {
            token: lease.token,
            lease_expiry_epoch_ms: chrono::Utc::now().timestamp_millis().saturating_add(lease_ms),
        });
        *self.current.write().await = Some(Arc::clone(&session));

        if lease.lease_duration.is_zero() {
            // non-expiring token, nothing to renew
            self.cancel_renewal();
        } else {
            self.arm_renewal(renewal_delay(lease.lease_duration, self.config.token_refresh_delay));
        }

        info!(
            method = method.name(),
            lease_secs = lease.lease_duration.as_secs(),
            "Connected to secrets backend"
        );
        Ok(session)
    }

    pub async fn active_session(&self) -> Option<Arc<ActiveSession>> {
        self.current.read().await.clone()
    }

    /// Run `op` with the current session, reconnecting and retrying once on a token error.
    pub async fn with_token_refresh<R, F, Fut>(&self, op: F) -> Result<R>
    where
        F: Fn(Arc<ActiveSession>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let session = self.session().await?;
        match op(session).await {
            Err(e) if e.is_token_error() => {
                warn!(error = %e, "Secrets backend rejected token, reconnecting");
                tokio::time::sleep(self.config.token_refresh_delay).await;
                let session = self.connect().await?;
                op(session).await
            }
            other => other,
        }
    }

    fn arm_renewal(&self, delay: Duration) {
        let generation = self.renewal_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let me = self.me.clone();

        // held across spawn so the task cannot inspect the slot before it is filled
        let mut slot = self.renewal.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(session) = me.upgrade() else {
                return;
            };

            {
                let mut slot = session.renewal.lock().unwrap_or_else(PoisonError::into_inner);
                match slot.as_ref() {
                    Some((armed, _)) if *armed == generation => {
                        // detach so the reconnect below does not abort this task
                        slot.take();
                    }
                    _ => return,
                }
            }

            debug!("Renewing secrets backend token");
            if let Err(e) = session.connect().await {
                warn!(
                    error = %e,
                    retry_in_ms = session.config.token_refresh_delay.as_millis() as u64,
                    "Token renewal failed"
                );
                session.arm_renewal(session.config.token_refresh_delay);
            }
        });

        if let Some((_, previous)) = slot.replace((generation, handle)) {
            previous.abort();
        }
    }

    fn cancel_renewal(&self) {
        if let Some((_, handle)) =
            self.renewal.lock().unwrap_or_else(PoisonError::into_inner).take()
        {
            handle.abort();
        }
    }
}

impl<T: BackendTransport> Drop for SecretSession<T> {
    fn drop(&mut self) {
        let slot = self.renewal.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, handle)) = slot.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl<T: BackendTransport> SecretStore for SecretSession<T> {
    async fn generate_key_pair(&self) -> Result<KeyPair> {
        let bits = self.config.key_length;
        tokio::task::spawn_blocking(move || generate_rsa_key_pair(bits))
            .await
            .map_err(|e| SecretsError::internal(format!("Key generation task failed: {}", e)))?
    }

    async fn issue_server_certificate(&self, params: &CsrParams) -> Result<IssuedCertificate> {
        self.with_token_refresh(|session| async move {
            self.transport.issue_certificate(&session.token, params).await
        })
        .await
    }

    async fn sign_certificate_request(&self, csr_pem: &str) -> Result<SignedCertificate> {
        let common_name = self.config.common_name.as_str();
        self.with_token_refresh(|session| async move {
            self.transport.sign_csr(&session.token, csr_pem, common_name).await
        })
        .await
    }

    async fn create_certificate_authority(
        &self,
        subject: &CaSubject,
    ) -> Result<CertificateAuthority> {
        match self.delete_certificate_authority().await {
            Ok(()) | Err(SecretsError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        let ca = self
            .with_token_refresh(|session| async move {
                self.transport.generate_root(&session.token, subject).await
            })
            .await?;
        info!(common_name = %subject.common_name, "Generated root certificate authority");
        Ok(ca)
    }

    async fn delete_certificate_authority(&self) -> Result<()> {
        self.with_token_refresh(|session| async move {
            self.transport.delete_root(&session.token).await
        })
        .await
    }

    async fn read_secret(&self, key: &str) -> Result<Option<Value>> {
        let result = self
            .with_token_refresh(|session| async move {
                self.transport.read(&session.token, key).await
            })
            .await;
        match result {
            Ok(value) => Ok(Some(value)),
            Err(SecretsError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_secret(&self, key: &str, value: &Value) -> Result<()> {
        self.with_token_refresh(|session| async move {
            self.transport.write(&session.token, key, value).await
        })
        .await
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.with_token_refresh(|session| async move {
            self.transport.delete(&session.token, key).await
        })
        .await
    }

    async fn health_check(&self) -> BackendHealth {
        match self.transport.health().await {
            Ok(health) => health,
            Err(e) => {
                warn!(error = %e, "Secrets backend health check failed");
                BackendHealth::down(e.to_string())
            }
        }
    }
}
