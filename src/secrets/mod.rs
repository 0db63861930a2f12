//! Secrets backend access.
//!
//! The lifecycle engine talks to the backend through the [`SecretStore`]
//! trait. The production implementation is a [`SecretSession`] over a
//! [`BackendTransport`]; the session owns the login token, renews it before
//! the lease runs out and retries an operation once after a rejected token.
//!
//! ```rust,ignore
//! use credential_rotator::secrets::{SecretSession, SessionConfig, VaultConfig, VaultTransport};
//!
//! let transport = VaultTransport::new(VaultConfig::default())?;
//! let session = SecretSession::new(transport, SessionConfig::default());
//! session.connect().await?;
//! let state = session.read_secret("credential-state/jws").await?;
//! ```

pub mod error;
pub mod keys;
pub mod memory;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;
pub mod vault;

pub use error::{Result, SecretsError};
pub use memory::MemorySecretStore;
pub use session::{ActiveSession, SecretSession, SessionConfig};
pub use store::{
    BackendHealth, CaSubject, CertificateAuthority, CsrParams, IssuedCertificate, KeyPair,
    SecretStore, SignedCertificate,
};
pub use transport::{AuthLease, AuthMethod, AuthSettings, BackendTransport};
pub use types::SecretString;
pub use vault::{VaultConfig, VaultTransport};
