//! # credential-rotator
//!
//! Lifecycle engine for the credentials a DFSP publishes to its hub: the JWS
//! signing key pair and, optionally, the TLS server certificate.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator ─┬─ MachineRunner (jws) ─────────┐
//!               └─ MachineRunner (server-cert) ─┤
//!                                               ├→ SecretStore (Vault PKI + KV)
//!                                               ├→ HubClient   (POST /dfsps/{id}/...)
//!                                               └→ ConfigSink  (PEM files)
//! ```
//!
//! Each credential runs its own state machine, Creating → Uploading → Idle,
//! with a timer in Idle that triggers the next rotation. Machine state is
//! persisted to the secrets backend and restored on restart.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use credential_rotator::{startup::{run_daemon, Backend}, Config, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_env()?;
//!     run_daemon(config, Backend::Vault).await
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod hub;
pub mod lifecycle;
pub mod observability;
pub mod orchestrator;
pub mod secrets;
pub mod sink;
pub mod startup;

// Re-export commonly used types and traits
pub use config::Config;
pub use errors::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunningOrchestrator};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
