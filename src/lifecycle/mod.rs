//! Credential lifecycle engine.
//!
//! One [`Machine`] per credential kind cycles Creating → Uploading → Idle,
//! with a timer in Idle that starts the next rotation at `rotates_at`.
//! Creation and upload run through [`invoke_with_retry`] and are cancelled
//! when the machine leaves the state that started them.

pub mod kinds;
pub mod machine;
pub mod record;
pub mod retry;
pub mod rotation;
pub mod runner;

pub use kinds::{CredentialKind, JwsSigningKey, ServerCertificate};
pub use machine::{Command, Event, Machine, Notification, State};
pub use record::{
    state_key, CertificateBundle, CredentialMaterial, CredentialRecord, PersistedMachineState,
};
pub use retry::invoke_with_retry;
pub use rotation::{
    compute_idle_delay, compute_rotates_at, RotationConfig, DEFAULT_MIN_ROTATION_INTERVAL_MS,
};
pub use runner::{LifecycleNotice, MachineHandle, MachineRunner, MachineStatus};
