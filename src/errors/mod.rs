//! # Error Handling
//!
//! Crate-level error type. Layer-specific errors ([`SecretsError`], [`HubError`])
//! convert into [`Error`] with `?` so lifecycle code can mix both collaborators.

use crate::hub::HubError;
use crate::secrets::SecretsError;

/// Custom result type for credential rotator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the credential rotator
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secrets backend errors
    #[error("Secrets backend error: {0}")]
    Secrets(#[from] SecretsError),

    /// Hub registry errors
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// True for errors that must stop the process instead of being retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Secrets(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Config(errors.to_string())
    }
}
