//! Error types for secrets backend operations.

use thiserror::Error;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur during secrets backend operations.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Secret not found in the backend.
    #[error("Secret not found: {key}")]
    NotFound { key: String },

    /// Failed to connect to the secrets backend.
    #[error("Backend connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Logging in to the secrets backend failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The backend rejected the session token (expired or permission denied).
    #[error("Unauthorized (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Neither AppRole nor Kubernetes authentication is configured.
    #[error("Unsupported auth method: configure AppRole or Kubernetes authentication")]
    UnsupportedAuthMethod,

    /// Secret value validation failed.
    #[error("Invalid secret value: {reason}")]
    InvalidValue { reason: String },

    /// Backend-specific error.
    #[error("Backend error: {message}")]
    BackendError { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SecretsError {
    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    /// Create an authentication failed error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: message.into() }
    }

    /// Create an unauthorized (token rejected) error.
    pub fn unauthorized(status: u16, message: impl Into<String>) -> Self {
        Self::Unauthorized { status, message: message.into() }
    }

    /// Create an invalid value error.
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue { reason: reason.into() }
    }

    /// Create a backend error.
    pub fn backend_error(message: impl Into<String>) -> Self {
        Self::BackendError { message: message.into() }
    }

    /// Create a config error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Classify a backend API failure by status code and error text.
    ///
    /// 404 becomes [`SecretsError::NotFound`], token rejections become
    /// [`SecretsError::Unauthorized`], everything else a backend error.
    pub fn from_api_status(status: u16, errors: &[String], key: &str) -> Self {
        let message = errors.join("; ");
        if status == 404 {
            return Self::not_found(key);
        }
        if is_token_rejection(status, &message) {
            return Self::unauthorized(status, message);
        }
        Self::backend_error(format!("status {}: {}", status, message))
    }

    /// True when the session token was rejected and a reconnect may help.
    pub fn is_token_error(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// True for errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnsupportedAuthMethod | Self::ConfigError { .. })
    }
}

/// Matches the backend's "token expired" / "permission denied" responses.
fn is_token_rejection(status: u16, message: &str) -> bool {
    if status == 401 {
        return true;
    }
    let lower = message.to_lowercase();
    matches!(status, 400 | 403)
        && (lower.contains("permission denied") || lower.contains("token expired"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = SecretsError::not_found("test_key");
        assert!(matches!(err, SecretsError::NotFound { .. }));
        assert_eq!(err.to_string(), "Secret not found: test_key");

        let err = SecretsError::connection_failed("timeout");
        assert!(matches!(err, SecretsError::ConnectionFailed { .. }));
    }

    #[test]
    fn test_from_api_status_not_found() {
        let err = SecretsError::from_api_status(404, &[], "credential-state/jws");
        assert!(matches!(err, SecretsError::NotFound { ref key } if key == "credential-state/jws"));
    }

    #[test]
    fn test_from_api_status_permission_denied() {
        let err = SecretsError::from_api_status(403, &["permission denied".to_string()], "k");
        assert!(err.is_token_error());

        let err = SecretsError::from_api_status(400, &["Token expired".to_string()], "k");
        assert!(err.is_token_error());

        let err = SecretsError::from_api_status(401, &[], "k");
        assert!(err.is_token_error());
    }

    #[test]
    fn test_from_api_status_other_errors() {
        let err = SecretsError::from_api_status(403, &["role not allowed".to_string()], "k");
        assert!(!err.is_token_error());

        let err = SecretsError::from_api_status(503, &["Vault is sealed".to_string()], "k");
        assert!(matches!(err, SecretsError::BackendError { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_unsupported_auth_is_fatal() {
        assert!(SecretsError::UnsupportedAuthMethod.is_fatal());
        assert!(!SecretsError::UnsupportedAuthMethod.is_token_error());
        assert!(!SecretsError::backend_error("x").is_fatal());
    }
}
