//! # Observability Infrastructure
//!
//! Structured logging for the credential rotator. Lifecycle events are logged
//! inside a `lifecycle` span carrying the credential id.

pub mod logging;

pub use logging::{init_logging, log_config_info};
