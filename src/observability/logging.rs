//! # Structured Logging
//!
//! Installs the global `tracing` subscriber in text or JSON form. Filter
//! directives come from `RUST_LOG` when set, otherwise from the verbosity flag.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Config, LogFormat, LoggingSettings};
use crate::errors::{Error, Result};

fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "credential_rotator=debug,info"
    } else {
        "info"
    }
}

/// Build the filter for the given settings.
pub fn build_filter(settings: &LoggingSettings, verbose: bool) -> Result<EnvFilter> {
    let directives = settings.filter.as_deref().unwrap_or_else(|| default_directives(verbose));
    EnvFilter::try_new(directives)
        .map_err(|e| Error::config(format!("Invalid log filter '{}': {}", directives, e)))
}

/// Install the global subscriber.
///
/// A subscriber that is already installed (integration tests, embedding
/// applications) is left in place.
pub fn init_logging(settings: &LoggingSettings, verbose: bool) -> Result<()> {
    let filter = build_filter(settings, verbose)?;

    let installed = match settings.format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).with_target(true).finish(),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            FmtSubscriber::builder()
                .with_env_filter(filter)
                .json()
                .with_current_span(true)
                .finish(),
        ),
    };

    if installed.is_err() {
        tracing::debug!("Global subscriber already set, keeping it");
    }
    Ok(())
}

/// Log configuration at startup
pub fn log_config_info(config: &Config) {
    tracing::info!(
        vault_address = %config.vault.address,
        kv_mount = %config.vault.kv_mount,
        pki_mount = %config.vault.pki_mount,
        state_namespace = %config.rotation.state_namespace,
        rotation_interval_ms = config.rotation.policy.requested_interval_ms,
        min_rotation_interval_ms = config.rotation.policy.min_interval_ms,
        retry_interval_ms = config.rotation.policy.retry_interval_ms,
        server_cert_enabled = config.server_cert.enabled,
        api_enabled = config.api.enabled,
        output_dir = %config.output.dir.display(),
        "Credential rotator configuration"
    );
}
