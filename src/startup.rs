//! Daemon startup for the credential rotator
//!
//! Wires the secrets backend, hub client, configuration sink and control API
//! around an [`Orchestrator`], then runs until a shutdown signal arrives.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{start_api_server, ApiState};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::hub::{HttpHubClient, HubClient};
use crate::lifecycle::{CredentialKind, JwsSigningKey, ServerCertificate};
use crate::observability::log_config_info;
use crate::orchestrator::Orchestrator;
use crate::secrets::{MemorySecretStore, SecretSession, SecretStore, VaultTransport};
use crate::sink::FileConfigSink;
use crate::{APP_NAME, VERSION};

/// Secrets backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    #[default]
    Vault,
    /// In-process store with placeholder certificates, for local development
    Memory,
}

/// Build the secret store and log in.
///
/// A missing or unsupported authentication configuration fails here, before
/// any machine starts. Any other login failure is logged and left to the
/// machines, which retry through the session.
pub async fn connect_secret_store(
    config: &Config,
    backend: Backend,
) -> Result<Arc<dyn SecretStore>> {
    match backend {
        Backend::Vault => {
            let transport = VaultTransport::new(config.vault.vault_config())?;
            let session = SecretSession::new(transport, config.vault.session_config());
            if let Err(e) = session.connect().await {
                if e.is_fatal() {
                    return Err(e.into());
                }
                warn!(error = %e, "Secrets backend unavailable at startup, continuing");
            }
            Ok(session)
        }
        Backend::Memory => {
            warn!("Using in-memory secrets backend; state is lost on exit");
            Ok(Arc::new(MemorySecretStore::new(config.vault.key_length)))
        }
    }
}

/// Credential kinds enabled by `config`. The signing key is always present.
pub fn credential_kinds(
    config: &Config,
    store: Arc<dyn SecretStore>,
    hub: Arc<dyn HubClient>,
) -> Result<Vec<Arc<dyn CredentialKind>>> {
    let mut kinds: Vec<Arc<dyn CredentialKind>> =
        vec![Arc::new(JwsSigningKey::new(Arc::clone(&store), Arc::clone(&hub)))];

    if config.server_cert.enabled {
        let params = config.server_cert.csr_params()?;
        kinds.push(Arc::new(ServerCertificate::new(store, hub, params)));
    }

    Ok(kinds)
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run_daemon(config: Config, backend: Backend) -> Result<()> {
    info!(app_name = APP_NAME, version = VERSION, "Starting credential rotator");
    log_config_info(&config);

    let store = connect_secret_store(&config, backend).await?;
    let hub: Arc<dyn HubClient> = Arc::new(HttpHubClient::new(config.hub.client_config()?)?);
    let sink = Arc::new(FileConfigSink::new(&config.output.dir));

    let orchestrator = credential_kinds(&config, Arc::clone(&store), hub)?
        .into_iter()
        .fold(
            Orchestrator::new(Arc::clone(&store), sink, config.orchestrator_config()),
            Orchestrator::with_credential,
        );

    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn(cancel_on_signal(shutdown.clone()));

    let running = match orchestrator.start(shutdown.clone()).await {
        Ok(running) => running,
        Err(e) if shutdown.is_cancelled() => {
            info!(error = %e, "Shutdown requested during startup");
            return Ok(());
        }
        Err(e) => {
            signal_task.abort();
            return Err(e);
        }
    };

    let api_task: Option<JoinHandle<Result<()>>> = if config.api.enabled {
        let addr = config.api.socket_addr()?;
        let state = ApiState::new(running.handles().to_vec(), Arc::clone(&store));
        Some(tokio::spawn(start_api_server(addr, state, shutdown.clone())))
    } else {
        None
    };

    info!(credentials = running.handles().len(), "Credential rotator running");
    shutdown.cancelled().await;

    running.shutdown().await;
    if let Some(task) = api_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Control API server failed"),
            Err(e) => error!(error = %e, "Control API task panicked"),
        }
    }
    signal_task.abort();

    info!("Credential rotator stopped");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    if let Err(e) = wait_for_signal().await {
        error!(error = %e, "Failed to install signal handler");
        return;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| Error::internal(format!("SIGTERM handler: {}", e)))?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map_err(Error::from),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.map_err(Error::from)
}
