//! Runs every credential machine and bridges them to persistence and
//! configuration propagation.
//!
//! Machines are independent regions: each has its own task, queue and
//! timer. They share two sequential workers. The persistence worker stores
//! each record under `<namespace>/<machine>`, once when it is created and
//! again when the hub accepts it; a failed write is logged and never rolls
//! back the machine. The configuration relay hands updates
//! to the [`ConfigSink`] one at a time.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::{Error, Result};
use crate::lifecycle::runner::{ConfigRequest, PersistRequest, RunnerChannels};
use crate::lifecycle::{
    invoke_with_retry, state_key, CredentialKind, LifecycleNotice, MachineHandle, MachineRunner,
    PersistedMachineState, RotationConfig,
};
use crate::secrets::SecretStore;
use crate::sink::ConfigSink;

pub const DEFAULT_STATE_NAMESPACE: &str = "credential-state";

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub rotation: RotationConfig,
    /// Key prefix for persisted machine state.
    pub state_namespace: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            rotation: RotationConfig::default(),
            state_namespace: DEFAULT_STATE_NAMESPACE.to_string(),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn SecretStore>,
    sink: Arc<dyn ConfigSink>,
    config: OrchestratorConfig,
    kinds: Vec<Arc<dyn CredentialKind>>,
    notices: broadcast::Sender<LifecycleNotice>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SecretStore>,
        sink: Arc<dyn ConfigSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { store, sink, config, kinds: Vec::new(), notices }
    }

    /// Register a credential kind to run as its own machine.
    pub fn with_credential(mut self, kind: Arc<dyn CredentialKind>) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Lifecycle notifications from every machine.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleNotice> {
        self.notices.subscribe()
    }

    /// Restore persisted state and start all machines.
    ///
    /// Fails on duplicate credential ids, or when `shutdown` fires while
    /// state is still being loaded.
    pub async fn start(self, shutdown: CancellationToken) -> Result<RunningOrchestrator> {
        let mut seen = HashSet::new();
        for kind in &self.kinds {
            if !seen.insert(kind.id().to_string()) {
                return Err(Error::config(format!("duplicate credential id '{}'", kind.id())));
            }
        }

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let (config_tx, config_rx) = mpsc::unbounded_channel();
        let workers = vec![
            tokio::spawn(persistence_worker(
                Arc::clone(&self.store),
                self.config.state_namespace.clone(),
                persist_rx,
            )),
            tokio::spawn(config_relay(Arc::clone(&self.sink), config_rx)),
        ];
        let channels =
            RunnerChannels { persist: persist_tx, config: config_tx, notices: self.notices.clone() };

        let mut handles = Vec::with_capacity(self.kinds.len());
        let mut machines = Vec::with_capacity(self.kinds.len());
        for kind in self.kinds {
            let restored = match load_state(
                self.store.as_ref(),
                &self.config.state_namespace,
                kind.id(),
                &self.config.rotation,
                &shutdown,
            )
            .await
            {
                Some(restored) => restored,
                None => return Err(Error::internal("shutdown requested while loading state")),
            };

            let (runner, handle) = MachineRunner::new(
                kind,
                self.config.rotation,
                restored,
                channels.clone(),
                shutdown.clone(),
            );
            machines.push(tokio::spawn(runner.run()));
            handles.push(handle);
        }

        info!(machines = handles.len(), "Credential orchestrator started");
        Ok(RunningOrchestrator { handles, machines, workers, notices: self.notices, shutdown })
    }
}

/// Read a machine's persisted snapshot. `None` only when cancelled.
///
/// A missing key or an unreadable snapshot both mean "start fresh".
async fn load_state(
    store: &dyn SecretStore,
    namespace: &str,
    machine: &str,
    rotation: &RotationConfig,
    shutdown: &CancellationToken,
) -> Option<Option<PersistedMachineState>> {
    let key = state_key(namespace, machine);
    let value = invoke_with_retry(
        || store.read_secret(&key),
        rotation.retry_interval(),
        "load state",
        shutdown,
    )
    .await?;

    let Some(value) = value else {
        info!(machine, key = %key, "No persisted state, creating a new credential");
        return Some(None);
    };

    match serde_json::from_value::<PersistedMachineState>(value) {
        Ok(state) => {
            info!(
                machine,
                rotates_at = state.record.rotates_at,
                saved_at = state.saved_at,
                uploaded = state.uploaded,
                "Restored persisted credential state"
            );
            Some(Some(state))
        }
        Err(e) => {
            warn!(machine, key = %key, error = %e, "Ignoring unreadable persisted state");
            Some(None)
        }
    }
}

async fn persistence_worker(
    store: Arc<dyn SecretStore>,
    namespace: String,
    mut requests: mpsc::UnboundedReceiver<PersistRequest>,
) {
    while let Some(request) = requests.recv().await {
        let key = state_key(&namespace, &request.machine);
        let state =
            PersistedMachineState::new(request.machine.clone(), request.record, request.uploaded);
        let result = match serde_json::to_value(&state) {
            Ok(value) => store.write_secret(&key, &value).await.map_err(Error::from),
            Err(e) => Err(Error::from(e)),
        };
        match result {
            Ok(()) => info!(
                machine = %request.machine,
                key = %key,
                uploaded = request.uploaded,
                "Persisted credential state"
            ),
            Err(e) => error!(
                machine = %request.machine,
                key = %key,
                error = %e,
                "Failed to persist credential state"
            ),
        }
    }
}

async fn config_relay(
    sink: Arc<dyn ConfigSink>,
    mut requests: mpsc::UnboundedReceiver<ConfigRequest>,
) {
    while let Some(request) = requests.recv().await {
        let kind = request.update.kind();
        if let Err(e) = sink.apply(request.update).await {
            error!(machine = %request.machine, kind, error = %e, "Failed to apply configuration update");
        }
    }
}

/// Machines started by [`Orchestrator::start`].
pub struct RunningOrchestrator {
    handles: Vec<MachineHandle>,
    machines: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    notices: broadcast::Sender<LifecycleNotice>,
    shutdown: CancellationToken,
}

impl RunningOrchestrator {
    pub fn handles(&self) -> &[MachineHandle] {
        &self.handles
    }

    pub fn handle(&self, id: &str) -> Option<&MachineHandle> {
        self.handles.iter().find(|h| h.id() == id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleNotice> {
        self.notices.subscribe()
    }

    /// Stop every machine, then let the workers drain what was queued.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        join_all(self.machines).await;
        // workers exit once the last runner drops its senders
        join_all(self.workers).await;
        info!("Credential orchestrator stopped");
    }
}
