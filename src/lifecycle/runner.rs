//! Event loop driving one [`Machine`].
//!
//! The runner owns the machine and processes one event at a time. Backend
//! and hub calls run in spawned invocation tasks that post completions
//! back into the same queue, so the machine keeps reacting to operator
//! requests while an invocation is outstanding.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::kinds::CredentialKind;
use super::machine::{Command, Event, InvocationId, Machine, Notification, State};
use super::record::{CredentialRecord, PersistedMachineState};
use super::retry::invoke_with_retry;
use super::rotation::{compute_idle_delay, RotationConfig};
use crate::errors::{Error, Result};
use crate::sink::ConfigUpdate;

/// Request to store a machine's current record.
#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub machine: String,
    pub record: CredentialRecord,
    /// The hub has accepted `record`.
    pub uploaded: bool,
}

/// Configuration update produced by a machine.
#[derive(Debug, Clone)]
pub struct ConfigRequest {
    pub machine: String,
    pub update: ConfigUpdate,
}

/// Lifecycle notification tagged with the machine that emitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleNotice {
    pub machine: String,
    pub notification: Notification,
}

/// Point-in-time view of a machine, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    pub state: State,
    /// Unix seconds of the current record
    pub created_at: Option<i64>,
    /// Unix milliseconds of the next rotation
    pub rotates_at: Option<i64>,
    pub public_key: Option<String>,
}

impl MachineStatus {
    fn of(machine: &Machine) -> Self {
        let record = machine.record();
        Self {
            state: machine.state(),
            created_at: record.map(|r| r.created_at),
            rotates_at: record.map(|r| r.rotates_at),
            public_key: record.map(|r| r.public_key.clone()),
        }
    }
}

/// Outbound channels shared by every runner.
#[derive(Debug, Clone)]
pub struct RunnerChannels {
    pub persist: mpsc::UnboundedSender<PersistRequest>,
    pub config: mpsc::UnboundedSender<ConfigRequest>,
    pub notices: broadcast::Sender<LifecycleNotice>,
}

/// Cloneable handle for talking to a running machine.
#[derive(Debug, Clone)]
pub struct MachineHandle {
    id: String,
    events: mpsc::UnboundedSender<Event>,
    status: watch::Receiver<MachineStatus>,
}

impl MachineHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rotate now, from any state.
    pub fn rotate(&self) -> Result<()> {
        self.send(Event::Rotate)
    }

    /// Create a credential now, from any state.
    pub fn create(&self) -> Result<()> {
        self.send(Event::Create)
    }

    pub fn status(&self) -> MachineStatus {
        self.status.borrow().clone()
    }

    /// Receiver for status changes.
    pub fn watch(&self) -> watch::Receiver<MachineStatus> {
        self.status.clone()
    }

    fn send(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| Error::internal(format!("credential machine '{}' has stopped", self.id)))
    }
}

pub struct MachineRunner {
    machine: Machine,
    kind: Arc<dyn CredentialKind>,
    retry_interval: Duration,
    channels: RunnerChannels,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    status_tx: watch::Sender<MachineStatus>,
    shutdown: CancellationToken,
    invocation: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl MachineRunner {
    pub fn new(
        kind: Arc<dyn CredentialKind>,
        rotation: RotationConfig,
        restored: Option<PersistedMachineState>,
        channels: RunnerChannels,
        shutdown: CancellationToken,
    ) -> (Self, MachineHandle) {
        let id = kind.id().to_string();
        let machine = Machine::new(id.clone(), rotation, restored);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(MachineStatus::of(&machine));

        let handle = MachineHandle { id, events: events_tx.clone(), status: status_rx };
        let runner = Self {
            machine,
            kind,
            retry_interval: rotation.retry_interval(),
            channels,
            events_tx,
            events_rx,
            status_tx,
            shutdown,
            invocation: None,
            deadline: None,
        };
        (runner, handle)
    }

    /// Run until the shutdown token is cancelled.
    pub async fn run(self) {
        let span = info_span!("lifecycle", machine = %self.machine.id());
        self.run_loop().instrument(span).await
    }

    async fn run_loop(mut self) {
        let commands = self.machine.start();
        self.execute(commands);

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    self.cancel_invocation();
                    info!(state = %self.machine.state(), "Credential machine stopped");
                    break;
                }

                Some(event) = self.events_rx.recv() => {
                    let commands = self.machine.handle(event);
                    self.execute(commands);
                }

                _ = wait_for_deadline(deadline) => {
                    self.deadline = None;
                    debug!("Rotation due");
                    let commands = self.machine.handle(Event::TimerElapsed);
                    self.execute(commands);
                }
            }
        }
    }

    fn execute(&mut self, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        for command in commands {
            match command {
                Command::Notify(notification) => self.notify(notification),
                Command::CancelInvocation => self.cancel_invocation(),
                Command::StartCreate { invocation } => self.start_create(invocation),
                Command::StartUpload { invocation, record } => {
                    self.start_upload(invocation, record)
                }
                Command::ArmTimer { rotates_at_ms } => self.arm_timer(rotates_at_ms),
                Command::DisarmTimer => self.deadline = None,
                Command::Persist { record, uploaded } => {
                    let request =
                        PersistRequest { machine: self.machine.id().to_string(), record, uploaded };
                    if self.channels.persist.send(request).is_err() {
                        warn!("Persistence worker is gone, state not saved");
                    }
                }
                Command::PublishConfig(record) => {
                    let request = ConfigRequest {
                        machine: self.machine.id().to_string(),
                        update: self.kind.config_update(&record),
                    };
                    if self.channels.config.send(request).is_err() {
                        warn!("Configuration relay is gone, update dropped");
                    }
                }
            }
        }
        self.status_tx.send_replace(MachineStatus::of(&self.machine));
    }

    fn notify(&self, notification: Notification) {
        info!(state = ?notification, "Credential lifecycle transition");
        let notice = LifecycleNotice { machine: self.machine.id().to_string(), notification };
        // no subscribers is fine
        let _ = self.channels.notices.send(notice);
    }

    fn cancel_invocation(&mut self) {
        if let Some(token) = self.invocation.take() {
            token.cancel();
        }
    }

    fn next_invocation_token(&mut self) -> CancellationToken {
        let token = self.shutdown.child_token();
        self.invocation = Some(token.clone());
        token
    }

    fn start_create(&mut self, invocation: InvocationId) {
        let token = self.next_invocation_token();
        let kind = Arc::clone(&self.kind);
        let events = self.events_tx.clone();
        let interval = self.retry_interval;

        tokio::spawn(
            async move {
                let material = invoke_with_retry(
                    || {
                        let kind = Arc::clone(&kind);
                        async move { kind.create().await }
                    },
                    interval,
                    "create",
                    &token,
                )
                .await;
                if let Some(material) = material {
                    let _ = events.send(Event::Created { invocation, material });
                }
            }
            .in_current_span(),
        );
    }

    fn start_upload(&mut self, invocation: InvocationId, record: CredentialRecord) {
        let token = self.next_invocation_token();
        let kind = Arc::clone(&self.kind);
        let events = self.events_tx.clone();
        let interval = self.retry_interval;

        tokio::spawn(
            async move {
                let uploaded = invoke_with_retry(
                    || {
                        let kind = Arc::clone(&kind);
                        let record = record.clone();
                        async move { kind.upload(&record).await }
                    },
                    interval,
                    "upload",
                    &token,
                )
                .await;
                if uploaded.is_some() {
                    let _ = events.send(Event::Uploaded { invocation });
                }
            }
            .in_current_span(),
        );
    }

    fn arm_timer(&mut self, rotates_at_ms: i64) {
        let delay = compute_idle_delay(rotates_at_ms, chrono::Utc::now().timestamp_millis());
        // a deadline beyond what Instant can represent never fires
        self.deadline = Instant::now().checked_add(delay);
        info!(rotates_at = rotates_at_ms, delay_ms = delay.as_millis() as u64, "Next rotation scheduled");
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::record::CredentialMaterial;
    use crate::secrets::SecretString;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    /// Kind whose create fails a fixed number of times before succeeding.
    struct FlakyKind {
        create_failures: u32,
        creates: AtomicU32,
        uploads: AtomicU32,
    }

    #[async_trait]
    impl CredentialKind for FlakyKind {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn create(&self) -> Result<CredentialMaterial> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            if n < self.create_failures {
                return Err(Error::internal("backend unavailable"));
            }
            Ok(CredentialMaterial {
                public_key: format!("public-{}", n),
                private_key: SecretString::new(format!("private-{}", n)),
                created_at: chrono::Utc::now().timestamp(),
                certificate: None,
            })
        }

        async fn upload(&self, _record: &CredentialRecord) -> Result<()> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn config_update(&self, record: &CredentialRecord) -> ConfigUpdate {
            ConfigUpdate::JwsSigningKey { private_key: record.private_key.clone() }
        }
    }

    fn channels() -> (
        RunnerChannels,
        mpsc::UnboundedReceiver<PersistRequest>,
        mpsc::UnboundedReceiver<ConfigRequest>,
    ) {
        let (persist, persist_rx) = mpsc::unbounded_channel();
        let (config, config_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(16);
        (RunnerChannels { persist, config, notices }, persist_rx, config_rx)
    }

    #[tokio::test]
    #[traced_test]
    async fn test_create_failures_are_retried_inside_lifecycle_span() {
        let kind = Arc::new(FlakyKind {
            create_failures: 2,
            creates: AtomicU32::new(0),
            uploads: AtomicU32::new(0),
        });
        let rotation = RotationConfig {
            requested_interval_ms: 3_600_000,
            min_interval_ms: 0,
            retry_interval_ms: 5,
        };
        let (channels, mut persist_rx, mut config_rx) = channels();
        let shutdown = CancellationToken::new();
        let (runner, handle) =
            MachineRunner::new(kind.clone(), rotation, None, channels, shutdown.clone());
        let task = tokio::spawn(runner.run());

        let mut status = handle.watch();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.state == State::Idle && s.rotates_at.is_some()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(kind.creates.load(Ordering::SeqCst), 3);
        assert_eq!(kind.uploads.load(Ordering::SeqCst), 1);
        let created = persist_rx.recv().await.unwrap();
        assert_eq!(created.machine, "flaky");
        assert!(!created.uploaded);
        let confirmed = persist_rx.recv().await.unwrap();
        assert!(confirmed.uploaded);
        assert_eq!(confirmed.record, created.record);
        assert_eq!(config_rx.recv().await.unwrap().update.private_key().expose_secret(), "private-2");
        assert!(logs_contain("create failed (attempt 2), retrying"));
        assert!(logs_contain("lifecycle"));

        shutdown.cancel();
        task.await.unwrap();
        assert!(handle.rotate().is_err());
    }
}
