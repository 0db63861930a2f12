//! Credential lifecycle state machine.
//!
//! [`Machine`] is pure: it consumes [`Event`]s and returns the [`Command`]s
//! the runner must execute. It never performs I/O, which keeps every
//! transition testable without a runtime.
//!
//! ```text
//!            CREATE / ROTATE (any state)
//!          ┌──────────────────────────────┐
//!          v                              │
//!  ──> Creating ──created──> Uploading ──uploaded──> Idle
//!          ^                                          │
//!          └───────────────timer elapsed──────────────┘
//! ```

use serde::Serialize;

use super::record::{CredentialMaterial, CredentialRecord, PersistedMachineState};
use super::rotation::RotationConfig;

/// Identifies one spawned create or upload invocation.
pub type InvocationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Idle,
    Creating,
    Uploading,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Creating => "creating",
            Self::Uploading => "uploading",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum Event {
    /// Operator request to create a credential now.
    Create,
    /// Operator request to rotate the current credential now.
    Rotate,
    /// The idle timer reached `rotates_at`.
    TimerElapsed,
    Created { invocation: InvocationId, material: CredentialMaterial },
    Uploaded { invocation: InvocationId },
}

/// Lifecycle notifications published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Notification {
    Creating,
    Uploading,
    Propagated,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Notify(Notification),
    /// Cancel the outstanding invocation, if any.
    CancelInvocation,
    StartCreate { invocation: InvocationId },
    StartUpload { invocation: InvocationId, record: CredentialRecord },
    ArmTimer { rotates_at_ms: i64 },
    DisarmTimer,
    /// Store `record`, noting whether the hub has accepted it.
    Persist { record: CredentialRecord, uploaded: bool },
    PublishConfig(CredentialRecord),
}

#[derive(Debug)]
pub struct Machine {
    id: String,
    rotation: RotationConfig,
    state: State,
    record: Option<CredentialRecord>,
    uploaded: bool,
    next_invocation: InvocationId,
    active: Option<InvocationId>,
}

impl Machine {
    /// Build a machine, optionally rehydrated from a persisted snapshot.
    ///
    /// The machine does nothing until [`start`](Self::start) is called.
    pub fn new(
        id: impl Into<String>,
        rotation: RotationConfig,
        restored: Option<PersistedMachineState>,
    ) -> Self {
        let (record, uploaded) = match restored {
            Some(state) => (Some(state.record), state.uploaded),
            None => (None, false),
        };
        Self {
            id: id.into(),
            rotation,
            state: State::Idle,
            record,
            uploaded,
            next_invocation: 0,
            active: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn record(&self) -> Option<&CredentialRecord> {
        self.record.as_ref()
    }

    /// Initial commands.
    ///
    /// A restored record the hub already accepted goes to Idle. One whose
    /// upload never completed is published again and re-uploaded. Without a
    /// record the machine starts Creating.
    pub fn start(&mut self) -> Vec<Command> {
        match self.record.clone() {
            Some(record) if self.uploaded => self.enter_idle(record.rotates_at),
            Some(record) => {
                let mut commands = vec![Command::PublishConfig(record.clone())];
                commands.extend(self.enter_uploading(record));
                commands
            }
            None => self.enter_creating(),
        }
    }

    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::Create | Event::Rotate => self.enter_creating(),
            Event::TimerElapsed if self.state == State::Idle => self.enter_creating(),
            Event::TimerElapsed => Vec::new(),
            Event::Created { invocation, material } => {
                if self.state != State::Creating || !self.is_active(invocation) {
                    return Vec::new();
                }
                self.on_created(material)
            }
            Event::Uploaded { invocation } => {
                if self.state != State::Uploading || !self.is_active(invocation) {
                    return Vec::new();
                }
                self.active = None;
                let Some(record) = self.record.clone() else {
                    return self.enter_creating();
                };
                self.uploaded = true;
                let mut commands = vec![
                    Command::Notify(Notification::Propagated),
                    Command::Persist { record: record.clone(), uploaded: true },
                ];
                commands.extend(self.enter_idle(record.rotates_at));
                commands
            }
        }
    }

    fn is_active(&self, invocation: InvocationId) -> bool {
        self.active == Some(invocation)
    }

    fn issue_invocation(&mut self) -> InvocationId {
        self.next_invocation += 1;
        self.active = Some(self.next_invocation);
        self.next_invocation
    }

    fn enter_creating(&mut self) -> Vec<Command> {
        self.state = State::Creating;
        self.uploaded = false;
        let invocation = self.issue_invocation();
        vec![
            Command::CancelInvocation,
            Command::DisarmTimer,
            Command::Notify(Notification::Creating),
            Command::StartCreate { invocation },
        ]
    }

    fn on_created(&mut self, material: CredentialMaterial) -> Vec<Command> {
        let mut rotates_at = self.rotation.rotates_at(material.created_at);
        if let Some(previous) = self.record.as_ref() {
            // keep the schedule strictly increasing across generations
            rotates_at = rotates_at.max(previous.rotates_at.saturating_add(1));
        }
        let record = material.into_record(rotates_at);
        self.record = Some(record.clone());

        let mut commands = vec![
            Command::Persist { record: record.clone(), uploaded: false },
            Command::PublishConfig(record.clone()),
        ];
        commands.extend(self.enter_uploading(record));
        commands
    }

    fn enter_uploading(&mut self, record: CredentialRecord) -> Vec<Command> {
        self.state = State::Uploading;
        let invocation = self.issue_invocation();
        vec![Command::Notify(Notification::Uploading), Command::StartUpload { invocation, record }]
    }

    fn enter_idle(&mut self, rotates_at_ms: i64) -> Vec<Command> {
        self.state = State::Idle;
        self.active = None;
        vec![Command::Notify(Notification::Idle), Command::ArmTimer { rotates_at_ms }]
    }
}
