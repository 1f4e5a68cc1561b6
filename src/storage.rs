//! The operator-facing side of the daemon: a command queue and a one-row status mirror.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    error::{Error, Result},
    types::{Command, CommandKind, DeviceState},
};

/// What the control loop needs from a storage backend.
pub trait Storage {
    /// Oldest command that has not been closed yet.
    fn next_pending_command(&mut self) -> Result<Option<Command>>;

    /// Mark a command handled with its result text. A command is closed exactly once.
    fn close_command(&mut self, id: i64, result: &str) -> Result<()>;

    /// Replace the mirrored device state (upsert of a single row).
    fn mirror_state(&mut self, state: &DeviceState) -> Result<()>;

    /// Forget the mirrored state, e.g. when the daemon stops.
    fn clear_state(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub command: Command,
    pub created: DateTime<Utc>,
    pub handled: Option<DateTime<Utc>>,
    pub result: Option<String>,
}

impl CommandRecord {
    pub fn is_pending(&self) -> bool {
        self.handled.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirroredState {
    pub state: DeviceState,
    pub modified: DateTime<Utc>,
}

/// In-process [Storage], used by the `psud` binary and by tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    /// In creation order.
    commands: Vec<CommandRecord>,
    status: Option<MirroredState>,
    fail_writes: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command under the next free id and return that id.
    pub fn submit(&mut self, kind: CommandKind, value: impl Into<String>) -> i64 {
        let id = self.commands.iter().map(|r| r.command.id).max().unwrap_or(0) + 1;
        self.commands.push(Self::record(Command {
            id,
            kind,
            value: value.into(),
        }));
        id
    }

    /// Queue a command with an id chosen by the caller.
    pub fn insert(&mut self, command: Command) -> Result<()> {
        if self.find(command.id).is_some() {
            return Err(Error::StorageFailure(format!(
                "command {} already exists",
                command.id
            )));
        }
        self.commands.push(Self::record(command));
        Ok(())
    }

    pub fn command(&self, id: i64) -> Option<&CommandRecord> {
        self.find(id)
    }

    pub fn commands(&self) -> &[CommandRecord] {
        &self.commands
    }

    pub fn pending_count(&self) -> usize {
        self.commands.iter().filter(|r| r.is_pending()).count()
    }

    pub fn status(&self) -> Option<&MirroredState> {
        self.status.as_ref()
    }

    /// Make every write fail, to simulate a broken backend.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn record(command: Command) -> CommandRecord {
        CommandRecord {
            command,
            created: Utc::now(),
            handled: None,
            result: None,
        }
    }

    fn find(&self, id: i64) -> Option<&CommandRecord> {
        self.commands.iter().find(|r| r.command.id == id)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            return Err(Error::StorageFailure("backend is read-only".into()));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn next_pending_command(&mut self) -> Result<Option<Command>> {
        Ok(self
            .commands
            .iter()
            .find(|r| r.is_pending())
            .map(|r| r.command.clone()))
    }

    fn close_command(&mut self, id: i64, result: &str) -> Result<()> {
        self.check_writable()?;
        let record = self
            .commands
            .iter_mut()
            .find(|r| r.command.id == id)
            .ok_or_else(|| Error::StorageFailure(format!("no command with id {id}")))?;
        if !record.is_pending() {
            return Err(Error::StorageFailure(format!("command {id} already closed")));
        }
        record.handled = Some(Utc::now());
        record.result = Some(result.to_string());
        debug!(id, result, "command closed");
        Ok(())
    }

    fn mirror_state(&mut self, state: &DeviceState) -> Result<()> {
        self.check_writable()?;
        self.status = Some(MirroredState {
            state: state.clone(),
            modified: Utc::now(),
        });
        Ok(())
    }

    fn clear_state(&mut self) -> Result<()> {
        self.check_writable()?;
        self.status = None;
        Ok(())
    }
}
