//! Remote command intake with exactly-once execution.
//!
//! The hub may redeliver a command (reconnects, retries). The ledger
//! remembers every command id seen and its status; a redelivered id is
//! never executed again, its last known status is reported instead.

use std::collections::{HashMap, VecDeque};

use tracing::{info, warn};

use crate::error::KioskError;
use crate::protocol::{CommandKind, CommandStatus, CommandStatusUpdate, RemoteCommand};

const LEDGER_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
pub struct CommandLedger {
    statuses: HashMap<u64, CommandStatus>,
    order: VecDeque<u64>,
}

impl CommandLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, command_id: u64) -> Option<CommandStatus> {
        self.statuses.get(&command_id).copied()
    }

    /// Record a first delivery as `Sent`. `false` if the id was seen before.
    pub fn admit(&mut self, command_id: u64) -> bool {
        if self.statuses.contains_key(&command_id) {
            return false;
        }
        if self.order.len() == LEDGER_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
        self.statuses.insert(command_id, CommandStatus::Sent);
        self.order.push_back(command_id);
        true
    }

    /// Move a command forward. Backward or repeated moves are rejected.
    pub fn advance(&mut self, command_id: u64, next: CommandStatus) -> Result<(), KioskError> {
        let status = self
            .statuses
            .get_mut(&command_id)
            .ok_or_else(|| KioskError::CommandExecution(format!("unknown command {command_id}")))?;
        status.advance(next)
    }
}

/// What the runtime must do for an accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    StartBroadcast,
    StopBroadcast,
    Reboot,
    ClearCache,
    RefreshSchedule,
    SwitchToDisplay,
}

impl From<CommandKind> for CommandAction {
    fn from(kind: CommandKind) -> Self {
        match kind {
            CommandKind::StartBroadcast => CommandAction::StartBroadcast,
            CommandKind::StopBroadcast => CommandAction::StopBroadcast,
            CommandKind::Reboot => CommandAction::Reboot,
            CommandKind::ClearCache => CommandAction::ClearCache,
            CommandKind::RefreshSchedule => CommandAction::RefreshSchedule,
            CommandKind::SwitchToDisplay => CommandAction::SwitchToDisplay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intake {
    /// Run `action`, then report through [`CommandExecutor::complete`].
    Execute { command_id: u64, action: CommandAction },
    /// Seen before; send this status again, do nothing else.
    Duplicate(CommandStatusUpdate),
    /// Not runnable; report this failure.
    Rejected(CommandStatusUpdate),
}

#[derive(Debug)]
pub struct CommandExecutor {
    device_id: String,
    ledger: CommandLedger,
}

impl CommandExecutor {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ledger: CommandLedger::new(),
        }
    }

    pub fn ledger(&self) -> &CommandLedger {
        &self.ledger
    }

    pub fn accept(&mut self, command: &RemoteCommand) -> Intake {
        let id = command.id;

        if let Some(status) = self.ledger.status(id) {
            warn!(command_id = id, %status, "ignoring redelivered command");
            return Intake::Duplicate(CommandStatusUpdate {
                command_id: id,
                status,
                reason: Some("duplicate delivery".into()),
                result: None,
            });
        }
        if command.status.is_terminal() {
            return Intake::Duplicate(CommandStatusUpdate {
                command_id: id,
                status: command.status,
                reason: Some("already finished".into()),
                result: None,
            });
        }

        self.ledger.admit(id);

        let rejected = |ledger: &mut CommandLedger, reason: String| {
            warn!(command_id = id, "rejecting command: {reason}");
            let _ = ledger.advance(id, CommandStatus::Failed);
            Intake::Rejected(CommandStatusUpdate::failed(id, reason))
        };

        if command.device_id != self.device_id {
            return rejected(
                &mut self.ledger,
                format!("addressed to device {}, this is {}", command.device_id, self.device_id),
            );
        }
        match command.kind() {
            Ok(kind) => {
                info!(command_id = id, command = %kind, "executing remote command");
                Intake::Execute {
                    command_id: id,
                    action: kind.into(),
                }
            }
            Err(e) => rejected(&mut self.ledger, e.to_string()),
        }
    }

    /// Record the outcome of an executed command and build its report.
    pub fn complete(&mut self, command_id: u64, outcome: Result<String, KioskError>) -> CommandStatusUpdate {
        let update = match outcome {
            Ok(result) => CommandStatusUpdate::executed(command_id, result),
            Err(e) => {
                warn!(command_id, "remote command failed: {e}");
                CommandStatusUpdate::failed(command_id, e.to_string())
            }
        };
        if let Err(e) = self.ledger.advance(command_id, update.status) {
            warn!(command_id, "status not recorded: {e}");
        }
        update
    }
}
