//! Remote operational commands and their status lifecycle.
//!
//! ```text
//! Hub    ──[RemoteCommand]──────────► Device
//!   Payload: RemoteCommand (status = Sent)
//! Device ──[CommandStatus]──────────► Hub
//!   Payload: CommandStatusUpdate (Executed | Failed + reason)
//! ```
//!
//! A command's status only moves forward:
//!
//! ```text
//! Queued ──► Sent ──► Executed
//!                └──► Failed
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KioskError;
use crate::message::Command;
use crate::protocol::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CommandStatus {
    #[default]
    Queued,
    Sent,
    Executed,
    Failed,
}

impl CommandStatus {
    fn rank(&self) -> u8 {
        match self {
            CommandStatus::Queued => 0,
            CommandStatus::Sent => 1,
            CommandStatus::Executed | CommandStatus::Failed => 2,
        }
    }

    /// `true` once the command reached `Executed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Whether `next` is a legal forward step from `self`.
    pub fn can_advance_to(&self, next: CommandStatus) -> bool {
        // Undeliverable commands fail straight from the queue.
        next.rank() == self.rank() + 1
            || (*self == CommandStatus::Queued && next == CommandStatus::Failed)
    }

    /// Move forward to `next`, rejecting backward or sideways moves.
    pub fn advance(&mut self, next: CommandStatus) -> Result<(), KioskError> {
        if !self.can_advance_to(next) {
            return Err(KioskError::ProtocolViolation(
                "command status may only move forward",
            ));
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Queued => "queued",
            CommandStatus::Sent => "sent",
            CommandStatus::Executed => "executed",
            CommandStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Commands the device knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    StartBroadcast,
    StopBroadcast,
    Reboot,
    ClearCache,
    RefreshSchedule,
    SwitchToDisplay,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::StartBroadcast => "start_broadcast",
            CommandKind::StopBroadcast => "stop_broadcast",
            CommandKind::Reboot => "reboot",
            CommandKind::ClearCache => "clear_cache",
            CommandKind::RefreshSchedule => "refresh_schedule",
            CommandKind::SwitchToDisplay => "switch_to_display",
        }
    }
}

impl FromStr for CommandKind {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_broadcast" => Ok(CommandKind::StartBroadcast),
            "stop_broadcast" => Ok(CommandKind::StopBroadcast),
            "reboot" | "restart" => Ok(CommandKind::Reboot),
            "clear_cache" => Ok(CommandKind::ClearCache),
            "refresh_schedule" => Ok(CommandKind::RefreshSchedule),
            "switch_to_display" => Ok(CommandKind::SwitchToDisplay),
            other => Err(KioskError::CommandExecution(format!(
                "unknown command '{other}'"
            ))),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote operational command addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub id: u64,
    pub device_id: String,
    pub screen_id: String,
    /// Command name, e.g. `start_broadcast`. Parsed by the executor so
    /// unknown names can be failed with a reason.
    pub command: String,
    pub payload: BTreeMap<String, String>,
    pub status: CommandStatus,
}

impl RemoteCommand {
    pub fn new(
        id: u64,
        device_id: impl Into<String>,
        screen_id: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id,
            device_id: device_id.into(),
            screen_id: screen_id.into(),
            command: command.into(),
            payload: BTreeMap::new(),
            status: CommandStatus::Queued,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> Result<CommandKind, KioskError> {
        self.command.parse()
    }
}

impl Payload for RemoteCommand {
    const COMMAND: Command = Command::RemoteCommand;
}

/// Status report sent back for a delivered command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatusUpdate {
    pub command_id: u64,
    pub status: CommandStatus,
    /// Diagnostic reason; always present for `Failed`.
    pub reason: Option<String>,
    pub result: Option<String>,
}

impl CommandStatusUpdate {
    pub fn executed(command_id: u64, result: impl Into<String>) -> Self {
        Self {
            command_id,
            status: CommandStatus::Executed,
            reason: None,
            result: Some(result.into()),
        }
    }

    pub fn failed(command_id: u64, reason: impl Into<String>) -> Self {
        Self {
            command_id,
            status: CommandStatus::Failed,
            reason: Some(reason.into()),
            result: None,
        }
    }
}

impl Payload for CommandStatusUpdate {
    const COMMAND: Command = Command::CommandStatus;
}
