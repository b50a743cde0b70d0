//! Outbound remote commands and their reported status.

use std::collections::BTreeMap;

use kiosk_core::protocol::{CommandStatus, CommandStatusUpdate, RemoteCommand};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub command: RemoteCommand,
    pub reason: Option<String>,
    pub result: Option<String>,
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    records: BTreeMap<u64, CommandRecord>,
    next_id: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command for `device_id` and return it with its fresh id.
    pub fn enqueue(
        &mut self,
        device_id: &str,
        screen_id: &str,
        command: &str,
        args: impl IntoIterator<Item = (String, String)>,
    ) -> RemoteCommand {
        self.next_id += 1;
        let mut cmd = RemoteCommand::new(self.next_id, device_id, screen_id, command);
        cmd.payload.extend(args);
        info!(command_id = cmd.id, device_id, command, "command queued");
        self.records.insert(
            cmd.id,
            CommandRecord {
                command: cmd.clone(),
                reason: None,
                result: None,
            },
        );
        cmd
    }

    /// Commands for `device_id` still waiting for delivery.
    pub fn queued_for(&self, device_id: &str) -> Vec<RemoteCommand> {
        self.records
            .values()
            .filter(|r| r.command.device_id == device_id && r.command.status == CommandStatus::Queued)
            .map(|r| r.command.clone())
            .collect()
    }

    pub fn mark_sent(&mut self, command_id: u64) {
        if let Some(record) = self.records.get_mut(&command_id) {
            if let Err(e) = record.command.status.advance(CommandStatus::Sent) {
                debug!(command_id, "not marked sent: {e}");
            }
        }
    }

    /// Apply a device report. Repeated reports of a finished command are
    /// ignored. Returns whether the record changed.
    pub fn apply(&mut self, update: &CommandStatusUpdate) -> bool {
        let Some(record) = self.records.get_mut(&update.command_id) else {
            warn!(command_id = update.command_id, "status for unknown command");
            return false;
        };
        let status = &mut record.command.status;
        if *status == update.status {
            return false;
        }
        // A report can overtake the local "sent" bookkeeping.
        if *status == CommandStatus::Queued && update.status == CommandStatus::Executed {
            *status = CommandStatus::Sent;
        }
        match status.advance(update.status) {
            Ok(()) => {
                record.reason = update.reason.clone();
                record.result = update.result.clone();
                info!(
                    command_id = update.command_id,
                    status = %update.status,
                    reason = update.reason.as_deref().unwrap_or(""),
                    "command status"
                );
                true
            }
            Err(e) => {
                debug!(command_id = update.command_id, "ignoring report: {e}");
                false
            }
        }
    }

    pub fn get(&self, command_id: u64) -> Option<&CommandRecord> {
        self.records.get(&command_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &CommandRecord> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_queued_sent_executed() {
        let mut queue = CommandQueue::new();
        let cmd = queue.enqueue("dev-1", "lobby", "clear_cache", []);
        assert_eq!(queue.queued_for("dev-1"), vec![cmd.clone()]);
        assert!(queue.queued_for("dev-2").is_empty());

        queue.mark_sent(cmd.id);
        assert!(queue.queued_for("dev-1").is_empty());

        assert!(queue.apply(&CommandStatusUpdate::executed(cmd.id, "removed 3 assets")));
        let record = queue.get(cmd.id).unwrap();
        assert_eq!(record.command.status, CommandStatus::Executed);
        assert_eq!(record.result.as_deref(), Some("removed 3 assets"));

        // Duplicate report is a no-op.
        assert!(!queue.apply(&CommandStatusUpdate::executed(cmd.id, "removed 3 assets")));
    }

    #[test]
    fn failure_keeps_reason_and_is_final() {
        let mut queue = CommandQueue::new();
        let cmd = queue.enqueue("dev-1", "lobby", "reboot", [("delay".to_string(), "5".to_string())]);
        assert_eq!(cmd.payload.get("delay").map(String::as_str), Some("5"));
        queue.mark_sent(cmd.id);

        assert!(queue.apply(&CommandStatusUpdate::failed(cmd.id, "restart unsupported")));
        assert!(!queue.apply(&CommandStatusUpdate::executed(cmd.id, "late")));
        let record = queue.get(cmd.id).unwrap();
        assert_eq!(record.command.status, CommandStatus::Failed);
        assert_eq!(record.reason.as_deref(), Some("restart unsupported"));
    }

    #[test]
    fn unknown_command_report_is_ignored() {
        let mut queue = CommandQueue::new();
        assert!(!queue.apply(&CommandStatusUpdate::executed(99, "?")));
    }
}
