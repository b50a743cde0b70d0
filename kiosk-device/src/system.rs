//! Host actions triggered by remote commands.

use async_trait::async_trait;
use kiosk_core::{KioskError, SystemActions};
use tokio::process::Command;
use tracing::{info, warn};

/// Runs a configured shell command to restart the host.
#[derive(Debug, Clone)]
pub struct ShellSystemActions {
    reboot_command: String,
}

impl ShellSystemActions {
    pub fn new(reboot_command: impl Into<String>) -> Self {
        Self {
            reboot_command: reboot_command.into(),
        }
    }
}

#[async_trait]
impl SystemActions for ShellSystemActions {
    async fn reboot(&self) -> Result<(), KioskError> {
        info!(command = %self.reboot_command, "restarting host");
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.reboot_command)
            .status()
            .await
            .map_err(|e| KioskError::CommandExecution(format!("restart: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            warn!(%status, "restart command failed");
            Err(KioskError::CommandExecution(format!("restart exited with {status}")))
        }
    }
}
