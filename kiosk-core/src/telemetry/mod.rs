//! Heartbeat sampling and remote command execution.

mod collector;
mod commands;

pub use collector::{SampleContext, SystemLoad, TelemetryCollector};
pub use commands::{CommandAction, CommandExecutor, CommandLedger, Intake};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::KioskError;
use crate::network::HubLink;
use crate::protocol::{CommandStatusUpdate, DeviceTelemetrySample};

/// The runtime's outbound channel to the monitoring side.
#[async_trait]
pub trait Uplink: Send + Sync {
    async fn heartbeat(&self, sample: &DeviceTelemetrySample) -> Result<(), KioskError>;

    async fn report(&self, update: &CommandStatusUpdate) -> Result<(), KioskError>;

    /// Connectivity as seen by the transport.
    fn subscribe_online(&self) -> watch::Receiver<bool>;
}

#[async_trait]
impl Uplink for HubLink {
    async fn heartbeat(&self, sample: &DeviceTelemetrySample) -> Result<(), KioskError> {
        self.notify(sample).await
    }

    async fn report(&self, update: &CommandStatusUpdate) -> Result<(), KioskError> {
        self.notify(update).await
    }

    fn subscribe_online(&self) -> watch::Receiver<bool> {
        HubLink::subscribe_online(self)
    }
}

/// Host-level operations a remote command can trigger.
#[async_trait]
pub trait SystemActions: Send + Sync {
    async fn reboot(&self) -> Result<(), KioskError>;
}

/// For runtimes that cannot restart their host.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSystemActions;

#[async_trait]
impl SystemActions for UnsupportedSystemActions {
    async fn reboot(&self) -> Result<(), KioskError> {
        Err(KioskError::CommandExecution(
            "restart unsupported in current runtime".into(),
        ))
    }
}
