//! Device-side link to the hub.
//!
//! A `HubLink` outlives individual TCP connections: the service attaches
//! a fresh [`Connection`] after every (re)connect, and the rest of the
//! runtime keeps using the same cloned handle. While no connection is
//! attached, requests fail fast with [`KioskError::NotConnected`] so
//! callers fall back to their local state instead of waiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::KioskError;
use crate::message::{Command, MessageType};
use crate::network::{Connection, ConnectionSender};
use crate::packet::Packet;
use crate::protocol::{Hello, Payload, RemoteCommand};
use crate::state::{ConnectionPhase, LinkEvent, PeerCapabilities, RequestTracker};

struct Shared {
    hello: Hello,
    request_timeout: Duration,
    tracker: Mutex<RequestTracker>,
    sender: Mutex<Option<ConnectionSender>>,
    phase: Mutex<ConnectionPhase>,
    online: watch::Sender<bool>,
    commands: mpsc::Sender<RemoteCommand>,
}

/// Cloneable handle for request/response traffic with the hub.
#[derive(Clone)]
pub struct HubLink {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for HubLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubLink")
            .field("device_id", &self.shared.hello.device_id)
            .field("online", &*self.shared.online.borrow())
            .finish()
    }
}

impl HubLink {
    /// Create a detached link. Remote commands delivered by the hub are
    /// forwarded to the returned receiver.
    pub fn new(hello: Hello, request_timeout: Duration) -> (Self, mpsc::Receiver<RemoteCommand>) {
        let (commands, commands_rx) = mpsc::channel(32);
        let (online, _) = watch::channel(false);
        let mut tracker = RequestTracker::new();
        tracker.set_default_timeout(request_timeout);

        let link = Self {
            shared: Arc::new(Shared {
                hello,
                request_timeout,
                tracker: Mutex::new(tracker),
                sender: Mutex::new(None),
                phase: Mutex::new(ConnectionPhase::Disconnected),
                online,
                commands,
            }),
        };
        (link, commands_rx)
    }

    pub fn device_id(&self) -> &str {
        &self.shared.hello.device_id
    }

    pub fn is_online(&self) -> bool {
        *self.shared.online.borrow()
    }

    /// Observe online/offline transitions.
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.shared.online.subscribe()
    }

    pub async fn phase(&self) -> ConnectionPhase {
        self.shared.phase.lock().await.clone()
    }

    pub async fn capabilities(&self) -> Option<PeerCapabilities> {
        self.shared.phase.lock().await.capabilities().cloned()
    }

    /// Perform the Hello handshake over `conn` and start dispatching its
    /// inbound traffic. Returns the negotiated capabilities.
    pub async fn attach(&self, conn: Connection) -> Result<PeerCapabilities, KioskError> {
        {
            let mut phase = self.shared.phase.lock().await;
            phase.advance(LinkEvent::Lost)?;
            phase.advance(LinkEvent::Dial)?;
            phase.advance(LinkEvent::TcpUp)?;
        }

        let (tx, mut rx) = conn.into_parts();
        let hello_id = self.shared.tracker.lock().await.next_request_id();
        tx.send(self.shared.hello.into_command(hello_id)?).await?;

        let remote = match timeout(self.shared.request_timeout, await_hello(&mut rx, hello_id)).await
        {
            Ok(Ok(remote)) => remote,
            Ok(Err(e)) => {
                self.shared.phase.lock().await.advance(LinkEvent::Lost)?;
                return Err(e);
            }
            Err(_) => {
                self.shared.phase.lock().await.advance(LinkEvent::Lost)?;
                return Err(KioskError::Timeout(self.shared.request_timeout));
            }
        };

        let negotiated = self.shared.hello.capabilities.negotiate(&remote.capabilities);
        *self.shared.sender.lock().await = Some(tx);
        self.shared
            .phase
            .lock()
            .await
            .advance(LinkEvent::HelloAccepted(negotiated.clone()))?;
        self.shared.online.send_replace(true);
        info!(hub = %remote.device_id, version = %remote.version, "hub link online");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(dispatch(shared, rx));
        Ok(negotiated)
    }

    /// Resolves once the link has gone offline.
    pub async fn disconnected(&self) {
        let mut rx = self.shared.online.subscribe();
        // Err means the sender is gone, which is offline too.
        let _ = rx.wait_for(|online| !online).await;
    }

    /// Send `request` and wait for the typed response.
    pub async fn request<Req, Resp>(&self, request: &Req) -> Result<Resp, KioskError>
    where
        Req: Payload,
        Resp: Payload,
    {
        let sender = self.sender().await?;

        let (id, reply) = {
            let mut tracker = self.shared.tracker.lock().await;
            let id = tracker.next_request_id();
            (id, tracker.track(id, Req::COMMAND))
        };

        if sender.send(request.into_command(id)?).await.is_err() {
            self.shared.tracker.lock().await.cancel(id);
            return Err(KioskError::NotConnected);
        }

        let packet = match timeout(self.shared.request_timeout, reply).await {
            Ok(Ok(packet)) => packet,
            // Reply channel dropped: the connection went away.
            Ok(Err(_)) => return Err(KioskError::NotConnected),
            Err(_) => {
                self.shared.tracker.lock().await.cancel(id);
                let command = Req::COMMAND;
                debug!(request_id = id, %command, "request timed out");
                return Err(KioskError::Timeout(self.shared.request_timeout));
            }
        };

        if packet.is_error() {
            return Err(KioskError::Remote(
                String::from_utf8_lossy(packet.payload()).into_owned(),
            ));
        }
        Resp::from_packet(&packet)
    }

    /// Fire-and-forget message (heartbeats, command status reports).
    pub async fn notify<P: Payload>(&self, payload: &P) -> Result<(), KioskError> {
        let sender = self.sender().await?;
        let id = self.shared.tracker.lock().await.next_request_id();
        sender
            .send(payload.into_command(id)?)
            .await
            .map_err(|_| KioskError::NotConnected)
    }

    /// Tell the hub we are leaving and detach the connection.
    pub async fn goodbye(&self) -> Result<(), KioskError> {
        let Some(sender) = self.shared.sender.lock().await.take() else {
            return Ok(());
        };
        self.shared.phase.lock().await.advance(LinkEvent::Goodbye)?;
        let packet = Packet::new_command(0, Command::Goodbye, Vec::new())?;
        // Dropping the sender closes the writer once the queue drains.
        let _ = sender.send(packet).await;
        Ok(())
    }

    async fn sender(&self) -> Result<ConnectionSender, KioskError> {
        self.shared
            .sender
            .lock()
            .await
            .clone()
            .ok_or(KioskError::NotConnected)
    }
}

async fn await_hello(
    rx: &mut mpsc::Receiver<Packet>,
    hello_id: u64,
) -> Result<Hello, KioskError> {
    loop {
        let packet = rx.recv().await.ok_or(KioskError::ChannelClosed)?;
        if packet.is_keepalive() {
            continue;
        }
        if packet.is_response() && packet.request_id() == hello_id {
            if packet.is_error() {
                return Err(KioskError::Remote(
                    String::from_utf8_lossy(packet.payload()).into_owned(),
                ));
            }
            return Hello::from_packet(&packet);
        }
        debug!(request_id = packet.request_id(), "dropping packet received before hello");
    }
}

async fn dispatch(shared: Arc<Shared>, mut rx: mpsc::Receiver<Packet>) {
    while let Some(packet) = rx.recv().await {
        if packet.is_keepalive() {
            continue;
        }

        let (kind, command) = match (packet.message_type(), packet.command()) {
            (Ok(kind), Ok(command)) => (kind, command),
            _ => {
                warn!(request_id = packet.request_id(), "dropping packet with unknown type");
                continue;
            }
        };

        match (kind, command) {
            (MessageType::Response, _) => {
                let id = packet.request_id();
                if !shared.tracker.lock().await.resolve(packet) {
                    debug!(request_id = id, "late or unsolicited response");
                }
            }
            (MessageType::Command, Command::RemoteCommand) => {
                match RemoteCommand::from_packet(&packet) {
                    Ok(cmd) => {
                        if shared.commands.send(cmd).await.is_err() {
                            debug!("command receiver dropped");
                        }
                    }
                    Err(e) => warn!("malformed remote command: {e}"),
                }
            }
            (MessageType::Command, Command::Goodbye) => {
                info!("hub said goodbye");
                break;
            }
            (MessageType::Command, Command::Ping) => {
                let reply = Packet::new_response(packet.request_id(), Command::Ping, Vec::new());
                if let (Ok(reply), Some(tx)) = (reply, shared.sender.lock().await.clone()) {
                    let _ = tx.send(reply).await;
                }
            }
            (MessageType::Command, other) => {
                debug!(command = %other, "ignoring unexpected command from hub");
            }
        }
    }

    shared.sender.lock().await.take();
    shared.tracker.lock().await.clear();
    let _ = shared.phase.lock().await.advance(LinkEvent::Lost);
    shared.online.send_replace(false);
    warn!("hub link offline");
}
