//! Kiosk hub: network listener and per-device dispatcher.
//!
//! `KioskHub` accepts device connections, answers the Hello handshake,
//! serves schedules and signed media URLs, ingests heartbeats into a
//! [`PresenceMonitor`], and delivers queued remote commands. Notable
//! happenings are relayed to the console through an
//! `mpsc::UnboundedSender<HubEvent>`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kiosk_core::protocol::{
    CommandStatus, CommandStatusUpdate, DeviceStatus, DeviceTelemetrySample, Hello,
    MediaResolveRequest, Payload, RemoteCommand, ScheduleRequest,
};
use kiosk_core::{
    Command, Connection, ConnectionInfo, ConnectionSender, KioskError, Mode, Packet,
    PresenceMonitor,
};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::commands::{CommandQueue, CommandRecord};
use crate::signer::UrlSigner;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const PRESENCE_SWEEP: Duration = Duration::from_secs(5);

/// Events relayed to whoever watches the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    DeviceConnected {
        device_id: String,
        screen_id: String,
        peer: String,
    },
    DeviceDisconnected {
        device_id: String,
    },
    Heartbeat(DeviceTelemetrySample),
    /// Effective presence changed, including heartbeat timeouts.
    PresenceChanged {
        device_id: String,
        status: DeviceStatus,
    },
    CommandUpdated(CommandStatusUpdate),
}

/// One row of the device overview.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSummary {
    pub device_id: String,
    pub status: DeviceStatus,
    pub connected: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub mode: Option<Mode>,
    pub last_error: Option<String>,
}

struct Session {
    screen_id: String,
    sender: ConnectionSender,
}

struct HubState {
    catalog: Catalog,
    signer: UrlSigner,
    presence: PresenceMonitor,
    commands: CommandQueue,
    sessions: HashMap<String, Session>,
    reported: HashMap<String, DeviceStatus>,
}

enum Dispatch {
    Reply(Packet),
    Nothing,
    Goodbye,
}

/// Cloneable access to hub state for the console and connection tasks.
#[derive(Clone)]
pub struct HubHandle {
    state: Arc<Mutex<HubState>>,
    events: mpsc::UnboundedSender<HubEvent>,
    next_request_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle").finish_non_exhaustive()
    }
}

pub struct KioskHub {
    listener: TcpListener,
    handle: HubHandle,
}

impl KioskHub {
    /// Bind the listener and prepare a new hub instance.
    pub async fn listen(
        conn_info: ConnectionInfo,
        catalog: Catalog,
        signer: UrlSigner,
        offline_after: chrono::Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HubEvent>), std::io::Error> {
        let listener = TcpListener::bind(conn_info.to_socket_string()).await?;
        let (events, events_rx) = mpsc::unbounded_channel();
        let state = HubState {
            catalog,
            signer,
            presence: PresenceMonitor::new(offline_after),
            commands: CommandQueue::new(),
            sessions: HashMap::new(),
            reported: HashMap::new(),
        };
        let handle = HubHandle {
            state: Arc::new(Mutex::new(state)),
            events,
            next_request_id: Arc::new(AtomicU64::new(1)),
        };
        Ok((Self { listener, handle }, events_rx))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Accept devices until `stop` is cancelled.
    pub async fn serve(self, stop: CancellationToken) {
        let mut sweep = interval(PRESENCE_SWEEP);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(addr = ?self.listener.local_addr().ok(), "hub listening");

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = sweep.tick() => self.handle.sweep_presence(Utc::now()).await,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handle = self.handle.clone();
                        let stop = stop.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = stop.cancelled() => {}
                                _ = handle.serve_device(Connection::new(stream), peer) => {}
                            }
                        });
                    }
                    Err(e) => warn!("accept error: {e}"),
                },
            }
        }
        info!("hub stopped");
    }
}

impl HubHandle {
    fn emit(&self, event: HubEvent) {
        let _ = self.events.send(event);
    }

    fn request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    // ── Device sessions ──────────────────────────────────────────

    async fn serve_device(&self, conn: Connection, peer: SocketAddr) {
        let (tx, mut rx) = conn.into_parts();

        let hello = match timeout(HANDSHAKE_TIMEOUT, handshake(&tx, &mut rx)).await {
            Ok(Ok(hello)) => hello,
            Ok(Err(e)) => {
                warn!(%peer, "handshake failed: {e}");
                return;
            }
            Err(_) => {
                warn!(%peer, "handshake timed out");
                return;
            }
        };
        let device_id = hello.device_id.clone();
        self.register(&hello, tx.clone(), peer).await;

        while let Some(packet) = rx.recv().await {
            if packet.is_keepalive() {
                continue;
            }
            match self.dispatch(&device_id, &packet).await {
                Dispatch::Reply(reply) => {
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Dispatch::Nothing => {}
                Dispatch::Goodbye => {
                    debug!(%device_id, "device said goodbye");
                    break;
                }
            }
        }

        self.unregister(&device_id, &tx).await;
    }

    async fn register(&self, hello: &Hello, sender: ConnectionSender, peer: SocketAddr) {
        let pending = {
            let mut state = self.state.lock().await;
            let previous = state.sessions.insert(
                hello.device_id.clone(),
                Session {
                    screen_id: hello.screen_id.clone(),
                    sender: sender.clone(),
                },
            );
            if previous.is_some() {
                warn!(device_id = %hello.device_id, "replacing existing session");
            }
            state.commands.queued_for(&hello.device_id)
        };
        info!(
            device_id = %hello.device_id,
            screen_id = %hello.screen_id,
            version = %hello.version,
            %peer,
            "device connected"
        );
        self.emit(HubEvent::DeviceConnected {
            device_id: hello.device_id.clone(),
            screen_id: hello.screen_id.clone(),
            peer: peer.to_string(),
        });

        for command in pending {
            self.deliver(&sender, command).await;
        }
    }

    async fn unregister(&self, device_id: &str, sender: &ConnectionSender) {
        let mut state = self.state.lock().await;
        // A reconnect may already have replaced this session.
        if state
            .sessions
            .get(device_id)
            .is_some_and(|s| s.sender.same_channel(sender))
        {
            state.sessions.remove(device_id);
            drop(state);
            info!(device_id, "device disconnected");
            self.emit(HubEvent::DeviceDisconnected {
                device_id: device_id.to_string(),
            });
        }
    }

    async fn dispatch(&self, device_id: &str, packet: &Packet) -> Dispatch {
        let request_id = packet.request_id();
        let command = match packet.command() {
            Ok(command) => command,
            Err(e) => {
                warn!(device_id, request_id, "undecodable packet: {e}");
                return Dispatch::Nothing;
            }
        };
        if packet.is_response() {
            debug!(device_id, request_id, %command, "unsolicited response ignored");
            return Dispatch::Nothing;
        }

        let result = match command {
            Command::Ping => Packet::new_response(request_id, Command::Ping, Vec::new()).map(Some),
            Command::Goodbye => return Dispatch::Goodbye,
            Command::ScheduleFetch => self.schedule(packet, Utc::now()).await,
            Command::MediaResolve => self.resolve(packet, Utc::now()).await,
            Command::Heartbeat => self.heartbeat(device_id, packet).await.map(|()| None),
            Command::CommandStatus => self.command_status(packet).await.map(|()| None),
            other => Err(KioskError::ProtocolViolation(match other {
                Command::RemoteCommand => "devices do not send remote commands",
                _ => "unexpected command",
            })),
        };

        match result {
            Ok(Some(reply)) => Dispatch::Reply(reply),
            Ok(None) => Dispatch::Nothing,
            Err(e) => {
                warn!(device_id, request_id, %command, "request failed: {e}");
                match Packet::new_error_response(request_id, command, &e.to_string()) {
                    Ok(reply) => Dispatch::Reply(reply),
                    Err(_) => Dispatch::Nothing,
                }
            }
        }
    }

    async fn schedule(&self, packet: &Packet, now: DateTime<Utc>) -> Result<Option<Packet>, KioskError> {
        let ScheduleRequest { screen_id } = ScheduleRequest::from_packet(packet)?;
        let snapshot = self
            .state
            .lock()
            .await
            .catalog
            .snapshot(&screen_id, now)
            .map_err(KioskError::Remote)?;
        debug!(%screen_id, entries = snapshot.entries.len(), "schedule served");
        snapshot.into_response(packet.request_id()).map(Some)
    }

    async fn resolve(&self, packet: &Packet, now: DateTime<Utc>) -> Result<Option<Packet>, KioskError> {
        let MediaResolveRequest { content_ref } = MediaResolveRequest::from_packet(packet)?;
        let signed = {
            let state = self.state.lock().await;
            if !state.catalog.knows_content(&content_ref) {
                return Err(KioskError::Remote(format!("unknown content {content_ref}")));
            }
            state.signer.sign(&content_ref, now)
        };
        debug!(%content_ref, expires_at = %signed.expires_at, "media url signed");
        signed.into_response(packet.request_id()).map(Some)
    }

    async fn heartbeat(&self, device_id: &str, packet: &Packet) -> Result<(), KioskError> {
        let sample = DeviceTelemetrySample::from_packet(packet)?;
        if sample.device_id != device_id {
            return Err(KioskError::ProtocolViolation("heartbeat for another device"));
        }
        if sample.emergency_activations > 0 {
            warn!(device_id, count = sample.emergency_activations, "device reports emergency access");
        }
        if let Some(error) = &sample.last_error {
            warn!(device_id, "device error: {error}");
        }
        self.state
            .lock()
            .await
            .presence
            .record(sample.clone(), Utc::now());
        self.emit(HubEvent::Heartbeat(sample));
        self.sweep_presence(Utc::now()).await;
        Ok(())
    }

    async fn command_status(&self, packet: &Packet) -> Result<(), KioskError> {
        let update = CommandStatusUpdate::from_packet(packet)?;
        let changed = self.state.lock().await.commands.apply(&update);
        if changed {
            self.emit(HubEvent::CommandUpdated(update));
        }
        Ok(())
    }

    /// Emit `PresenceChanged` for every device whose effective status
    /// differs from the last one reported.
    async fn sweep_presence(&self, now: DateTime<Utc>) {
        let changes: Vec<(String, DeviceStatus)> = {
            let mut state = self.state.lock().await;
            let current = state.presence.snapshot(now);
            current
                .into_iter()
                .filter(|(id, status)| state.reported.insert(id.clone(), *status) != Some(*status))
                .collect()
        };
        for (device_id, status) in changes {
            if status == DeviceStatus::Offline {
                warn!(%device_id, "device offline: heartbeats stopped");
            }
            self.emit(HubEvent::PresenceChanged { device_id, status });
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn deliver(&self, sender: &ConnectionSender, mut command: RemoteCommand) {
        let command_id = command.id;
        command.status = CommandStatus::Sent;
        let packet = match command.into_command(self.request_id()) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(command_id, "cannot encode command: {e}");
                return;
            }
        };
        if sender.send(packet).await.is_ok() {
            self.state.lock().await.commands.mark_sent(command_id);
            debug!(command_id, "command delivered");
        } else {
            debug!(command_id, "device gone; command stays queued");
        }
    }

    /// Queue a command and deliver it right away when the device is
    /// connected. Returns the command id.
    pub async fn send_command(
        &self,
        device_id: &str,
        command: &str,
        args: Vec<(String, String)>,
    ) -> u64 {
        let (queued, sender) = {
            let mut state = self.state.lock().await;
            let (screen_id, sender) = match state.sessions.get(device_id) {
                Some(s) => (s.screen_id.clone(), Some(s.sender.clone())),
                None => (
                    state
                        .presence
                        .last_sample(device_id)
                        .map(|s| s.screen_id.clone())
                        .unwrap_or_default(),
                    None,
                ),
            };
            (state.commands.enqueue(device_id, &screen_id, command, args), sender)
        };
        let command_id = queued.id;
        match sender {
            Some(sender) => self.deliver(&sender, queued).await,
            None => info!(command_id, device_id, "device not connected; command queued"),
        }
        command_id
    }

    pub async fn command(&self, command_id: u64) -> Option<CommandRecord> {
        self.state.lock().await.commands.get(command_id).cloned()
    }

    pub async fn commands(&self) -> Vec<CommandRecord> {
        self.state.lock().await.commands.records().cloned().collect()
    }

    // ── Overview ─────────────────────────────────────────────────

    pub async fn devices(&self, now: DateTime<Utc>) -> Vec<DeviceSummary> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.presence.snapshot(now).into_iter().map(|(id, _)| id).collect();
        for id in state.sessions.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();

        ids.into_iter()
            .map(|device_id| {
                let sample = state.presence.last_sample(&device_id);
                DeviceSummary {
                    status: state.presence.status(&device_id, now),
                    connected: state.sessions.contains_key(&device_id),
                    last_seen: state.presence.last_seen(&device_id),
                    mode: sample.map(|s| s.mode),
                    last_error: sample.and_then(|s| s.last_error.clone()),
                    device_id,
                }
            })
            .collect()
    }

    pub async fn reload_catalog(&self, path: &Path) -> Result<usize, KioskError> {
        let catalog = Catalog::load(path).await?;
        let screens = catalog.screen_count();
        self.state.lock().await.catalog = catalog;
        info!(screens, "catalog reloaded");
        Ok(screens)
    }
}

/// Wait for the device's Hello and answer it.
async fn handshake(
    tx: &ConnectionSender,
    rx: &mut mpsc::Receiver<Packet>,
) -> Result<Hello, KioskError> {
    let packet = loop {
        let packet = rx.recv().await.ok_or(KioskError::ChannelClosed)?;
        if !packet.is_keepalive() {
            break packet;
        }
    };
    if packet.is_response() {
        return Err(KioskError::ProtocolViolation("expected Hello command"));
    }
    let hello = match Hello::from_packet(&packet) {
        Ok(hello) => hello,
        Err(e) => {
            let command = packet.command().unwrap_or(Command::Hello);
            if let Ok(reply) = Packet::new_error_response(packet.request_id(), command, "hello required") {
                let _ = tx.send(reply).await;
            }
            return Err(e);
        }
    };

    let reply = Hello::new("kiosk-hub", "");
    tx.send(reply.into_response(packet.request_id())?).await?;
    Ok(hello)
}
