//! Device service core logic.
//!
//! Wires the kiosk runtime to its collaborators and keeps the hub link
//! alive. The runtime never waits on the link: while the hub is
//! unreachable it keeps playing from cache and the link keeps retrying
//! in the background with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use kiosk_core::protocol::{Hello, RemoteCommand};
use kiosk_core::{
    AssetCache, Connection, ConnectionInfo, FileStateStore, HubLink, HubMediaStore, KioskError,
    KioskRuntime, ModeController, NoopShell, PeerCapabilities, PlaybackEngine, Prefetcher,
    RenderSurface, RuntimeHandle, RuntimeParts, SchedulePoller, SharedClock, StateStore,
    SystemActions, SystemClock, TelemetryCollector, UnsupportedSystemActions,
};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::console;
use crate::surface::HeadlessSurface;
use crate::system::ShellSystemActions;

// ── Backoff ──────────────────────────────────────────────────────

/// Doubling delay between reconnect attempts, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

// ── Link maintenance ─────────────────────────────────────────────

async fn connect_once(link: &HubLink, hub: &ConnectionInfo) -> Result<PeerCapabilities, KioskError> {
    let conn = Connection::connect(hub).await?;
    link.attach(conn).await
}

/// Connect, wait for the connection to drop, back off, repeat. Returns
/// when `stop` is cancelled.
pub async fn maintain_link(
    link: HubLink,
    hub: ConnectionInfo,
    mut backoff: Backoff,
    stop: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = stop.cancelled() => break,
            result = connect_once(&link, &hub) => result,
        };
        match result {
            Ok(capabilities) => {
                info!(%hub, ?capabilities, "connected to hub");
                backoff.reset();
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = link.disconnected() => warn!(%hub, "hub connection lost"),
                }
            }
            Err(e) => warn!(%hub, "hub connect failed: {e}"),
        }

        let delay = backoff.next_delay();
        debug!(?delay, "reconnecting to hub");
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }
    debug!("link maintenance stopped");
}

// ── KioskService ─────────────────────────────────────────────────

/// The top-level device service.
pub struct KioskService {
    config: DeviceConfig,
    stop: CancellationToken,
}

impl KioskService {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            stop: CancellationToken::new(),
        }
    }

    /// Cancelling the returned token stops [`KioskService::run`].
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_cancelled()
    }

    /// Build the runtime and its collaborators around `link`.
    pub async fn assemble(
        &self,
        link: HubLink,
        commands: mpsc::Receiver<RemoteCommand>,
    ) -> Result<(KioskRuntime, RuntimeHandle), KioskError> {
        let cfg = &self.config;
        let clock: SharedClock = Arc::new(SystemClock);

        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(&cfg.device.state_path));
        let controller = ModeController::load(store, cfg.to_lockout_policy()).await;

        let poller = SchedulePoller::new(
            Arc::new(link.clone()),
            cfg.device.screen_id.clone(),
            Duration::from_millis(cfg.schedule.poll_timeout_ms),
        );

        let cache = AssetCache::open(&cfg.cache.directory, cfg.cache.capacity_bytes).await?;
        let media = HubMediaStore::new(
            link.clone(),
            Duration::from_millis(cfg.cache.fetch_timeout_ms),
            cfg.cache.capacity_bytes,
        )?;
        let prefetcher = Prefetcher::new(
            Arc::new(media),
            clock.clone(),
            &cfg.cache.directory,
            cfg.to_prefetch_config(),
        );

        let surface: Arc<dyn RenderSurface> = Arc::new(HeadlessSurface::new());
        let engine = PlaybackEngine::new(
            surface.clone(),
            Duration::from_millis(cfg.telemetry.metrics_interval_ms.max(100)),
        );

        let system: Arc<dyn SystemActions> = if cfg.device.reboot_command.trim().is_empty() {
            Arc::new(UnsupportedSystemActions)
        } else {
            Arc::new(ShellSystemActions::new(&cfg.device.reboot_command))
        };

        let parts = RuntimeParts {
            controller,
            poller,
            cache,
            prefetcher,
            engine,
            surface,
            shell: Arc::new(NoopShell),
            system,
            collector: TelemetryCollector::new(
                &cfg.device.device_id,
                &cfg.device.screen_id,
                &cfg.cache.directory,
            ),
            uplink: Arc::new(link),
            commands,
            clock,
        };
        Ok(KioskRuntime::new(cfg.to_runtime_config(), parts))
    }

    /// Run until stopped.
    ///
    /// 1. Assembles the runtime and spawns it.
    /// 2. Spawns the hub link maintenance loop.
    /// 3. Optionally reads operator commands from stdin.
    /// 4. On stop, says goodbye to the hub and drains the runtime.
    pub async fn run(&self, console: bool) -> Result<(), KioskError> {
        let cfg = &self.config;
        let (link, commands) = HubLink::new(
            Hello::new(&cfg.device.device_id, &cfg.device.screen_id),
            cfg.request_timeout(),
        );
        let (runtime, handle) = self.assemble(link.clone(), commands).await?;
        let mut runtime_task = tokio::spawn(runtime.run());

        let hub = ConnectionInfo::new(&cfg.hub.address, cfg.hub.port);
        let backoff = Backoff::new(
            Duration::from_millis(cfg.hub.reconnect_backoff_ms),
            Duration::from_millis(cfg.hub.reconnect_max_ms),
        );
        let link_task = tokio::spawn(maintain_link(link.clone(), hub, backoff, self.stop.clone()));

        if console {
            tokio::spawn(console::run(handle.clone(), tokio::io::stdin()));
        }

        let early_exit = tokio::select! {
            _ = self.stop.cancelled() => None,
            result = &mut runtime_task => Some(result),
        };

        self.stop.cancel();
        handle.shutdown();
        if let Err(e) = link.goodbye().await {
            debug!("goodbye not sent: {e}");
        }
        let _ = link_task.await;

        let result = match early_exit {
            Some(result) => result,
            None => runtime_task.await,
        };
        match result {
            Ok(outcome) => {
                info!("kiosk device service stopped");
                outcome
            }
            Err(e) => {
                error!("runtime task failed: {e}");
                Err(KioskError::Other(format!("runtime task: {e}")))
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::protocol::Payload;
    use kiosk_core::{Command, Mode, Presentation};
    use tokio::net::TcpListener;

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, [100, 200, 350, 350]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn stop_handle_works() {
        let svc = KioskService::new(DeviceConfig::default());
        assert!(svc.is_running());
        svc.stop_handle().cancel();
        assert!(!svc.is_running());
    }

    /// Accept one device connection and answer its Hello.
    async fn accept_and_greet(listener: &TcpListener) -> Connection {
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = Connection::new(stream);
        loop {
            let packet = conn.recv().await.unwrap();
            if packet.command().ok() == Some(Command::Hello) {
                let reply = Hello::new("hub", "").into_response(packet.request_id()).unwrap();
                conn.send(reply).await.unwrap();
                return conn;
            }
        }
    }

    #[tokio::test]
    async fn link_reconnects_after_hub_drops_it() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (link, _commands) = HubLink::new(Hello::new("dev-1", "lobby"), Duration::from_secs(2));
        let stop = CancellationToken::new();
        let task = tokio::spawn(maintain_link(
            link.clone(),
            ConnectionInfo::new("127.0.0.1", port),
            Backoff::new(Duration::from_millis(20), Duration::from_millis(100)),
            stop.clone(),
        ));

        let first = tokio::time::timeout(Duration::from_secs(5), accept_and_greet(&listener))
            .await
            .unwrap();
        let mut online = link.subscribe_online();
        online.wait_for(|up| *up).await.unwrap();

        first
            .send(kiosk_core::Packet::new_command(0, Command::Goodbye, Vec::new()).unwrap())
            .await
            .unwrap();
        online.wait_for(|up| !*up).await.unwrap();

        let _second = tokio::time::timeout(Duration::from_secs(5), accept_and_greet(&listener))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), online.wait_for(|up| *up))
            .await
            .unwrap()
            .unwrap();

        stop.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn assembled_runtime_starts_offline_in_display() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DeviceConfig::default();
        cfg.device.state_path = dir.path().join("state.json");
        cfg.cache.directory = dir.path().join("cache");
        let svc = KioskService::new(cfg);

        let (link, commands) = HubLink::new(Hello::new("kiosk-001", "lobby"), Duration::from_secs(1));
        let (runtime, handle) = svc.assemble(link, commands).await.unwrap();
        let task = tokio::spawn(runtime.run());

        let status = handle.status().await.unwrap();
        assert_eq!(status.mode, Mode::Display);
        assert!(!status.online);
        assert!(dir.path().join("cache").is_dir());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = handle.status().await.unwrap();
        match status.presentation {
            Presentation::Idle(idle) => {
                assert!(idle.offline);
                assert_eq!(idle.booking_url, "https://signage.example/screen/lobby");
            }
            other => panic!("expected idle screen, got {other:?}"),
        }

        handle.shutdown();
        task.await.unwrap().unwrap();
    }
}
