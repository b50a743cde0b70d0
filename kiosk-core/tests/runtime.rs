//! End-to-end runtime scenarios with fake collaborators, a manual wall
//! clock, and paused tokio time.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kiosk_core::player::SurfaceSample;
use kiosk_core::protocol::{
    CommandStatus, CommandStatusUpdate, DeviceTelemetrySample, MediaType, PlaybackState,
    RemoteCommand, ScheduleEntry, ScheduleSnapshot, SignedUrl,
};
use kiosk_core::{
    AdminOp, AssetCache, AuditKind, IdleScreen, InputEvent, InputSignal, KioskError, KioskRuntime,
    KioskRuntimeState, KioskShell, LockoutPolicy, ManualClock, MediaStore, MemoryStateStore,
    Mode, ModeController, Modifiers, PlaybackEngine, PrefetchConfig, Prefetcher, Presentation,
    RenderSurface, RuntimeConfig, RuntimeHandle, RuntimeParts, RuntimeStatus, SchedulePoller,
    ScheduleSource, SharedClock, SlotState, StateStore, SwitchOutcome, TelemetryCollector,
    UnsupportedSystemActions, Uplink,
};
use kiosk_core::player::LoadedMedia;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

fn image(id: u64, offset: i64, duration: u32) -> ScheduleEntry {
    ScheduleEntry::new(id, format!("ad-{id}"), MediaType::Image, t0() + secs(offset), Some(duration))
}

// ── Fakes ────────────────────────────────────────────────────────

struct FakeSource {
    entries: Mutex<Vec<ScheduleEntry>>,
}

#[async_trait]
impl ScheduleSource for FakeSource {
    async fn fetch_schedule(&self, screen_id: &str) -> Result<ScheduleSnapshot, KioskError> {
        Ok(ScheduleSnapshot {
            screen_id: screen_id.to_string(),
            entries: self.entries.lock().unwrap().clone(),
            generated_at: t0(),
        })
    }
}

#[derive(Default)]
struct FakeStore {
    fail: bool,
    downloads: AtomicU32,
}

#[async_trait]
impl MediaStore for FakeStore {
    async fn resolve(&self, content_ref: &str) -> Result<SignedUrl, KioskError> {
        Ok(SignedUrl {
            content_ref: content_ref.to_string(),
            url: format!("https://cdn.example/{content_ref}"),
            expires_at: t0() + chrono::Duration::hours(1),
        })
    }

    async fn download(&self, url: &SignedUrl) -> Result<Vec<u8>, KioskError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(KioskError::Prefetch {
                content_ref: url.content_ref.clone(),
                reason: "http 503".into(),
            });
        }
        Ok(PNG.to_vec())
    }
}

#[derive(Default)]
struct FakeSurface {
    binds: Mutex<Vec<u64>>,
    idles: Mutex<Vec<IdleScreen>>,
    overlays: Mutex<Vec<Option<String>>>,
}

impl FakeSurface {
    fn binds(&self) -> Vec<u64> {
        self.binds.lock().unwrap().clone()
    }

    fn error_overlays(&self) -> usize {
        self.overlays.lock().unwrap().iter().filter(|o| o.is_some()).count()
    }
}

#[async_trait]
impl RenderSurface for FakeSurface {
    async fn bind(&self, media: &LoadedMedia) -> Result<(), KioskError> {
        self.binds.lock().unwrap().push(media.entry_id);
        Ok(())
    }

    async fn sample(&self) -> Result<SurfaceSample, KioskError> {
        Ok(SurfaceSample {
            bitrate_kbps: 800,
            buffer_seconds: 2.0,
            ..Default::default()
        })
    }

    async fn unbind(&self) {}

    async fn show_idle(&self, idle: &IdleScreen) {
        self.idles.lock().unwrap().push(idle.clone());
    }

    async fn show_overlay(&self, message: Option<&str>) {
        self.overlays.lock().unwrap().push(message.map(str::to_owned));
    }
}

#[derive(Default)]
struct RecordingShell {
    locked: AtomicBool,
}

impl KioskShell for RecordingShell {
    fn install_navigation_lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    fn release_navigation_lock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    fn suspend_management_surfaces(&self) {}
}

struct FakeUplink {
    online: watch::Sender<bool>,
    heartbeats: Mutex<Vec<DeviceTelemetrySample>>,
    reports: Mutex<Vec<CommandStatusUpdate>>,
}

impl FakeUplink {
    fn new() -> Self {
        Self {
            online: watch::channel(true).0,
            heartbeats: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
        }
    }

    fn reports(&self) -> Vec<CommandStatusUpdate> {
        self.reports.lock().unwrap().clone()
    }

    fn last_heartbeat(&self) -> Option<DeviceTelemetrySample> {
        self.heartbeats.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Uplink for FakeUplink {
    async fn heartbeat(&self, sample: &DeviceTelemetrySample) -> Result<(), KioskError> {
        self.heartbeats.lock().unwrap().push(sample.clone());
        Ok(())
    }

    async fn report(&self, update: &CommandStatusUpdate) -> Result<(), KioskError> {
        self.reports.lock().unwrap().push(update.clone());
        Ok(())
    }

    fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

// ── Rig ──────────────────────────────────────────────────────────

struct Rig {
    handle: RuntimeHandle,
    clock: ManualClock,
    source: Arc<FakeSource>,
    store: Arc<FakeStore>,
    surface: Arc<FakeSurface>,
    shell: Arc<RecordingShell>,
    uplink: Arc<FakeUplink>,
    commands: mpsc::Sender<RemoteCommand>,
    task: JoinHandle<Result<(), KioskError>>,
    _dir: tempfile::TempDir,
}

impl Rig {
    async fn start(entries: Vec<ScheduleEntry>, store: FakeStore, state: KioskRuntimeState) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let clock = ManualClock::new(t0());
        let shared_clock: SharedClock = Arc::new(clock.clone());

        let store = Arc::new(store);
        let surface = Arc::new(FakeSurface::default());
        let shell = Arc::new(RecordingShell::default());
        let uplink = Arc::new(FakeUplink::new());
        let (command_tx, commands) = mpsc::channel(8);

        let state_store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::with_state(state));
        let controller = ModeController::load(state_store, LockoutPolicy::default()).await;
        let source = Arc::new(FakeSource {
            entries: Mutex::new(entries),
        });
        let config = PrefetchConfig {
            max_attempts: 2,
            retry_backoff: Duration::from_millis(10),
            ..Default::default()
        };

        let parts = RuntimeParts {
            controller,
            poller: SchedulePoller::new(source.clone(), "lobby", Duration::from_secs(1)),
            cache: AssetCache::open(&cache_dir, 1024 * 1024).await.unwrap(),
            prefetcher: Prefetcher::new(store.clone(), shared_clock.clone(), &cache_dir, config),
            engine: PlaybackEngine::new(surface.clone(), Duration::from_millis(250)),
            surface: surface.clone(),
            shell: shell.clone(),
            system: Arc::new(UnsupportedSystemActions),
            collector: TelemetryCollector::new("dev-1", "lobby", dir.path()),
            uplink: uplink.clone(),
            commands,
            clock: shared_clock,
        };
        let mut runtime_config = RuntimeConfig::new("dev-1", "https://signage.example");
        runtime_config.poll_interval = Duration::from_secs(5);
        runtime_config.heartbeat_interval = Duration::from_secs(10);
        runtime_config.report_timeout = Duration::from_secs(1);

        let (runtime, handle) = KioskRuntime::new(runtime_config, parts);
        let task = tokio::spawn(runtime.run());

        Self {
            handle,
            clock,
            source,
            store,
            surface,
            shell,
            uplink,
            commands: command_tx,
            task,
            _dir: dir,
        }
    }

    /// Replace what the schedule source serves from the next poll on.
    fn publish(&self, entries: Vec<ScheduleEntry>) {
        *self.source.entries.lock().unwrap() = entries;
    }

    /// Let at least one runtime tick pass, then read the status.
    async fn tick(&self) -> RuntimeStatus {
        tokio::time::sleep(Duration::from_millis(1100)).await;
        self.handle.status().await.unwrap()
    }

    async fn wait_until(&self, pred: impl Fn(&RuntimeStatus) -> bool) -> RuntimeStatus {
        for _ in 0..100 {
            let status = self.handle.status().await.unwrap();
            if pred(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached: {:?}", self.handle.status().await.unwrap());
    }

    async fn wait_for_reports(&self, n: usize) -> Vec<CommandStatusUpdate> {
        for _ in 0..100 {
            let reports = self.uplink.reports();
            if reports.len() >= n {
                return reports;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("only {} command reports", self.uplink.reports().len());
    }

    async fn stop(self) {
        self.handle.shutdown();
        self.task.await.unwrap().unwrap();
    }
}

fn admin_state() -> KioskRuntimeState {
    KioskRuntimeState {
        mode: Mode::Admin,
        ..Default::default()
    }
}

// ── Scenarios ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn current_and_next_content_follow_the_clock() {
    let rig = Rig::start(vec![image(1, 60, 30)], FakeStore::default(), Default::default()).await;

    let status = rig
        .wait_until(|s| s.slot_state(1) == Some(SlotState::Cached))
        .await;
    assert!(status.current.is_none());
    assert!(!status.schedule_stale);

    rig.clock.set(t0() + secs(59));
    let status = rig.tick().await;
    assert!(status.current.is_none());
    assert_eq!(status.next.as_ref().map(|e| e.id), Some(1));
    match &status.presentation {
        Presentation::Idle(idle) => {
            assert_eq!(idle.booking_url, "https://signage.example/screen/lobby");
            assert_eq!(idle.next_entry, Some((1, t0() + secs(60))));
        }
        other => panic!("expected idle screen, got {other:?}"),
    }

    rig.clock.set(t0() + secs(65));
    let status = rig.tick().await;
    assert_eq!(status.current.as_ref().map(|e| e.id), Some(1));
    assert_eq!(status.presentation, Presentation::Playing { entry_id: 1 });
    assert_eq!(status.slot_state(1), Some(SlotState::Playing));
    assert_eq!(status.playback.playback_state, PlaybackState::Playing);
    assert_eq!(rig.surface.binds(), [1]);

    rig.clock.set(t0() + secs(91));
    let status = rig.tick().await;
    assert!(status.current.is_none());
    assert_eq!(status.slot_state(1), Some(SlotState::Completed));
    assert!(matches!(status.presentation, Presentation::Idle(_)));

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn wrong_pin_is_denied_and_right_pin_enters_admin() {
    let rig = Rig::start(Vec::new(), FakeStore::default(), admin_state()).await;

    rig.handle.admin(AdminOp::SetPin("1234".into())).await.unwrap();
    let outcome = rig.handle.request_switch(Mode::Display, None).await.unwrap();
    assert_eq!(
        outcome,
        SwitchOutcome::Switched {
            from: Mode::Admin,
            to: Mode::Display
        }
    );
    assert!(rig.shell.locked.load(Ordering::SeqCst));

    let err = rig
        .handle
        .request_switch(Mode::Admin, Some("0000"))
        .await
        .unwrap_err();
    assert!(matches!(err, KioskError::TransitionDenied(_)));
    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.mode, Mode::Display);
    let last = status.audit.last().unwrap();
    assert_eq!(last.kind, AuditKind::PinFailure);
    assert!(!last.granted);

    // Operator controls are closed outside Admin Mode.
    let err = rig.handle.admin(AdminOp::ClearPin).await.unwrap_err();
    assert!(matches!(err, KioskError::NotPermitted(_)));

    rig.handle
        .request_switch(Mode::Admin, Some("1234"))
        .await
        .unwrap();
    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.mode, Mode::Admin);
    assert_eq!(status.presentation, Presentation::Admin);
    assert!(!rig.shell.locked.load(Ordering::SeqCst));

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn scheduled_revert_forces_display_without_pin() {
    let rig = Rig::start(Vec::new(), FakeStore::default(), admin_state()).await;
    rig.handle.admin(AdminOp::SetPin("1234".into())).await.unwrap();
    rig.handle
        .admin(AdminOp::ScheduleRevert(t0() + secs(10)))
        .await
        .unwrap();

    rig.clock.set(t0() + secs(9));
    assert_eq!(rig.tick().await.mode, Mode::Admin);

    rig.clock.set(t0() + secs(10));
    let status = rig.tick().await;
    assert_eq!(status.mode, Mode::Display);
    assert_eq!(status.view.scheduled_mode_switch, None);
    assert!(status.view.pin_configured);
    assert!(rig.shell.locked.load(Ordering::SeqCst));

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_prefetch_skips_slot_and_shows_idle() {
    let store = FakeStore {
        fail: true,
        ..Default::default()
    };
    let rig = Rig::start(vec![image(1, 60, 30)], store, Default::default()).await;

    for _ in 0..100 {
        if rig.store.downloads.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(rig.store.downloads.load(Ordering::SeqCst) >= 2);
    let status = rig.tick().await;
    assert_eq!(status.slot_state(1), Some(SlotState::Pending));

    rig.clock.set(t0() + secs(60));
    let status = rig.tick().await;
    assert_eq!(status.slot_state(1), Some(SlotState::Skipped));
    assert!(matches!(status.presentation, Presentation::Idle(_)));
    assert_ne!(status.playback.playback_state, PlaybackState::Error);
    assert_eq!(rig.surface.error_overlays(), 0);
    assert!(rig.surface.binds().is_empty());

    // The failure reaches the monitoring side.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let beat = rig.uplink.last_heartbeat().unwrap();
    assert!(beat.last_error.unwrap().contains("entry 1"));

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shared_content_is_fetched_once() {
    let booked = |id, offset| {
        ScheduleEntry::new(id, "same-ad", MediaType::Image, t0() + secs(offset), Some(30))
    };
    let rig = Rig::start(
        vec![booked(1, 60), booked(2, 120), booked(3, 180)],
        FakeStore::default(),
        Default::default(),
    )
    .await;

    let status = rig
        .wait_until(|s| s.slots.iter().all(|(_, state)| *state == SlotState::Cached))
        .await;
    assert_eq!(status.slots.len(), 3);
    assert_eq!(status.cached_assets, 1);
    assert_eq!(rig.store.downloads.load(Ordering::SeqCst), 1);
    assert!(status.last_error.is_none());

    rig.clock.set(t0() + secs(65));
    assert_eq!(rig.tick().await.presentation, Presentation::Playing { entry_id: 1 });
    rig.clock.set(t0() + secs(125));
    let status = rig.tick().await;
    assert_eq!(status.presentation, Presentation::Playing { entry_id: 2 });
    assert_eq!(status.slot_state(1), Some(SlotState::Completed));
    assert_eq!(rig.surface.binds(), [1, 2]);
    assert_eq!(rig.store.downloads.load(Ordering::SeqCst), 1);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rescheduled_slot_plays_in_its_new_window() {
    let rig = Rig::start(vec![image(1, 60, 30)], FakeStore::default(), Default::default()).await;
    rig.wait_until(|s| s.slot_state(1) == Some(SlotState::Cached))
        .await;

    rig.clock.set(t0() + secs(65));
    assert_eq!(rig.tick().await.presentation, Presentation::Playing { entry_id: 1 });

    // Moved an hour later while on screen.
    rig.publish(vec![image(1, 3600, 30)]);
    let status = rig
        .wait_until(|s| s.next.as_ref().is_some_and(|e| e.scheduled_time == t0() + secs(3600)))
        .await;
    assert_eq!(status.slot_state(1), Some(SlotState::Cached));
    assert!(matches!(status.presentation, Presentation::Idle(_)));
    assert_ne!(status.playback.playback_state, PlaybackState::Playing);

    // Later ticks inside the old window leave it alone.
    rig.clock.set(t0() + secs(80));
    assert_eq!(rig.tick().await.slot_state(1), Some(SlotState::Cached));

    rig.clock.set(t0() + secs(3605));
    let status = rig.tick().await;
    assert_eq!(status.presentation, Presentation::Playing { entry_id: 1 });
    assert_eq!(status.slot_state(1), Some(SlotState::Playing));
    assert_eq!(rig.surface.binds(), [1, 1]);

    rig.clock.set(t0() + secs(3631));
    assert_eq!(rig.tick().await.slot_state(1), Some(SlotState::Completed));

    rig.stop().await;
}

// ── Commands, input, connectivity ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn remote_commands_run_once_and_report_back() {
    let rig = Rig::start(Vec::new(), FakeStore::default(), Default::default()).await;

    let stop = RemoteCommand::new(1, "dev-1", "lobby", "stop_broadcast");
    rig.commands.send(stop.clone()).await.unwrap();
    let reports = rig.wait_for_reports(1).await;
    assert_eq!(reports[0].command_id, 1);
    assert_eq!(reports[0].status, CommandStatus::Executed);
    assert!(!rig.handle.status().await.unwrap().broadcasting);

    // Redelivery is acknowledged but not executed again.
    rig.commands
        .send(RemoteCommand::new(2, "dev-1", "lobby", "start_broadcast"))
        .await
        .unwrap();
    rig.wait_for_reports(2).await;
    rig.commands.send(stop).await.unwrap();
    let reports = rig.wait_for_reports(3).await;
    assert_eq!(reports[2].command_id, 1);
    assert_eq!(reports[2].status, CommandStatus::Executed);
    assert!(rig.handle.status().await.unwrap().broadcasting);

    rig.commands
        .send(RemoteCommand::new(3, "dev-1", "lobby", "restart"))
        .await
        .unwrap();
    rig.commands
        .send(RemoteCommand::new(4, "dev-1", "lobby", "warp_drive"))
        .await
        .unwrap();
    let reports = rig.wait_for_reports(5).await;
    assert_eq!(reports[3].status, CommandStatus::Failed);
    assert!(reports[3].reason.as_deref().unwrap().contains("restart unsupported"));
    assert_eq!(reports[4].status, CommandStatus::Failed);
    assert!(reports[4].reason.as_deref().unwrap().contains("warp_drive"));

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn key_sequence_grants_audited_emergency_access() {
    let rig = Rig::start(Vec::new(), FakeStore::default(), admin_state()).await;
    rig.handle.admin(AdminOp::SetPin("1234".into())).await.unwrap();
    rig.handle.request_switch(Mode::Display, None).await.unwrap();

    let chord = Modifiers::CTRL | Modifiers::SHIFT;
    let mut last = None;
    for key in "ADMIN".chars() {
        last = rig
            .handle
            .input(InputEvent::Key {
                key,
                modifiers: chord,
                at: tokio::time::Instant::now(),
            })
            .await
            .unwrap();
    }
    assert_eq!(last, Some(InputSignal::EmergencyAccess));

    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.mode, Mode::Admin);
    assert_eq!(status.emergency_activations, 1);
    let emergency: Vec<_> = status
        .audit
        .iter()
        .filter(|r| r.kind == AuditKind::EmergencyAccess)
        .collect();
    assert_eq!(emergency.len(), 1);
    assert!(emergency[0].granted);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let beat = rig.uplink.last_heartbeat().unwrap();
    assert_eq!(beat.mode, Mode::Admin);
    assert_eq!(beat.emergency_activations, 1);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn hidden_taps_reveal_affordance_without_switching() {
    let rig = Rig::start(Vec::new(), FakeStore::default(), Default::default()).await;

    let mut signals = Vec::new();
    for _ in 0..5 {
        let signal = rig
            .handle
            .input(InputEvent::Tap {
                hidden_region: true,
                at: tokio::time::Instant::now(),
            })
            .await
            .unwrap();
        signals.push(signal);
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    assert_eq!(signals[4], Some(InputSignal::RevealAdminAffordance));
    assert!(signals[..4].iter().all(Option::is_none));
    assert_eq!(rig.handle.status().await.unwrap().mode, Mode::Display);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn going_offline_keeps_playing_and_marks_idle_screen() {
    let rig = Rig::start(vec![image(1, 60, 30)], FakeStore::default(), Default::default()).await;
    rig.wait_until(|s| s.slot_state(1) == Some(SlotState::Cached))
        .await;

    rig.uplink.online.send_replace(false);
    let status = rig.tick().await;
    assert!(!status.online);
    match &status.presentation {
        Presentation::Idle(idle) => assert!(idle.offline),
        other => panic!("expected idle screen, got {other:?}"),
    }

    // Cached content still plays at its start time.
    rig.clock.set(t0() + secs(60));
    let status = rig.tick().await;
    assert_eq!(status.presentation, Presentation::Playing { entry_id: 1 });

    rig.stop().await;
}
