//! The kiosk runtime: one owned root that drives every component.
//!
//! ```text
//!  RuntimeHandle ──requests──────┐
//!  HubLink ──────commands/online─┤
//!  poll / tick / heartbeat ──────┼──► KioskRuntime::run (one task)
//!  prefetch + playback events ───┘
//! ```
//!
//! Mode, schedule, cache, and playback are only mutated on the runtime
//! task, so mode transitions apply strictly in arrival order and never
//! interleave.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{AssetCache, CachedAsset, Prefetcher};
use crate::clock::SharedClock;
use crate::error::{KioskError, TaskError};
use crate::mode::{KioskShell, KioskView, Mode, ModeController, SwitchOutcome};
use crate::player::{IdleScreen, PlaybackEngine, PlaybackEvent, RenderSurface};
use crate::protocol::{
    CommandStatusUpdate, DeviceStatus, PlaybackMetrics, RemoteCommand, ScheduleEntry,
};
use crate::schedule::{SchedulePoller, Slot, SlotBook, SlotState};
use crate::security::{AuditRecord, InputEvent, InputPatternConfig, InputPatternMatcher, InputSignal};
use crate::task::TaskEvent;
use crate::telemetry::{
    CommandAction, CommandExecutor, Intake, SampleContext, SystemActions, TelemetryCollector,
    Uplink,
};

const REQUEST_QUEUE: usize = 64;
const STATUS_AUDIT_RECORDS: usize = 32;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub device_id: String,
    /// Origin of the viewer-facing booking site.
    pub booking_origin: String,
    pub poll_interval: Duration,
    /// Granularity of slot and auto-revert checks.
    pub tick_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Bound on heartbeat and command status delivery.
    pub report_timeout: Duration,
    pub input: InputPatternConfig,
}

impl RuntimeConfig {
    pub fn new(device_id: impl Into<String>, booking_origin: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            booking_origin: booking_origin.into(),
            poll_interval: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            report_timeout: Duration::from_secs(5),
            input: InputPatternConfig::default(),
        }
    }
}

/// Collaborators the runtime takes ownership of.
pub struct RuntimeParts {
    pub controller: ModeController,
    pub poller: SchedulePoller,
    pub cache: AssetCache,
    pub prefetcher: Prefetcher,
    pub engine: PlaybackEngine,
    pub surface: Arc<dyn RenderSurface>,
    pub shell: Arc<dyn KioskShell>,
    pub system: Arc<dyn SystemActions>,
    pub collector: TelemetryCollector,
    pub uplink: Arc<dyn Uplink>,
    pub commands: mpsc::Receiver<RemoteCommand>,
    pub clock: SharedClock,
}

/// What the surface was last told to show.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Presentation {
    #[default]
    Blank,
    Idle(IdleScreen),
    Playing { entry_id: u64 },
    /// Admin Mode owns the screen.
    Admin,
}

/// Operator controls reachable from Admin Mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOp {
    SetPin(String),
    ClearPin,
    ScheduleRevert(DateTime<Utc>),
    CancelRevert,
    SetEmergencyAccess(bool),
    ResetSecurity,
    Restart,
    ClearCache,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub mode: Mode,
    pub view: KioskView,
    pub online: bool,
    pub broadcasting: bool,
    pub schedule_stale: bool,
    pub current: Option<ScheduleEntry>,
    pub next: Option<ScheduleEntry>,
    pub presentation: Presentation,
    pub playback: PlaybackMetrics,
    pub slots: Vec<(u64, SlotState)>,
    pub cached_assets: usize,
    pub emergency_activations: u32,
    /// Most recent security audit records, oldest first.
    pub audit: Vec<AuditRecord>,
    pub last_error: Option<String>,
}

impl RuntimeStatus {
    pub fn slot_state(&self, entry_id: u64) -> Option<SlotState> {
        self.slots
            .iter()
            .find(|(id, _)| *id == entry_id)
            .map(|(_, state)| *state)
    }
}

enum Request {
    Switch {
        target: Mode,
        pin: Option<String>,
        reply: oneshot::Sender<Result<SwitchOutcome, KioskError>>,
    },
    Input {
        event: InputEvent,
        reply: oneshot::Sender<Option<InputSignal>>,
    },
    Admin {
        op: AdminOp,
        reply: oneshot::Sender<Result<(), KioskError>>,
    },
    Status {
        reply: oneshot::Sender<RuntimeStatus>,
    },
}

/// Cloneable front door to a running [`KioskRuntime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    requests: mpsc::Sender<Request>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("closed", &self.requests.is_closed())
            .finish()
    }
}

impl RuntimeHandle {
    /// Queue a mode switch. Fails with [`KioskError::TransitionDenied`]
    /// when the gate refuses it.
    pub async fn request_switch(
        &self,
        target: Mode,
        pin: Option<&str>,
    ) -> Result<SwitchOutcome, KioskError> {
        let pin = pin.map(str::to_owned);
        self.call(|reply| Request::Switch { target, pin, reply }).await?
    }

    /// Feed one raw input event to the concealed-access matcher.
    pub async fn input(&self, event: InputEvent) -> Result<Option<InputSignal>, KioskError> {
        self.call(|reply| Request::Input { event, reply }).await
    }

    pub async fn admin(&self, op: AdminOp) -> Result<(), KioskError> {
        self.call(|reply| Request::Admin { op, reply }).await?
    }

    pub async fn status(&self) -> Result<RuntimeStatus, KioskError> {
        self.call(|reply| Request::Status { reply }).await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, KioskError> {
        let (reply, rx) = oneshot::channel();
        self.requests.send(make(reply)).await?;
        Ok(rx.await?)
    }
}

pub struct KioskRuntime {
    config: RuntimeConfig,
    controller: ModeController,
    poller: SchedulePoller,
    book: SlotBook,
    cache: AssetCache,
    prefetcher: Prefetcher,
    engine: PlaybackEngine,
    surface: Arc<dyn RenderSurface>,
    shell: Arc<dyn KioskShell>,
    system: Arc<dyn SystemActions>,
    collector: TelemetryCollector,
    uplink: Arc<dyn Uplink>,
    commands: mpsc::Receiver<RemoteCommand>,
    online: watch::Receiver<bool>,
    executor: CommandExecutor,
    matcher: InputPatternMatcher,
    clock: SharedClock,
    requests: mpsc::Receiver<Request>,
    shutdown: CancellationToken,
    presentation: Presentation,
    broadcasting: bool,
    last_error: Option<String>,
}

impl std::fmt::Debug for KioskRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KioskRuntime")
            .field("device_id", &self.config.device_id)
            .field("mode", &self.controller.mode())
            .field("presentation", &self.presentation)
            .finish()
    }
}

impl KioskRuntime {
    pub fn new(config: RuntimeConfig, parts: RuntimeParts) -> (Self, RuntimeHandle) {
        let (tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let shutdown = CancellationToken::new();
        let online = parts.uplink.subscribe_online();

        let runtime = Self {
            executor: CommandExecutor::new(config.device_id.clone()),
            matcher: InputPatternMatcher::new(&config.input),
            config,
            controller: parts.controller,
            poller: parts.poller,
            book: SlotBook::new(),
            cache: parts.cache,
            prefetcher: parts.prefetcher,
            engine: parts.engine,
            surface: parts.surface,
            shell: parts.shell,
            system: parts.system,
            collector: parts.collector,
            uplink: parts.uplink,
            commands: parts.commands,
            online,
            clock: parts.clock,
            requests,
            shutdown: shutdown.clone(),
            presentation: Presentation::Blank,
            broadcasting: true,
            last_error: None,
        };
        let handle = RuntimeHandle {
            requests: tx,
            shutdown,
        };
        (runtime, handle)
    }

    pub fn subscribe_view(&self) -> watch::Receiver<KioskView> {
        self.controller.subscribe()
    }

    pub fn subscribe_playback(&self) -> watch::Receiver<PlaybackMetrics> {
        self.engine.subscribe()
    }

    /// Drive the runtime until [`RuntimeHandle::shutdown`] is called.
    pub async fn run(mut self) -> Result<(), KioskError> {
        info!(
            device_id = %self.config.device_id,
            screen_id = %self.poller.timeline().screen_id(),
            mode = %self.controller.mode(),
            "kiosk runtime started"
        );
        let mode = self.controller.mode();
        self.enter_mode(mode).await;

        let mut poll = interval(self.config.poll_interval);
        let mut tick = interval(self.config.tick_interval);
        let mut heartbeat = interval(self.config.heartbeat_interval);
        for timer in [&mut poll, &mut tick, &mut heartbeat] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        let mut accepting = true;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                request = self.requests.recv(), if accepting => match request {
                    Some(request) => self.handle_request(request).await,
                    None => accepting = false,
                },
                _ = poll.tick() => {
                    let _ = self.refresh_schedule().await;
                }
                _ = tick.tick() => self.on_tick().await,
                _ = heartbeat.tick() => self.send_heartbeat().await,
                Some(event) = self.prefetcher.next_event() => self.on_prefetch(event).await,
                Some(event) = self.engine.next_event() => self.on_playback(event).await,
                Some(command) = self.commands.recv() => self.on_command(command).await,
                Ok(()) = self.online.changed() => self.on_connectivity().await,
            }
        }

        self.engine.stop().await;
        self.prefetcher.cancel_all();
        info!("kiosk runtime stopped");
        Ok(())
    }

    // ── Mode ─────────────────────────────────────────────────────

    async fn enter_mode(&mut self, mode: Mode) {
        match mode {
            Mode::Display => {
                self.shell.suspend_management_surfaces();
                self.shell.install_navigation_lock();
                self.presentation = Presentation::Blank;
                let now = self.clock.now();
                self.advance(now).await;
            }
            Mode::Admin => {
                self.engine.stop().await;
                self.shell.release_navigation_lock();
                self.surface.show_overlay(None).await;
                self.presentation = Presentation::Admin;
            }
        }
    }

    async fn apply(&mut self, outcome: SwitchOutcome) {
        if let Some(mode) = outcome.entered() {
            self.enter_mode(mode).await;
        }
    }

    fn require_admin(&self, what: &'static str) -> Result<(), KioskError> {
        if self.controller.mode() == Mode::Admin {
            Ok(())
        } else {
            Err(KioskError::NotPermitted(what))
        }
    }

    // ── Requests ─────────────────────────────────────────────────

    async fn handle_request(&mut self, request: Request) {
        let now = self.clock.now();
        match request {
            Request::Switch { target, pin, reply } => {
                let result = self
                    .controller
                    .request_switch(target, pin.as_deref(), now)
                    .await;
                if let Ok(outcome) = &result {
                    self.apply(*outcome).await;
                }
                let _ = reply.send(result);
            }
            Request::Input { event, reply } => {
                let signal = self.matcher.handle(&event);
                if signal == Some(InputSignal::EmergencyAccess) {
                    match self.controller.emergency_access(now).await {
                        Ok(outcome) => self.apply(outcome).await,
                        Err(e) => warn!("emergency access refused: {e}"),
                    }
                }
                let _ = reply.send(signal);
            }
            Request::Admin { op, reply } => {
                let result = self.admin(op, now).await;
                let _ = reply.send(result);
            }
            Request::Status { reply } => {
                let _ = reply.send(self.status(now));
            }
        }
    }

    async fn admin(&mut self, op: AdminOp, now: DateTime<Utc>) -> Result<(), KioskError> {
        match op {
            AdminOp::SetPin(pin) => self.controller.set_pin(&pin, now).await,
            AdminOp::ClearPin => self.controller.clear_pin(now).await,
            AdminOp::ScheduleRevert(at) => self.controller.schedule_revert(at, now).await,
            AdminOp::CancelRevert => self.controller.cancel_revert(now).await,
            AdminOp::SetEmergencyAccess(enabled) => {
                self.controller.set_emergency_access(enabled, now).await
            }
            AdminOp::ResetSecurity => self.controller.reset_security(now).await,
            AdminOp::Restart => {
                self.require_admin("restart")?;
                self.system.reboot().await
            }
            AdminOp::ClearCache => {
                self.require_admin("clear cache")?;
                let removed = self.clear_cache(now).await;
                info!(removed, "cache cleared by operator");
                Ok(())
            }
        }
    }

    fn status(&self, now: DateTime<Utc>) -> RuntimeStatus {
        let timeline = self.poller.timeline();
        RuntimeStatus {
            mode: self.controller.mode(),
            view: self.controller.view(),
            online: *self.online.borrow(),
            broadcasting: self.broadcasting,
            schedule_stale: self.poller.is_stale(),
            current: timeline.current_at(now).cloned(),
            next: timeline.next_at(now).cloned(),
            presentation: self.presentation.clone(),
            playback: self.engine.metrics(),
            slots: self.book.states(),
            cached_assets: self.cache.len(),
            emergency_activations: self.controller.emergency_activations(),
            audit: self.recent_audit(),
            last_error: self.last_error.clone(),
        }
    }

    fn recent_audit(&self) -> Vec<AuditRecord> {
        let audit = self.controller.audit();
        let skip = audit.len().saturating_sub(STATUS_AUDIT_RECORDS);
        audit.iter().skip(skip).cloned().collect()
    }

    // ── Schedule and playback ────────────────────────────────────

    async fn on_tick(&mut self) {
        let now = self.clock.now();
        if let Some(outcome) = self.controller.tick(now).await {
            self.apply(outcome).await;
        }
        self.advance(now).await;
    }

    /// Poll the schedule source and fold the result into the slot book.
    /// Returns the number of slots now known.
    async fn refresh_schedule(&mut self) -> Result<usize, KioskError> {
        let now = self.clock.now();
        let result = self.poller.poll(now).await;
        match &result {
            Ok(true) => {
                let report = self.book.sync(self.poller.timeline());
                for entry_id in report.invalidated() {
                    if self.prefetcher.cancel(entry_id) {
                        debug!(entry_id, "prefetch cancelled");
                    }
                }
                // Stop without completing: the slot plays again in its new window.
                if let Some(playing) = self.engine.current_entry() {
                    if report.interrupted.contains(&playing) {
                        info!(entry_id = playing, "playing slot rescheduled");
                        self.engine.stop().await;
                    }
                }
            }
            Ok(false) => {}
            Err(e) => self.last_error = Some(e.to_string()),
        }
        self.advance(now).await;
        result.map(|_| self.poller.timeline().slots().len())
    }

    /// Prefetch, expire, then decide what the screen shows.
    async fn advance(&mut self, now: DateTime<Utc>) {
        let timeline = self.poller.timeline();
        self.prefetcher
            .plan(timeline, &mut self.book, &self.cache, now);
        self.book.expire(now);

        if self.controller.mode() == Mode::Display && self.broadcasting {
            self.present(now).await;
        }
    }

    async fn present(&mut self, now: DateTime<Utc>) {
        let current = self.poller.timeline().current_slot(now).cloned();

        if let Some(playing) = self.engine.current_entry() {
            if current.as_ref().is_some_and(|slot| slot.entry.id == playing) {
                return;
            }
            debug!(entry_id = playing, "slot no longer current");
            self.engine.stop().await;
            let _ = self.book.complete(playing);
        }

        match current {
            Some(slot) if self.is_playable(&slot) => self.start_slot(slot, now).await,
            _ => self.show_idle(now).await,
        }
    }

    /// Cached, or interrupted mid-window by Admin Mode or a stopped
    /// broadcast.
    fn is_playable(&self, slot: &Slot) -> bool {
        matches!(
            self.book.state(slot.entry.id),
            Some(SlotState::Cached | SlotState::Playing)
        )
    }

    async fn start_slot(&mut self, slot: Slot, now: DateTime<Utc>) {
        let entry = slot.entry;
        let entry_id = entry.id;
        let resuming = self.book.state(entry_id) == Some(SlotState::Playing);
        if !resuming {
            if let Err(e) = self.book.start(entry_id) {
                warn!(entry_id, "cannot start slot: {e}");
                self.show_idle(now).await;
                return;
            }
        }

        let play_for = slot.end.and_then(|end| (end - now).to_std().ok());
        match self.load_slot(&entry, play_for).await {
            Ok(()) => {
                info!(entry_id, content_ref = %entry.content_ref, resuming, "slot on air");
                self.presentation = Presentation::Playing { entry_id };
            }
            Err(e) => {
                let _ = self.book.fail(entry_id);
                self.last_error = Some(format!("entry {entry_id}: {e}"));
                self.engine.stop().await;
                self.show_idle(now).await;
            }
        }
    }

    async fn load_slot(
        &mut self,
        entry: &ScheduleEntry,
        play_for: Option<Duration>,
    ) -> Result<(), KioskError> {
        let asset = self
            .cache
            .get(&entry.content_ref)
            .cloned()
            .ok_or_else(|| KioskError::Load(format!("{} is not cached", entry.content_ref)))?;
        let bytes = match self.cache.read(&asset).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.cache.remove(&entry.content_ref).await;
                return Err(e);
            }
        };
        self.engine.load(entry, Bytes::from(bytes), play_for).await?;
        self.engine.play().await
    }

    async fn show_idle(&mut self, now: DateTime<Utc>) {
        let timeline = self.poller.timeline();
        let idle = IdleScreen::new(&self.config.booking_origin, timeline.screen_id())
            .with_next(timeline.next_at(now))
            .with_offline(!*self.online.borrow());
        if matches!(&self.presentation, Presentation::Idle(shown) if *shown == idle) {
            return;
        }
        self.surface.show_idle(&idle).await;
        self.presentation = Presentation::Idle(idle);
    }

    /// Content refs that must survive eviction: what plays now and what
    /// plays next.
    fn protected_refs(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeline = self.poller.timeline();
        timeline
            .current_at(now)
            .into_iter()
            .chain(timeline.next_at(now))
            .map(|entry| entry.content_ref.clone())
            .collect()
    }

    async fn clear_cache(&mut self, now: DateTime<Utc>) -> usize {
        let protected = self.protected_refs(now);
        let protected: Vec<&str> = protected.iter().map(String::as_str).collect();
        let removed = self.cache.clear(&protected).await;
        let cache = &self.cache;
        self.book.revalidate(|content| cache.contains(content));
        removed
    }

    async fn on_prefetch(&mut self, event: TaskEvent<u64, CachedAsset>) {
        let now = self.clock.now();
        match event {
            TaskEvent::Finished(entry_id, asset) => {
                debug!(entry_id, content_ref = %asset.content_ref, size = asset.size_bytes, "asset fetched");
                let protected = self.protected_refs(now);
                let protected: Vec<&str> = protected.iter().map(String::as_str).collect();
                let evicted = self.cache.admit(asset, &protected).await;
                if !evicted.is_empty() {
                    let cache = &self.cache;
                    self.book.revalidate(|content| cache.contains(content));
                }
                self.advance(now).await;
            }
            TaskEvent::Error(_, TaskError::Cancelled) => {}
            TaskEvent::Error(entry_id, e) => self.prefetcher.record_failure(entry_id, &e, now),
        }
    }

    async fn on_playback(&mut self, event: PlaybackEvent) {
        let entry_id = match &event {
            PlaybackEvent::Completed { entry_id } | PlaybackEvent::Failed { entry_id, .. } => *entry_id,
        };
        if self.engine.current_entry() != Some(entry_id) {
            debug!(entry_id, "ignoring event for unloaded entry");
            return;
        }
        self.engine.acknowledge(&event);

        match event {
            PlaybackEvent::Completed { .. } => {
                let _ = self.book.complete(entry_id);
            }
            PlaybackEvent::Failed { error, .. } => {
                let _ = self.book.fail(entry_id);
                self.last_error = Some(format!("entry {entry_id}: {error}"));
            }
        }
        self.engine.stop().await;
        self.presentation = Presentation::Blank;
        let now = self.clock.now();
        self.advance(now).await;
    }

    // ── Telemetry and commands ───────────────────────────────────

    async fn on_connectivity(&mut self) {
        let online = *self.online.borrow_and_update();
        if online {
            info!("hub reachable");
            let _ = self.refresh_schedule().await;
        } else {
            warn!("hub unreachable, continuing from cache");
            let now = self.clock.now();
            self.advance(now).await;
        }
    }

    async fn send_heartbeat(&mut self) {
        if let Some(e) = self.controller.take_persistence_error() {
            self.last_error = Some(e);
        }
        if let Some(e) = self.prefetcher.take_last_failure() {
            self.last_error = Some(e);
        }
        if !*self.online.borrow() {
            debug!("offline, heartbeat skipped");
            return;
        }

        let now = self.clock.now();
        let playback = self.engine.metrics();
        let status = if playback.is_error() {
            DeviceStatus::Error
        } else {
            DeviceStatus::Online
        };
        let ctx = SampleContext {
            status,
            mode: self.controller.mode(),
            playback,
            schedule_stale: self.poller.is_stale(),
            emergency_activations: self.controller.emergency_activations(),
            last_error: self.last_error.clone(),
        };
        let sample = self.collector.sample(ctx, now);

        match timeout(self.config.report_timeout, self.uplink.heartbeat(&sample)).await {
            Ok(Ok(())) => {
                debug!(status = ?sample.status, "heartbeat sent");
                self.last_error = None;
            }
            Ok(Err(e)) => warn!("heartbeat failed: {e}"),
            Err(_) => warn!("heartbeat timed out"),
        }
    }

    async fn on_command(&mut self, command: RemoteCommand) {
        let update = match self.executor.accept(&command) {
            Intake::Execute { command_id, action } => {
                let outcome = self.execute(action).await;
                self.executor.complete(command_id, outcome)
            }
            Intake::Duplicate(update) | Intake::Rejected(update) => update,
        };
        self.report(&update).await;
    }

    async fn execute(&mut self, action: CommandAction) -> Result<String, KioskError> {
        let now = self.clock.now();
        match action {
            CommandAction::StartBroadcast => {
                self.broadcasting = true;
                self.advance(now).await;
                Ok("broadcast started".into())
            }
            CommandAction::StopBroadcast => {
                self.broadcasting = false;
                self.engine.stop().await;
                if self.controller.mode() == Mode::Display {
                    self.show_idle(now).await;
                }
                Ok("broadcast stopped".into())
            }
            CommandAction::Reboot => {
                self.system.reboot().await?;
                Ok("restart initiated".into())
            }
            CommandAction::ClearCache => {
                let removed = self.clear_cache(now).await;
                Ok(format!("removed {removed} assets"))
            }
            CommandAction::RefreshSchedule => {
                let slots = self
                    .refresh_schedule()
                    .await
                    .map_err(|e| KioskError::CommandExecution(e.to_string()))?;
                Ok(format!("{slots} slots scheduled"))
            }
            CommandAction::SwitchToDisplay => {
                let outcome = self
                    .controller
                    .request_switch(Mode::Display, None, now)
                    .await?;
                self.apply(outcome).await;
                Ok("display mode".into())
            }
        }
    }

    async fn report(&self, update: &CommandStatusUpdate) {
        let command_id = update.command_id;
        match timeout(self.config.report_timeout, self.uplink.report(update)).await {
            Ok(Ok(())) => debug!(command_id, status = %update.status, "command status reported"),
            Ok(Err(e)) => warn!(command_id, "command status not delivered: {e}"),
            Err(_) => warn!(command_id, "command status report timed out"),
        }
    }
}
