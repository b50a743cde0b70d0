//! Playback engine: binds cached assets to the render surface and
//! streams metrics while they play.
//!
//! ```text
//!  Idle ──load──► Loading ──ok──► (loaded) ──play──► Playing ──end──► Stopped
//!                    │                                   │
//!                    └──────────err──────────► Error ◄───┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::KioskError;
use crate::player::{LoadedMedia, MediaFormat, RenderSurface};
use crate::protocol::{PlaybackMetrics, PlaybackState, ScheduleEntry};

pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Completed { entry_id: u64 },
    Failed { entry_id: u64, error: String },
}

struct Session {
    entry_id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PlaybackEngine {
    surface: Arc<dyn RenderSurface>,
    metrics: watch::Sender<PlaybackMetrics>,
    events_tx: mpsc::UnboundedSender<PlaybackEvent>,
    events_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    loaded: Option<LoadedMedia>,
    session: Option<Session>,
    metrics_interval: Duration,
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("state", &self.state())
            .field("entry", &self.current_entry())
            .finish()
    }
}

impl PlaybackEngine {
    pub fn new(surface: Arc<dyn RenderSurface>, metrics_interval: Duration) -> Self {
        let (metrics, _) = watch::channel(PlaybackMetrics::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            surface,
            metrics,
            events_tx,
            events_rx,
            loaded: None,
            session: None,
            metrics_interval,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.metrics.borrow().playback_state
    }

    pub fn metrics(&self) -> PlaybackMetrics {
        self.metrics.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackMetrics> {
        self.metrics.subscribe()
    }

    /// Entry currently loaded or playing.
    pub fn current_entry(&self) -> Option<u64> {
        self.loaded.as_ref().map(|m| m.entry_id)
    }

    pub fn is_playing(&self) -> bool {
        self.session.is_some()
    }

    /// Detect the format of `bytes` and bind them to the surface.
    ///
    /// Fails with [`KioskError::Load`] for unknown formats, a format that
    /// does not match the entry's media type, or a surface bind error.
    pub async fn load(
        &mut self,
        entry: &ScheduleEntry,
        bytes: Bytes,
        play_for: Option<Duration>,
    ) -> Result<(), KioskError> {
        self.stop().await;
        self.publish(entry.id, PlaybackState::Loading, None);

        let format = match MediaFormat::sniff(&bytes) {
            Some(format) if format.media_type() == entry.media_type => format,
            Some(format) => {
                return Err(self
                    .load_failed(entry.id, format!("expected {:?}, found {format}", entry.media_type))
                    .await);
            }
            None => {
                return Err(self.load_failed(entry.id, "unsupported or corrupt media".into()).await);
            }
        };

        let media = LoadedMedia {
            entry_id: entry.id,
            content_ref: entry.content_ref.clone(),
            format,
            bytes,
            play_for,
        };
        if let Err(e) = self.surface.bind(&media).await {
            return Err(self.load_failed(entry.id, e.to_string()).await);
        }
        self.surface.show_overlay(None).await;
        debug!(entry_id = entry.id, %format, "media loaded");
        self.loaded = Some(media);
        Ok(())
    }

    /// Start playing what was loaded. Playing again is a no-op.
    pub async fn play(&mut self) -> Result<(), KioskError> {
        if self.session.is_some() {
            return Ok(());
        }
        let Some(media) = &self.loaded else {
            return Err(KioskError::Playback("nothing loaded".into()));
        };

        let entry_id = media.entry_id;
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_playback(
            Arc::clone(&self.surface),
            self.metrics.clone(),
            self.events_tx.clone(),
            entry_id,
            media.play_for,
            self.metrics_interval,
            token.clone(),
        ));
        self.publish(entry_id, PlaybackState::Playing, None);
        info!(entry_id, "playback started");
        self.session = Some(Session {
            entry_id,
            token,
            handle,
        });
        Ok(())
    }

    /// Halt playback and release the surface. Safe to call at any time;
    /// without anything loaded it changes nothing.
    pub async fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.token.cancel();
            // The task only awaits the surface; make sure it is gone
            // before the next bind.
            session.handle.abort();
            debug!(entry_id = session.entry_id, "playback stopped");
        }
        let Some(media) = self.loaded.take() else {
            return;
        };
        self.surface.unbind().await;
        if self.state() != PlaybackState::Error {
            self.publish(media.entry_id, PlaybackState::Stopped, None);
        }
    }

    /// Mark the session finished after a completion/failure event so a
    /// later `stop` does not report it again.
    pub fn acknowledge(&mut self, event: &PlaybackEvent) {
        let id = match event {
            PlaybackEvent::Completed { entry_id } | PlaybackEvent::Failed { entry_id, .. } => *entry_id,
        };
        if self.session.as_ref().is_some_and(|s| s.entry_id == id) {
            self.session = None;
        }
    }

    pub async fn next_event(&mut self) -> Option<PlaybackEvent> {
        self.events_rx.recv().await
    }

    async fn load_failed(&mut self, entry_id: u64, reason: String) -> KioskError {
        warn!(entry_id, "load failed: {reason}");
        self.publish(entry_id, PlaybackState::Error, Some(format!("load: {reason}")));
        self.surface.show_overlay(Some("Content unavailable")).await;
        KioskError::Load(reason)
    }

    fn publish(&self, entry_id: u64, state: PlaybackState, error: Option<String>) {
        self.metrics.send_modify(|m| {
            m.entry_id = Some(entry_id);
            m.playback_state = state;
            m.error_code = error;
            if state != PlaybackState::Playing {
                m.bitrate_kbps = 0;
                m.buffer_seconds = 0.0;
            }
        });
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.token.cancel();
            session.handle.abort();
        }
    }
}

async fn run_playback(
    surface: Arc<dyn RenderSurface>,
    metrics: watch::Sender<PlaybackMetrics>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    entry_id: u64,
    play_for: Option<Duration>,
    interval: Duration,
    token: CancellationToken,
) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let sample = match surface.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(entry_id, "playback failed: {e}");
                metrics.send_modify(|m| {
                    m.playback_state = PlaybackState::Error;
                    m.error_code = Some(e.to_string());
                    m.bitrate_kbps = 0;
                });
                surface.show_overlay(Some("Playback error")).await;
                let _ = events.send(PlaybackEvent::Failed {
                    entry_id,
                    error: e.to_string(),
                });
                return;
            }
        };

        metrics.send_modify(|m| {
            m.entry_id = Some(entry_id);
            m.playback_state = PlaybackState::Playing;
            m.bitrate_kbps = sample.bitrate_kbps;
            m.buffer_seconds = sample.buffer_seconds;
            m.dropped_frames = m.dropped_frames.saturating_add(sample.dropped_frames);
            m.error_code = None;
        });

        let elapsed_out = play_for.is_some_and(|d| started.elapsed() >= d);
        if sample.ended || elapsed_out {
            info!(entry_id, "playback completed");
            metrics.send_modify(|m| m.playback_state = PlaybackState::Stopped);
            let _ = events.send(PlaybackEvent::Completed { entry_id });
            return;
        }
    }
}
