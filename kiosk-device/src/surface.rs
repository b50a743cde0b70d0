//! Headless render surface.
//!
//! Stands in for a real compositor on devices without one (and in
//! bring-up): every presentation change is logged, and the sampled
//! bitrate is derived from the bound asset's size and play window.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kiosk_core::player::{IdleScreen, LoadedMedia, SurfaceSample};
use kiosk_core::{KioskError, RenderSurface};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug)]
struct Bound {
    entry_id: u64,
    bytes: usize,
    play_for: Option<Duration>,
    since: Instant,
}

#[derive(Debug, Default)]
pub struct HeadlessSurface {
    bound: Mutex<Option<Bound>>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry currently bound, if any.
    pub fn bound_entry(&self) -> Option<u64> {
        self.bound
            .lock()
            .ok()
            .and_then(|b| b.as_ref().map(|b| b.entry_id))
    }
}

#[async_trait]
impl RenderSurface for HeadlessSurface {
    async fn bind(&self, media: &LoadedMedia) -> Result<(), KioskError> {
        let mut bound = self
            .bound
            .lock()
            .map_err(|_| KioskError::Load("surface state poisoned".into()))?;
        info!(
            entry_id = media.entry_id,
            content_ref = %media.content_ref,
            format = %media.format,
            bytes = media.bytes.len(),
            "surface bound"
        );
        *bound = Some(Bound {
            entry_id: media.entry_id,
            bytes: media.bytes.len(),
            play_for: media.play_for,
            since: Instant::now(),
        });
        Ok(())
    }

    async fn sample(&self) -> Result<SurfaceSample, KioskError> {
        let bound = self
            .bound
            .lock()
            .map_err(|_| KioskError::Playback("surface state poisoned".into()))?;
        let Some(bound) = bound.as_ref() else {
            return Err(KioskError::Playback("nothing bound".into()));
        };

        let bitrate_kbps = match bound.play_for {
            Some(window) if !window.is_zero() => {
                (bound.bytes as f64 * 8.0 / 1000.0 / window.as_secs_f64()) as u32
            }
            _ => 0,
        };
        let buffer_seconds = bound
            .play_for
            .map(|w| w.saturating_sub(bound.since.elapsed()).as_secs_f32())
            .unwrap_or(0.0);
        Ok(SurfaceSample {
            bitrate_kbps,
            buffer_seconds,
            dropped_frames: 0,
            ended: false,
        })
    }

    async fn unbind(&self) {
        match self.bound.lock() {
            Ok(mut bound) => {
                if let Some(b) = bound.take() {
                    info!(entry_id = b.entry_id, "surface unbound");
                }
            }
            Err(_) => warn!("surface state poisoned on unbind"),
        }
    }

    async fn show_idle(&self, idle: &IdleScreen) {
        match idle.next_entry {
            Some((entry_id, at)) => info!(
                screen_id = %idle.screen_id,
                booking_url = %idle.booking_url,
                next_entry = entry_id,
                next_at = %at,
                offline = idle.offline,
                "idle screen"
            ),
            None => info!(
                screen_id = %idle.screen_id,
                booking_url = %idle.booking_url,
                offline = idle.offline,
                "idle screen, nothing scheduled"
            ),
        }
    }

    async fn show_overlay(&self, message: Option<&str>) {
        if let Some(message) = message {
            warn!("overlay: {message}");
        }
    }
}
