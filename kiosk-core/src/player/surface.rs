use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::KioskError;
use crate::player::MediaFormat;
use crate::protocol::ScheduleEntry;

/// A cached asset after format detection, ready to bind.
#[derive(Debug, Clone)]
pub struct LoadedMedia {
    pub entry_id: u64,
    pub content_ref: String,
    pub format: MediaFormat,
    pub bytes: Bytes,
    /// How long to play; `None` until stopped.
    pub play_for: Option<Duration>,
}

/// One progress report from the surface while media is on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SurfaceSample {
    pub bitrate_kbps: u32,
    pub buffer_seconds: f32,
    pub dropped_frames: u32,
    /// The media reached its natural end.
    pub ended: bool,
}

/// The thing pixels (or samples) actually go to.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Bind media. An error here is a load failure.
    async fn bind(&self, media: &LoadedMedia) -> Result<(), KioskError>;

    /// Poll playback progress. An error here is a playback failure.
    async fn sample(&self) -> Result<SurfaceSample, KioskError>;

    async fn unbind(&self);

    async fn show_idle(&self, idle: &IdleScreen);

    /// Minimal error overlay; `None` hides it.
    async fn show_overlay(&self, message: Option<&str>);
}

/// Viewer-facing booking target for a screen.
pub fn booking_url(origin: &str, screen_id: &str) -> String {
    format!("{}/screen/{}", origin.trim_end_matches('/'), screen_id)
}

/// What the screen shows when nothing is scheduled or playable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleScreen {
    pub screen_id: String,
    /// Encoded as a scannable code by the surface.
    pub booking_url: String,
    pub next_entry: Option<(u64, DateTime<Utc>)>,
    pub offline: bool,
}

impl IdleScreen {
    pub fn new(origin: &str, screen_id: &str) -> Self {
        Self {
            screen_id: screen_id.to_string(),
            booking_url: booking_url(origin, screen_id),
            next_entry: None,
            offline: false,
        }
    }

    pub fn with_next(mut self, next: Option<&ScheduleEntry>) -> Self {
        self.next_entry = next.map(|e| (e.id, e.scheduled_time));
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MediaType;

    #[test]
    fn booking_url_is_origin_screen_path() {
        assert_eq!(
            booking_url("https://signage.example/", "lobby-3"),
            "https://signage.example/screen/lobby-3"
        );
    }

    #[test]
    fn idle_screen_shows_next_entry_time() {
        let at = Utc::now();
        let next = ScheduleEntry::new(4, "ad-4", MediaType::Image, at, Some(5));
        let idle = IdleScreen::new("https://signage.example", "lobby").with_next(Some(&next));
        assert_eq!(idle.next_entry, Some((4, at)));
        assert!(!idle.offline);
    }
}
