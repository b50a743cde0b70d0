//! Schedule and media-resolution payloads.
//!
//! # Wire Protocol
//!
//! ```text
//! Device ──[ScheduleFetch]──────────► Hub
//!   Payload: ScheduleRequest
//! Hub    ──[ScheduleFetch]──────────► Device   (response)
//!   Payload: ScheduleSnapshot
//!
//! Device ──[MediaResolve]───────────► Hub
//!   Payload: MediaResolveRequest
//! Hub    ──[MediaResolve]───────────► Device   (response)
//!   Payload: SignedUrl
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Command;
use crate::protocol::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Image,
    Video,
    Audio,
}

impl MediaType {
    /// Video and audio have a natural length and must carry a duration.
    pub fn is_finite(&self) -> bool {
        matches!(self, MediaType::Video | MediaType::Audio)
    }
}

/// One scheduled broadcast for a screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: u64,
    /// Opaque pointer to a media resource in the media store.
    pub content_ref: String,
    pub media_type: MediaType,
    pub scheduled_time: DateTime<Utc>,
    pub duration_seconds: Option<u32>,
}

impl ScheduleEntry {
    pub fn new(
        id: u64,
        content_ref: impl Into<String>,
        media_type: MediaType,
        scheduled_time: DateTime<Utc>,
        duration_seconds: Option<u32>,
    ) -> Self {
        Self {
            id,
            content_ref: content_ref.into(),
            media_type,
            scheduled_time,
            duration_seconds,
        }
    }

    /// End of the slot, if the entry carries a duration.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.duration_seconds
            .map(|secs| self.scheduled_time + ChronoDuration::seconds(i64::from(secs)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub screen_id: String,
}

impl Payload for ScheduleRequest {
    const COMMAND: Command = Command::ScheduleFetch;
}

/// The schedule as published by the source at `generated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub screen_id: String,
    pub entries: Vec<ScheduleEntry>,
    pub generated_at: DateTime<Utc>,
}

impl Payload for ScheduleSnapshot {
    const COMMAND: Command = Command::ScheduleFetch;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaResolveRequest {
    pub content_ref: String,
}

impl Payload for MediaResolveRequest {
    const COMMAND: Command = Command::MediaResolve;
}

/// A time-boxed authorization to download a content reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    pub content_ref: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    /// `true` if the URL expires within `margin` of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, margin: ChronoDuration) -> bool {
        self.expires_at - margin <= now
    }
}

impl Payload for SignedUrl {
    const COMMAND: Command = Command::MediaResolve;
}
