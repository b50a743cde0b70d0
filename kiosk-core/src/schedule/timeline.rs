//! Normalized, time-ordered view of a fetched schedule.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::protocol::{ScheduleEntry, ScheduleSnapshot};

/// One admitted entry with its resolved end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub entry: ScheduleEntry,
    /// `None` only for the last open-ended image.
    pub end: Option<DateTime<Utc>>,
}

impl Slot {
    pub fn start(&self) -> DateTime<Utc> {
        self.entry.scheduled_time
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start() <= now && self.end.is_none_or(|end| now < end)
    }
}

/// Non-overlapping slots for one screen, sorted by start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    screen_id: String,
    slots: Vec<Slot>,
}

impl Timeline {
    pub fn empty(screen_id: impl Into<String>) -> Self {
        Self {
            screen_id: screen_id.into(),
            slots: Vec::new(),
        }
    }

    /// Sort, validate, and de-overlap a snapshot.
    ///
    /// - Video and audio without a duration, and zero-length entries, are
    ///   dropped.
    /// - An image without a duration runs until the next entry starts.
    /// - On overlap the earlier-starting entry wins (ties: lower id).
    pub fn build(snapshot: ScheduleSnapshot) -> Self {
        let mut entries = snapshot.entries;
        entries.sort_by_key(|e| (e.scheduled_time, e.id));

        let mut slots: Vec<Slot> = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.duration_seconds {
                Some(0) => {
                    warn!(entry_id = entry.id, "dropping zero-length entry");
                    continue;
                }
                None if entry.media_type.is_finite() => {
                    warn!(entry_id = entry.id, media = ?entry.media_type, "dropping entry without duration");
                    continue;
                }
                _ => {}
            }

            if let Some(prev) = slots.last_mut() {
                let overlaps = match prev.end {
                    Some(end) => entry.scheduled_time < end,
                    None => entry.scheduled_time == prev.start(),
                };
                if overlaps {
                    warn!(
                        entry_id = entry.id,
                        kept = prev.entry.id,
                        "dropping overlapping entry"
                    );
                    continue;
                }
                if prev.end.is_none() {
                    prev.end = Some(entry.scheduled_time);
                }
            }

            let end = entry.end_time();
            slots.push(Slot { entry, end });
        }

        Self {
            screen_id: snapshot.screen_id,
            slots,
        }
    }

    pub fn screen_id(&self) -> &str {
        &self.screen_id
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, entry_id: u64) -> Option<&Slot> {
        self.slots.iter().find(|s| s.entry.id == entry_id)
    }

    /// The slot whose window contains `now`.
    pub fn current_slot(&self, now: DateTime<Utc>) -> Option<&Slot> {
        let idx = self.slots.partition_point(|s| s.start() <= now);
        idx.checked_sub(1)
            .map(|i| &self.slots[i])
            .filter(|s| s.contains(now))
    }

    pub fn current_at(&self, now: DateTime<Utc>) -> Option<&ScheduleEntry> {
        self.current_slot(now).map(|s| &s.entry)
    }

    /// First entry starting strictly after `now`.
    pub fn next_at(&self, now: DateTime<Utc>) -> Option<&ScheduleEntry> {
        let idx = self.slots.partition_point(|s| s.start() <= now);
        self.slots.get(idx).map(|s| &s.entry)
    }

    /// Slots that are active at `now` or start within `horizon`.
    pub fn upcoming(&self, now: DateTime<Utc>, horizon: DateTime<Utc>) -> impl Iterator<Item = &Slot> {
        self.slots
            .iter()
            .filter(move |s| s.start() <= horizon && s.end.is_none_or(|end| end > now))
    }
}
