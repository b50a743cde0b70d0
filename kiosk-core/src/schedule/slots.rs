//! Per-slot lifecycle.
//!
//! ```text
//!  Pending ──► Cached ──► Playing ──► Completed
//!     │                      │
//!     ▼                      ▼
//!  Skipped                 Error
//! ```
//!
//! `Skipped` happens when the slot starts before its asset is cached.
//! A slot that reached `Error` is not retried within its window.
//! Rescheduling a `Playing` slot takes it off the air: back to `Cached`
//! when only the time moved, `Pending` when the content changed.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::KioskError;
use crate::schedule::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Pending,
    Cached,
    Playing,
    Completed,
    Skipped,
    Error,
}

impl SlotState {
    pub fn can_transition_to(self, next: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Pending, Cached)
                | (Pending, Skipped)
                | (Cached, Playing)
                | (Playing, Completed)
                | (Playing, Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SlotState::Completed | SlotState::Skipped | SlotState::Error)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
struct SlotRecord {
    state: SlotState,
    scheduled_time: DateTime<Utc>,
    content_ref: String,
}

/// What changed when a new timeline was applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<u64>,
    pub removed: Vec<u64>,
    /// Same id, new start time or new content.
    pub rescheduled: Vec<u64>,
    /// Rescheduled slots that were playing; playback must stop.
    pub interrupted: Vec<u64>,
}

impl SyncReport {
    /// Entries whose in-flight prefetch must be cancelled.
    pub fn invalidated(&self) -> impl Iterator<Item = u64> + '_ {
        self.removed.iter().chain(self.rescheduled.iter()).copied()
    }
}

#[derive(Debug, Default)]
pub struct SlotBook {
    slots: HashMap<u64, SlotRecord>,
}

impl SlotBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Align the book with `timeline`.
    pub fn sync(&mut self, timeline: &Timeline) -> SyncReport {
        let mut report = SyncReport::default();

        let live: std::collections::HashSet<u64> =
            timeline.slots().iter().map(|s| s.entry.id).collect();
        self.slots.retain(|id, _| {
            let keep = live.contains(id);
            if !keep {
                report.removed.push(*id);
            }
            keep
        });

        for slot in timeline.slots() {
            let entry = &slot.entry;
            match self.slots.get_mut(&entry.id) {
                None => {
                    self.slots.insert(
                        entry.id,
                        SlotRecord {
                            state: SlotState::Pending,
                            scheduled_time: entry.scheduled_time,
                            content_ref: entry.content_ref.clone(),
                        },
                    );
                    report.added.push(entry.id);
                }
                Some(record) => {
                    let content_changed = record.content_ref != entry.content_ref;
                    let time_changed = record.scheduled_time != entry.scheduled_time;
                    if !content_changed && !time_changed {
                        continue;
                    }
                    debug!(entry_id = entry.id, "slot rescheduled");
                    record.scheduled_time = entry.scheduled_time;
                    record.content_ref = entry.content_ref.clone();
                    // A new window or new bytes starts the lifecycle over.
                    // Bytes already on disk stay usable for the new window.
                    let was_playing = record.state == SlotState::Playing;
                    record.state = match record.state {
                        SlotState::Cached | SlotState::Playing if !content_changed => SlotState::Cached,
                        _ => SlotState::Pending,
                    };
                    if was_playing {
                        report.interrupted.push(entry.id);
                    }
                    report.rescheduled.push(entry.id);
                }
            }
        }

        report.removed.sort_unstable();
        report.added.sort_unstable();
        report.interrupted.sort_unstable();
        report
    }

    pub fn state(&self, entry_id: u64) -> Option<SlotState> {
        self.slots.get(&entry_id).map(|r| r.state)
    }

    pub fn pending(&self) -> impl Iterator<Item = u64> + '_ {
        self.slots
            .iter()
            .filter(|(_, r)| r.state == SlotState::Pending)
            .map(|(id, _)| *id)
    }

    pub fn mark_cached(&mut self, entry_id: u64) -> Result<(), KioskError> {
        self.transition(entry_id, SlotState::Cached)
    }

    pub fn start(&mut self, entry_id: u64) -> Result<(), KioskError> {
        self.transition(entry_id, SlotState::Playing)
    }

    pub fn complete(&mut self, entry_id: u64) -> Result<(), KioskError> {
        self.transition(entry_id, SlotState::Completed)
    }

    pub fn fail(&mut self, entry_id: u64) -> Result<(), KioskError> {
        self.transition(entry_id, SlotState::Error)
    }

    /// Skip every pending slot that has already started. Returns the ids.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<u64> {
        let mut skipped: Vec<u64> = self
            .slots
            .iter_mut()
            .filter(|(_, r)| r.state == SlotState::Pending && r.scheduled_time <= now)
            .map(|(id, r)| {
                r.state = SlotState::Skipped;
                *id
            })
            .collect();
        skipped.sort_unstable();
        for id in &skipped {
            warn!(entry_id = id, "slot skipped: asset not cached before start");
        }
        skipped
    }

    /// Send cached slots whose asset is no longer on disk back to
    /// `Pending`. Returns the ids.
    pub fn revalidate(&mut self, is_cached: impl Fn(&str) -> bool) -> Vec<u64> {
        let mut reverted: Vec<u64> = self
            .slots
            .iter_mut()
            .filter(|(_, r)| r.state == SlotState::Cached && !is_cached(&r.content_ref))
            .map(|(id, r)| {
                r.state = SlotState::Pending;
                *id
            })
            .collect();
        reverted.sort_unstable();
        if !reverted.is_empty() {
            debug!(?reverted, "cached slots lost their asset");
        }
        reverted
    }

    /// All slots and their states, ordered by id.
    pub fn states(&self) -> Vec<(u64, SlotState)> {
        let mut states: Vec<_> = self.slots.iter().map(|(id, r)| (*id, r.state)).collect();
        states.sort_unstable_by_key(|(id, _)| *id);
        states
    }

    fn transition(&mut self, entry_id: u64, next: SlotState) -> Result<(), KioskError> {
        let record = self
            .slots
            .get_mut(&entry_id)
            .ok_or_else(|| KioskError::Other(format!("unknown slot {entry_id}")))?;
        if !record.state.can_transition_to(next) {
            return Err(KioskError::Other(format!(
                "slot {entry_id}: {} -> {next} not allowed",
                record.state
            )));
        }
        record.state = next;
        Ok(())
    }
}
