//! Per-screen schedules served to devices.
//!
//! The catalog is a JSON file:
//!
//! ```json
//! { "screens": { "lobby": [
//!     { "id": 1, "content_ref": "ad-1", "media_type": "Image",
//!       "scheduled_time": "2025-06-01T09:00:00Z", "duration_seconds": 30 }
//! ] } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use kiosk_core::KioskError;
use kiosk_core::protocol::{ScheduleEntry, ScheduleSnapshot};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub screens: BTreeMap<String, Vec<ScheduleEntry>>,
}

impl Catalog {
    pub async fn load(path: &Path) -> Result<Self, KioskError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| KioskError::Other(format!("catalog {}: {e}", path.display())))?;
        let catalog: Catalog = serde_json::from_slice(&raw)?;
        for (screen, entries) in &catalog.screens {
            warn_overlaps(screen, entries);
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, screen_id: impl Into<String>, entry: ScheduleEntry) {
        self.screens.entry(screen_id.into()).or_default().push(entry);
    }

    /// Entries for `screen_id` that have not finished by `now`, in start
    /// order.
    pub fn snapshot(&self, screen_id: &str, now: DateTime<Utc>) -> Result<ScheduleSnapshot, String> {
        let entries = self
            .screens
            .get(screen_id)
            .ok_or_else(|| format!("unknown screen {screen_id}"))?;
        let mut live: Vec<ScheduleEntry> = entries
            .iter()
            .filter(|e| e.end_time().is_none_or(|end| end > now))
            .cloned()
            .collect();
        live.sort_by_key(|e| (e.scheduled_time, e.id));
        Ok(ScheduleSnapshot {
            screen_id: screen_id.to_string(),
            entries: live,
            generated_at: now,
        })
    }

    /// Whether any screen schedules `content_ref`.
    pub fn knows_content(&self, content_ref: &str) -> bool {
        self.screens
            .values()
            .flatten()
            .any(|e| e.content_ref == content_ref)
    }

    pub fn screen_count(&self) -> usize {
        self.screens.len()
    }
}

fn warn_overlaps(screen: &str, entries: &[ScheduleEntry]) {
    let mut sorted: Vec<&ScheduleEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.scheduled_time);
    for pair in sorted.windows(2) {
        if let Some(end) = pair[0].end_time() {
            if end > pair[1].scheduled_time {
                warn!(
                    screen,
                    earlier = pair[0].id,
                    later = pair[1].id,
                    "overlapping entries; devices keep the earlier one"
                );
            }
        }
    }
}
