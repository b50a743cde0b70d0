//! Schedule polling with stale-snapshot fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::KioskError;
use crate::network::HubLink;
use crate::protocol::{ScheduleRequest, ScheduleSnapshot};
use crate::schedule::Timeline;

/// Where schedules come from.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// An empty `entries` list means "no bookings", not an error.
    async fn fetch_schedule(&self, screen_id: &str) -> Result<ScheduleSnapshot, KioskError>;
}

#[async_trait]
impl ScheduleSource for HubLink {
    async fn fetch_schedule(&self, screen_id: &str) -> Result<ScheduleSnapshot, KioskError> {
        let request = ScheduleRequest {
            screen_id: screen_id.to_string(),
        };
        self.request(&request)
            .await
            .map_err(|e| KioskError::ScheduleSourceUnreachable(e.to_string()))
    }
}

pub struct SchedulePoller {
    source: Arc<dyn ScheduleSource>,
    timeout: Duration,
    timeline: Timeline,
    stale: bool,
    last_success: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for SchedulePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulePoller")
            .field("screen_id", &self.timeline.screen_id())
            .field("slots", &self.timeline.slots().len())
            .field("stale", &self.stale)
            .finish()
    }
}

impl SchedulePoller {
    pub fn new(source: Arc<dyn ScheduleSource>, screen_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            timeline: Timeline::empty(screen_id),
            // Nothing fetched yet.
            stale: true,
            last_success: None,
        }
    }

    /// Fetch once. On success returns whether the timeline changed; on
    /// failure the previous timeline stays in place and is marked stale.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> Result<bool, KioskError> {
        let screen_id = self.timeline.screen_id().to_string();
        let result = match timeout(self.timeout, self.source.fetch_schedule(&screen_id)).await {
            Ok(result) => result,
            Err(_) => Err(KioskError::ScheduleSourceUnreachable(format!(
                "no answer within {:?}",
                self.timeout
            ))),
        };

        let snapshot = match result {
            Ok(snapshot) if snapshot.screen_id == screen_id => snapshot,
            Ok(snapshot) => {
                let err = KioskError::ScheduleSourceUnreachable(format!(
                    "received schedule for screen {}",
                    snapshot.screen_id
                ));
                return Err(self.mark_stale(err));
            }
            Err(e) => return Err(self.mark_stale(e)),
        };

        let timeline = Timeline::build(snapshot);
        let changed = timeline != self.timeline;
        if changed {
            info!(slots = timeline.slots().len(), "schedule updated");
        } else {
            debug!("schedule unchanged");
        }
        self.timeline = timeline;
        self.stale = false;
        self.last_success = Some(now);
        Ok(changed)
    }

    fn mark_stale(&mut self, err: KioskError) -> KioskError {
        warn!(slots = self.timeline.slots().len(), "schedule poll failed, keeping last snapshot: {err}");
        self.stale = true;
        match err {
            KioskError::ScheduleSourceUnreachable(_) => err,
            other => KioskError::ScheduleSourceUnreachable(other.to_string()),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }
}
