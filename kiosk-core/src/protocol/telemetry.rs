//! Telemetry payloads: heartbeat sample and playback metrics.
//!
//! ```text
//! Device ──[Heartbeat]──────────► Hub   (one-way, periodic)
//!   Payload: DeviceTelemetrySample
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Command;
use crate::mode::Mode;
use crate::protocol::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceStatus {
    #[default]
    Online,
    Offline,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Stopped,
    Error,
}

/// Point-in-time metrics from the playback engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaybackMetrics {
    pub bitrate_kbps: u32,
    pub buffer_seconds: f32,
    pub dropped_frames: u32,
    pub playback_state: PlaybackState,
    pub error_code: Option<String>,
    /// Schedule entry currently bound to the surface.
    pub entry_id: Option<u64>,
}

impl PlaybackMetrics {
    pub fn is_error(&self) -> bool {
        self.playback_state == PlaybackState::Error
    }
}

/// Health snapshot reported with every heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetrySample {
    pub device_id: String,
    pub screen_id: String,
    pub status: DeviceStatus,
    pub mode: Mode,
    /// Link quality in dBm, when the platform exposes it.
    pub signal_strength: Option<i32>,
    pub cpu_utilization: f32,
    pub memory_utilization: f32,
    pub storage_utilization: f32,
    pub last_heartbeat_at: DateTime<Utc>,
    pub playback: PlaybackMetrics,
    /// The schedule is being served from a stale snapshot.
    pub schedule_stale: bool,
    /// Emergency-access activations since boot.
    pub emergency_activations: u32,
    /// Most recent non-fatal failure (prefetch, persistence, ...).
    pub last_error: Option<String>,
}

impl Payload for DeviceTelemetrySample {
    const COMMAND: Command = Command::Heartbeat;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_survives_bincode() {
        let sample = DeviceTelemetrySample {
            device_id: "dev-1".into(),
            screen_id: "lobby".into(),
            status: DeviceStatus::Online,
            mode: Mode::Display,
            signal_strength: Some(-61),
            cpu_utilization: 12.5,
            memory_utilization: 40.0,
            storage_utilization: 71.2,
            last_heartbeat_at: Utc::now(),
            playback: PlaybackMetrics {
                playback_state: PlaybackState::Error,
                error_code: Some("decode".into()),
                ..Default::default()
            },
            schedule_stale: true,
            emergency_activations: 1,
            last_error: None,
        };
        let back = DeviceTelemetrySample::from_bytes(&sample.to_bytes().unwrap()).unwrap();
        assert_eq!(back, sample);
        assert!(back.playback.is_error());
    }
}
