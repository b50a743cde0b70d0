//! Builds heartbeat samples from runtime state and host metrics.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sysinfo::{Disks, System};

use crate::mode::Mode;
use crate::protocol::{DeviceStatus, DeviceTelemetrySample, PlaybackMetrics};

/// Runtime-side inputs for one sample.
#[derive(Debug, Clone, Default)]
pub struct SampleContext {
    pub status: DeviceStatus,
    pub mode: Mode,
    pub playback: PlaybackMetrics,
    pub schedule_stale: bool,
    pub emergency_activations: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemLoad {
    pub cpu: f32,
    pub memory: f32,
    pub storage: f32,
}

pub struct TelemetryCollector {
    device_id: String,
    screen_id: String,
    storage_path: PathBuf,
    system: System,
}

impl std::fmt::Debug for TelemetryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCollector")
            .field("device_id", &self.device_id)
            .field("storage_path", &self.storage_path)
            .finish()
    }
}

impl TelemetryCollector {
    /// `storage_path` selects the disk whose usage is reported (the
    /// cache directory's volume).
    pub fn new(device_id: impl Into<String>, screen_id: impl Into<String>, storage_path: impl Into<PathBuf>) -> Self {
        Self {
            device_id: device_id.into(),
            screen_id: screen_id.into(),
            storage_path: storage_path.into(),
            system: System::new(),
        }
    }

    /// Utilization percentages in `0.0..=100.0`.
    pub fn system_load(&mut self) -> SystemLoad {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpu = self.system.global_cpu_info().cpu_usage();
        let total = self.system.total_memory();
        let memory = if total > 0 {
            self.system.used_memory() as f32 / total as f32 * 100.0
        } else {
            0.0
        };

        SystemLoad {
            cpu,
            memory,
            storage: storage_utilization(&self.storage_path),
        }
    }

    pub fn sample(&mut self, ctx: SampleContext, now: DateTime<Utc>) -> DeviceTelemetrySample {
        let load = self.system_load();
        DeviceTelemetrySample {
            device_id: self.device_id.clone(),
            screen_id: self.screen_id.clone(),
            status: ctx.status,
            mode: ctx.mode,
            signal_strength: None,
            cpu_utilization: load.cpu,
            memory_utilization: load.memory,
            storage_utilization: load.storage,
            last_heartbeat_at: now,
            playback: ctx.playback,
            schedule_stale: ctx.schedule_stale,
            emergency_activations: ctx.emergency_activations,
            last_error: ctx.last_error,
        }
    }
}

/// Usage of the volume with the longest mount point containing `path`.
fn storage_utilization(path: &Path) -> f32 {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| {
            let total = d.total_space();
            if total == 0 {
                return 0.0;
            }
            let used = total.saturating_sub(d.available_space());
            used as f32 / total as f32 * 100.0
        })
        .unwrap_or(0.0)
}
