//! Heartbeat-recency presence tracking for monitors.
//!
//! A device is online only while its heartbeats keep arriving; its
//! self-reported status is trusted just as long as it is fresh.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::protocol::{DeviceStatus, DeviceTelemetrySample};

#[derive(Debug, Clone)]
struct Presence {
    last_seen: DateTime<Utc>,
    last_sample: DeviceTelemetrySample,
}

#[derive(Debug)]
pub struct PresenceMonitor {
    devices: HashMap<String, Presence>,
    offline_after: Duration,
}

impl PresenceMonitor {
    pub fn new(offline_after: Duration) -> Self {
        Self {
            devices: HashMap::new(),
            offline_after,
        }
    }

    /// Record a heartbeat received at `received_at`.
    pub fn record(&mut self, sample: DeviceTelemetrySample, received_at: DateTime<Utc>) {
        self.devices.insert(
            sample.device_id.clone(),
            Presence {
                last_seen: received_at,
                last_sample: sample,
            },
        );
    }

    /// Effective status of `device_id` at `now`.
    pub fn status(&self, device_id: &str, now: DateTime<Utc>) -> DeviceStatus {
        match self.devices.get(device_id) {
            Some(p) if now - p.last_seen <= self.offline_after => p.last_sample.status,
            _ => DeviceStatus::Offline,
        }
    }

    pub fn last_sample(&self, device_id: &str) -> Option<&DeviceTelemetrySample> {
        self.devices.get(device_id).map(|p| &p.last_sample)
    }

    pub fn last_seen(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.devices.get(device_id).map(|p| p.last_seen)
    }

    /// `(device_id, status)` for every device ever seen, sorted by id.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<(String, DeviceStatus)> {
        let mut out: Vec<_> = self
            .devices
            .keys()
            .map(|id| (id.clone(), self.status(id, now)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use crate::protocol::PlaybackMetrics;

    fn sample(device: &str, status: DeviceStatus) -> DeviceTelemetrySample {
        DeviceTelemetrySample {
            device_id: device.into(),
            screen_id: "lobby".into(),
            status,
            mode: Mode::Display,
            signal_strength: None,
            cpu_utilization: 0.0,
            memory_utilization: 0.0,
            storage_utilization: 0.0,
            last_heartbeat_at: Utc::now(),
            playback: PlaybackMetrics::default(),
            schedule_stale: false,
            emergency_activations: 0,
            last_error: None,
        }
    }

    #[test]
    fn unknown_device_is_offline() {
        let monitor = PresenceMonitor::new(Duration::seconds(30));
        assert_eq!(monitor.status("ghost", Utc::now()), DeviceStatus::Offline);
    }

    #[test]
    fn stale_heartbeat_overrides_self_report() {
        let mut monitor = PresenceMonitor::new(Duration::seconds(30));
        let t0 = Utc::now();
        monitor.record(sample("dev-1", DeviceStatus::Online), t0);

        assert_eq!(monitor.status("dev-1", t0 + Duration::seconds(10)), DeviceStatus::Online);
        assert_eq!(monitor.status("dev-1", t0 + Duration::seconds(31)), DeviceStatus::Offline);
    }

    #[test]
    fn fresh_error_report_is_kept() {
        let mut monitor = PresenceMonitor::new(Duration::seconds(30));
        let t0 = Utc::now();
        monitor.record(sample("dev-2", DeviceStatus::Error), t0);
        assert_eq!(monitor.snapshot(t0), vec![("dev-2".to_string(), DeviceStatus::Error)]);
    }

    #[test]
    fn snapshot_is_ordered_by_device_id() {
        let mut monitor = PresenceMonitor::new(Duration::seconds(30));
        let t0 = Utc::now();
        monitor.record(sample("dev-c", DeviceStatus::Online), t0);
        monitor.record(sample("dev-a", DeviceStatus::Error), t0 - Duration::seconds(60));
        monitor.record(sample("dev-b", DeviceStatus::Online), t0);

        assert_eq!(
            monitor.snapshot(t0),
            vec![
                ("dev-a".to_string(), DeviceStatus::Offline),
                ("dev-b".to_string(), DeviceStatus::Online),
                ("dev-c".to_string(), DeviceStatus::Online),
            ]
        );
    }
}
