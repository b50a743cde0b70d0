//! Configuration for the kiosk device service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kiosk_core::{InputPatternConfig, LockoutPolicy, Modifiers, PrefetchConfig, RuntimeConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub hub: HubSection,
    pub schedule: ScheduleSection,
    pub cache: CacheSection,
    pub security: SecuritySection,
    pub telemetry: TelemetrySection,
    pub logging: LoggingConfig,
}

/// Identity and local paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub device_id: String,
    pub screen_id: String,
    /// Origin of the booking site shown on the idle screen.
    pub booking_origin: String,
    /// Where mode and security state persist across reboots.
    pub state_path: PathBuf,
    /// Shell command run for the `reboot` remote command. Empty disables it.
    pub reboot_command: String,
}

/// Hub connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub address: String,
    pub port: u16,
    pub request_timeout_ms: u64,
    /// First reconnect delay; doubles up to `reconnect_max_ms`.
    pub reconnect_backoff_ms: u64,
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub poll_interval_secs: u64,
    pub poll_timeout_ms: u64,
    /// How far ahead slots are prefetched.
    pub lookahead_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub directory: PathBuf,
    pub capacity_bytes: u64,
    pub fetch_timeout_ms: u64,
    pub max_fetch_attempts: u32,
}

/// Concealed access paths and PIN lockout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub tap_threshold: u32,
    pub tap_window_ms: u64,
    pub sequence: String,
    /// Modifier chord held while typing the sequence, e.g. `"ctrl+shift"`.
    pub sequence_modifiers: String,
    pub sequence_window_ms: u64,
    pub emergency_sequence_enabled: bool,
    pub max_pin_attempts: u32,
    pub lockout_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub heartbeat_interval_secs: u64,
    pub metrics_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            device_id: "kiosk-001".into(),
            screen_id: "lobby".into(),
            booking_origin: "https://signage.example".into(),
            state_path: PathBuf::from("kiosk-state.json"),
            reboot_command: String::new(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 7440,
            request_timeout_ms: 5_000,
            reconnect_backoff_ms: 1_000,
            reconnect_max_ms: 60_000,
        }
    }
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            poll_timeout_ms: 5_000,
            lookahead_secs: 15 * 60,
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("kiosk-cache"),
            capacity_bytes: 2 * 1024 * 1024 * 1024,
            fetch_timeout_ms: 30_000,
            max_fetch_attempts: 3,
        }
    }
}

impl Default for SecuritySection {
    fn default() -> Self {
        let input = InputPatternConfig::default();
        let lockout = LockoutPolicy::default();
        Self {
            tap_threshold: input.tap_threshold,
            tap_window_ms: input.tap_window.as_millis() as u64,
            sequence: input.sequence,
            sequence_modifiers: "ctrl+shift".into(),
            sequence_window_ms: input.sequence_window.as_millis() as u64,
            emergency_sequence_enabled: input.sequence_enabled,
            max_pin_attempts: lockout.max_attempts,
            lockout_secs: lockout.lockout.num_seconds(),
        }
    }
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            metrics_interval_ms: 1_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl DeviceConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.hub.request_timeout_ms.max(100))
    }

    pub fn to_runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::new(&self.device.device_id, &self.device.booking_origin);
        config.poll_interval = Duration::from_secs(self.schedule.poll_interval_secs.max(1));
        config.heartbeat_interval = Duration::from_secs(self.telemetry.heartbeat_interval_secs.max(1));
        config.report_timeout = self.request_timeout();
        config.input = self.to_input_config();
        config
    }

    pub fn to_input_config(&self) -> InputPatternConfig {
        let s = &self.security;
        InputPatternConfig {
            tap_threshold: s.tap_threshold.max(1),
            tap_window: Duration::from_millis(s.tap_window_ms),
            sequence: s.sequence.clone(),
            sequence_modifiers: parse_modifiers(&s.sequence_modifiers),
            sequence_window: Duration::from_millis(s.sequence_window_ms),
            sequence_enabled: s.emergency_sequence_enabled,
        }
    }

    pub fn to_lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_attempts: self.security.max_pin_attempts.max(1),
            lockout: chrono::Duration::seconds(self.security.lockout_secs.max(0)),
        }
    }

    pub fn to_prefetch_config(&self) -> PrefetchConfig {
        PrefetchConfig {
            lookahead: chrono::Duration::seconds(self.schedule.lookahead_secs as i64),
            max_attempts: self.cache.max_fetch_attempts.max(1),
            fetch_timeout: Duration::from_millis(self.cache.fetch_timeout_ms),
            ..PrefetchConfig::default()
        }
    }
}

/// `"ctrl+shift"` → `CTRL | SHIFT`. Unknown names are ignored with a warning.
pub fn parse_modifiers(text: &str) -> Modifiers {
    text.split('+')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .fold(Modifiers::empty(), |acc, name| {
            match Modifiers::from_names([name]) {
                Some(flag) => acc | flag,
                None => {
                    tracing::warn!("unknown modifier {name:?} ignored");
                    acc
                }
            }
        })
}

// ── Tests ────────────────────────────────────────────────────────
