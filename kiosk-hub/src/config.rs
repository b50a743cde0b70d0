//! Configuration for the kiosk hub.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub network: NetworkConfig,
    pub catalog: CatalogConfig,
    pub presence: PresenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub port: u16,
}

/// Where schedules and media come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON file listing schedule entries per screen.
    pub schedule_file: PathBuf,
    /// Prefix for signed media URLs, e.g. `https://cdn.example/media`
    /// or `file:///srv/media`.
    pub media_base_url: String,
    /// Secret the URL signatures are keyed with.
    pub signing_key: String,
    pub url_lifetime_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// A device with no heartbeat for this long is reported offline.
    pub offline_after_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 7440,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            schedule_file: PathBuf::from("schedule.json"),
            media_base_url: "file:///srv/kiosk/media".into(),
            signing_key: "change-me".into(),
            url_lifetime_secs: 600,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            offline_after_secs: 90,
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

impl HubConfig {
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
}
