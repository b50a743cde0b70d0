//! Device mode and the security state that guards it.
//!
//! [`KioskRuntimeState`] is the single owned copy of everything that
//! must survive a reboot. Only the [`ModeController`] mutates it; other
//! components read a [`KioskView`] published over a `watch` channel.

mod controller;
mod shell;
mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use controller::{KioskView, ModeController, SwitchOutcome};
pub use shell::{KioskShell, NoopShell};
pub use store::{FileStateStore, MemoryStateStore, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Unattended public playback. Fail-safe default.
    #[default]
    Display,
    Admin,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Display => f.write_str("display"),
            Mode::Admin => f.write_str("admin"),
        }
    }
}

/// Persisted security settings.
///
/// The PIN is kept as a hex blake3 digest, never in clear text.
/// Comparing two `blake3::Hash` values is constant-time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSecurityState {
    access_pin: Option<String>,
    pub scheduled_mode_switch: Option<DateTime<Utc>>,
    pub emergency_access_enabled: bool,
}

impl Default for DeviceSecurityState {
    fn default() -> Self {
        Self {
            access_pin: None,
            scheduled_mode_switch: None,
            emergency_access_enabled: true,
        }
    }
}

impl DeviceSecurityState {
    pub fn has_pin(&self) -> bool {
        self.access_pin.is_some()
    }

    /// Exact, case-sensitive comparison. No trimming.
    pub fn pin_matches(&self, candidate: &str) -> bool {
        let Some(stored) = &self.access_pin else {
            return false;
        };
        match blake3::Hash::from_hex(stored) {
            Ok(stored) => stored == blake3::hash(candidate.as_bytes()),
            Err(_) => false,
        }
    }

    pub(crate) fn set_pin(&mut self, pin: &str) {
        self.access_pin = Some(blake3::hash(pin.as_bytes()).to_hex().to_string());
    }

    pub(crate) fn clear_pin(&mut self) {
        self.access_pin = None;
    }

    /// Clear the PIN and any pending auto-revert.
    pub(crate) fn reset(&mut self) {
        self.access_pin = None;
        self.scheduled_mode_switch = None;
    }
}

/// Everything that persists across reboots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskRuntimeState {
    pub mode: Mode,
    pub security: DeviceSecurityState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_display_and_unsecured() {
        let state = KioskRuntimeState::default();
        assert_eq!(state.mode, Mode::Display);
        assert!(!state.security.has_pin());
        assert!(state.security.emergency_access_enabled);
    }

    #[test]
    fn pin_comparison_is_exact() {
        let mut security = DeviceSecurityState::default();
        security.set_pin("1234");

        assert!(security.pin_matches("1234"));
        assert!(!security.pin_matches("1234 "));
        assert!(!security.pin_matches(" 1234"));
        assert!(!security.pin_matches("0000"));
        assert!(!security.pin_matches(""));
    }

    #[test]
    fn pin_is_case_sensitive() {
        let mut security = DeviceSecurityState::default();
        security.set_pin("AbC9");
        assert!(security.pin_matches("AbC9"));
        assert!(!security.pin_matches("abc9"));
    }

    #[test]
    fn pin_is_not_stored_in_clear() {
        let mut state = KioskRuntimeState::default();
        state.security.set_pin("4321");
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("4321"));
    }

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Admin).unwrap(), "\"admin\"");
        let state: KioskRuntimeState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.mode, Mode::Display);
    }

    #[test]
    fn reset_keeps_emergency_setting() {
        let mut security = DeviceSecurityState {
            emergency_access_enabled: false,
            ..Default::default()
        };
        security.set_pin("1");
        security.scheduled_mode_switch = Some(Utc::now());
        security.reset();
        assert!(!security.has_pin());
        assert!(security.scheduled_mode_switch.is_none());
        assert!(!security.emergency_access_enabled);
    }
}
