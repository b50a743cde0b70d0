//! PIN gate for mode transitions.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::mode::{DeviceSecurityState, Mode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approved,
    Denied(String),
    /// A PIN must be presented through [`SecurityGate::verify`].
    RequiresInteractiveProof,
}

/// Consecutive-failure lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout: Duration::seconds(60),
        }
    }
}

#[derive(Debug, Default)]
pub struct SecurityGate {
    policy: LockoutPolicy,
    failed_attempts: u32,
    locked_until: Option<DateTime<Utc>>,
}

impl SecurityGate {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            policy,
            failed_attempts: 0,
            locked_until: None,
        }
    }

    pub fn authorize(&self, target: Mode, security: &DeviceSecurityState, now: DateTime<Utc>) -> GateDecision {
        if target == Mode::Display || !security.has_pin() {
            return GateDecision::Approved;
        }
        if let Some(until) = self.locked_until(now) {
            return GateDecision::Denied(format!("too many failed attempts, locked until {until}"));
        }
        GateDecision::RequiresInteractiveProof
    }

    /// Check `candidate` against the stored PIN, counting failures.
    ///
    /// Always `false` while locked out, even for the correct PIN.
    pub fn verify(&mut self, candidate: &str, security: &DeviceSecurityState, now: DateTime<Utc>) -> bool {
        if self.locked_until(now).is_some() {
            return false;
        }

        if security.pin_matches(candidate) {
            self.failed_attempts = 0;
            self.locked_until = None;
            return true;
        }

        self.failed_attempts += 1;
        warn!(attempts = self.failed_attempts, "pin verification failed");
        if self.policy.max_attempts > 0 && self.failed_attempts >= self.policy.max_attempts {
            let until = now + self.policy.lockout;
            warn!(%until, "pin entry locked out");
            self.locked_until = Some(until);
            self.failed_attempts = 0;
        }
        false
    }

    pub fn locked_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.locked_until.filter(|until| now < *until)
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn reset(&mut self) {
        self.failed_attempts = 0;
        self.locked_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secured(pin: &str) -> DeviceSecurityState {
        let mut s = DeviceSecurityState::default();
        s.set_pin(pin);
        s
    }

    #[test]
    fn unsecured_device_approves_admin() {
        let gate = SecurityGate::default();
        let state = DeviceSecurityState::default();
        assert_eq!(gate.authorize(Mode::Admin, &state, Utc::now()), GateDecision::Approved);
    }

    #[test]
    fn display_is_never_gated() {
        let gate = SecurityGate::default();
        assert_eq!(
            gate.authorize(Mode::Display, &secured("1234"), Utc::now()),
            GateDecision::Approved
        );
    }

    #[test]
    fn secured_admin_requires_proof() {
        let gate = SecurityGate::default();
        assert_eq!(
            gate.authorize(Mode::Admin, &secured("1234"), Utc::now()),
            GateDecision::RequiresInteractiveProof
        );
    }

    #[test]
    fn lockout_after_repeated_failures() {
        let mut gate = SecurityGate::new(LockoutPolicy {
            max_attempts: 3,
            lockout: Duration::seconds(30),
        });
        let state = secured("1234");
        let now = Utc::now();

        for _ in 0..3 {
            assert!(!gate.verify("9999", &state, now));
        }
        assert!(matches!(gate.authorize(Mode::Admin, &state, now), GateDecision::Denied(_)));
        assert!(!gate.verify("1234", &state, now + Duration::seconds(10)));

        let later = now + Duration::seconds(31);
        assert_eq!(gate.authorize(Mode::Admin, &state, later), GateDecision::RequiresInteractiveProof);
        assert!(gate.verify("1234", &state, later));
    }

    #[test]
    fn success_resets_failure_count() {
        let mut gate = SecurityGate::default();
        let state = secured("1234");
        let now = Utc::now();
        assert!(!gate.verify("0000", &state, now));
        assert_eq!(gate.failed_attempts(), 1);
        assert!(gate.verify("1234", &state, now));
        assert_eq!(gate.failed_attempts(), 0);
    }
}
