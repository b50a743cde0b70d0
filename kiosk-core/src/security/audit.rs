//! Bounded in-memory trail of security-relevant events.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    EmergencyAccess,
    PinFailure,
    Lockout,
    ModeSwitch,
    SecurityChange,
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditKind::EmergencyAccess => "emergency_access",
            AuditKind::PinFailure => "pin_failure",
            AuditKind::Lockout => "lockout",
            AuditKind::ModeSwitch => "mode_switch",
            AuditKind::SecurityChange => "security_change",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
    pub granted: bool,
    pub detail: String,
}

#[derive(Debug)]
pub struct AuditLog {
    records: VecDeque<AuditRecord>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Append a record, dropping the oldest once full.
    pub fn record(&mut self, at: DateTime<Utc>, kind: AuditKind, granted: bool, detail: impl Into<String>) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(AuditRecord {
            at,
            kind,
            granted,
            detail: detail.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Granted records of `kind` still in the trail.
    pub fn count(&self, kind: AuditKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind && r.granted).count()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_record_is_dropped_when_full() {
        let mut log = AuditLog::new(2);
        let now = Utc::now();
        log.record(now, AuditKind::PinFailure, false, "first");
        log.record(now, AuditKind::PinFailure, false, "second");
        log.record(now, AuditKind::EmergencyAccess, true, "third");

        let details: Vec<_> = log.iter().map(|r| r.detail.as_str()).collect();
        assert_eq!(details, ["second", "third"]);
        assert_eq!(log.count(AuditKind::EmergencyAccess), 1);
    }
}
