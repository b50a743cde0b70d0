//! Layered protection for the Display → Admin transition: the PIN gate,
//! the concealed input patterns, and an audit trail of their use.

mod audit;
mod gate;
mod input;

pub use audit::{AuditKind, AuditLog, AuditRecord, DEFAULT_AUDIT_CAPACITY};
pub use gate::{GateDecision, LockoutPolicy, SecurityGate};
pub use input::{
    InputEvent, InputPatternConfig, InputPatternMatcher, InputSignal, KeySequence, Modifiers,
    TapCluster,
};
