//! The mode state machine.
//!
//! ```text
//!            request_switch(Admin) + gate approval
//!            emergency_access()
//!   Display ───────────────────────────────────────► Admin
//!      ▲                                               │
//!      └────── request_switch(Display) / auto-revert ──┘
//! ```
//!
//! Down-transitions are never gated. Every change is persisted; a failed
//! write is logged and remembered for telemetry but the in-memory mode
//! still changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::KioskError;
use crate::mode::{DeviceSecurityState, KioskRuntimeState, Mode, StateStore};
use crate::security::{AuditKind, AuditLog, GateDecision, LockoutPolicy, SecurityGate};

/// Read-only projection for presentation layers. Never carries the PIN.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KioskView {
    pub mode: Mode,
    pub pin_configured: bool,
    pub scheduled_mode_switch: Option<DateTime<Utc>>,
    pub emergency_access_enabled: bool,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Unchanged,
    Switched { from: Mode, to: Mode },
}

impl SwitchOutcome {
    pub fn entered(&self) -> Option<Mode> {
        match self {
            SwitchOutcome::Switched { to, .. } => Some(*to),
            SwitchOutcome::Unchanged => None,
        }
    }
}

pub struct ModeController {
    state: KioskRuntimeState,
    gate: SecurityGate,
    audit: AuditLog,
    store: Arc<dyn StateStore>,
    view: watch::Sender<KioskView>,
    persistence_error: Option<String>,
    emergency_activations: u32,
}

impl std::fmt::Debug for ModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeController")
            .field("mode", &self.state.mode)
            .field("pin_configured", &self.state.security.has_pin())
            .finish()
    }
}

impl ModeController {
    /// Restore the last persisted state. Anything unreadable boots into
    /// `Display`.
    pub async fn load(store: Arc<dyn StateStore>, policy: LockoutPolicy) -> Self {
        let state = match store.load().await {
            Ok(Some(state)) => {
                info!(mode = %state.mode, "restored kiosk state");
                state
            }
            Ok(None) => KioskRuntimeState::default(),
            Err(e) => {
                warn!("could not load kiosk state, defaulting to display: {e}");
                KioskRuntimeState::default()
            }
        };
        Self::with_state(state, store, policy)
    }

    pub fn with_state(
        state: KioskRuntimeState,
        store: Arc<dyn StateStore>,
        policy: LockoutPolicy,
    ) -> Self {
        let (view, _) = watch::channel(KioskView::default());
        let controller = Self {
            state,
            gate: SecurityGate::new(policy),
            audit: AuditLog::default(),
            store,
            view,
            persistence_error: None,
            emergency_activations: 0,
        };
        controller.publish(Utc::now());
        controller
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn security(&self) -> &DeviceSecurityState {
        &self.state.security
    }

    pub fn subscribe(&self) -> watch::Receiver<KioskView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> KioskView {
        self.view.borrow().clone()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn emergency_activations(&self) -> u32 {
        self.emergency_activations
    }

    /// Most recent persistence failure, cleared once read.
    pub fn take_persistence_error(&mut self) -> Option<String> {
        self.persistence_error.take()
    }

    pub fn authorize(&self, target: Mode, now: DateTime<Utc>) -> GateDecision {
        self.gate.authorize(target, &self.state.security, now)
    }

    /// Switch to `target`, presenting `pin` if the gate asks for one.
    pub async fn request_switch(
        &mut self,
        target: Mode,
        pin: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SwitchOutcome, KioskError> {
        if target == self.state.mode {
            return Ok(SwitchOutcome::Unchanged);
        }

        match self.gate.authorize(target, &self.state.security, now) {
            GateDecision::Approved => {}
            GateDecision::Denied(reason) => {
                self.audit.record(now, AuditKind::ModeSwitch, false, reason.clone());
                return Err(KioskError::TransitionDenied(reason));
            }
            GateDecision::RequiresInteractiveProof => {
                let Some(candidate) = pin else {
                    return Err(KioskError::TransitionDenied("pin required".into()));
                };
                if !self.gate.verify(candidate, &self.state.security, now) {
                    self.audit.record(now, AuditKind::PinFailure, false, format!("switch to {target}"));
                    let reason = match self.gate.locked_until(now) {
                        Some(until) => {
                            self.audit.record(now, AuditKind::Lockout, false, format!("until {until}"));
                            format!("incorrect pin, locked until {until}")
                        }
                        None => "incorrect pin".to_string(),
                    };
                    self.publish(now);
                    return Err(KioskError::TransitionDenied(reason));
                }
            }
        }

        Ok(self.commit(target, now).await)
    }

    /// Concealed recovery path: unconditional switch to `Admin`.
    ///
    /// Refused only when the deployment disabled it. Every attempt is
    /// audited and logged at `warn`.
    pub async fn emergency_access(&mut self, now: DateTime<Utc>) -> Result<SwitchOutcome, KioskError> {
        if !self.state.security.emergency_access_enabled {
            warn!("emergency access attempted while disabled");
            self.audit.record(now, AuditKind::EmergencyAccess, false, "disabled");
            return Err(KioskError::TransitionDenied("emergency access disabled".into()));
        }

        self.emergency_activations += 1;
        warn!(
            activations = self.emergency_activations,
            pin_configured = self.state.security.has_pin(),
            "emergency access granted"
        );
        self.audit.record(now, AuditKind::EmergencyAccess, true, format!("from {}", self.state.mode));
        Ok(self.commit(Mode::Admin, now).await)
    }

    /// When the scheduled auto-revert has been reached, clear it and force
    /// `Display` without consulting the gate.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Option<SwitchOutcome> {
        let due = self.state.security.scheduled_mode_switch?;
        if now < due {
            return None;
        }

        info!(%due, "scheduled auto-revert reached");
        self.state.security.scheduled_mode_switch = None;
        if self.state.mode == Mode::Display {
            self.persist().await;
            self.publish(now);
            return Some(SwitchOutcome::Unchanged);
        }
        Some(self.commit(Mode::Display, now).await)
    }

    pub fn next_revert(&self) -> Option<DateTime<Utc>> {
        self.state.security.scheduled_mode_switch
    }

    // ── Admin-only operations ─────────────────────────────────────

    pub async fn set_pin(&mut self, pin: &str, now: DateTime<Utc>) -> Result<(), KioskError> {
        self.require_admin("set pin")?;
        if pin.is_empty() {
            return Err(KioskError::Other("pin must not be empty".into()));
        }
        self.state.security.set_pin(pin);
        self.gate.reset();
        self.security_changed(now, "pin set").await;
        Ok(())
    }

    pub async fn clear_pin(&mut self, now: DateTime<Utc>) -> Result<(), KioskError> {
        self.require_admin("clear pin")?;
        self.state.security.clear_pin();
        self.gate.reset();
        self.security_changed(now, "pin cleared").await;
        Ok(())
    }

    pub async fn schedule_revert(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), KioskError> {
        self.require_admin("schedule revert")?;
        if at <= now {
            return Err(KioskError::Other("auto-revert time must be in the future".into()));
        }
        self.state.security.scheduled_mode_switch = Some(at);
        self.security_changed(now, &format!("auto-revert at {at}")).await;
        Ok(())
    }

    pub async fn cancel_revert(&mut self, now: DateTime<Utc>) -> Result<(), KioskError> {
        self.require_admin("cancel revert")?;
        self.state.security.scheduled_mode_switch = None;
        self.security_changed(now, "auto-revert cancelled").await;
        Ok(())
    }

    pub async fn set_emergency_access(&mut self, enabled: bool, now: DateTime<Utc>) -> Result<(), KioskError> {
        self.require_admin("toggle emergency access")?;
        self.state.security.emergency_access_enabled = enabled;
        self.security_changed(now, &format!("emergency access enabled={enabled}")).await;
        Ok(())
    }

    /// Clear the PIN and any scheduled auto-revert.
    pub async fn reset_security(&mut self, now: DateTime<Utc>) -> Result<(), KioskError> {
        self.require_admin("reset security")?;
        self.state.security.reset();
        self.gate.reset();
        self.security_changed(now, "security reset").await;
        Ok(())
    }

    fn require_admin(&self, op: &'static str) -> Result<(), KioskError> {
        match self.state.mode {
            Mode::Admin => Ok(()),
            Mode::Display => Err(KioskError::NotPermitted(op)),
        }
    }

    async fn security_changed(&mut self, now: DateTime<Utc>, detail: &str) {
        info!(detail, "security settings changed");
        self.audit.record(now, AuditKind::SecurityChange, true, detail);
        self.persist().await;
        self.publish(now);
    }

    async fn commit(&mut self, target: Mode, now: DateTime<Utc>) -> SwitchOutcome {
        let from = self.state.mode;
        if from == target {
            return SwitchOutcome::Unchanged;
        }
        self.state.mode = target;
        info!(%from, to = %target, "mode switched");
        self.audit.record(now, AuditKind::ModeSwitch, true, format!("{from} -> {target}"));
        self.persist().await;
        self.publish(now);
        SwitchOutcome::Switched { from, to: target }
    }

    async fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.state).await {
            warn!("failed to persist kiosk state: {e}");
            self.persistence_error = Some(e.to_string());
        }
    }

    fn publish(&self, now: DateTime<Utc>) {
        self.view.send_replace(KioskView {
            mode: self.state.mode,
            pin_configured: self.state.security.has_pin(),
            scheduled_mode_switch: self.state.security.scheduled_mode_switch,
            emergency_access_enabled: self.state.security.emergency_access_enabled,
            locked_until: self.gate.locked_until(now),
        });
    }
}
