//! Line-oriented operator console on stdin.
//!
//! Lets a technician at the device drive the same paths a touch screen
//! and keyboard would: hidden-region taps, the key sequence, PIN entry,
//! and the Admin Mode controls.
//!
//! ```text
//! tap                      hidden-region tap
//! keys <mods> <sequence>   type a sequence, e.g. `keys ctrl+shift ADMIN`
//! admin [pin]              request Admin Mode
//! display                  return to Display Mode
//! pin set <pin> | pin clear
//! revert <secs> | revert cancel
//! emergency on|off
//! reset-security | restart | clear-cache | status
//! audit                    recent security events
//! ```

use std::fmt::Write as _;

use chrono::Utc;
use kiosk_core::{AdminOp, InputEvent, KioskError, Mode, Modifiers, RuntimeHandle};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::parse_modifiers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Tap,
    Keys { modifiers: Modifiers, sequence: String },
    Switch { target: Mode, pin: Option<String> },
    Admin(AdminRequest),
    Status,
    Audit,
}

/// An [`AdminOp`] whose revert time is still relative to "now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminRequest {
    Op(AdminOp),
    RevertIn(i64),
}

pub fn parse(line: &str) -> Result<ConsoleCommand, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let op = |op: AdminOp| -> Result<ConsoleCommand, String> {
        Ok(ConsoleCommand::Admin(AdminRequest::Op(op)))
    };
    match words.as_slice() {
        ["tap"] => Ok(ConsoleCommand::Tap),
        ["keys", mods, sequence] => Ok(ConsoleCommand::Keys {
            modifiers: parse_modifiers(mods),
            sequence: sequence.to_string(),
        }),
        ["admin"] => Ok(ConsoleCommand::Switch {
            target: Mode::Admin,
            pin: None,
        }),
        ["admin", pin] => Ok(ConsoleCommand::Switch {
            target: Mode::Admin,
            pin: Some(pin.to_string()),
        }),
        ["display"] => Ok(ConsoleCommand::Switch {
            target: Mode::Display,
            pin: None,
        }),
        ["pin", "set", pin] => op(AdminOp::SetPin(pin.to_string())),
        ["pin", "clear"] => op(AdminOp::ClearPin),
        ["revert", "cancel"] => op(AdminOp::CancelRevert),
        ["revert", secs] => secs
            .parse::<i64>()
            .map(|s| ConsoleCommand::Admin(AdminRequest::RevertIn(s)))
            .map_err(|_| format!("not a number of seconds: {secs}")),
        ["emergency", "on"] => op(AdminOp::SetEmergencyAccess(true)),
        ["emergency", "off"] => op(AdminOp::SetEmergencyAccess(false)),
        ["reset-security"] => op(AdminOp::ResetSecurity),
        ["restart"] => op(AdminOp::Restart),
        ["clear-cache"] => op(AdminOp::ClearCache),
        ["status"] => Ok(ConsoleCommand::Status),
        ["audit"] => Ok(ConsoleCommand::Audit),
        [] => Err("empty command".into()),
        _ => Err(format!("unknown command: {line}")),
    }
}

pub async fn execute(handle: &RuntimeHandle, command: ConsoleCommand) -> Result<String, KioskError> {
    match command {
        ConsoleCommand::Tap => {
            let signal = handle
                .input(InputEvent::Tap {
                    hidden_region: true,
                    at: Instant::now(),
                })
                .await?;
            Ok(format!("{signal:?}"))
        }
        ConsoleCommand::Keys {
            modifiers,
            sequence,
        } => {
            let mut last = None;
            for key in sequence.chars() {
                last = handle
                    .input(InputEvent::Key {
                        key,
                        modifiers,
                        at: Instant::now(),
                    })
                    .await?;
            }
            Ok(format!("{last:?}"))
        }
        ConsoleCommand::Switch { target, pin } => {
            let outcome = handle.request_switch(target, pin.as_deref()).await?;
            Ok(format!("{outcome:?}"))
        }
        ConsoleCommand::Admin(request) => {
            let op = match request {
                AdminRequest::Op(op) => op,
                AdminRequest::RevertIn(secs) => {
                    AdminOp::ScheduleRevert(Utc::now() + chrono::Duration::seconds(secs))
                }
            };
            handle.admin(op).await?;
            Ok("ok".into())
        }
        ConsoleCommand::Status => {
            let s = handle.status().await?;
            Ok(format!(
                "mode={} online={} broadcasting={} stale={} current={:?} next={:?} cached={} slots={:?} emergency={} audit={}",
                s.mode,
                s.online,
                s.broadcasting,
                s.schedule_stale,
                s.current.map(|e| e.id),
                s.next.map(|e| e.id),
                s.cached_assets,
                s.slots,
                s.emergency_activations,
                s.audit.len(),
            ))
        }
        ConsoleCommand::Audit => {
            let s = handle.status().await?;
            if s.audit.is_empty() {
                return Ok("no security events".into());
            }
            let mut out = String::new();
            for r in s.audit {
                let _ = write!(
                    out,
                    "\n  {} {:<16} {:<7} {}",
                    r.at.to_rfc3339(),
                    r.kind.to_string(),
                    if r.granted { "granted" } else { "denied" },
                    r.detail
                );
            }
            Ok(out)
        }
    }
}

/// Read commands until EOF or until the runtime goes away.
pub async fn run<R: AsyncRead + Unpin>(handle: RuntimeHandle, input: R) {
    let mut lines = BufReader::new(input).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        match execute(&handle, command).await {
            Ok(reply) => info!("{reply}"),
            Err(KioskError::ChannelClosed) => break,
            Err(e) => warn!("{e}"),
        }
    }
}
