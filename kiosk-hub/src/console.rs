//! Operator console on stdin.
//!
//! ```text
//! devices                              list known devices and presence
//! send <device> <command> [key=value]  queue a remote command
//! commands                             list commands and their status
//! reload                               re-read the schedule catalog
//! ```

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{info, warn};

use crate::hub::HubHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Devices,
    Send {
        device_id: String,
        command: String,
        args: Vec<(String, String)>,
    },
    Commands,
    Reload,
}

pub fn parse(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("devices") => Ok(ConsoleCommand::Devices),
        Some("commands") => Ok(ConsoleCommand::Commands),
        Some("reload") => Ok(ConsoleCommand::Reload),
        Some("send") => {
            let (Some(device_id), Some(command)) = (words.next(), words.next()) else {
                return Err("usage: send <device> <command> [key=value ...]".into());
            };
            let args = words
                .map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .ok_or_else(|| format!("argument {pair:?} is not key=value"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ConsoleCommand::Send {
                device_id: device_id.to_string(),
                command: command.to_string(),
                args,
            })
        }
        Some(other) => Err(format!("unknown command {other:?}")),
        None => Err("empty command".into()),
    }
}

pub async fn execute(handle: &HubHandle, catalog_path: &Path, command: ConsoleCommand) -> String {
    match command {
        ConsoleCommand::Devices => {
            let devices = handle.devices(Utc::now()).await;
            if devices.is_empty() {
                return "no devices".into();
            }
            let mut out = String::new();
            for d in devices {
                let _ = write!(
                    out,
                    "\n  {:<16} {:?}{} mode={} last_seen={}",
                    d.device_id,
                    d.status,
                    if d.connected { "" } else { " (disconnected)" },
                    d.mode.map_or("-".to_string(), |m| format!("{m:?}")),
                    d.last_seen.map_or("never".to_string(), |t| t.to_rfc3339()),
                );
                if let Some(error) = d.last_error {
                    let _ = write!(out, " error={error}");
                }
            }
            out
        }
        ConsoleCommand::Send {
            device_id,
            command,
            args,
        } => {
            let id = handle.send_command(&device_id, &command, args).await;
            format!("command #{id} {command} -> {device_id}")
        }
        ConsoleCommand::Commands => {
            let records = handle.commands().await;
            if records.is_empty() {
                return "no commands".into();
            }
            let mut out = String::new();
            for r in records {
                let _ = write!(
                    out,
                    "\n  #{:<4} {:<16} {:<16} {}",
                    r.command.id, r.command.device_id, r.command.command, r.command.status
                );
                if let Some(detail) = r.reason.or(r.result) {
                    let _ = write!(out, " ({detail})");
                }
            }
            out
        }
        ConsoleCommand::Reload => match handle.reload_catalog(catalog_path).await {
            Ok(screens) => format!("catalog reloaded: {screens} screens"),
            Err(e) => format!("reload failed: {e}"),
        },
    }
}

pub async fn run<R: AsyncRead + Unpin>(handle: HubHandle, catalog_path: PathBuf, input: R) {
    let mut lines = BufReader::new(input).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match parse(&line) {
            Ok(command) => info!("{}", execute(&handle, &catalog_path, command).await),
            Err(e) => warn!("{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_with_arguments() {
        assert_eq!(
            parse("send dev-1 start_broadcast stream=main volume=7").unwrap(),
            ConsoleCommand::Send {
                device_id: "dev-1".into(),
                command: "start_broadcast".into(),
                args: vec![
                    ("stream".into(), "main".into()),
                    ("volume".into(), "7".into())
                ],
            }
        );
        assert_eq!(parse("devices").unwrap(), ConsoleCommand::Devices);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse("send dev-1").is_err());
        assert!(parse("send dev-1 reboot now").is_err());
        assert!(parse("launch").is_err());
    }
}
