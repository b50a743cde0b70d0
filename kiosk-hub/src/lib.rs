//! # kiosk-hub
//!
//! Control point for a fleet of kiosk devices: serves per-screen
//! schedules, signs time-boxed media URLs, tracks heartbeat presence, and
//! delivers remote commands.

pub mod catalog;
pub mod commands;
pub mod config;
pub mod console;
pub mod hub;
pub mod signer;

pub use hub::{DeviceSummary, HubEvent, HubHandle, KioskHub};
