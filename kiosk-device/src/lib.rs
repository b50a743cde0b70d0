//! # kiosk-device
//!
//! The process that runs on a signage display. It loads a TOML
//! configuration, assembles the [`kiosk_core::KioskRuntime`] with a
//! headless render surface and host system actions, and keeps the link
//! to the hub alive with exponential backoff.
//!
//! ## Modes
//!
//! - **Service**: run in the foreground until Ctrl-C.
//! - **Console**: additionally read operator commands from stdin (`--console`).

pub mod config;
pub mod console;
pub mod service;
pub mod surface;
pub mod system;
