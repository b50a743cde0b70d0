//! Domain-specific error types for the kiosk runtime.
//!
//! All fallible operations return `Result<T, KioskError>`.
//! No error in this crate is fatal to the device process: every variant
//! is typed so the runtime can fall back to a safe, visible idle state.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the kiosk runtime and its wire protocol.
#[derive(Debug, Error)]
pub enum KioskError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the `KSK1` magic sequence.
    #[error("invalid magic bytes: expected KSK1")]
    InvalidMagic,

    /// A field in the packet header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The packet payload failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A packet or state transition violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Packet Errors ────────────────────────────────────────────
    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The received frame is shorter or longer than expected.
    #[error("invalid packet length: expected {expected}, got {actual}")]
    InvalidPacketLength { expected: usize, actual: usize },

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The hub link is not connected.
    #[error("not connected to hub")]
    NotConnected,

    /// The peer answered a request with an error response.
    #[error("peer reported error: {0}")]
    Remote(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Runtime Errors ───────────────────────────────────────────
    /// The security gate rejected a mode switch (wrong or absent PIN,
    /// or lockout in effect).
    #[error("transition denied: {0}")]
    TransitionDenied(String),

    /// An operation reserved for Admin Mode was invoked outside it.
    #[error("not permitted outside admin mode: {0}")]
    NotPermitted(&'static str),

    /// A cached asset could not be bound to the render surface.
    #[error("load error: {0}")]
    Load(String),

    /// Playback failed after the asset was loaded.
    #[error("playback error: {0}")]
    Playback(String),

    /// Fetching an upcoming asset into the local cache failed.
    #[error("prefetch of {content_ref} failed: {reason}")]
    Prefetch { content_ref: String, reason: String },

    /// The schedule source could not be reached.
    #[error("schedule source unreachable: {0}")]
    ScheduleSourceUnreachable(String),

    /// A remote command could not be completed.
    #[error("command execution failed: {0}")]
    CommandExecution(String),

    /// Mode or security state could not be written to disk.
    #[error("persistence failure: {0}")]
    Persistence(String),

    // ── Task Errors ─────────────────────────────────────────────
    /// A spawned task failed.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── TaskError ─────────────────────────────────────────────────────

/// Typed error for spawned async tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task exceeded its deadline and was cancelled.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// The task was explicitly cancelled via `CancellationToken`.
    #[error("task was cancelled")]
    Cancelled,

    /// The task's async work returned an I/O error.
    #[error("task I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic task failure with a human-readable message.
    #[error("task failed: {0}")]
    Failed(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for KioskError {
    fn from(s: String) -> Self {
        KioskError::Other(s)
    }
}

impl From<&str> for KioskError {
    fn from(s: &str) -> Self {
        KioskError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for KioskError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        KioskError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for KioskError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        KioskError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for KioskError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        KioskError::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for KioskError {
    fn from(e: serde_json::Error) -> Self {
        KioskError::Encoding(e.to_string())
    }
}
