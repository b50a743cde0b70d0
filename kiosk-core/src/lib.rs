//! # kiosk-core
//!
//! Runtime library for unattended digital-signage screens.
//!
//! This crate contains:
//! - **Wire protocol**: `PacketHeader`, `Packet`, `Command`, `MessageType`, `ProtocolFlags`
//! - **Payloads**: schedule, media resolution, telemetry, remote commands, hello
//! - **Codec**: `KioskCodec` for framed TCP I/O via `tokio_util`
//! - **Network**: `Connection` with keepalive and `HubLink` for request/response to the hub
//! - **State**: connection lifecycle, request tracking, heartbeat presence
//! - **Mode / Security**: the Display/Admin state machine, PIN gate, concealed access paths
//! - **Schedule / Cache / Player**: slot resolution, prefetch into a disk cache, playback
//! - **Telemetry**: heartbeat samples and exactly-once remote command execution
//! - **Runtime**: `KioskRuntime`, the single owner wiring all of the above
//! - **Error**: `KioskError`, a typed `thiserror` hierarchy

pub mod cache;
pub mod clock;
pub mod codec;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;
pub mod mode;
pub mod network;
pub mod packet;
pub mod player;
pub mod protocol;
pub mod runtime;
pub mod schedule;
pub mod security;
pub mod state;
pub mod task;
pub mod telemetry;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use cache::{AssetCache, CachedAsset, HubMediaStore, MediaStore, PrefetchConfig, Prefetcher};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use codec::KioskCodec;
pub use error::{KioskError, TaskError};
pub use flags::ProtocolFlags;
pub use header::{HEADER_SIZE, PacketHeader};
pub use message::{Command, MessageType};
pub use mode::{
    DeviceSecurityState, FileStateStore, KioskRuntimeState, KioskShell, KioskView,
    MemoryStateStore, Mode, ModeController, NoopShell, StateStore, SwitchOutcome,
};
pub use network::{Connection, ConnectionInfo, ConnectionSender, HubLink};
pub use packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Packet};
pub use player::{IdleScreen, MediaFormat, PlaybackEngine, PlaybackEvent, RenderSurface};
pub use runtime::{
    AdminOp, KioskRuntime, Presentation, RuntimeConfig, RuntimeHandle, RuntimeParts,
    RuntimeStatus,
};
pub use schedule::{SchedulePoller, ScheduleSource, SlotBook, SlotState, Timeline};
pub use security::{
    AuditKind, AuditLog, AuditRecord, GateDecision, InputEvent, InputPatternConfig, InputPatternMatcher, InputSignal,
    LockoutPolicy, Modifiers, SecurityGate,
};
pub use state::{ConnectionPhase, LinkEvent, PeerCapabilities, PresenceMonitor, TrackedRequest};
pub use task::{TaskEvent, TaskPool};
pub use telemetry::{
    CommandExecutor, SystemActions, TelemetryCollector, UnsupportedSystemActions, Uplink,
};
