pub mod connection;
mod presence;
mod requests;

pub use connection::{ConnectionPhase, LinkEvent, PeerCapabilities};
pub use presence::PresenceMonitor;
pub use requests::{RequestTracker, TrackedRequest};
