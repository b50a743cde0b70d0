mod connection;
mod link;

pub use connection::{Connection, ConnectionInfo, ConnectionSender, DEFAULT_KEEPALIVE};
pub use link::HubLink;
