use std::fmt;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::KioskCodec;
use crate::packet::Packet;

/// Interval between connection-level keepalive pings.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(5);

pub type ConnectionSender = mpsc::Sender<Packet>;

/// A framed connection to a single peer.
///
/// Reading and writing happen on background tasks; the handle only
/// owns the two channel ends, so dropping it tears everything down.
#[derive(Debug)]
pub struct Connection {
    // Channel to send packets to background writer task
    tx: mpsc::Sender<Packet>,
    // Channel to receive packets from background reader task
    rx: mpsc::Receiver<Packet>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self::with_keepalive(stream, DEFAULT_KEEPALIVE)
    }

    pub fn with_keepalive(stream: TcpStream, keepalive: Duration) -> Self {
        let (mut net_writer, mut net_reader) = Framed::new(stream, KioskCodec).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<Packet>(100);

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel::<Packet>(100);

        // Writer task: User -> Network
        tokio::spawn(async move {
            while let Some(packet) = network_rx.recv().await {
                if let Err(e) = net_writer.send(packet).await {
                    warn!("network write error: {e}");
                    break;
                }
            }
        });

        // Reader task: Network -> User
        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(packet) => {
                        if network_tx.send(packet).await.is_err() {
                            // user_rx was dropped, stop reading
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("network read error: {e}");
                        break;
                    }
                }
            }
            debug!("reader task finished");
        });

        // Keepalive stops as soon as every sender handle is gone.
        let keepalive_tx = user_tx.downgrade();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(keepalive);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(tx) = keepalive_tx.upgrade() else {
                    break;
                };
                if tx.send(Packet::keepalive()).await.is_err() {
                    break;
                }
            }
        });

        Self {
            tx: user_tx,
            rx: user_rx,
        }
    }

    pub async fn connect(conn_info: &ConnectionInfo) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(conn_info.to_socket_string()).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    pub async fn send(&self, packet: Packet) -> Result<(), mpsc::error::SendError<Packet>> {
        self.tx.send(packet).await
    }

    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    pub fn sender(&self) -> ConnectionSender {
        self.tx.clone()
    }

    /// Split into the outbound sender and the inbound receiver.
    pub fn into_parts(self) -> (ConnectionSender, mpsc::Receiver<Packet>) {
        (self.tx, self.rx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    ip: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn to_socket_string(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
