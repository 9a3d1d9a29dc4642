//! Message transport below the [`protocol`](crate::protocol) layer.
//!
//! A [`Network`] moves opaque [`Message`]s between this process and
//! connected remotes, honouring each message's [`ChannelType`]. Two
//! implementations are provided:
//!
//! - [`LoopbackNetwork`]: an in-process pair, used by tests and by hosts
//!   that embed a client.
//! - [`UdpNetwork`]: mio-driven UDP with a Hello/Welcome handshake,
//!   heartbeats, and acknowledged, retransmitted, in-order delivery for
//!   reliable channels.

pub mod endpoint;
pub mod loopback;
pub mod message;
pub mod socket;
pub mod udp;

pub use endpoint::Endpoint;
pub use loopback::LoopbackNetwork;
pub use message::Message;
pub use socket::UdpSocket;
pub use udp::{NetworkTiming, UdpNetwork};

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::WireError;

/// Identity of a process on the network, exchanged during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(Uuid);

impl RemoteId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for RemoteId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ChannelType {
    /// Delivered exactly once, in send order.
    #[default]
    ReliableOrdered = 0,
    /// Delivered at most once, in any order.
    UnreliableUnordered = 1,
}

impl TryFrom<u8> for ChannelType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::ReliableOrdered),
            1 => Ok(Self::UnreliableUnordered),
            other => Err(WireError::InvalidDiscriminant {
                name: "ChannelType",
                value: i64::from(other),
            }),
        }
    }
}

/// Something that happened on a [`Network`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Connected(RemoteId),
    Disconnected(RemoteId),
    Message(Message),
}

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote {0} is not connected")]
    NotConnected(RemoteId),

    #[error("timed out")]
    Timeout,

    #[error("malformed frame: {0}")]
    Malformed(#[from] WireError),

    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    #[error("datagram of {len} bytes exceeds the {max} byte limit")]
    DatagramTooLarge { len: usize, max: usize },

    #[error("cannot resolve \"{0}\"")]
    Resolve(String),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),
}

/// A set of connections to remotes.
///
/// Sending is safe from any thread. Inbound traffic is collected by
/// [`poll`](Self::poll), which one thread calls per tick.
pub trait Network: Send + Sync {
    /// This end's identity.
    fn local_id(&self) -> RemoteId;

    fn is_connected(&self, remote: RemoteId) -> bool;

    /// Currently connected remotes.
    fn remotes(&self) -> Vec<RemoteId>;

    /// Queues `message` for delivery to `message.remote()`.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] for an unknown remote,
    /// [`TransportError::DatagramTooLarge`] for an oversized payload, or an
    /// I/O error from the socket.
    fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Waits up to `timeout` for traffic and returns what arrived.
    ///
    /// Inbound messages carry the sender in [`Message::remote`]. `None`
    /// waits until at least one event is available.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the underlying socket fails.
    fn poll(&self, timeout: Option<Duration>) -> Result<Vec<NetworkEvent>, TransportError>;

    /// Drops the connection to `remote`. A [`NetworkEvent::Disconnected`]
    /// follows on the next poll.
    fn disconnect(&self, remote: RemoteId);
}
