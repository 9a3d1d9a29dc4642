//! Datagram framing for [`UdpNetwork`](super::UdpNetwork).
//!
//! Every datagram starts with an 8-byte header:
//!
//! ```text
//! ┌─────────┬────────────┬─────────┬───────────────────────────────────┐
//! │ Type(1) │ Channel(1) │ Len(2)  │ Session ID (4)                    │
//! └─────────┴────────────┴─────────┴───────────────────────────────────┘
//! ```
//!
//! `Len` counts the body bytes after the header. Bodies per type:
//!
//! | Type      | Body |
//! |-----------|------|
//! | DATA      | `[seq:4][payload]` |
//! | ACK       | `[next_expected:4]` |
//! | HEARTBEAT | empty |
//! | HELLO     | `[remote_id:16]` |
//! | WELCOME   | `[remote_id:16]` |
//! | BYE       | empty |

use std::fmt;

use crate::net::{ChannelType, RemoteId, TransportError};
use crate::protocol::wire::{WireReader, WireWriter};
use crate::protocol::WireError;

pub const HEADER_SIZE: usize = 8;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest message payload that fits one DATA frame.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_SIZE - 4;

pub mod frame_type {
    pub const DATA: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const HEARTBEAT: u8 = 0x03;
    pub const HELLO: u8 = 0x10;
    pub const WELCOME: u8 = 0x11;
    pub const BYE: u8 = 0x12;
}

/// Random per-connection id chosen by the connecting side and echoed on
/// every frame, so frames from an earlier connection are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u32);

impl SessionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random())
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for SessionId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Data {
        session: SessionId,
        channel: ChannelType,
        seq: u32,
        payload: &'a [u8],
    },
    Ack {
        session: SessionId,
        next_expected: u32,
    },
    Heartbeat {
        session: SessionId,
    },
    Hello {
        session: SessionId,
        id: RemoteId,
    },
    Welcome {
        session: SessionId,
        id: RemoteId,
    },
    Bye {
        session: SessionId,
    },
}

impl Frame<'_> {
    #[must_use]
    pub const fn session(&self) -> SessionId {
        match self {
            Self::Data { session, .. }
            | Self::Ack { session, .. }
            | Self::Heartbeat { session }
            | Self::Hello { session, .. }
            | Self::Welcome { session, .. }
            | Self::Bye { session } => *session,
        }
    }
}

/// Encodes `frame` into `buf`, replacing its contents.
///
/// # Errors
///
/// [`TransportError::DatagramTooLarge`] if the frame exceeds
/// [`MAX_DATAGRAM`].
pub fn encode(frame: &Frame<'_>, buf: &mut Vec<u8>) -> Result<(), TransportError> {
    buf.clear();
    let mut w = WireWriter::new(buf);

    let (kind, channel) = match frame {
        Frame::Data { channel, .. } => (frame_type::DATA, *channel as u8),
        Frame::Ack { .. } => (frame_type::ACK, 0),
        Frame::Heartbeat { .. } => (frame_type::HEARTBEAT, 0),
        Frame::Hello { .. } => (frame_type::HELLO, 0),
        Frame::Welcome { .. } => (frame_type::WELCOME, 0),
        Frame::Bye { .. } => (frame_type::BYE, 0),
    };
    w.put_u8(kind);
    w.put_u8(channel);
    w.put_u16(0);
    w.put_u32(frame.session().as_u32());

    match frame {
        Frame::Data { seq, payload, .. } => {
            w.put_u32(*seq);
            w.put_bytes(payload);
        }
        Frame::Ack { next_expected, .. } => w.put_u32(*next_expected),
        Frame::Hello { id, .. } | Frame::Welcome { id, .. } => w.put_bytes(id.as_bytes()),
        Frame::Heartbeat { .. } | Frame::Bye { .. } => {}
    }

    let len = buf.len();
    if len > MAX_DATAGRAM {
        return Err(TransportError::DatagramTooLarge {
            len,
            max: MAX_DATAGRAM,
        });
    }
    let body = u16::try_from(len - HEADER_SIZE).map_err(|_| WireError::LengthOverflow)?;
    buf[2..4].copy_from_slice(&body.to_le_bytes());
    Ok(())
}

/// Decodes one datagram.
///
/// # Errors
///
/// [`TransportError::Malformed`] for a truncated or inconsistent frame and
/// [`TransportError::UnknownFrameType`] for an unrecognised type byte.
pub fn decode(buf: &[u8]) -> Result<Frame<'_>, TransportError> {
    let mut r = WireReader::new(buf);
    let kind = r.take_u8()?;
    let channel = r.take_u8()?;
    let len = usize::from(r.take_u16()?);
    let session = SessionId(r.take_u32()?);

    let mut body = WireReader::new(r.take_bytes(len)?);
    let frame = match kind {
        frame_type::DATA => {
            let seq = body.take_u32()?;
            let payload = body.take_bytes(body.remaining())?;
            Frame::Data {
                session,
                channel: ChannelType::try_from(channel)?,
                seq,
                payload,
            }
        }
        frame_type::ACK => Frame::Ack {
            session,
            next_expected: body.take_u32()?,
        },
        frame_type::HEARTBEAT => Frame::Heartbeat { session },
        frame_type::HELLO | frame_type::WELCOME => {
            let mut id = [0u8; 16];
            id.copy_from_slice(body.take_bytes(16)?);
            let id = RemoteId::from_bytes(id);
            if kind == frame_type::HELLO {
                Frame::Hello { session, id }
            } else {
                Frame::Welcome { session, id }
            }
        }
        frame_type::BYE => Frame::Bye { session },
        other => return Err(TransportError::UnknownFrameType(other)),
    };
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_layout() {
        let mut buf = Vec::new();
        let frame = Frame::Data {
            session: SessionId::from(0x0a0b_0c0d),
            channel: ChannelType::UnreliableUnordered,
            seq: 7,
            payload: b"pose",
        };
        encode(&frame, &mut buf).unwrap();
        assert_eq!(&buf[..4], &[frame_type::DATA, 1, 8, 0]);
        assert_eq!(&buf[4..8], &[0x0d, 0x0c, 0x0b, 0x0a]);
        assert_eq!(decode(&buf).unwrap(), frame);
    }

    #[test]
    fn hello_carries_remote_id() {
        let mut buf = Vec::new();
        let id = RemoteId::generate();
        let session = SessionId::generate();
        encode(&Frame::Hello { session, id }, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 16);
        assert_eq!(decode(&buf).unwrap(), Frame::Hello { session, id });
    }

    #[test]
    fn truncated_body_is_malformed() {
        let mut buf = Vec::new();
        encode(
            &Frame::Ack {
                session: SessionId::from(1),
                next_expected: 3,
            },
            &mut buf,
        )
        .unwrap();
        buf.pop();
        assert!(matches!(decode(&buf), Err(TransportError::Malformed(_))));
    }

    #[test]
    fn unknown_type_is_reported() {
        let buf = [0x7f, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(decode(&buf), Err(TransportError::UnknownFrameType(0x7f))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let mut buf = Vec::new();
        let frame = Frame::Data {
            session: SessionId::from(1),
            channel: ChannelType::ReliableOrdered,
            seq: 0,
            payload: &payload,
        };
        assert!(matches!(
            encode(&frame, &mut buf),
            Err(TransportError::DatagramTooLarge { max: MAX_DATAGRAM, .. })
        ));
    }
}
