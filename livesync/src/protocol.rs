//! Negotiated message protocol over a [`Network`](crate::net::Network).
//!
//! A [`Protocol`] is a named table of message descriptors. Application code
//! adds senders and receivers by stable string id. On connect the accepting
//! side sends the inverse of its table to the remote, which rebuilds it so
//! both ends agree on a compact ordinal per message for the lifetime of the
//! connection.
//!
//! # Envelope
//!
//! Every protocol message travels inside one [`Message`](crate::net::Message):
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────────────┐
//! │ Ordinal (2)  │ Length (4)   │ Payload (Length)   │
//! └──────────────┴──────────────┴────────────────────┘
//! ```
//!
//! The reserved ordinal [`HANDSHAKE_ORDINAL`] carries the serialized table.
//!
//! # Payloads
//!
//! | Kind   | Encoding |
//! |--------|----------|
//! | Event  | empty |
//! | Binary | [`FixedLayout`](layout::FixedLayout) bytes, little-endian, no padding |
//! | Json   | UTF-8 JSON produced by `serde_json` |
//! | Text   | `[len:4][utf8:len]` |

pub mod descriptor;
pub mod handshake;
pub mod layout;
pub mod receiver;
pub mod sender;
pub mod table;
pub mod wire;

pub use descriptor::{DataOptions, Direction, MessageDescriptor, PayloadKind};
pub use handshake::{HANDSHAKE_ORDINAL, accept_table, is_handshake, receive_table, send_table};
pub use layout::FixedLayout;
pub use receiver::{BinaryReceiver, DataReceiver, EventReceiver, JsonReceiver, TextReceiver};
pub use sender::{BinarySender, DataSender, EventSender, JsonSender, TextSender};
pub use table::{Protocol, ProtocolVersion, TABLE_FORMAT_VERSION};
pub use wire::{Binary, Codec, Json, Text, WireReader, WireWriter};

use thiserror::Error;

use crate::net::TransportError;

/// Errors decoding or encoding raw bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid {name} discriminant {value}")]
    InvalidDiscriminant { name: &'static str, value: i64 },

    #[error("length does not fit the wire field")]
    LengthOverflow,
}

/// Errors raised by a [`Protocol`].
///
/// None of these tear down the connection. A failed receive drops the one
/// offending message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("handshake has not completed")]
    HandshakeIncomplete,

    #[error("no message with ordinal {0} in the negotiated table")]
    UnknownOrdinal(u16),

    #[error("no message with id \"{0}\"")]
    UnknownMessage(String),

    #[error("message \"{id}\" is a {found}, not a {expected}")]
    WrongMessageKind {
        id: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("a message with id \"{0}\" is already defined")]
    DuplicateMessage(String),

    #[error("protocol already holds the maximum number of messages")]
    TableFull,

    #[error("protocol is read-only")]
    ReadOnly,

    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    #[error("json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("table format version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("protocol is not bound to a remote")]
    NotBound,

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}
