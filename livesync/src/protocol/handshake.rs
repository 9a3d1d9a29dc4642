//! Table exchange that opens every protocol connection.
//!
//! The accepting side owns the authoritative table. Once a remote connects
//! it binds its [`Protocol`] and calls [`send_table`], which ships the
//! inverse table under [`HANDSHAKE_ORDINAL`] on the reliable channel. The
//! remote passes that message to [`receive_table`] and gets back a
//! read-only table whose ordinals match the sender's.

use std::sync::Arc;

use super::table::{decode_envelope, encode_envelope};
use super::{Protocol, ProtocolError};
use crate::net::{ChannelType, Message, Network, RemoteId};
use crate::trace::info;

/// Ordinal reserved for the serialized table. No table entry uses it.
pub const HANDSHAKE_ORDINAL: u16 = u16::MAX;

/// Sends the inverse of `protocol`'s table to its bound remote and marks
/// the handshake complete.
///
/// # Errors
///
/// [`ProtocolError::NotBound`] if the protocol has no remote, or an encoding
/// or transport error.
pub fn send_table(protocol: &Protocol) -> Result<(), ProtocolError> {
    let (network, remote) = protocol.binding()?;
    let table = protocol.create_inverse().serialize()?;
    let envelope = encode_envelope(HANDSHAKE_ORDINAL, &table)?;
    network.send(Message::new(remote, ChannelType::ReliableOrdered, envelope))?;
    protocol.mark_handshake_complete();
    info!(
        protocol = protocol.name(),
        %remote,
        messages = protocol.len(),
        "handshake table sent"
    );
    Ok(())
}

/// True if `message` carries a table sent by [`send_table`].
#[must_use]
pub fn is_handshake(message: &Message) -> bool {
    matches!(decode_envelope(message.payload()), Ok((HANDSHAKE_ORDINAL, _)))
}

/// Rebuilds the remote's table from a handshake message.
///
/// The result is unbound. Use [`accept_table`] to bind it in one step.
///
/// # Errors
///
/// [`ProtocolError::UnknownOrdinal`] if `message` is not a handshake, or
/// any error from [`Protocol::deserialize`].
pub fn receive_table(message: &Message) -> Result<Protocol, ProtocolError> {
    let (ordinal, table) = decode_envelope(message.payload())?;
    if ordinal != HANDSHAKE_ORDINAL {
        return Err(ProtocolError::UnknownOrdinal(ordinal));
    }
    Protocol::deserialize(table)
}

/// [`receive_table`], then binds the table to the sender and completes the
/// handshake.
///
/// # Errors
///
/// As for [`receive_table`].
pub fn accept_table(
    message: &Message,
    network: Arc<dyn Network>,
) -> Result<Protocol, ProtocolError> {
    let protocol = receive_table(message)?;
    let remote: RemoteId = message.remote();
    protocol.bind(network, remote);
    protocol.mark_handshake_complete();
    info!(
        protocol = protocol.name(),
        %remote,
        messages = protocol.len(),
        "handshake table received"
    );
    Ok(protocol)
}
