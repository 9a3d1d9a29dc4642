//! Typed handles for outgoing messages.
//!
//! Handles hold a weak reference to their [`Protocol`](super::Protocol), so
//! they never keep a torn-down table alive. Sending through a handle whose
//! protocol is gone fails with [`ProtocolError::NotBound`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Weak;

use super::ProtocolError;
use super::table::Shared;
use super::wire::{Binary, Codec, Json, Text};

/// Sends a payload-less message.
#[derive(Clone)]
pub struct EventSender {
    protocol: Weak<Shared>,
    ordinal: u16,
}

impl EventSender {
    pub(crate) fn new(protocol: Weak<Shared>, ordinal: u16) -> Self {
        Self { protocol, ordinal }
    }

    #[must_use]
    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    /// # Errors
    ///
    /// [`ProtocolError::HandshakeIncomplete`] before the handshake,
    /// [`ProtocolError::NotBound`] without a remote, or a transport error.
    pub fn send(&self) -> Result<(), ProtocolError> {
        let protocol = self.protocol.upgrade().ok_or(ProtocolError::NotBound)?;
        protocol.send(self.ordinal, &[]).map(|_| ())
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

/// Sends values encoded with `C`.
pub struct DataSender<C: Codec> {
    protocol: Weak<Shared>,
    ordinal: u16,
    _codec: PhantomData<fn() -> C>,
}

pub type BinarySender<T> = DataSender<Binary<T>>;
pub type JsonSender<T> = DataSender<Json<T>>;
pub type TextSender = DataSender<Text>;

impl<C: Codec> DataSender<C> {
    pub(crate) fn new(protocol: Weak<Shared>, ordinal: u16) -> Self {
        Self {
            protocol,
            ordinal,
            _codec: PhantomData,
        }
    }

    #[must_use]
    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    /// Encodes and sends `value`.
    ///
    /// Returns `Ok(false)` when the message only sends changes and `value`
    /// encodes to the same bytes as the last send.
    ///
    /// # Errors
    ///
    /// As for [`EventSender::send`], plus encoding errors.
    pub fn send(&self, value: &C::Value) -> Result<bool, ProtocolError> {
        let protocol = self.protocol.upgrade().ok_or(ProtocolError::NotBound)?;
        let mut payload = Vec::new();
        C::encode(value, &mut payload)?;
        protocol.send(self.ordinal, &payload)
    }
}

impl<C: Codec> Clone for DataSender<C> {
    fn clone(&self) -> Self {
        Self::new(self.protocol.clone(), self.ordinal)
    }
}

impl<C: Codec> fmt::Debug for DataSender<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSender")
            .field("ordinal", &self.ordinal)
            .field("type", &C::type_name())
            .finish()
    }
}
