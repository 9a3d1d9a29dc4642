use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::descriptor::{DataOptions, Direction, MessageDescriptor, PayloadKind};
use super::handshake::HANDSHAKE_ORDINAL;
use super::receiver::{DataReceiver, EventReceiver};
use super::sender::{DataSender, EventSender};
use super::wire::{Codec, WireReader, WireWriter};
use super::{ProtocolError, WireError};
use crate::event::Subscribers;
use crate::net::{ChannelType, Message, Network, RemoteId};
use crate::trace::{debug, trace, warn};

/// Version of the serialized table layout written by [`Protocol::serialize`].
pub const TABLE_FORMAT_VERSION: u32 = 1;

/// Application-level version of a protocol, carried in its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

type Dispatch = Arc<dyn Fn(&[u8]) -> Result<(), ProtocolError> + Send + Sync>;

struct ReceiverSlot {
    dispatch: Dispatch,
    /// `Subscribers<V>` for the slot's value type, shared with every
    /// receiver handle looked up for this entry.
    subscribers: Arc<dyn Any + Send + Sync>,
}

struct Entry {
    descriptor: MessageDescriptor,
    last_sent: Option<Vec<u8>>,
    receiver: Option<ReceiverSlot>,
}

struct Binding {
    network: Arc<dyn Network>,
    remote: RemoteId,
}

#[derive(Default)]
struct TableState {
    entries: BTreeMap<u16, Entry>,
    by_id: HashMap<String, u16>,
    read_only: bool,
    binding: Option<Binding>,
    handshake_complete: bool,
}

impl TableState {
    fn entry(&self, id: &str) -> Result<&Entry, ProtocolError> {
        self.by_id
            .get(id)
            .and_then(|ordinal| self.entries.get(ordinal))
            .ok_or_else(|| ProtocolError::UnknownMessage(id.to_owned()))
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry, ProtocolError> {
        let ordinal = *self
            .by_id
            .get(id)
            .ok_or_else(|| ProtocolError::UnknownMessage(id.to_owned()))?;
        self.entries
            .get_mut(&ordinal)
            .ok_or_else(|| ProtocolError::UnknownMessage(id.to_owned()))
    }

    fn insert(&mut self, descriptor: MessageDescriptor) {
        self.by_id.insert(descriptor.id.clone(), descriptor.ordinal);
        self.entries.insert(
            descriptor.ordinal,
            Entry {
                descriptor,
                last_sent: None,
                receiver: None,
            },
        );
    }
}

pub(crate) struct Shared {
    name: String,
    version: ProtocolVersion,
    state: Mutex<TableState>,
}

impl Shared {
    /// Sends `payload` under `ordinal`. Returns `Ok(false)` when the payload
    /// was suppressed as unchanged.
    pub(crate) fn send(&self, ordinal: u16, payload: &[u8]) -> Result<bool, ProtocolError> {
        let (network, message) = {
            let mut state = self.state.lock();
            if !state.handshake_complete {
                return Err(ProtocolError::HandshakeIncomplete);
            }
            let (network, remote) = match &state.binding {
                Some(binding) => (Arc::clone(&binding.network), binding.remote),
                None => return Err(ProtocolError::NotBound),
            };
            let entry = state
                .entries
                .get_mut(&ordinal)
                .ok_or(ProtocolError::UnknownOrdinal(ordinal))?;

            let descriptor = &entry.descriptor;
            if descriptor.kind != PayloadKind::Event
                && descriptor.options.contains(DataOptions::ONLY_SEND_CHANGED)
            {
                if entry.last_sent.as_deref() == Some(payload) {
                    return Ok(false);
                }
                entry.last_sent = Some(payload.to_vec());
            }

            let envelope = encode_envelope(ordinal, payload)?;
            (network, Message::new(remote, descriptor.channel, envelope))
        };

        if let Err(err) = network.send(message) {
            // Forget the payload so the next send is not suppressed.
            if let Some(entry) = self.state.lock().entries.get_mut(&ordinal) {
                entry.last_sent = None;
            }
            return Err(err.into());
        }
        Ok(true)
    }
}

/// A named, ordered table of message descriptors bound to one remote.
///
/// Cloning is cheap and every clone shares the same table. See the
/// [module docs](super) for the wire envelope.
#[derive(Clone)]
pub struct Protocol {
    inner: Arc<Shared>,
}

impl Protocol {
    #[must_use]
    pub fn new(name: impl Into<String>, version: ProtocolVersion) -> Self {
        Self::with_state(name.into(), version, TableState::default())
    }

    fn with_state(name: String, version: ProtocolVersion, state: TableState) -> Self {
        Self {
            inner: Arc::new(Shared {
                name,
                version,
                state: Mutex::new(state),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.inner.version
    }

    /// Number of messages in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for tables built from a remote's table, which cannot grow.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.state.lock().read_only
    }

    /// Every descriptor in ordinal order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<MessageDescriptor> {
        self.inner
            .state
            .lock()
            .entries
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    #[must_use]
    pub fn descriptor(&self, id: &str) -> Option<MessageDescriptor> {
        let state = self.inner.state.lock();
        state.entry(id).ok().map(|entry| entry.descriptor.clone())
    }

    #[allow(clippy::too_many_arguments)]
    fn add(
        &self,
        id: &str,
        channel: ChannelType,
        direction: Direction,
        kind: PayloadKind,
        options: DataOptions,
        type_name: &str,
        layout_hash: u64,
    ) -> Result<u16, ProtocolError> {
        let mut state = self.inner.state.lock();
        if state.read_only {
            return Err(ProtocolError::ReadOnly);
        }
        if state.by_id.contains_key(id) {
            return Err(ProtocolError::DuplicateMessage(id.to_owned()));
        }
        let ordinal = u16::try_from(state.entries.len())
            .ok()
            .filter(|ordinal| *ordinal != HANDSHAKE_ORDINAL)
            .ok_or(ProtocolError::TableFull)?;

        let descriptor = MessageDescriptor {
            id: id.to_owned(),
            ordinal,
            channel,
            direction,
            kind,
            options,
            type_name: type_name.to_owned(),
            layout_hash,
        };
        debug!(protocol = %self.inner.name, %descriptor, "message added");
        state.insert(descriptor);
        Ok(ordinal)
    }

    /// Adds an outgoing event.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::ReadOnly`], [`ProtocolError::DuplicateMessage`] or
    /// [`ProtocolError::TableFull`].
    pub fn add_event_sender(
        &self,
        id: &str,
        channel: ChannelType,
    ) -> Result<EventSender, ProtocolError> {
        let ordinal = self.add(
            id,
            channel,
            Direction::Send,
            PayloadKind::Event,
            DataOptions::NONE,
            "",
            0,
        )?;
        Ok(EventSender::new(Arc::downgrade(&self.inner), ordinal))
    }

    /// Adds an incoming event.
    ///
    /// # Errors
    ///
    /// As for [`add_event_sender`](Self::add_event_sender).
    pub fn add_event_receiver(
        &self,
        id: &str,
        channel: ChannelType,
    ) -> Result<EventReceiver, ProtocolError> {
        self.add(
            id,
            channel,
            Direction::Receive,
            PayloadKind::Event,
            DataOptions::NONE,
            "",
            0,
        )?;
        self.event_receiver(id)
    }

    /// Adds an outgoing data message encoded with `C`.
    ///
    /// # Errors
    ///
    /// As for [`add_event_sender`](Self::add_event_sender).
    pub fn add_sender<C: Codec>(
        &self,
        id: &str,
        channel: ChannelType,
        options: DataOptions,
    ) -> Result<DataSender<C>, ProtocolError> {
        let ordinal = self.add(
            id,
            channel,
            Direction::Send,
            C::KIND,
            options,
            C::type_name(),
            C::layout_hash(),
        )?;
        Ok(DataSender::new(Arc::downgrade(&self.inner), ordinal))
    }

    /// Adds an incoming data message decoded with `C`.
    ///
    /// # Errors
    ///
    /// As for [`add_event_sender`](Self::add_event_sender).
    pub fn add_receiver<C: Codec>(
        &self,
        id: &str,
        channel: ChannelType,
    ) -> Result<DataReceiver<C>, ProtocolError> {
        self.add(
            id,
            channel,
            Direction::Receive,
            C::KIND,
            DataOptions::NONE,
            C::type_name(),
            C::layout_hash(),
        )?;
        self.receiver::<C>(id)
    }

    /// Looks up an entry and checks it has the expected shape.
    fn lookup<'a>(
        state: &'a mut TableState,
        id: &str,
        direction: Direction,
        kind: PayloadKind,
    ) -> Result<&'a mut Entry, ProtocolError> {
        let entry = state.entry_mut(id)?;
        let descriptor = &entry.descriptor;
        if descriptor.direction != direction {
            let name = |d: Direction| match d {
                Direction::Send => "sender",
                Direction::Receive => "receiver",
            };
            return Err(ProtocolError::WrongMessageKind {
                id: id.to_owned(),
                expected: name(direction),
                found: name(descriptor.direction),
            });
        }
        if descriptor.kind != kind {
            return Err(ProtocolError::WrongMessageKind {
                id: id.to_owned(),
                expected: kind.name(),
                found: descriptor.kind.name(),
            });
        }
        Ok(entry)
    }

    fn check_layout<C: Codec>(descriptor: &MessageDescriptor) {
        if descriptor.layout_hash != C::layout_hash() || descriptor.type_name != C::type_name() {
            warn!(
                id = %descriptor.id,
                remote_type = %descriptor.type_name,
                local_type = C::type_name(),
                "payload layout differs from the remote's, versions may be mismatched"
            );
        }
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] or [`ProtocolError::WrongMessageKind`].
    pub fn event_sender(&self, id: &str) -> Result<EventSender, ProtocolError> {
        let mut state = self.inner.state.lock();
        let entry = Self::lookup(&mut state, id, Direction::Send, PayloadKind::Event)?;
        Ok(EventSender::new(
            Arc::downgrade(&self.inner),
            entry.descriptor.ordinal,
        ))
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] or [`ProtocolError::WrongMessageKind`].
    /// A differing payload layout is only logged.
    pub fn sender<C: Codec>(&self, id: &str) -> Result<DataSender<C>, ProtocolError> {
        let mut state = self.inner.state.lock();
        let entry = Self::lookup(&mut state, id, Direction::Send, C::KIND)?;
        Self::check_layout::<C>(&entry.descriptor);
        Ok(DataSender::new(
            Arc::downgrade(&self.inner),
            entry.descriptor.ordinal,
        ))
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] or [`ProtocolError::WrongMessageKind`].
    pub fn event_receiver(&self, id: &str) -> Result<EventReceiver, ProtocolError> {
        let mut state = self.inner.state.lock();
        let entry = Self::lookup(&mut state, id, Direction::Receive, PayloadKind::Event)?;
        let subscribers = Self::install::<()>(entry, |_| Ok(()))?;
        Ok(EventReceiver::new(entry.descriptor.ordinal, subscribers))
    }

    /// Returns a receiver for `id`. All receivers for one message share
    /// their subscribers.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`], or [`ProtocolError::WrongMessageKind`]
    /// also when another payload type already receives this message. A
    /// differing payload layout is only logged.
    pub fn receiver<C: Codec>(&self, id: &str) -> Result<DataReceiver<C>, ProtocolError> {
        let mut state = self.inner.state.lock();
        let entry = Self::lookup(&mut state, id, Direction::Receive, C::KIND)?;
        Self::check_layout::<C>(&entry.descriptor);
        let subscribers = Self::install::<C::Value>(entry, C::decode)?;
        Ok(DataReceiver::new(entry.descriptor.ordinal, subscribers))
    }

    fn install<V: Send + 'static>(
        entry: &mut Entry,
        decode: fn(&[u8]) -> Result<V, ProtocolError>,
    ) -> Result<Arc<Subscribers<V>>, ProtocolError> {
        if let Some(slot) = &entry.receiver {
            return Arc::clone(&slot.subscribers)
                .downcast::<Subscribers<V>>()
                .map_err(|_| ProtocolError::WrongMessageKind {
                    id: entry.descriptor.id.clone(),
                    expected: std::any::type_name::<V>(),
                    found: "another payload type",
                });
        }

        let subscribers = Arc::new(Subscribers::<V>::new());
        let target = Arc::clone(&subscribers);
        let dispatch: Dispatch = Arc::new(move |bytes: &[u8]| {
            let value = decode(bytes)?;
            target.emit(&value);
            Ok(())
        });
        entry.receiver = Some(ReceiverSlot {
            dispatch,
            subscribers: Arc::clone(&subscribers) as Arc<dyn Any + Send + Sync>,
        });
        Ok(subscribers)
    }

    /// Sends and receives through `remote` on `network` from now on.
    ///
    /// The handshake must be completed again, by
    /// [`send_table`](super::send_table) on the accepting side or
    /// [`mark_handshake_complete`](Self::mark_handshake_complete) once the
    /// remote's table is in hand.
    pub fn bind(&self, network: Arc<dyn Network>, remote: RemoteId) {
        let mut state = self.inner.state.lock();
        state.binding = Some(Binding { network, remote });
        state.handshake_complete = false;
    }

    /// Detaches from the remote and forgets per-connection state.
    pub fn unbind(&self) {
        let mut state = self.inner.state.lock();
        state.binding = None;
        state.handshake_complete = false;
        for entry in state.entries.values_mut() {
            entry.last_sent = None;
        }
    }

    #[must_use]
    pub fn remote(&self) -> Option<RemoteId> {
        self.inner.state.lock().binding.as_ref().map(|b| b.remote)
    }

    pub(crate) fn binding(&self) -> Result<(Arc<dyn Network>, RemoteId), ProtocolError> {
        self.inner
            .state
            .lock()
            .binding
            .as_ref()
            .map(|b| (Arc::clone(&b.network), b.remote))
            .ok_or(ProtocolError::NotBound)
    }

    pub fn mark_handshake_complete(&self) {
        self.inner.state.lock().handshake_complete = true;
    }

    #[must_use]
    pub fn is_handshake_complete(&self) -> bool {
        self.inner.state.lock().handshake_complete
    }

    /// Forgets what every sender last sent, so the next send of each goes
    /// out even if unchanged. The table and binding are kept.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        for entry in state.entries.values_mut() {
            entry.last_sent = None;
        }
        trace!(protocol = %self.inner.name, "protocol reset");
    }

    /// Dispatches one inbound message to the receivers of its ordinal.
    ///
    /// Handlers run after the table lock is released, so they may send.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::HandshakeIncomplete`], [`ProtocolError::UnknownOrdinal`],
    /// [`ProtocolError::WrongMessageKind`] for an ordinal this side sends, or
    /// a decode error. Each is logged and only this message is dropped.
    pub fn receive(&self, message: &Message) -> Result<(), ProtocolError> {
        let result = self.dispatch(message);
        if let Err(_err) = &result {
            warn!(
                protocol = %self.inner.name,
                remote = %message.remote(),
                error = %_err,
                "dropping inbound message"
            );
        }
        result
    }

    fn dispatch(&self, message: &Message) -> Result<(), ProtocolError> {
        let (ordinal, payload) = decode_envelope(message.payload())?;
        let dispatch = {
            let state = self.inner.state.lock();
            if !state.handshake_complete {
                return Err(ProtocolError::HandshakeIncomplete);
            }
            let entry = state
                .entries
                .get(&ordinal)
                .ok_or(ProtocolError::UnknownOrdinal(ordinal))?;
            if entry.descriptor.direction != Direction::Receive {
                return Err(ProtocolError::WrongMessageKind {
                    id: entry.descriptor.id.clone(),
                    expected: "receiver",
                    found: "sender",
                });
            }
            match &entry.receiver {
                Some(slot) => Arc::clone(&slot.dispatch),
                None => {
                    trace!(id = %entry.descriptor.id, "no receiver attached");
                    return Ok(());
                }
            }
        };
        dispatch(payload)
    }

    /// The table as the remote must see it: every direction flipped.
    ///
    /// The result is read-only.
    #[must_use]
    pub fn create_inverse(&self) -> Self {
        let state = self.inner.state.lock();
        let mut inverse = TableState {
            read_only: true,
            ..TableState::default()
        };
        for entry in state.entries.values() {
            inverse.insert(entry.descriptor.inverse());
        }
        Self::with_state(self.inner.name.clone(), self.inner.version, inverse)
    }

    /// Serializes the table.
    ///
    /// ```text
    /// [format:4][name:str][major:4][minor:4][patch:4][count:2]
    /// count × [len:4][descriptor:len]
    /// ```
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Malformed`] if a string or entry does not fit its
    /// length field.
    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        let state = self.inner.state.lock();
        let mut buf = Vec::new();
        let mut w = WireWriter::new(&mut buf);
        w.put_u32(TABLE_FORMAT_VERSION);
        w.put_str(&self.inner.name)?;
        w.put_u32(self.inner.version.major);
        w.put_u32(self.inner.version.minor);
        w.put_u32(self.inner.version.patch);
        let count = u16::try_from(state.entries.len()).map_err(|_| WireError::LengthOverflow)?;
        w.put_u16(count);
        for entry in state.entries.values() {
            let at = w.begin_len();
            entry.descriptor.write_to(&mut w)?;
            w.patch_len(at)?;
        }
        Ok(buf)
    }

    /// Rebuilds a read-only table from [`serialize`](Self::serialize) output.
    ///
    /// Entries that cannot be decoded, or that repeat an id or ordinal, are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnsupportedVersion`] for a newer table format, or
    /// [`ProtocolError::Malformed`] when the header or an entry length is
    /// truncated.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(bytes);
        let format = r.take_u32()?;
        if format == 0 || format > TABLE_FORMAT_VERSION {
            return Err(ProtocolError::UnsupportedVersion(format));
        }
        let name = r.take_str()?.to_owned();
        let version = ProtocolVersion::new(r.take_u32()?, r.take_u32()?, r.take_u32()?);
        let count = r.take_u16()?;

        let mut state = TableState {
            read_only: true,
            ..TableState::default()
        };
        for _ in 0..count {
            let block = r.take_len_prefixed()?;
            let descriptor = match MessageDescriptor::read_from(&mut WireReader::new(block)) {
                Ok(descriptor) => descriptor,
                Err(_err) => {
                    warn!(protocol = %name, error = %_err, "skipping undecodable table entry");
                    continue;
                }
            };
            if descriptor.ordinal == HANDSHAKE_ORDINAL
                || state.by_id.contains_key(&descriptor.id)
                || state.entries.contains_key(&descriptor.ordinal)
            {
                warn!(protocol = %name, %descriptor, "skipping conflicting table entry");
                continue;
            }
            state.insert(descriptor);
        }
        Ok(Self::with_state(name, version, state))
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Protocol")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("messages", &state.entries.len())
            .field("read_only", &state.read_only)
            .field("handshake_complete", &state.handshake_complete)
            .finish()
    }
}

/// Wraps `payload` as `[ordinal:2][len:4][payload]`.
pub(crate) fn encode_envelope(ordinal: u16, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(payload.len() + 6);
    let mut w = WireWriter::new(&mut buf);
    w.put_u16(ordinal);
    w.put_u32(u32::try_from(payload.len()).map_err(|_| WireError::LengthOverflow)?);
    w.put_bytes(payload);
    Ok(buf)
}

/// Splits an envelope into its ordinal and payload.
pub(crate) fn decode_envelope(bytes: &[u8]) -> Result<(u16, &[u8]), WireError> {
    let mut r = WireReader::new(bytes);
    let ordinal = r.take_u16()?;
    let payload = r.take_len_prefixed()?;
    Ok((ordinal, payload))
}
