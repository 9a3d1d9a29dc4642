//! mio-driven UDP [`Network`].
//!
//! A connection starts with the connecting side sending HELLO with a fresh
//! [`SessionId`] until the listener answers WELCOME. Both ends then send a
//! HEARTBEAT whenever they have been quiet for a heartbeat interval and drop
//! a peer that stays silent past the peer timeout.
//!
//! Reliable-ordered messages are sequenced per peer, acknowledged
//! cumulatively and retransmitted until acknowledged. A peer that fails to
//! acknowledge after the configured number of attempts is dropped.
//! Unreliable-unordered messages are sent once and delivered on arrival.

pub mod frame;
pub mod reliable;

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::time::Duration;

use minstant::Instant;
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;

use self::frame::{Frame, MAX_PAYLOAD, SessionId};
use self::reliable::{InsertResult, ReorderBuffer, RetransmitQueue};
use super::{
    ChannelType, Endpoint, Message, Network, NetworkEvent, RemoteId, TransportError, UdpSocket,
};
use crate::trace::{debug, info, trace, warn};

const SOCKET: Token = Token(0);
const RECV_BUFFER_LEN: usize = 64 * 1024;
/// Kernel buffer requested per socket so sample bursts are not dropped.
const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;
const REORDER_WINDOW: u32 = 1024;

/// Timing of the UDP handshake and reliability machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTiming {
    /// Quiet time after which a HEARTBEAT is sent, and HELLO resend interval.
    pub heartbeat_interval: Duration,
    /// Silence after which a peer, or a pending handshake, is dropped.
    pub peer_timeout: Duration,
    /// Age at which an unacknowledged reliable frame is resent.
    pub retransmit_timeout: Duration,
    /// Sends of one reliable frame before the peer is considered lost.
    pub max_retransmit_attempts: u32,
}

impl NetworkTiming {
    /// Aggressive timing for loopback and studio LANs.
    #[must_use]
    pub fn local() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(50),
            peer_timeout: Duration::from_millis(1_000),
            retransmit_timeout: Duration::from_millis(20),
            max_retransmit_attempts: 20,
        }
    }
}

impl Default for NetworkTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(250),
            peer_timeout: Duration::from_secs(5),
            retransmit_timeout: Duration::from_millis(100),
            max_retransmit_attempts: 30,
        }
    }
}

struct Peer {
    id: RemoteId,
    endpoint: Endpoint,
    session: SessionId,
    last_heard: Instant,
    last_sent: Instant,
    outbound: RetransmitQueue,
    inbound: ReorderBuffer,
}

impl Peer {
    fn new(id: RemoteId, endpoint: Endpoint, session: SessionId, now: Instant) -> Self {
        Self {
            id,
            endpoint,
            session,
            last_heard: now,
            last_sent: now,
            outbound: RetransmitQueue::new(),
            inbound: ReorderBuffer::new(REORDER_WINDOW),
        }
    }
}

struct Handshake {
    session: SessionId,
    started: Instant,
    last_hello: Instant,
}

#[derive(Default)]
struct State {
    peers: HashMap<RemoteId, Peer>,
    by_endpoint: HashMap<Endpoint, RemoteId>,
    handshakes: HashMap<Endpoint, Handshake>,
    events: VecDeque<NetworkEvent>,
    scratch: Vec<u8>,
}

impl State {
    fn add_peer(&mut self, peer: Peer) {
        if let Some(previous) = self.by_endpoint.insert(peer.endpoint, peer.id) {
            if self.peers.remove(&previous).is_some() {
                self.events.push_back(NetworkEvent::Disconnected(previous));
            }
        }
        if let Some(stale) = self.peers.remove(&peer.id) {
            self.by_endpoint.remove(&stale.endpoint);
            self.events.push_back(NetworkEvent::Disconnected(stale.id));
        }
        self.events.push_back(NetworkEvent::Connected(peer.id));
        self.by_endpoint.insert(peer.endpoint, peer.id);
        self.peers.insert(peer.id, peer);
    }

    fn remove_peer(&mut self, id: RemoteId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        self.by_endpoint.remove(&peer.endpoint);
        self.events.push_back(NetworkEvent::Disconnected(id));
        Some(peer)
    }

    fn peer_at(&mut self, endpoint: Endpoint, session: SessionId) -> Option<&mut Peer> {
        let id = self.by_endpoint.get(&endpoint)?;
        self.peers.get_mut(id).filter(|p| p.session == session)
    }
}

struct Poller {
    poll: Poll,
    events: Events,
    recv: Vec<u8>,
}

/// UDP network that both accepts and initiates connections.
pub struct UdpNetwork {
    local_id: RemoteId,
    local_endpoint: Endpoint,
    timing: NetworkTiming,
    socket: UdpSocket,
    poller: Mutex<Poller>,
    state: Mutex<State>,
}

impl UdpNetwork {
    /// Binds `endpoint`. Remotes may connect as soon as this returns and
    /// [`poll`](Network::poll) is being called.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket cannot be bound or registered.
    pub fn bind(endpoint: Endpoint, timing: NetworkTiming) -> Result<Self, TransportError> {
        let mut socket = UdpSocket::bind(endpoint)?;
        if let Err(_err) = socket.set_buffer_sizes(SOCKET_BUFFER_SIZE) {
            warn!(error = %_err, "could not enlarge socket buffers");
        }
        let local_endpoint = socket.local_addr()?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET, Interest::READABLE)?;

        let local_id = RemoteId::generate();
        debug!(%local_endpoint, %local_id, "udp network bound");

        Ok(Self {
            local_id,
            local_endpoint,
            timing,
            socket,
            poller: Mutex::new(Poller {
                poll,
                events: Events::with_capacity(64),
                recv: vec![0u8; RECV_BUFFER_LEN],
            }),
            state: Mutex::new(State::default()),
        })
    }

    #[must_use]
    pub fn local_endpoint(&self) -> Endpoint {
        self.local_endpoint
    }

    #[must_use]
    pub fn timing(&self) -> &NetworkTiming {
        &self.timing
    }

    /// Connects to the network bound at `endpoint`, waiting up to `timeout`
    /// for its WELCOME.
    ///
    /// Events that arrive meanwhile, including the `Connected` event for
    /// this remote, are kept for the next [`poll`](Network::poll).
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if no WELCOME arrives in time, or an I/O
    /// error from the socket.
    pub fn connect(
        &self,
        endpoint: Endpoint,
        timeout: Duration,
    ) -> Result<RemoteId, TransportError> {
        let session = SessionId::generate();
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            state.handshakes.insert(
                endpoint,
                Handshake {
                    session,
                    started: now,
                    last_hello: now,
                },
            );
            let hello = Frame::Hello {
                session,
                id: self.local_id,
            };
            self.send_frame(&mut state.scratch, &hello, endpoint)?;
        }
        debug!(%endpoint, %session, "hello sent");

        let deadline = now + timeout;
        let mut poller = self.poller.lock();
        loop {
            self.pump(&mut poller)?;
            {
                let mut state = self.state.lock();
                if let Some(peer) = state.peer_at(endpoint, session) {
                    return Ok(peer.id);
                }
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    state.handshakes.remove(&endpoint);
                    return Err(TransportError::Timeout);
                };
                if remaining.is_zero() || !state.handshakes.contains_key(&endpoint) {
                    state.handshakes.remove(&endpoint);
                    return Err(TransportError::Timeout);
                }
            }
            let wait = self.timing.heartbeat_interval.min(deadline_left(deadline));
            self.wait(&mut poller, Some(wait))?;
        }
    }

    fn wait(&self, poller: &mut Poller, timeout: Option<Duration>) -> Result<(), TransportError> {
        let Poller { poll, events, .. } = poller;
        match poll.poll(events, timeout) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drains the socket and runs timers.
    fn pump(&self, poller: &mut Poller) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let now = Instant::now();
        loop {
            let (len, from) = match self.socket.try_recv_from(&mut poller.recv) {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::Interrupted
                            | ErrorKind::ConnectionRefused
                            | ErrorKind::ConnectionReset
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.handle_datagram(&mut state, from, &poller.recv[..len], now);
        }
        self.service(&mut state, now);
        Ok(())
    }

    fn handle_datagram(&self, state: &mut State, from: Endpoint, datagram: &[u8], now: Instant) {
        let frame = match frame::decode(datagram) {
            Ok(frame) => frame,
            Err(_err) => {
                warn!(%from, error = %_err, "dropping undecodable datagram");
                return;
            }
        };

        match frame {
            Frame::Hello { session, id } => {
                if state.peer_at(from, session).is_none() {
                    info!(%from, remote = %id, "peer connected");
                    state.add_peer(Peer::new(id, from, session, now));
                }
                if let Some(peer) = state.peer_at(from, session) {
                    peer.last_heard = now;
                    peer.last_sent = now;
                }
                let welcome = Frame::Welcome {
                    session,
                    id: self.local_id,
                };
                self.send_control(&mut state.scratch, &welcome, from);
            }
            Frame::Welcome { session, id } => {
                let expected = state
                    .handshakes
                    .get(&from)
                    .is_some_and(|h| h.session == session);
                if expected {
                    state.handshakes.remove(&from);
                    info!(remote_endpoint = %from, remote = %id, "connected to peer");
                    state.add_peer(Peer::new(id, from, session, now));
                } else if let Some(peer) = state.peer_at(from, session) {
                    peer.last_heard = now;
                } else {
                    trace!(%from, "ignoring unsolicited welcome");
                }
            }
            Frame::Bye { session } => {
                if let Some(id) = state.peer_at(from, session).map(|p| p.id) {
                    info!(remote = %id, "peer said goodbye");
                    state.remove_peer(id);
                }
            }
            Frame::Heartbeat { session } => {
                if let Some(peer) = state.peer_at(from, session) {
                    peer.last_heard = now;
                }
            }
            Frame::Ack {
                session,
                next_expected,
            } => {
                if let Some(peer) = state.peer_at(from, session) {
                    peer.last_heard = now;
                    peer.outbound.acknowledge(next_expected);
                }
            }
            Frame::Data {
                session,
                channel,
                seq,
                payload,
            } => self.handle_data(state, from, session, channel, seq, payload, now),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_data(
        &self,
        state: &mut State,
        from: Endpoint,
        session: SessionId,
        channel: ChannelType,
        seq: u32,
        payload: &[u8],
        now: Instant,
    ) {
        let State {
            peers,
            by_endpoint,
            events,
            scratch,
            ..
        } = state;
        let peer = match by_endpoint.get(&from) {
            Some(id) => peers.get_mut(id).filter(|p| p.session == session),
            None => None,
        };
        let Some(peer) = peer else {
            trace!(%from, "data from unknown peer");
            return;
        };
        peer.last_heard = now;

        match channel {
            ChannelType::UnreliableUnordered => {
                events.push_back(NetworkEvent::Message(Message::new(
                    peer.id,
                    channel,
                    payload.to_vec(),
                )));
            }
            ChannelType::ReliableOrdered => {
                if peer.inbound.insert(seq, payload.to_vec()) == InsertResult::TooNew {
                    trace!(seq, "reliable frame beyond window");
                }
                while let Some(ready) = peer.inbound.pop_ready() {
                    events.push_back(NetworkEvent::Message(Message::new(peer.id, channel, ready)));
                }
                let ack = Frame::Ack {
                    session,
                    next_expected: peer.inbound.next_expected(),
                };
                self.send_control(scratch, &ack, from);
                peer.last_sent = now;
            }
        }
    }

    fn service(&self, state: &mut State, now: Instant) {
        let timing = &self.timing;
        let State {
            peers,
            handshakes,
            scratch,
            ..
        } = state;

        handshakes.retain(|endpoint, handshake| {
            if elapsed(now, handshake.started) > timing.peer_timeout {
                warn!(%endpoint, "handshake timed out");
                return false;
            }
            if elapsed(now, handshake.last_hello) >= timing.heartbeat_interval {
                let hello = Frame::Hello {
                    session: handshake.session,
                    id: self.local_id,
                };
                self.send_control(scratch, &hello, *endpoint);
                handshake.last_hello = now;
            }
            true
        });

        let mut lost = Vec::new();
        for peer in peers.values_mut() {
            if elapsed(now, peer.last_heard) > timing.peer_timeout {
                warn!(remote = %peer.id, "peer timed out");
                lost.push(peer.id);
                continue;
            }

            let mut exhausted = false;
            for pending in peer.outbound.due(now, timing.retransmit_timeout) {
                if pending.attempts >= timing.max_retransmit_attempts {
                    exhausted = true;
                    break;
                }
                if let Err(_err) = self.socket.try_send_to(&pending.datagram, peer.endpoint) {
                    trace!(error = %_err, "retransmit failed");
                }
                pending.attempts += 1;
                pending.sent_at = now;
                peer.last_sent = now;
                trace!(seq = pending.seq, attempt = pending.attempts, "retransmit");
            }
            if exhausted {
                warn!(remote = %peer.id, "reliable frame never acknowledged");
                lost.push(peer.id);
                continue;
            }

            if elapsed(now, peer.last_sent) >= timing.heartbeat_interval {
                let heartbeat = Frame::Heartbeat {
                    session: peer.session,
                };
                self.send_control(scratch, &heartbeat, peer.endpoint);
                peer.last_sent = now;
            }
        }

        for id in lost {
            state.remove_peer(id);
        }
    }

    fn send_frame(
        &self,
        scratch: &mut Vec<u8>,
        frame: &Frame<'_>,
        to: Endpoint,
    ) -> Result<(), TransportError> {
        frame::encode(frame, scratch)?;
        if self.socket.try_send_to(scratch, to)?.is_none() {
            trace!(%to, "socket full, frame dropped");
        }
        Ok(())
    }

    /// Sends a frame the protocol tolerates losing.
    fn send_control(&self, scratch: &mut Vec<u8>, frame: &Frame<'_>, to: Endpoint) {
        if let Err(_err) = self.send_frame(scratch, frame, to) {
            debug!(%to, error = %_err, "control frame not sent");
        }
    }
}

fn elapsed(now: Instant, since: Instant) -> Duration {
    now.checked_duration_since(since).unwrap_or_default()
}

fn deadline_left(deadline: Instant) -> Duration {
    deadline
        .checked_duration_since(Instant::now())
        .unwrap_or_default()
}

impl Network for UdpNetwork {
    fn local_id(&self) -> RemoteId {
        self.local_id
    }

    fn is_connected(&self, remote: RemoteId) -> bool {
        self.state.lock().peers.contains_key(&remote)
    }

    fn remotes(&self) -> Vec<RemoteId> {
        self.state.lock().peers.keys().copied().collect()
    }

    fn send(&self, message: Message) -> Result<(), TransportError> {
        let len = message.len();
        if len > MAX_PAYLOAD {
            return Err(TransportError::DatagramTooLarge {
                len,
                max: MAX_PAYLOAD,
            });
        }

        let mut state = self.state.lock();
        let State { peers, scratch, .. } = &mut *state;
        let remote = message.remote();
        let peer = peers
            .get_mut(&remote)
            .ok_or(TransportError::NotConnected(remote))?;
        let now = Instant::now();

        let seq = match message.channel() {
            ChannelType::ReliableOrdered => peer.outbound.next_seq(),
            ChannelType::UnreliableUnordered => 0,
        };
        let data = Frame::Data {
            session: peer.session,
            channel: message.channel(),
            seq,
            payload: message.payload(),
        };
        frame::encode(&data, scratch)?;
        if message.channel() == ChannelType::ReliableOrdered {
            peer.outbound.push(scratch.clone(), now);
        }
        peer.last_sent = now;
        if self.socket.try_send_to(scratch, peer.endpoint)?.is_none() {
            trace!(remote = %remote, "socket full, data frame dropped");
        }
        Ok(())
    }

    fn poll(&self, timeout: Option<Duration>) -> Result<Vec<NetworkEvent>, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut poller = self.poller.lock();
        loop {
            self.pump(&mut poller)?;
            {
                let mut state = self.state.lock();
                if !state.events.is_empty() {
                    return Ok(state.events.drain(..).collect());
                }
            }

            let wait = match deadline {
                Some(deadline) => {
                    let left = deadline_left(deadline);
                    if left.is_zero() {
                        return Ok(Vec::new());
                    }
                    left.min(self.timing.heartbeat_interval)
                }
                None => self.timing.heartbeat_interval,
            };
            self.wait(&mut poller, Some(wait))?;
        }
    }

    fn disconnect(&self, remote: RemoteId) {
        let mut state = self.state.lock();
        if let Some(peer) = state.remove_peer(remote) {
            let bye = Frame::Bye {
                session: peer.session,
            };
            self.send_control(&mut state.scratch, &bye, peer.endpoint);
            info!(%remote, "disconnected from peer");
        }
    }
}

impl Drop for UdpNetwork {
    fn drop(&mut self) {
        let peers: Vec<(SessionId, Endpoint)> = self
            .state
            .get_mut()
            .peers
            .values()
            .map(|p| (p.session, p.endpoint))
            .collect();
        let mut scratch = Vec::new();
        for (session, endpoint) in peers {
            self.send_control(&mut scratch, &Frame::Bye { session }, endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;

    fn network() -> UdpNetwork {
        UdpNetwork::bind(Endpoint::localhost(0), NetworkTiming::local()).unwrap()
    }

    /// Polls until `pred` accepts an event or a second passes.
    fn poll_until(
        net: &UdpNetwork,
        mut pred: impl FnMut(&NetworkEvent) -> bool,
    ) -> Vec<NetworkEvent> {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            for event in net.poll(Some(Duration::from_millis(10))).unwrap() {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
        }
        panic!("condition not met, saw {seen:?}");
    }

    #[test]
    fn handshake_connects_both_sides() {
        let listener = network();
        let dialer = network();

        let accepted = std::thread::scope(|s| {
            let listener = &listener;
            let handle = s.spawn(move || {
                poll_until(listener, |e| matches!(e, NetworkEvent::Connected(_)))
            });
            let id = dialer
                .connect(listener.local_endpoint(), Duration::from_secs(1))
                .unwrap();
            assert_eq!(id, listener.local_id());
            handle.join().unwrap()
        });

        assert!(accepted.contains(&NetworkEvent::Connected(dialer.local_id())));
        assert!(dialer.is_connected(listener.local_id()));
        assert_eq!(
            dialer.poll(Some(Duration::ZERO)).unwrap(),
            vec![NetworkEvent::Connected(listener.local_id())]
        );
    }

    #[test]
    fn connect_to_silent_endpoint_times_out() {
        let silent = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let dialer = network();
        let endpoint = Endpoint::from(silent.local_addr().unwrap());
        assert!(matches!(
            dialer.connect(endpoint, Duration::from_millis(60)),
            Err(TransportError::Timeout)
        ));
        assert!(dialer.remotes().is_empty());
    }

    #[test]
    fn send_to_unknown_remote_fails() {
        let net = network();
        let stranger = RemoteId::generate();
        assert!(matches!(
            net.send(Message::new(stranger, ChannelType::ReliableOrdered, vec![1])),
            Err(TransportError::NotConnected(id)) if id == stranger
        ));
    }

    /// A hand-driven peer that never acknowledges.
    fn raw_peer(net: &UdpNetwork) -> (StdUdpSocket, RemoteId, SessionId) {
        let raw = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        raw.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let id = RemoteId::generate();
        let session = SessionId::generate();
        let mut buf = Vec::new();
        frame::encode(&Frame::Hello { session, id }, &mut buf).unwrap();
        raw.send_to(&buf, net.local_endpoint().as_socket_addr()).unwrap();
        poll_until(net, |e| *e == NetworkEvent::Connected(id));
        (raw, id, session)
    }

    fn recv_data(raw: &StdUdpSocket) -> (u32, Vec<u8>) {
        let mut buf = [0u8; 2048];
        loop {
            let (len, _) = raw.recv_from(&mut buf).unwrap();
            if let Ok(Frame::Data { seq, payload, .. }) = frame::decode(&buf[..len]) {
                return (seq, payload.to_vec());
            }
        }
    }

    #[test]
    fn unacknowledged_frame_is_retransmitted() {
        let net = network();
        let (raw, id, _) = raw_peer(&net);

        net.send(Message::new(id, ChannelType::ReliableOrdered, b"state".to_vec()))
            .unwrap();
        assert_eq!(recv_data(&raw), (0, b"state".to_vec()));

        // Driving the network's timers resends the frame.
        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            net.poll(Some(Duration::from_millis(5))).unwrap();
        }
        assert_eq!(recv_data(&raw), (0, b"state".to_vec()));
    }

    #[test]
    fn reliable_frames_are_delivered_in_order() {
        let net = network();
        let (raw, id, session) = raw_peer(&net);
        let to = net.local_endpoint().as_socket_addr();

        let mut buf = Vec::new();
        for seq in [1u32, 0, 1, 2] {
            let payload = [seq as u8];
            frame::encode(
                &Frame::Data {
                    session,
                    channel: ChannelType::ReliableOrdered,
                    seq,
                    payload: &payload,
                },
                &mut buf,
            )
            .unwrap();
            raw.send_to(&buf, to).unwrap();
        }

        let mut delivered = Vec::new();
        poll_until(&net, |e| {
            if let NetworkEvent::Message(m) = e {
                assert_eq!(m.remote(), id);
                delivered.push(m.payload()[0]);
            }
            delivered.len() == 3
        });
        assert_eq!(delivered, vec![0, 1, 2]);
    }

    #[test]
    fn bye_disconnects_peer() {
        let net = network();
        let (raw, id, session) = raw_peer(&net);
        let mut buf = Vec::new();
        frame::encode(&Frame::Bye { session }, &mut buf).unwrap();
        raw.send_to(&buf, net.local_endpoint().as_socket_addr()).unwrap();
        poll_until(&net, |e| *e == NetworkEvent::Disconnected(id));
        assert!(!net.is_connected(id));
    }
}
