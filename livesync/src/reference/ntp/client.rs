use std::io::{self, ErrorKind};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::{Duration, SystemTime};

use minstant::Instant;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};

use super::packet::{
    Mode, NTP_PORT, NtpPacket, NtpTimestamp, PACKET_LEN, system_time_from_unix_nanos, unix_nanos,
};
use crate::net::TransportError;
use crate::trace::{debug, warn};

/// How long a request waits for its reply.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

const SOCKET: Token = Token(0);
const RECV_BUFFER_LEN: usize = 1024;

/// Result of one request/reply exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpSample {
    /// Estimated server time at the moment the reply arrived.
    pub time: SystemTime,
    /// Correction from the client clock to the server clock, in nanoseconds.
    pub offset_nanos: i64,
    /// Request to reply time minus the server's processing time.
    pub round_trip: Duration,
}

struct Connection {
    host: String,
    socket: UdpSocket,
    poll: Poll,
    events: Events,
}

/// Blocking SNTP client with a bounded wait per request.
///
/// The socket is created on first use and reused until the server changes
/// or [`disconnect`](Self::disconnect) is called.
#[derive(Default)]
pub struct NtpClient {
    connection: Option<Connection>,
    timeout: Option<Duration>,
}

impl NtpClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn disconnect(&mut self) {
        self.connection = None;
    }

    /// Asks `server` for the time, stamping the request with `local_time`.
    ///
    /// `server` is a host name or address, with an optional `:port`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the server cannot be resolved, the
    /// request cannot be sent, no valid reply arrives within the timeout,
    /// or the reply is malformed.
    pub fn poll_time(
        &mut self,
        server: &str,
        local_time: SystemTime,
    ) -> Result<NtpSample, TransportError> {
        let result = self.exchange(server, local_time);
        if let Err(err) = &result {
            if should_log(err) {
                warn!(server, error = %err, "ntp poll failed");
            }
            if !matches!(err, TransportError::Timeout) {
                self.disconnect();
            }
        }
        result
    }

    fn exchange(
        &mut self,
        server: &str,
        local_time: SystemTime,
    ) -> Result<NtpSample, TransportError> {
        let timeout = self.timeout.unwrap_or(REQUEST_TIMEOUT);
        let connection = self.connect(server)?;

        let started = Instant::now();
        let transmit = NtpTimestamp::from_system_time(local_time);
        let request = NtpPacket::client_request(transmit);
        connection.socket.send(request.as_bytes())?;

        let deadline = started + timeout;
        let mut buf = [0u8; RECV_BUFFER_LEN];
        let reply = loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(TransportError::Timeout)?;
            connection.poll.poll(&mut connection.events, Some(remaining))?;

            if let Some(reply) = drain_replies(&connection.socket, &mut buf, transmit)? {
                break reply;
            }
        };
        let elapsed = started.elapsed();

        // t1 client send, t2 server receive, t3 server transmit, t4 client receive.
        let t1 = unix_nanos(local_time);
        let t4 = t1 + elapsed.as_nanos() as i128;
        let t2 = reply.receive_timestamp().to_unix_nanos();
        let t3 = reply.transmit_timestamp().to_unix_nanos();

        let offset = ((t2 - t1) + (t3 - t4)) / 2;
        let round_trip = ((t4 - t1) - (t3 - t2)).max(0);

        debug!(
            server,
            offset_ms = offset as f64 / 1e6,
            round_trip_ms = round_trip as f64 / 1e6,
            "ntp reply"
        );

        Ok(NtpSample {
            time: system_time_from_unix_nanos(t4 + offset),
            offset_nanos: offset.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64,
            round_trip: Duration::from_nanos(round_trip.min(i128::from(u64::MAX)) as u64),
        })
    }

    fn connect(&mut self, server: &str) -> Result<&mut Connection, TransportError> {
        let server = server.trim();
        if self.connection.as_ref().is_some_and(|c| c.host != server) {
            self.disconnect();
        }

        if self.connection.is_none() {
            let addr = resolve(server)?;
            let bind: SocketAddr = if addr.is_ipv4() {
                (IpAddr::from([0, 0, 0, 0]), 0).into()
            } else {
                (IpAddr::from([0u16; 8]), 0).into()
            };
            let mut socket = UdpSocket::bind(bind)?;
            socket.connect(addr)?;

            let poll = Poll::new()?;
            poll.registry()
                .register(&mut socket, SOCKET, Interest::READABLE)?;

            debug!(server, %addr, "ntp socket connected");
            self.connection = Some(Connection {
                host: server.to_owned(),
                socket,
                poll,
                events: Events::with_capacity(4),
            });
        }

        self.connection
            .as_mut()
            .ok_or_else(|| TransportError::Resolve(server.to_owned()))
    }
}

/// Reads every pending datagram, returning the first valid server reply to
/// the request stamped `transmit`. Stale replies to earlier requests are
/// skipped.
fn drain_replies(
    socket: &UdpSocket,
    buf: &mut [u8],
    transmit: NtpTimestamp,
) -> Result<Option<NtpPacket>, TransportError> {
    loop {
        let len = match socket.recv(buf) {
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        if len < PACKET_LEN {
            continue;
        }
        let packet = NtpPacket::from_bytes(&buf[..len])?;
        if packet.mode() != Mode::Server {
            return Err(TransportError::UnexpectedReply("reply is not in server mode"));
        }
        if packet.originate_timestamp() == transmit {
            return Ok(Some(packet));
        }
    }
}

fn resolve(server: &str) -> Result<SocketAddr, TransportError> {
    if server.is_empty() {
        return Err(TransportError::Resolve(server.to_owned()));
    }

    let addrs: io::Result<std::vec::IntoIter<SocketAddr>> = if let Ok(ip) = server.parse() {
        Ok(vec![SocketAddr::new(ip, NTP_PORT)].into_iter())
    } else if server.contains(':') {
        server.to_socket_addrs()
    } else {
        (server, NTP_PORT).to_socket_addrs()
    };

    addrs
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| TransportError::Resolve(server.to_owned()))
}

/// Errors that happen while a socket is being torn down are expected.
fn should_log(err: &TransportError) -> bool {
    match err {
        TransportError::Io(e) => !matches!(
            e.kind(),
            ErrorKind::Interrupted | ErrorKind::ConnectionAborted | ErrorKind::NotConnected
        ),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;
    use std::thread;

    #[test]
    fn resolves_literal_addresses() {
        assert_eq!(
            resolve("127.0.0.1").unwrap(),
            "127.0.0.1:123".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve("127.0.0.1:4123").unwrap(),
            "127.0.0.1:4123".parse::<SocketAddr>().unwrap()
        );
        assert!(matches!(resolve(""), Err(TransportError::Resolve(_))));
    }

    #[test]
    fn times_out_without_reply() {
        let silent = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let server = silent.local_addr().unwrap().to_string();

        let mut client = NtpClient::new().with_timeout(Duration::from_millis(50));
        let result = client.poll_time(&server, SystemTime::now());
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert!(client.is_connected());
    }

    #[test]
    fn rejects_non_server_replies() {
        let server = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap().to_string();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (_, from) = server.recv_from(&mut buf).unwrap();
            // Echo the request untouched: still client mode.
            server.send_to(&buf[..PACKET_LEN], from).unwrap();
        });

        let mut client = NtpClient::new();
        let result = client.poll_time(&addr, SystemTime::now());
        handle.join().unwrap();
        assert!(matches!(result, Err(TransportError::UnexpectedReply(_))));
        assert!(!client.is_connected());
    }
}
