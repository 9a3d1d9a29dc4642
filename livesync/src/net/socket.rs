//! Non-blocking UDP socket for [`UdpNetwork`](super::UdpNetwork).
//!
//! mio does not expose socket options, so buffer sizing goes through rustix.

use std::io::{self, ErrorKind};
use std::os::fd::AsFd;

use mio::event::Source;
use mio::net::UdpSocket as MioUdpSocket;
use mio::{Interest, Registry, Token};

use super::Endpoint;

/// A mio UDP socket that reports `WouldBlock` as `Ok(None)`.
pub struct UdpSocket {
    inner: MioUdpSocket,
}

impl UdpSocket {
    /// # Errors
    ///
    /// Returns the bind error, e.g. when the address is in use.
    pub fn bind(endpoint: Endpoint) -> io::Result<Self> {
        Ok(Self {
            inner: MioUdpSocket::bind(endpoint.into())?,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the address cannot be read.
    pub fn local_addr(&self) -> io::Result<Endpoint> {
        self.inner.local_addr().map(Endpoint::from)
    }

    /// Sends one datagram, or `Ok(None)` if the socket is not writable.
    ///
    /// # Errors
    ///
    /// Any I/O error other than `WouldBlock`.
    pub fn try_send_to(&self, buf: &[u8], dest: Endpoint) -> io::Result<Option<usize>> {
        match self.inner.send_to(buf, dest.into()) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Receives one datagram, or `Ok(None)` when none is queued.
    ///
    /// # Errors
    ///
    /// Any I/O error other than `WouldBlock`.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Endpoint)>> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, Endpoint::from(addr)))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Requests `size` bytes for both kernel buffers. The kernel may round
    /// or cap the value; read it back with [`recv_buffer_size`](Self::recv_buffer_size).
    ///
    /// # Errors
    ///
    /// Returns an error if either option cannot be set.
    pub fn set_buffer_sizes(&self, size: usize) -> io::Result<()> {
        let fd = self.inner.as_fd();
        rustix::net::sockopt::set_socket_recv_buffer_size(fd, size)?;
        rustix::net::sockopt::set_socket_send_buffer_size(fd, size)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the option cannot be read.
    pub fn recv_buffer_size(&self) -> io::Result<usize> {
        Ok(rustix::net::sockopt::socket_recv_buffer_size(self.inner.as_fd())?)
    }
}

impl Source for UdpSocket {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.inner.deregister(registry)
    }
}
