//! Datagram endpoint abstraction
//!
//! [`DatagramEndpoint`] is a thin wrapper around `std::net::UdpSocket` used by
//! both the identity announcer and the sync listener. All protocol logic lives
//! in those components; this module owns only byte I/O.

use crate::error::Result;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Maximum expected datagram size. Timestamp samples are 8 bytes and control
/// messages are short ASCII strings; 1 KiB leaves generous headroom.
pub const MAX_DATAGRAM: usize = 1024;

/// A bound UDP endpoint for the unreliable sync channel.
pub struct DatagramEndpoint {
    socket: UdpSocket,
}

impl DatagramEndpoint {
    /// Bind a datagram endpoint on the given local port (0 = ephemeral).
    pub fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        Ok(Self { socket })
    }

    /// Local address the endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Set the blocking-receive timeout so a receive loop can periodically
    /// observe its stop flag.
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<()> {
        self.socket.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Send one datagram, fire-and-forget.
    pub fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, target)?)
    }

    /// Receive one datagram, returning the payload length and sender.
    /// Blocks until a packet arrives, the read timeout elapses, or the socket
    /// is torn down.
    pub fn recv(&self, buffer: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buffer)?)
    }
}
