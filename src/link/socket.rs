//! Datagram socket facade
//!
//! One unconnected UDP endpoint per session. In server mode it binds
//! `0.0.0.0` on the configured port; in client mode it binds an ephemeral
//! port and remembers the resolved peer address for `send`. A receive
//! timeout keeps every blocking read bounded so loops can observe
//! cancellation.

use crate::error::{Error, Result};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// The session's datagram endpoint
pub(crate) struct LinkSocket {
    socket: UdpSocket,
    remote: Option<SocketAddr>,
}

impl LinkSocket {
    /// Bind a server endpoint on all interfaces
    ///
    /// Port 0 asks the OS for a free port; see [`LinkSocket::local_port`].
    pub fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        log::debug!("UDP server bound to port {}", socket.local_addr()?.port());
        Ok(Self {
            socket,
            remote: None,
        })
    }

    /// Prepare a client endpoint targeting `host:port`
    pub fn client(host: &str, port: u16) -> Result<Self> {
        let remote = resolve(host, port)?;
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        log::debug!("UDP client prepared for {}", remote);
        Ok(Self {
            socket,
            remote: Some(remote),
        })
    }

    /// Apply a receive timeout, in fractional seconds
    pub fn set_read_timeout(&self, timeout_secs: f64) -> Result<()> {
        self.socket
            .set_read_timeout(Some(Duration::from_secs_f64(timeout_secs)))?;
        Ok(())
    }

    /// Receive one datagram; timeouts surface as [`is_timeout`] errors
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    /// Send a datagram to the remembered peer
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        let remote = self
            .remote
            .ok_or_else(|| Error::NotReady("no remote address set".to_string()))?;
        Ok(self.socket.send_to(buf, remote)?)
    }

    /// Pin the peer address (from the handshake source)
    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote = Some(addr);
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// The locally bound port
    pub fn local_port(&self) -> Option<u16> {
        self.socket.local_addr().ok().map(|a| a.port())
    }

    /// A second handle to the same endpoint, for the receive thread
    pub fn try_clone_socket(&self) -> Result<UdpSocket> {
        Ok(self.socket.try_clone()?)
    }
}

/// Resolve a peer host: numeric address first, DNS lookup as fallback
fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::new(IpAddr::V4(ip), port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::Resolve(host.to_string()))?
        .find(|a| a.is_ipv4())
        .ok_or_else(|| Error::Resolve(host.to_string()))
}

/// Whether an I/O error is a receive-timeout wakeup
///
/// Read timeouts report `WouldBlock` on Unix and `TimedOut` on Windows.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_numeric() {
        let addr = resolve("127.0.0.1", 9500).unwrap();
        assert_eq!(addr, "127.0.0.1:9500".parse().unwrap());
    }

    #[test]
    fn test_resolve_localhost() {
        let addr = resolve("localhost", 9500).unwrap();
        assert_eq!(addr.port(), 9500);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let socket = LinkSocket::bind(0).unwrap();
        assert!(socket.local_port().unwrap() > 0);
        assert!(socket.remote().is_none());
    }

    #[test]
    fn test_send_without_remote_fails() {
        let socket = LinkSocket::bind(0).unwrap();
        assert!(socket.send(&[0x01]).is_err());
    }

    #[test]
    fn test_timed_receive_wakes_up() {
        let socket = LinkSocket::bind(0).unwrap();
        socket.set_read_timeout(0.05).unwrap();
        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert!(is_timeout(&err));
    }
}
