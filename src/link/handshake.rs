//! Handshake exchange engine
//!
//! One descriptor round-trip per session, with an elongated receive
//! timeout. The client sends first and pins the peer from the source
//! address of the reply; the server receives first, pins the source, then
//! replies. Pinning from the observed source supports NAT and unknown
//! client ports; the trust model is LAN isolation.

use crate::error::{Error, Result};
use crate::link::frame::{Descriptor, DESCRIPTOR_LEN};
use crate::link::socket::{is_timeout, LinkSocket};
use std::net::SocketAddr;

/// Default handshake receive timeout, seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: f64 = 15.0;

/// Oversized datagrams must be observable, so the receive buffer is larger
/// than the descriptor itself.
const HANDSHAKE_BUFFER_SIZE: usize = 64;

/// Perform the descriptor exchange and shape agreement
///
/// On success the peer address is pinned on the socket, the normal receive
/// timeout is restored, and the peer's descriptor is returned. On failure
/// the session stays in a closable state and the caller may retry.
pub(crate) fn exchange(
    socket: &mut LinkSocket,
    ours: &Descriptor,
    is_server: bool,
    timeout_secs: f64,
    normal_timeout_secs: f64,
) -> Result<Descriptor> {
    socket
        .set_read_timeout(timeout_secs)
        .map_err(|e| Error::Handshake(format!("failed to set handshake timeout: {}", e)))?;

    let our_bytes = ours.encode();

    let (peer_bytes, peer_addr) = if is_server {
        log::info!("Server is waiting for a handshake...");
        let (bytes, peer) = recv_descriptor(socket)?;
        socket.set_remote(peer);
        socket.send(&our_bytes)?;
        (bytes, peer)
    } else {
        let remote = socket
            .remote()
            .ok_or_else(|| Error::NotReady("no remote address set".to_string()))?;
        log::info!("Client sending handshake to {}", remote);
        socket.send(&our_bytes)?;
        let (bytes, peer) = recv_descriptor(socket)?;
        socket.set_remote(peer);
        (bytes, peer)
    };

    // Restore the normal receive timeout before parsing; a failure here is
    // not fatal to the session.
    if let Err(e) = socket.set_read_timeout(normal_timeout_secs) {
        log::warn!("Failed to restore normal receive timeout: {}", e);
    }

    let theirs = Descriptor::decode(&peer_bytes)?;

    if theirs.num_inputs != ours.num_outputs {
        return Err(Error::Handshake(format!(
            "mismatch: remote expects {} values, we provide {}",
            theirs.num_inputs, ours.num_outputs
        )));
    }
    if theirs.num_outputs != ours.num_inputs {
        return Err(Error::Handshake(format!(
            "mismatch: remote provides {} values, we expect {}",
            theirs.num_outputs, ours.num_inputs
        )));
    }

    log::debug!(
        "Handshake OK | remote: outputs={}, inputs={}, type='{}', max_age={} s | local: outputs={}, inputs={}, max_age={} s | peer={}",
        theirs.num_outputs,
        theirs.num_inputs,
        theirs.send_type,
        theirs.max_age,
        ours.num_outputs,
        ours.num_inputs,
        ours.max_age,
        peer_addr
    );

    Ok(theirs)
}

/// Receive one handshake datagram; the byte count must be exactly 7
fn recv_descriptor(socket: &LinkSocket) -> Result<([u8; DESCRIPTOR_LEN], SocketAddr)> {
    let mut buf = [0u8; HANDSHAKE_BUFFER_SIZE];
    match socket.recv_from(&mut buf) {
        Ok((n, peer)) => {
            if n != DESCRIPTOR_LEN {
                return Err(Error::Handshake(format!(
                    "expected a {}-byte descriptor, received {} bytes",
                    DESCRIPTOR_LEN, n
                )));
            }
            let mut bytes = [0u8; DESCRIPTOR_LEN];
            bytes.copy_from_slice(&buf[..DESCRIPTOR_LEN]);
            Ok((bytes, peer))
        }
        Err(ref e) if is_timeout(e) => Err(Error::Handshake("receive timed out".to_string())),
        Err(e) => Err(Error::Handshake(format!("receive failed: {}", e))),
    }
}
