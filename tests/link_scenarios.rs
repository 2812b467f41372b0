//! End-to-end loopback scenarios for the UDP link
//!
//! Every test runs real sockets on 127.0.0.1 with OS-assigned ports. Fault
//! injection (corruption, bad shapes, oversized handshakes) goes through a
//! raw datagram socket speaking the wire format directly.

use crossbeam_channel::Receiver;
use setu_link::link::frame::{encode_data, Descriptor, ScalarType};
use setu_link::link::{CleanupListener, LinkOptions, UdpLink};
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

/// A link endpoint wired to its own cleanup listener
struct Endpoint {
    link: UdpLink,
    listener: CleanupListener,
    cleanup_rx: Receiver<()>,
}

impl Endpoint {
    fn server(num_inputs: u16, num_outputs: u16, max_age: f64) -> Self {
        Self::new("0.0.0.0", 0, num_inputs, num_outputs, max_age, true)
    }

    fn client(port: u16, num_inputs: u16, num_outputs: u16, max_age: f64) -> Self {
        Self::new("127.0.0.1", port, num_inputs, num_outputs, max_age, false)
    }

    fn new(
        host: &str,
        port: u16,
        num_inputs: u16,
        num_outputs: u16,
        max_age: f64,
        is_server: bool,
    ) -> Self {
        let (listener, cleanup_rx) = CleanupListener::bind(0).unwrap();
        let mut link = UdpLink::new(LinkOptions {
            max_age_seconds: max_age,
            socket_timeout_seconds: 0.2,
            delay_tracking: true,
            cleanup_port: listener.port(),
            ..LinkOptions::default()
        });
        link.setup(host, port, num_inputs, num_outputs, is_server)
            .unwrap();
        Self {
            link,
            listener,
            cleanup_rx,
        }
    }

    fn port(&self) -> u16 {
        self.link.local_port().unwrap()
    }
}

/// Run both handshakes concurrently and return their results
fn handshake_pair(
    mut server: Endpoint,
    mut client: Endpoint,
) -> (Endpoint, Endpoint, setu_link::Result<()>, setu_link::Result<()>) {
    let server_thread = thread::spawn(move || {
        let result = server.link.handshake(5.0);
        (server, result)
    });
    let client_result = client.link.handshake(5.0);
    let (server, server_result) = server_thread.join().unwrap();
    (server, client, server_result, client_result)
}

/// A raw peer speaking the wire format without a `UdpLink`
struct RawPeer {
    socket: UdpSocket,
    server: std::net::SocketAddr,
}

impl RawPeer {
    /// Complete a handshake against a server-mode link
    ///
    /// The server endpoint's `handshake` must run concurrently; the
    /// descriptor sent here advertises `num_outputs`/`num_inputs` from the
    /// raw peer's perspective.
    fn handshake(server_port: u16, num_outputs: u16, num_inputs: u16) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let server = format!("127.0.0.1:{}", server_port).parse().unwrap();

        let descriptor = Descriptor::new(num_outputs, num_inputs, ScalarType::F32, 3.0);
        socket.send_to(&descriptor.encode(), server).unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(n, 7, "server must reply with a 7-byte descriptor");

        Self { socket, server }
    }

    fn send(&self, bytes: &[u8]) {
        self.socket.send_to(bytes, self.server).unwrap();
    }
}

/// Handshake a server endpoint against a raw peer
fn raw_handshake(mut server: Endpoint, peer_outputs: u16, peer_inputs: u16) -> (Endpoint, RawPeer) {
    let port = server.port();
    let server_thread = thread::spawn(move || {
        let result = server.link.handshake(5.0);
        (server, result)
    });
    let peer = RawPeer::handshake(port, peer_outputs, peer_inputs);
    let (server, result) = server_thread.join().unwrap();
    result.unwrap();
    (server, peer)
}

fn poll_latest(link: &UdpLink, timeout: Duration) -> Option<Vec<f32>> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(values) = link.get_latest() {
            return Some(values);
        }
        thread::sleep(Duration::from_millis(5));
    }
    None
}

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn mirror_session_delivers_each_payload_once() {
    let server = Endpoint::server(3, 0, 3.0);
    let client = Endpoint::client(server.port(), 0, 3, 3.0);

    let (mut server, mut client, server_result, client_result) = handshake_pair(server, client);
    server_result.unwrap();
    client_result.unwrap();

    server.link.start().unwrap();
    client.link.start().unwrap();

    client.link.send(&[1.0, -2.5, 0.25]).unwrap();

    let values = poll_latest(&server.link, Duration::from_millis(500))
        .expect("payload not delivered within 500 ms");
    assert_eq!(values, vec![1.0, -2.5, 0.25]);

    // One-shot delivery: the same payload is never returned twice
    assert!(server.link.get_latest().is_none());

    let status = server.link.get_status();
    assert_eq!(status.packets_received, 1);
    assert_eq!(status.packets_corrupted, 0);
    assert_eq!(status.packets_shape_invalid, 0);
    assert_eq!(status.receive_type, Some(ScalarType::F32));
    assert_eq!(client.link.get_status().packets_sent, 1);

    server.link.close().unwrap();
    client.link.close().unwrap();
    server.listener.close();
    client.listener.close();
}

#[test]
fn corrupted_datagram_is_counted_and_dropped() {
    let server = Endpoint::server(3, 0, 3.0);
    let (mut server, peer) = raw_handshake(server, 3, 0);
    server.link.start().unwrap();

    let mut frame = encode_data(&[1.0, -2.5, 0.25]);
    frame[0] ^= 0x01;
    peer.send(&frame);

    assert!(wait_for(
        || server.link.get_status().packets_corrupted == 1,
        Duration::from_secs(2)
    ));

    let status = server.link.get_status();
    assert_eq!(status.packets_received, 0);
    assert!(server.link.get_latest().is_none());

    server.link.close().unwrap();
}

#[test]
fn malformed_shapes_are_counted_and_dropped() {
    let server = Endpoint::server(3, 0, 3.0);
    let (mut server, peer) = raw_handshake(server, 3, 0);
    server.link.start().unwrap();

    // Valid CRC over the wrong number of values
    peer.send(&encode_data(&[1.0, 2.0]));
    // Shorter than the CRC trailer itself
    peer.send(&[0xAB]);

    assert!(wait_for(
        || server.link.get_status().packets_shape_invalid == 2,
        Duration::from_secs(2)
    ));

    let status = server.link.get_status();
    assert_eq!(status.packets_received, 0);
    assert_eq!(status.packets_corrupted, 0);
    assert!(server.link.get_latest().is_none());

    server.link.close().unwrap();
}

#[test]
fn handshake_shape_mismatch_fails_both_sides() {
    let server = Endpoint::server(3, 0, 3.0);
    let client = Endpoint::client(server.port(), 0, 2, 3.0);

    let (mut server, mut client, server_result, client_result) = handshake_pair(server, client);
    assert!(server_result.is_err());
    assert!(client_result.is_err());

    // Neither side may transition to running
    assert!(server.link.start().is_err());
    assert!(client.link.start().is_err());
    assert!(!server.link.get_status().running);
    assert!(!client.link.get_status().running);

    server.link.close().unwrap();
    client.link.close().unwrap();
}

#[test]
fn oversized_handshake_datagram_is_rejected() {
    let mut server = Endpoint::server(3, 0, 3.0);
    let port = server.port();

    let sender = thread::spawn(move || {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        // Give the server a moment to enter its receive
        thread::sleep(Duration::from_millis(100));
        socket
            .send_to(&[0u8; 9], ("127.0.0.1", port))
            .unwrap();
    });

    assert!(server.link.handshake(2.0).is_err());
    sender.join().unwrap();
    server.link.close().unwrap();
}

#[test]
fn client_handshake_times_out_against_silent_peer() {
    // A bound socket that never answers
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = silent.local_addr().unwrap().port();

    let mut client = Endpoint::client(port, 0, 3, 3.0);
    let start = Instant::now();
    assert!(client.link.handshake(0.3).is_err());
    assert!(start.elapsed() < Duration::from_secs(2));

    client.link.close().unwrap();
}

#[test]
fn second_handshake_is_rejected() {
    let server = Endpoint::server(3, 0, 3.0);
    let client = Endpoint::client(server.port(), 0, 3, 3.0);

    let (mut server, mut client, server_result, client_result) = handshake_pair(server, client);
    server_result.unwrap();
    client_result.unwrap();

    assert!(server.link.handshake(1.0).is_err());
    assert!(client.link.handshake(1.0).is_err());

    server.link.close().unwrap();
    client.link.close().unwrap();
}

#[test]
fn stale_payload_expires_instead_of_delivering() {
    let server = Endpoint::server(3, 0, 1.0);
    let (mut server, peer) = raw_handshake(server, 3, 0);
    server.link.start().unwrap();

    peer.send(&encode_data(&[0.5, 0.5, 0.5]));
    assert!(wait_for(
        || server.link.get_status().packets_received == 1,
        Duration::from_secs(2)
    ));

    thread::sleep(Duration::from_millis(1500));

    assert!(server.link.get_latest().is_none());
    assert_eq!(server.link.get_status().packets_expired, 1);

    server.link.close().unwrap();
}

#[test]
fn send_shape_violations_fail_without_transmitting() {
    let server = Endpoint::server(2, 2, 3.0);
    let client = Endpoint::client(server.port(), 2, 2, 3.0);

    let (server, mut client, server_result, client_result) = handshake_pair(server, client);
    server_result.unwrap();
    client_result.unwrap();

    assert!(client.link.send(&[1.0]).is_err());
    assert!(client.link.send(&[1.0, 2.0, 3.0]).is_err());
    assert_eq!(client.link.get_status().packets_sent, 0);

    client.link.close().unwrap();
    drop(server);
}

#[test]
fn zero_output_endpoint_cannot_send() {
    let server = Endpoint::server(3, 0, 3.0);
    let (server, _peer) = raw_handshake(server, 3, 0);

    assert!(server.link.send(&[]).is_err());
    assert_eq!(server.link.get_status().packets_sent, 0);
    drop(server);
}

#[test]
fn watchdog_trips_and_signals_backchannel_once() {
    // Receiver with a 1 s freshness bound: the cleanup threshold floors at
    // 5 s. The pure sender on the other side has no liveness expectation
    // and must stay quiet for the whole wait.
    let server = Endpoint::server(3, 0, 1.0);
    let client = Endpoint::client(server.port(), 0, 3, 1.0);

    let (mut server, mut client, server_result, client_result) = handshake_pair(server, client);
    server_result.unwrap();
    client_result.unwrap();

    server.link.start().unwrap();
    client.link.start().unwrap();

    // Deliver nothing; the watchdog should fire close to the 5 s floor
    server
        .cleanup_rx
        .recv_timeout(Duration::from_secs(8))
        .expect("watchdog did not signal the back-channel");

    // The pure sender never trips
    assert!(client.cleanup_rx.try_recv().is_err());
    assert!(client.link.get_status().running);

    server.link.close().unwrap();
    assert!(!server.link.get_status().running);
    client.link.close().unwrap();
}

#[test]
fn drive_mirror_soak_keeps_counters_consistent() {
    let server = Endpoint::server(2, 2, 3.0);
    let client = Endpoint::client(server.port(), 2, 2, 3.0);

    let (mut server, mut client, server_result, client_result) = handshake_pair(server, client);
    server_result.unwrap();
    client_result.unwrap();

    server.link.start().unwrap();
    client.link.start().unwrap();

    for i in 0..100 {
        let phase = i as f32 * 0.01;
        server.link.send(&[phase, -phase]).unwrap();
        client.link.send(&[1.0 - phase, phase]).unwrap();
        thread::sleep(Duration::from_millis(10));
    }

    // Let the last datagrams land
    thread::sleep(Duration::from_millis(200));

    let server_status = server.link.get_status();
    let client_status = client.link.get_status();

    assert_eq!(server_status.packets_sent, 100);
    assert_eq!(client_status.packets_sent, 100);

    // Best-effort delivery: received plus drops accounts for everything
    // the peer sent; on loopback nearly everything arrives.
    for status in [&server_status, &client_status] {
        assert!(status.packets_received >= 90, "too many drops on loopback");
        assert!(
            status.packets_received
                + status.packets_corrupted
                + status.packets_shape_invalid
                <= 100
        );
    }

    // Inter-arrival tracking saw the 10 ms cadence
    let delay = server.link.delay_stats();
    assert!(delay.count() > 0);
    assert!(delay.mean() > 0.0);

    server.link.close().unwrap();
    client.link.close().unwrap();
}

#[test]
fn close_is_idempotent_from_running_state() {
    let server = Endpoint::server(3, 0, 3.0);
    let client = Endpoint::client(server.port(), 0, 3, 3.0);

    let (mut server, mut client, server_result, client_result) = handshake_pair(server, client);
    server_result.unwrap();
    client_result.unwrap();

    server.link.start().unwrap();

    server.link.close().unwrap();
    server.link.close().unwrap();
    server.link.close().unwrap();
    assert!(!server.link.get_status().running);

    client.link.close().unwrap();
}
