// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end TCP transfers through a same-process echo pair, checked with a
//! content-hash oracle: the synchronous path, the delegate-driven
//! asynchronous path, and partial-transfer reassembly.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use portico_io::{
    BackgroundReactor, IpEndpoint, Socket, SocketContext, SocketKind,
};
use xxhash_rust::xxh3::xxh3_64;

const IO_TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));
const ECHO_CHUNK: usize = 32 * 1024;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn payload(len: usize) -> BytesMut {
    let bytes: Vec<u8> = (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 11)) as u8)
        .collect();
    BytesMut::from(bytes.as_slice())
}

/// Sends every byte of `data`, re-slicing by the transferred count.
fn send_all(socket: &Socket, mut data: BytesMut) {
    while !data.is_empty() {
        let (returned, sent) = socket.send(data, IO_TIMEOUT).unwrap();
        assert!(sent > 0, "send made no progress");
        data = returned;
        data.advance(sent);
    }
}

/// Receives exactly `len` bytes, looping on partial chunks.
fn receive_exactly(socket: &Socket, len: usize, chunk: usize) -> Vec<u8> {
    let mut received = Vec::with_capacity(len);
    while received.len() < len {
        let (buffer, got) = socket
            .receive(BytesMut::with_capacity(chunk), IO_TIMEOUT)
            .unwrap();
        assert!(got > 0, "peer closed before the payload was complete");
        received.extend_from_slice(&buffer[..]);
    }
    assert_eq!(received.len(), len, "peer over-delivered");
    received
}

/// Binds a listener on a kernel-chosen loopback port and echoes everything
/// one accepted connection sends, until that peer closes.
fn start_echo_server() -> (u16, thread::JoinHandle<()>) {
    let listener = Socket::new(SocketKind::Tcp).unwrap();
    listener.bind(IpEndpoint::loopback(0)).unwrap();
    listener.listen().unwrap();
    let port = listener.local_endpoint().unwrap().port();

    let server = thread::spawn(move || {
        let conn = listener.accept(IO_TIMEOUT).unwrap();
        loop {
            let (buffer, got) = conn
                .receive(BytesMut::with_capacity(ECHO_CHUNK), IO_TIMEOUT)
                .unwrap();
            if got == 0 {
                break;
            }
            send_all(&conn, buffer);
        }
    });

    (port, server)
}

#[test]
fn tcp_sync_echo_round_trip_preserves_content() {
    init_logging();
    let (port, server) = start_echo_server();

    let client = Socket::new(SocketKind::Tcp).unwrap();
    client.connect(IpEndpoint::loopback(port), IO_TIMEOUT).unwrap();

    for size in [1_usize, 64, 1024, 32_768, 65_536, 76_800, 204_800] {
        let outbound = payload(size);
        let sent_hash = xxh3_64(&outbound);

        send_all(&client, outbound);
        let echoed = receive_exactly(&client, size, ECHO_CHUNK);
        assert_eq!(xxh3_64(&echoed), sent_hash, "mismatch at {size} bytes");
    }

    client.shutdown(portico_io::SocketShutdown::Send).unwrap();
    server.join().unwrap();
}

#[test]
fn tcp_multi_megabyte_payload_reassembles_through_a_tiny_buffer() {
    init_logging();
    let (port, server) = start_echo_server();

    let client = Socket::new(SocketKind::Tcp).unwrap();
    client.connect(IpEndpoint::loopback(port), IO_TIMEOUT).unwrap();

    let size = 3 * 1024 * 1024;
    let outbound = payload(size);
    let sent_hash = xxh3_64(&outbound);

    // Push from a helper thread while this thread reassembles the echo
    // through a deliberately small 4 KiB per-call buffer; without the
    // overlap the echo server would stall once the kernel buffers fill.
    let echoed = thread::scope(|scope| {
        let client = &client;
        scope.spawn(move || {
            send_all(client, outbound);
            client.shutdown(portico_io::SocketShutdown::Send).unwrap();
        });
        receive_exactly(client, size, 4096)
    });

    assert_eq!(xxh3_64(&echoed), sent_hash);
    server.join().unwrap();
}

/// The delegate-driven path: the listener accepts asynchronously into a
/// pre-created socket, and the client's receives are issued asynchronously
/// with a completion handler, all delivered by a background reactor.
#[test]
fn tcp_async_delegates_echo_round_trip() {
    init_logging();
    let reactor = BackgroundReactor::new().unwrap();

    // Server side: async accept into a pre-created peer socket.
    let listener = Socket::new(SocketKind::Tcp).unwrap();
    listener.bind(IpEndpoint::loopback(0)).unwrap();
    listener.listen().unwrap();
    listener.associate(reactor.proactor()).unwrap();
    let port = listener.local_endpoint().unwrap().port();

    let (accept_tx, accept_rx) = mpsc::channel();
    let mut accept_context = SocketContext::new();
    accept_context.set_accept_socket(Socket::new(SocketKind::Tcp).unwrap());
    accept_context.set_handler(move |context: SocketContext| {
        accept_tx.send(context).unwrap();
    });
    listener.accept_async(accept_context).unwrap();

    // Client side: plain synchronous connect.
    let client = Socket::new(SocketKind::Tcp).unwrap();
    client.connect(IpEndpoint::loopback(port), IO_TIMEOUT).unwrap();
    client.associate(reactor.proactor()).unwrap();

    let mut accepted = accept_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(accepted.take_error().is_none());
    assert!(accepted.remote_endpoint().is_some());
    let conn = accepted.take_accept_socket().unwrap();

    // Echo server thread working synchronously over the accepted socket.
    let server = thread::spawn(move || {
        loop {
            let (buffer, got) = conn
                .receive(BytesMut::with_capacity(ECHO_CHUNK), IO_TIMEOUT)
                .unwrap();
            if got == 0 {
                break;
            }
            send_all(&conn, buffer);
        }
    });

    for size in [1_usize, 64, 1024, 32_768, 65_536, 76_800, 204_800] {
        let outbound = payload(size);
        let sent_hash = xxh3_64(&outbound);
        send_all(&client, outbound);

        // Reassemble via delegate-driven asynchronous receives: each
        // completion hands the context back and the next receive is issued
        // from here, keeping one operation in flight on the stream.
        let (done_tx, done_rx) = mpsc::channel();
        let mut received = Vec::with_capacity(size);
        while received.len() < size {
            let mut context = SocketContext::with_buffer(BytesMut::with_capacity(ECHO_CHUNK));
            context.set_handler({
                let done_tx = done_tx.clone();
                move |context: SocketContext| done_tx.send(context).unwrap()
            });
            client.receive_async(context).unwrap();

            let mut completed = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
            let got = completed.result().unwrap();
            assert!(got > 0, "peer closed early");
            received.extend_from_slice(&completed.take_buffer()[..]);
        }
        assert_eq!(xxh3_64(&received), sent_hash, "mismatch at {size} bytes");
    }

    client.shutdown(portico_io::SocketShutdown::Send).unwrap();
    server.join().unwrap();
    client.close();
    listener.close();
}
