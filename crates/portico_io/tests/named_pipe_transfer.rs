// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Named-pipe round-trips in both transmission modes, message-boundary
//! preservation, the non-consuming peek, and server reuse across client
//! sessions.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use portico_io::{
    NamedPipeClient, NamedPipeServer, PipeDirection, PipeOptions, PipeTransmission,
};
use xxhash_rust::xxh3::xxh3_64;

const IO_TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));
const ECHO_CHUNK: usize = 32 * 1024;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn pipe_name(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("portico-pipe-it-{tag}-{}", std::process::id()))
}

fn payload(len: usize) -> BytesMut {
    let bytes: Vec<u8> = (0..len)
        .map(|i| (i.wrapping_mul(47) ^ (i >> 7)) as u8)
        .collect();
    BytesMut::from(bytes.as_slice())
}

fn write_all(pipe: &NamedPipeClient, mut data: BytesMut) {
    while !data.is_empty() {
        let (returned, wrote) = pipe.write(data, IO_TIMEOUT).unwrap();
        assert!(wrote > 0, "write made no progress");
        data = returned;
        data.advance(wrote);
    }
}

#[test]
fn byte_stream_echo_round_trip_preserves_content() {
    init_logging();
    let name = pipe_name("byte-echo");
    let server = NamedPipeServer::new(
        &name,
        PipeDirection::Duplex,
        PipeTransmission::Byte,
        PipeOptions::default(),
    )
    .unwrap();

    let echo = thread::spawn(move || {
        server.accept(IO_TIMEOUT).unwrap();
        loop {
            let (buffer, got) = server
                .read(BytesMut::with_capacity(ECHO_CHUNK), IO_TIMEOUT)
                .unwrap();
            if got == 0 {
                break;
            }
            let mut out = buffer;
            while !out.is_empty() {
                let (returned, wrote) = server.write(out, IO_TIMEOUT).unwrap();
                out = returned;
                out.advance(wrote);
            }
        }
        server
    });

    let client =
        NamedPipeClient::new(&name, PipeDirection::Duplex, PipeTransmission::Byte).unwrap();

    for size in [1_usize, 64, 1024, 32_768, 65_536, 76_800, 204_800] {
        let outbound = payload(size);
        let sent_hash = xxh3_64(&outbound);
        write_all(&client, outbound);

        let mut received = Vec::with_capacity(size);
        while received.len() < size {
            let (buffer, got) = client
                .read(BytesMut::with_capacity(ECHO_CHUNK), IO_TIMEOUT)
                .unwrap();
            assert!(got > 0, "server closed before the payload was complete");
            received.extend_from_slice(&buffer[..]);
        }
        assert_eq!(received.len(), size);
        assert_eq!(xxh3_64(&received), sent_hash, "mismatch at {size} bytes");
    }

    client.close();
    let server = echo.join().unwrap();
    server.close();
}

#[test]
fn message_mode_echo_round_trip_preserves_content() {
    init_logging();
    let name = pipe_name("msg-echo");
    let server = NamedPipeServer::new(
        &name,
        PipeDirection::Duplex,
        PipeTransmission::Message,
        PipeOptions {
            max_instances: 1,
            out_buffer_size: 512 * 1024,
            in_buffer_size: 512 * 1024,
            default_timeout: None,
        },
    )
    .unwrap();

    let sizes = [1_usize, 64, 1024, 32_768, 65_536, 76_800, 204_800];
    let echo = thread::spawn(move || {
        server.accept(IO_TIMEOUT).unwrap();
        for size in sizes {
            let (message, got) = server
                .read(BytesMut::with_capacity(sizes[sizes.len() - 1]), IO_TIMEOUT)
                .unwrap();
            assert_eq!(got, size, "message boundary was not preserved");
            let (_, wrote) = server.write(message, IO_TIMEOUT).unwrap();
            assert_eq!(wrote, size, "echo message was split");
        }
        server
    });

    let client =
        NamedPipeClient::new(&name, PipeDirection::Duplex, PipeTransmission::Message).unwrap();

    for size in sizes {
        let outbound = payload(size);
        let sent_hash = xxh3_64(&outbound);

        // One write is one message in this mode; no re-slicing loop.
        let (_, wrote) = client.write(outbound, IO_TIMEOUT).unwrap();
        assert_eq!(wrote, size);

        let (echoed, got) = client
            .read(BytesMut::with_capacity(sizes[sizes.len() - 1]), IO_TIMEOUT)
            .unwrap();
        assert_eq!(got, size);
        assert_eq!(xxh3_64(&echoed[..got]), sent_hash, "mismatch at {size} bytes");
    }

    client.close();
    let server = echo.join().unwrap();
    server.close();
}

#[test]
fn message_mode_read_never_spans_two_messages() {
    init_logging();
    let name = pipe_name("msg-boundary");
    let server = NamedPipeServer::new(
        &name,
        PipeDirection::In,
        PipeTransmission::Message,
        PipeOptions::default(),
    )
    .unwrap();

    let client =
        NamedPipeClient::new(&name, PipeDirection::Out, PipeTransmission::Message).unwrap();
    server.accept(IO_TIMEOUT).unwrap();

    let (_, wrote) = client.write(payload(100), IO_TIMEOUT).unwrap();
    assert_eq!(wrote, 100);
    let (_, wrote) = client.write(payload(200), IO_TIMEOUT).unwrap();
    assert_eq!(wrote, 200);

    // A buffer big enough for both messages still gets them one at a time.
    let (_, first) = server
        .read(BytesMut::with_capacity(4096), IO_TIMEOUT)
        .unwrap();
    assert_eq!(first, 100);
    let (_, second) = server
        .read(BytesMut::with_capacity(4096), IO_TIMEOUT)
        .unwrap();
    assert_eq!(second, 200);
}

#[test]
fn peek_observes_without_consuming() {
    init_logging();
    let name = pipe_name("peek");
    let server = NamedPipeServer::new(
        &name,
        PipeDirection::Duplex,
        PipeTransmission::Message,
        PipeOptions::default(),
    )
    .unwrap();

    let client =
        NamedPipeClient::new(&name, PipeDirection::Duplex, PipeTransmission::Message).unwrap();
    server.accept(IO_TIMEOUT).unwrap();

    // An empty pipe peeks as all-zeroes instead of blocking.
    let (_, empty) = server.peek(BytesMut::with_capacity(8)).unwrap();
    assert_eq!(empty.bytes_available, 0);
    assert_eq!(empty.bytes_read, 0);

    let (_, wrote) = client.write(BytesMut::from(&b"hello"[..]), IO_TIMEOUT).unwrap();
    assert_eq!(wrote, 5);

    // Give the kernel a moment to make the message visible.
    thread::sleep(Duration::from_millis(50));

    // A three-byte peek of a five-byte message: three read, two left.
    let (buffer, info) = server.peek(BytesMut::with_capacity(3)).unwrap();
    assert_eq!(info.bytes_read, 3);
    assert_eq!(info.bytes_available, 5);
    assert_eq!(info.bytes_left_this_message, 2);
    assert_eq!(&buffer[..3], b"hel");

    // Nothing was consumed: a real read still sees the whole message.
    let (message, got) = server
        .read(BytesMut::with_capacity(64), IO_TIMEOUT)
        .unwrap();
    assert_eq!(got, 5);
    assert_eq!(&message[..5], b"hello");
}

#[test]
fn disconnect_keeps_the_pipe_for_the_next_client() {
    init_logging();
    let name = pipe_name("reuse");
    let server = NamedPipeServer::new(
        &name,
        PipeDirection::Duplex,
        PipeTransmission::Byte,
        PipeOptions::default(),
    )
    .unwrap();

    for round in 0..3 {
        let client =
            NamedPipeClient::new(&name, PipeDirection::Duplex, PipeTransmission::Byte).unwrap();
        server.accept(IO_TIMEOUT).unwrap();
        assert!(server.is_connected());

        let message = format!("round {round}");
        let (_, wrote) = client
            .write(BytesMut::from(message.as_bytes()), IO_TIMEOUT)
            .unwrap();
        assert_eq!(wrote, message.len());

        let (buffer, got) = server
            .read(BytesMut::with_capacity(64), IO_TIMEOUT)
            .unwrap();
        assert_eq!(&buffer[..got], message.as_bytes());

        // Tear down only the session; the pipe object survives for the next
        // accept.
        server.disconnect().unwrap();
        assert!(!server.is_connected());
        client.close();
    }
}
