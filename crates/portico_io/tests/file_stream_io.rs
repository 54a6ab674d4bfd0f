// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! File write-then-read round-trips with a content-hash oracle, the
//! end-of-file boundary rules, metadata round-trips, and the asynchronous
//! delivery path.

use std::sync::mpsc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BytesMut};
use portico_io::{
    BackgroundReactor, FileAccess, FileAttributes, FileContext, FileMode, FileOptions, FileShare,
    FileStream, SeekOrigin,
};
use xxhash_rust::xxh3::xxh3_64;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn payload(len: usize) -> BytesMut {
    let bytes: Vec<u8> = (0..len)
        .map(|i| (i.wrapping_mul(73) ^ (i >> 5)) as u8)
        .collect();
    BytesMut::from(bytes.as_slice())
}

fn open_rw(path: &std::path::Path) -> FileStream {
    FileStream::open(
        path,
        FileAccess::ReadWrite,
        FileShare::READ | FileShare::WRITE,
        FileMode::OpenOrCreate,
        FileAttributes::default(),
        FileOptions::default(),
    )
    .unwrap()
}

#[test]
fn write_then_read_round_trip_preserves_content() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();

    for size in [1_usize, 64, 1024, 32_768, 65_536, 76_800, 204_800] {
        let path = dir.path().join(format!("roundtrip-{size}.bin"));
        let stream = open_rw(&path);

        let outbound = payload(size);
        let sent_hash = xxh3_64(&outbound);

        // Write everything, looping on the transferred count.
        let mut data = outbound;
        while !data.is_empty() {
            let (returned, wrote) = stream.write(data).unwrap();
            assert!(wrote > 0);
            data = returned;
            data.advance(wrote);
        }
        assert_eq!(stream.file_size().unwrap(), size as u64);

        // Read it back from the start.
        let position = stream.seek(SeekOrigin::Begin, 0).unwrap();
        assert_eq!(position, 0);

        let mut received = Vec::with_capacity(size);
        while received.len() < size {
            let (buffer, got) = stream.read(BytesMut::with_capacity(32 * 1024)).unwrap();
            assert!(got > 0, "hit end-of-file before the payload was complete");
            received.extend_from_slice(&buffer[..]);
        }
        assert_eq!(xxh3_64(&received), sent_hash, "mismatch at {size} bytes");
    }
}

#[test]
fn reads_at_and_past_the_end_are_zero_not_errors() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let stream = open_rw(&dir.path().join("eof.bin"));

    let (_, wrote) = stream.write_at(payload(100), 0).unwrap();
    assert_eq!(wrote, 100);

    // Exactly at the end.
    let (_, got) = stream.read_at(BytesMut::with_capacity(64), 100).unwrap();
    assert_eq!(got, 0);

    // Far past the end.
    let (_, got) = stream.read_at(BytesMut::with_capacity(64), 4096).unwrap();
    assert_eq!(got, 0);

    // Straddling the end: only the in-bounds portion comes back.
    let (buffer, got) = stream.read_at(BytesMut::with_capacity(64), 80).unwrap();
    assert_eq!(got, 20);
    assert_eq!(buffer.len(), 20);
}

#[test]
fn set_file_size_extends_and_cuts() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let stream = open_rw(&dir.path().join("size.bin"));

    let (_, wrote) = stream.write_at(payload(10), 0).unwrap();
    assert_eq!(wrote, 10);

    stream.set_file_size(1000).unwrap();
    assert_eq!(stream.file_size().unwrap(), 1000);

    // The extension reads back as zeroes.
    let (buffer, got) = stream.read_at(BytesMut::with_capacity(16), 990).unwrap();
    assert_eq!(got, 10);
    assert!(buffer.iter().all(|b| *b == 0));

    stream.set_file_size(4).unwrap();
    assert_eq!(stream.file_size().unwrap(), 4);
}

#[test]
fn timestamps_survive_a_set_get_round_trip() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let stream = open_rw(&dir.path().join("times.bin"));

    let stamp = UNIX_EPOCH + Duration::from_secs(1_234_567_890);
    stream.set_accessed_time(stamp).unwrap();
    stream.set_modified_time(stamp).unwrap();

    assert_eq!(stream.accessed_time().unwrap(), stamp);
    assert_eq!(stream.modified_time().unwrap(), stamp);
}

#[test]
fn async_file_io_delivers_through_the_reactor() {
    init_logging();
    let reactor = BackgroundReactor::new().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let stream = open_rw(&dir.path().join("async.bin"));
    stream.associate(reactor.proactor()).unwrap();

    // Asynchronous write at an explicit offset.
    let (tx, rx) = mpsc::channel();
    let mut context = FileContext::with_buffer(BytesMut::from(&b"delegated"[..]));
    context.set_offset(0);
    context.set_handler({
        let tx = tx.clone();
        move |context: FileContext| tx.send(context).unwrap()
    });
    stream.write_async(context).unwrap();

    let mut completed = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(completed.result().unwrap(), 9);

    // Asynchronous read of the same range.
    let mut context = FileContext::with_buffer(BytesMut::with_capacity(64));
    context.set_offset(0);
    context.set_handler(move |context: FileContext| tx.send(context).unwrap());
    stream.read_async(context).unwrap();

    let mut completed = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(completed.result().unwrap(), 9);
    assert_eq!(&completed.take_buffer()[..], b"delegated");

    stream.close();
    assert_eq!(stream.pending_operations(), 0);
}
