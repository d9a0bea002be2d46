//! Requests the server must refuse, and the limits it enforces
//!
//! A refused request closes only the offending connection; other clients
//! and the listener keep working.

use std::fs;
use std::time::Duration;

use chunkd::STATUS_COMPLETE;

use crate::common::{assert_closed_silently, assert_download, patterned_bytes, TestServer};

#[test]
fn test_missing_file_closes_without_data() {
    let server = TestServer::start();

    let mut client = server.connect();
    client.request("does-not-exist.txt");
    assert_closed_silently(&mut client, "missing file");
}

#[test]
fn test_unknown_command_closes_connection() {
    let server = TestServer::start();
    server.add_file("ok", b"fine");

    let mut bystander = server.connect();
    let mut client = server.connect();
    client.send_raw(&[0x7f, 2, b'o', b'k', 0]);
    assert_closed_silently(&mut client, "unknown command");

    let (data, status) = bystander.download("ok", 4);
    assert_download(&data, status, b"fine", "bystander after refusal");
}

#[test]
fn test_empty_filename_closes_connection() {
    let server = TestServer::start();

    let mut client = server.connect();
    client.request("");
    assert_closed_silently(&mut client, "empty filename");
}

#[test]
fn test_oversized_length_truncates_filename() {
    let server = TestServer::start();
    let name = "a".repeat(32);
    server.add_file(&name, b"truncated name resolved");

    // Declared length 200, but only 32 payload bytes fit in a frame.
    let mut frame = vec![0x01, 200];
    frame.extend_from_slice(name.as_bytes());
    frame.push(0);

    let mut client = server.connect();
    client.send_raw(&frame);
    let mut data = client.read_bytes(24);
    let status = data.pop().unwrap();
    assert_download(&data, status, b"truncated name resolved", "oversized length");
}

#[test]
fn test_full_oversized_payload_is_truncated_not_rejected() {
    let server = TestServer::start();
    let name = "a".repeat(32);
    let contents = patterned_bytes(4000, 17);
    server.add_file(&name, &contents);

    // All 40 declared bytes actually sent; the last 8 must not be read as
    // a second frame.
    let mut frame = vec![0x01, 40];
    frame.extend_from_slice("a".repeat(40).as_bytes());
    frame.push(0);

    let mut client = server.connect();
    client.send_raw(&frame);
    let mut data = client.read_bytes(contents.len() + 1);
    let status = data.pop().unwrap();
    assert_download(&data, status, &contents, "40 byte payload");

    let (data, status) = client.download(&name, contents.len());
    assert_download(&data, status, &contents, "connection still usable");
}

#[test]
fn test_read_failure_sends_error_status_then_closes() {
    let server = TestServer::start();
    fs::create_dir(server.root().join("subdir")).unwrap();

    // A directory opens, but reading it fails.
    let mut client = server.connect();
    client.request("subdir");
    let received = client.read_to_close();
    assert_eq!(received.len(), 1, "expected a lone status byte, got {:?}", received);
    assert_ne!(received[0], STATUS_COMPLETE, "status must report the failure");
}

#[test]
fn test_filename_stops_at_nul() {
    let server = TestServer::start();
    server.add_file("short", b"xyz");

    let mut client = server.connect();
    client.send_raw(&[0x01, 8, b's', b'h', b'o', b'r', b't', 0, b'z', b'z', 0]);
    let mut data = client.read_bytes(4);
    let status = data.pop().unwrap();
    assert_download(&data, status, b"xyz", "embedded NUL");
}

#[test]
fn test_frame_too_short_closes_connection() {
    let server = TestServer::start();

    let mut client = server.connect();
    client.send_raw(&[0x01]);
    assert_closed_silently(&mut client, "one byte frame");
}

#[test]
fn test_pool_exhaustion_rejects_extra_client() {
    let server = TestServer::start_with(|config| config.max_connections = 1);
    server.add_file("f", b"first");

    let mut occupant = server.connect();
    // Round trip first so the occupant definitely holds the only slot.
    let (data, status) = occupant.download("f", 5);
    assert_download(&data, status, b"first", "occupant");

    let mut extra = server.connect();
    assert_closed_silently(&mut extra, "no free slot");

    let (data, status) = occupant.download("f", 5);
    assert_download(&data, status, b"first", "occupant after rejection");
}

#[test]
fn test_idle_connection_is_reaped() {
    let server = TestServer::start_with(|config| config.idle_timeout_secs = Some(1));

    let mut idle = server.connect();
    assert_closed_silently(&mut idle, "idle timeout");
}

#[test]
fn test_connection_kept_without_idle_timeout() {
    let server = TestServer::start();

    let mut client = server.connect();
    assert!(
        client.stays_silent(Duration::from_millis(300)),
        "server should neither send nor close on an idle connection"
    );
}

#[test]
fn test_second_request_during_transfer_closes_connection() {
    let server = TestServer::start_with(|config| config.chunk_size = 64 * 1024);
    let contents = patterned_bytes(32 * 1024 * 1024, 5);
    server.add_file("huge.bin", &contents);
    server.add_file("other", b"x");

    let mut client = server.connect();
    client.request("huge.bin");
    // Not reading lets the send buffer fill so the transfer cannot finish.
    std::thread::sleep(Duration::from_millis(200));
    client.request("other");

    let received = client.read_to_close();
    assert!(
        received.len() < contents.len(),
        "transfer should have been cut short, got {} bytes",
        received.len()
    );
    assert!(
        received[..] == contents[..received.len()],
        "partial transfer must be a prefix of the file"
    );
}
