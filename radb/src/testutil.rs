//! A scripted in-thread adb server for tests.
//!
//! Each test spawns a listener thread that plays the server side of the
//! exchange byte-for-byte, asserting on what the client sends. Panics in
//! the server thread surface through `JoinHandle::join`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use crate::Client;

/// Binds an ephemeral port, runs `script` as the server in a thread, and
/// returns a [`Client`] pointed at it.
pub(crate) fn fake_server(
    script: impl FnOnce(TcpListener) + Send + 'static,
) -> (Client, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    let handle = std::thread::spawn(move || script(listener));
    (Client::with_addr("127.0.0.1", port), handle)
}

/// A client pointed at a port nothing listens on.
pub(crate) fn client_for_dead_port() -> Client {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    Client::with_addr("127.0.0.1", port)
}

pub(crate) fn accept(listener: &TcpListener) -> TcpStream {
    listener.accept().expect("accept").0
}

/// Reads one framed request (4 hex digits + payload) off the client.
pub(crate) fn read_request(stream: &mut TcpStream) -> String {
    let mut hex = [0u8; 4];
    stream.read_exact(&mut hex).expect("request length");
    let len = usize::from_str_radix(std::str::from_utf8(&hex).expect("ascii length"), 16)
        .expect("hex length");
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("request payload");
    String::from_utf8(payload).expect("utf-8 request")
}

pub(crate) fn write_raw(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).expect("server write");
}

pub(crate) fn write_okay(stream: &mut TcpStream) {
    write_raw(stream, b"OKAY");
}

/// Writes `FAIL` plus the framed error message.
pub(crate) fn write_fail(stream: &mut TcpStream, message: &str) {
    write_raw(stream, b"FAIL");
    write_message(stream, message.as_bytes());
}

/// Writes one framed message (4 hex digits + payload).
pub(crate) fn write_message(stream: &mut TcpStream, payload: &[u8]) {
    let mut frame = format!("{:04x}", payload.len()).into_bytes();
    frame.extend_from_slice(payload);
    write_raw(stream, &frame);
}

/// Reads one 8-byte sync header off the client.
pub(crate) fn read_sync_header(stream: &mut TcpStream) -> ([u8; 4], u32) {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).expect("sync header");
    let id: [u8; 4] = header[..4].try_into().expect("4 bytes");
    let value = u32::from_le_bytes(header[4..8].try_into().expect("4 bytes"));
    (id, value)
}

pub(crate) fn read_exact_bytes(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("sync payload");
    payload
}

/// Writes one sync packet: id, LE value, optional payload.
pub(crate) fn write_sync_packet(stream: &mut TcpStream, id: &[u8; 4], value: u32, payload: &[u8]) {
    let mut packet = Vec::with_capacity(8 + payload.len());
    packet.extend_from_slice(id);
    packet.extend_from_slice(&value.to_le_bytes());
    packet.extend_from_slice(payload);
    write_raw(stream, &packet);
}

/// Plays the transport switch: expects the given request and acknowledges.
pub(crate) fn expect_transport(stream: &mut TcpStream, request: &str) {
    assert_eq!(read_request(stream), request);
    write_okay(stream);
}
