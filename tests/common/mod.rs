//! In-process fake MySQL server speaking just enough of the protocol for the tests

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use zero_mysql_proxy::Opts;

pub type Session = Box<dyn FnOnce(TcpStream) + Send>;

pub const SERVER_VERSION: &str = "8.0.36";
pub const CONNECTION_ID: u32 = 42;
pub const OK: [u8; 7] = [0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];

pub fn session(script: impl FnOnce(TcpStream) + Send + 'static) -> Session {
    Box::new(script)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Accept one connection per session, in order, on a fresh local port
pub fn spawn_backend(sessions: Vec<Session>) -> (String, thread::JoinHandle<()>) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        for session in sessions {
            let (stream, _) = listener.accept().unwrap();
            session(stream);
        }
    });
    (addr, handle)
}

/// An address nothing listens on
pub fn closed_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

pub fn opts(backend_addr: &str) -> Opts {
    Opts {
        backend_addr: backend_addr.to_string(),
        user: "proxy".to_string(),
        password: "secret".to_string(),
        db: Some("mysql".to_string()),
        ..Opts::default()
    }
}

pub fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let mut payload = vec![0; length];
    stream.read_exact(&mut payload).unwrap();
    (header[3], payload)
}

pub fn write_packet(stream: &mut TcpStream, sequence_id: u8, payload: &[u8]) {
    let length = u32::try_from(payload.len()).unwrap().to_le_bytes();
    let mut frame = vec![length[0], length[1], length[2], sequence_id];
    frame.extend_from_slice(payload);
    stream.write_all(&frame).unwrap();
}

pub fn err_packet(code: u16, state: &str, message: &str) -> Vec<u8> {
    let mut out = vec![0xFF];
    out.extend_from_slice(&code.to_le_bytes());
    out.push(b'#');
    out.extend_from_slice(state.as_bytes());
    out.extend_from_slice(message.as_bytes());
    out
}

pub fn initial_handshake() -> Vec<u8> {
    let mut out = vec![10];
    out.extend_from_slice(SERVER_VERSION.as_bytes());
    out.push(0);
    out.extend_from_slice(&CONNECTION_ID.to_le_bytes());
    out.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    out.push(0);
    out.extend_from_slice(&0xF7FFu16.to_le_bytes());
    out.push(33);
    out.extend_from_slice(&0x0002u16.to_le_bytes());
    out.extend_from_slice(&0x0001u16.to_le_bytes());
    out.push(21);
    out.extend_from_slice(&[0; 10]);
    out.extend_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20]);
    out.push(0);
    out.extend_from_slice(b"mysql_native_password\0");
    out
}

/// Send the handshake and read the client's response, returning it
pub fn exchange_handshake(stream: &mut TcpStream) -> Vec<u8> {
    write_packet(stream, 0, &initial_handshake());
    let (sequence_id, response) = read_packet(stream);
    assert_eq!(sequence_id, 1);
    response
}

/// Complete a successful bring-up
pub fn accept_login(stream: &mut TcpStream) {
    let response = exchange_handshake(stream);
    assert_eq!(&response[..4], &0x0000_A20Du32.to_le_bytes());
    assert_eq!(&response[32..38], b"proxy\0");
    assert_eq!(response[38], 20);
    assert!(response.ends_with(b"mysql\0"));
    write_packet(stream, 2, &OK);
}

/// Expect a command starting a new sequence
pub fn expect_command(stream: &mut TcpStream, command: u8) -> Vec<u8> {
    let (sequence_id, payload) = read_packet(stream);
    assert_eq!(sequence_id, 0);
    assert_eq!(payload[0], command);
    payload
}

/// Block until the client closes its side
pub fn wait_for_close(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    while let Ok(n) = stream.read(&mut buf) {
        if n == 0 {
            return;
        }
    }
}
