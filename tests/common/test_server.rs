//! Background server fixture
//!
//! The server runs its dispatch loop on a dedicated thread exactly as the
//! daemon does; tests talk to it over real sockets.

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tempfile::TempDir;

use chunkd::{Request, Server, ServerConfig, ServerHandle, SetupError};

pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running server with its own temporary file root
pub struct TestServer {
    root: TempDir,
    addr: SocketAddr,
    handle: ServerHandle,
    thread: Option<JoinHandle<Result<(), SetupError>>>,
}

impl TestServer {
    /// Start with the reference defaults (3 slots, 32 byte chunks)
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    /// Start after letting the caller adjust the configuration
    pub fn start_with<F: FnOnce(&mut ServerConfig)>(configure: F) -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let mut config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            root: root.path().to_path_buf(),
            // Temp dirs are long; the 64 byte default would reject them.
            max_path_len: 4096,
            ..ServerConfig::default()
        };
        configure(&mut config);

        let mut server = Server::bind(config).expect("Failed to bind test server");
        let addr = server.local_addr().expect("Server has no local address");
        let handle = server.handle();
        let thread = thread::spawn(move || server.run());

        Self {
            root,
            addr,
            handle,
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Add a file under the served root
    pub fn add_file(&self, name: &str, contents: &[u8]) -> &Self {
        fs::write(self.root.path().join(name), contents).expect("Failed to write file");
        self
    }

    pub fn connect(&self) -> TestClient {
        TestClient::connect(self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Blocking protocol client
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("Failed to connect");
        stream.set_read_timeout(Some(CLIENT_TIMEOUT)).unwrap();
        Self { stream }
    }

    /// Send a well-formed download request
    pub fn request(&mut self, filename: &str) {
        let frame = Request::Download {
            filename: filename.to_string(),
        }
        .encode();
        self.send_raw(&frame);
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("Failed to send");
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.stream
            .read_exact(&mut buf)
            .unwrap_or_else(|e| panic!("Failed to read {} bytes: {}", len, e));
        buf
    }

    /// Download a file of known size: its bytes, then the status byte
    pub fn download(&mut self, filename: &str, expected_len: usize) -> (Vec<u8>, u8) {
        self.request(filename);
        let mut data = self.read_bytes(expected_len + 1);
        let status = data.pop().unwrap();
        (data, status)
    }

    /// Like `download`, but `None` if the server hangs up first
    pub fn try_download(&mut self, filename: &str, expected_len: usize) -> Option<Vec<u8>> {
        let frame = Request::Download {
            filename: filename.to_string(),
        }
        .encode();
        self.stream.write_all(&frame).ok()?;
        let mut buf = vec![0u8; expected_len + 1];
        self.stream.read_exact(&mut buf).ok()?;
        Some(buf)
    }

    /// Read until the server closes, returning everything received
    pub fn read_to_close(&mut self) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return received,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::ConnectionReset => return received,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => panic!("Connection was not closed: {}", e),
            }
        }
    }

    /// True if nothing arrives and the connection stays open for `wait`
    pub fn stays_silent(&mut self, wait: Duration) -> bool {
        self.stream.set_read_timeout(Some(wait)).unwrap();
        let mut buf = [0u8; 1];
        let silent = match self.stream.read(&mut buf) {
            Err(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
            Ok(_) => false,
        };
        self.stream.set_read_timeout(Some(CLIENT_TIMEOUT)).unwrap();
        silent
    }
}
