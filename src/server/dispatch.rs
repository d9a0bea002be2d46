//! Connection dispatch loop
//!
//! A single-threaded state machine that owns the listener, the slot pool
//! and the transfer table:
//!
//! ```text
//! ListenBegin ─► PollForEvents ─► PollIncomingConnections ─► ProcessConnectionEvents
//!      │              ▲  │                  │                          │
//!      │              │  └──► Stopped       │                          │
//!      ▼              └─────────────────────┼──────────────────────────┘
//!  FatalError ◄─────────────────────────────┘
//! ```
//!
//! Per-connection failures never leave `ProcessConnectionEvents`; they
//! release the transfer context and close that one socket. Only setup,
//! polling and listener failures reach `FatalError`.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::{ConnectionError, SetupError, TransferError};
use crate::server::engine::{ChunkOutcome, TransferEngine};
use crate::server::packet::{Frame, Request, FRAME_MAX_SIZE};
use crate::server::slots::SlotTable;
use crate::server::socket::{self, ReadOutcome};
use crate::server::transfer::{TransferContext, TransferSummary, TransferTable};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

const EVENTS_CAPACITY: usize = 64;

/// Dispatch loop states.
#[derive(Debug)]
pub enum ServerState {
    ListenBegin,
    PollForEvents,
    PollIncomingConnections,
    ProcessConnectionEvents,
    FatalError(SetupError),
    Stopped,
}

/// Readiness of the listening socket seen in the last poll.
#[derive(Debug, Clone, Copy, Default)]
struct ListenerReadiness {
    readable: bool,
    fault: bool,
}

/// Wakes a running server and asks it to stop.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!("failed to wake server for shutdown: {}", e);
        }
    }
}

/// The dispatch loop and everything it exclusively owns.
pub struct Server {
    config: ServerConfig,
    engine: TransferEngine,
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    listener_readiness: ListenerReadiness,
    slots: SlotTable,
    transfers: TransferTable,
    state: ServerState,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Create a server in `ListenBegin` without touching the network yet.
    pub fn new(config: ServerConfig) -> Result<Self, SetupError> {
        let poll = Poll::new().map_err(SetupError::PollCreate)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(SetupError::PollCreate)?;

        Ok(Self {
            engine: TransferEngine::from_config(&config),
            slots: SlotTable::new(config.max_connections),
            transfers: TransferTable::new(config.max_connections),
            config,
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener: None,
            listener_readiness: ListenerReadiness::default(),
            state: ServerState::ListenBegin,
            waker: Arc::new(waker),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create a server and run `ListenBegin`, so the socket is listening
    /// (and [`Server::local_addr`] is known) before [`Server::run`].
    pub fn bind(config: ServerConfig) -> Result<Self, SetupError> {
        let mut server = Self::new(config)?;
        server.listen_begin()?;
        server.state = ServerState::PollForEvents;
        Ok(server)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            waker: Arc::clone(&self.waker),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn connection_count(&self) -> usize {
        self.slots.len()
    }

    pub fn transfers(&self) -> Vec<Option<TransferSummary>> {
        self.transfers.snapshot()
    }

    /// Drive the state machine until it stops or hits a fatal error.
    ///
    /// Live connections are closed on the way out in both cases.
    pub fn run(&mut self) -> Result<(), SetupError> {
        loop {
            let state = std::mem::replace(&mut self.state, ServerState::Stopped);
            self.state = match state {
                ServerState::ListenBegin => match self.listen_begin() {
                    Ok(()) => ServerState::PollForEvents,
                    Err(e) => ServerState::FatalError(e),
                },
                ServerState::PollForEvents => match self.poll_for_events() {
                    Ok(()) if self.shutdown.load(Ordering::SeqCst) => ServerState::Stopped,
                    Ok(()) => ServerState::PollIncomingConnections,
                    Err(e) => ServerState::FatalError(e),
                },
                ServerState::PollIncomingConnections => match self.poll_incoming_connections() {
                    Ok(()) => ServerState::ProcessConnectionEvents,
                    Err(e) => ServerState::FatalError(e),
                },
                ServerState::ProcessConnectionEvents => {
                    self.process_connection_events();
                    ServerState::PollForEvents
                }
                ServerState::FatalError(e) => {
                    error!("fatal error, closing all connections: {}", e);
                    self.teardown();
                    return Err(e);
                }
                ServerState::Stopped => {
                    info!("server stopping");
                    self.teardown();
                    return Ok(());
                }
            };
        }
    }

    fn listen_begin(&mut self) -> Result<(), SetupError> {
        self.slots.reset(self.config.max_connections);
        self.transfers.reset(self.config.max_connections);

        let mut listener = socket::listen(self.config.listen_addr, self.config.backlog)?;
        self.poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(SetupError::Register)?;

        info!(
            addr = ?listener.local_addr().ok(),
            root = %self.config.root.display(),
            slots = self.config.max_connections,
            "server listening"
        );
        self.listener = Some(listener);
        Ok(())
    }

    /// Wait for readiness and fold it into the listener flags and slot caches.
    fn poll_for_events(&mut self) -> Result<(), SetupError> {
        let timeout = self.poll_timeout();
        trace!(?timeout, "polling");

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(SetupError::Poll(e)),
        }

        for event in self.events.iter() {
            match event.token() {
                LISTENER => {
                    self.listener_readiness.readable |= event.is_readable();
                    self.listener_readiness.fault |=
                        event.is_error() || event.is_read_closed() || event.is_write_closed();
                }
                WAKER => {}
                token => {
                    if !self.slots.record(token, event) {
                        warn!(token = token.0, "readiness for a slot with no connection");
                    }
                }
            }
        }
        Ok(())
    }

    /// Zero when cached readiness is waiting, otherwise until the next idle
    /// deadline, otherwise forever.
    fn poll_timeout(&self) -> Option<Duration> {
        if self.slots.any_pending() {
            return Some(Duration::ZERO);
        }
        let idle = self.config.idle_timeout()?;
        let oldest = self.slots.oldest_activity()?;
        Some((oldest + idle).saturating_duration_since(Instant::now()))
    }

    fn poll_incoming_connections(&mut self) -> Result<(), SetupError> {
        let readiness = std::mem::take(&mut self.listener_readiness);
        if readiness.fault {
            return Err(SetupError::ListenerFault);
        }
        if !readiness.readable {
            return Ok(());
        }

        let Some(listener) = self.listener.as_ref() else {
            return Err(SetupError::ListenerFault);
        };
        let registry = self.poll.registry();
        let slots = &mut self.slots;
        let accepted =
            socket::accept_all(listener, |stream, peer| slots.insert(registry, stream, peer))?;
        debug!(accepted, live = self.slots.len(), "accept drained");
        Ok(())
    }

    /// Service every occupied slot once, in ascending slot order.
    fn process_connection_events(&mut self) {
        for index in 0..self.slots.capacity() {
            let Some(conn) = self.slots.get_mut(index) else {
                continue;
            };
            let id = conn.id;
            if conn.readiness.priority {
                trace!(conn = %id, "priority readiness ignored");
                conn.readiness.priority = false;
            }
            let readiness = conn.readiness;
            let interest = conn.interest;

            let result = if readiness.failed {
                Err(ConnectionError::Hangup)
            } else if readiness.readable && interest.is_readable() {
                self.handle_readable(index)
            } else if readiness.writable && interest.is_writable() {
                self.handle_writable(index)
            } else {
                if readiness.readable || readiness.writable {
                    trace!(conn = %id, ?readiness, ?interest, "readiness without matching interest");
                    if let Some(conn) = self.slots.get_mut(index) {
                        conn.readiness.writable &= interest.is_writable();
                        conn.readiness.readable &= interest.is_readable();
                    }
                }
                Ok(())
            };

            match result {
                Ok(()) => self.reap_if_idle(index),
                Err(e) => self.release(index, e),
            }
        }
    }

    /// Read one frame and register the download it asks for.
    fn handle_readable(&mut self, index: usize) -> Result<(), ConnectionError> {
        let Some(conn) = self.slots.get_mut(index) else {
            return Ok(());
        };
        let id = conn.id;

        let mut buf = [0u8; FRAME_MAX_SIZE];
        let n = match socket::read(&mut conn.stream, &mut buf).map_err(TransferError::Receive)? {
            ReadOutcome::Data(n) => n,
            ReadOutcome::WouldBlock => {
                conn.readiness.readable = false;
                return Ok(());
            }
            ReadOutcome::Closed => return Err(ConnectionError::PeerClosed),
        };
        conn.touch();

        let rest = socket::discard_pending(&mut conn.stream).map_err(TransferError::Receive)?;
        if rest.closed {
            return Err(ConnectionError::PeerClosed);
        }
        conn.readiness.readable = false;
        if rest.bytes > 0 {
            debug!(conn = %id, discarded = rest.bytes, "dropped bytes past the frame");
        }

        let frame = Frame::decode(&buf[..n])?;
        let Request::Download { filename } = Request::parse(&frame)?;
        info!(conn = %id, %filename, declared = frame.declared_length, "download requested");

        self.transfers.add(TransferContext::new(id, filename))?;

        // Assume writable until a send says otherwise; the reactor only
        // reports edges.
        if let Some(conn) = self.slots.get_mut(index) {
            conn.readiness.writable = true;
        }

        self.slots
            .set_interest(
                self.poll.registry(),
                index,
                Interest::READABLE | Interest::WRITABLE,
            )
            .map_err(TransferError::Register)?;
        Ok(())
    }

    /// Move one chunk for the connection's transfer.
    fn handle_writable(&mut self, index: usize) -> Result<(), ConnectionError> {
        let Some(conn) = self.slots.get_mut(index) else {
            return Ok(());
        };
        let id = conn.id;

        let Some(ctx) = self.transfers.get_mut(id) else {
            warn!(conn = %id, slot = index, "write readiness armed without a transfer");
            return self
                .slots
                .set_interest(self.poll.registry(), index, Interest::READABLE)
                .map_err(|e| TransferError::Register(e).into());
        };

        let outcome = match self.engine.transfer_chunk(&mut conn.stream, ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(code) = e.status_code() {
                    // Best effort: the connection is closed right after.
                    let _ = socket::write(&mut conn.stream, &[code]);
                }
                return Err(e.into());
            }
        };

        match outcome {
            ChunkOutcome::WouldBlock => {
                conn.readiness.writable = false;
            }
            ChunkOutcome::Sent(_) => conn.touch(),
            ChunkOutcome::Done { .. } => {
                conn.touch();
                if let Some(done) = self.transfers.remove(id) {
                    info!(
                        conn = %id,
                        filename = %done.filename,
                        bytes = done.transferred_total,
                        "transfer complete"
                    );
                }
                self.slots
                    .set_interest(self.poll.registry(), index, Interest::READABLE)
                    .map_err(TransferError::Register)?;
            }
        }
        Ok(())
    }

    fn reap_if_idle(&mut self, index: usize) {
        let Some(timeout) = self.config.idle_timeout() else {
            return;
        };
        let idle = self
            .slots
            .get(index)
            .is_some_and(|conn| conn.last_activity.elapsed() >= timeout);
        if idle {
            self.release(index, ConnectionError::IdleTimeout);
        }
    }

    /// Drop the slot's transfer context, then close its socket.
    fn release(&mut self, index: usize, reason: ConnectionError) {
        let Some(conn) = self.slots.get(index) else {
            return;
        };
        let id = conn.id;
        match reason {
            ConnectionError::PeerClosed => debug!(conn = %id, slot = index, "{}", reason),
            _ => warn!(conn = %id, slot = index, "closing connection: {}", reason),
        }

        if self.transfers.contains(id) {
            self.transfers.remove(id);
        }
        self.slots.close(self.poll.registry(), index);
    }

    fn teardown(&mut self) {
        self.slots.close_all(self.poll.registry());
        self.transfers.reset(self.config.max_connections);
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(&mut listener) {
                debug!("deregistering listener failed: {}", e);
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.teardown();
    }
}
