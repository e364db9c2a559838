use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

use crate::backend::stream::Stream;
use crate::buffer::BufferSet;
use crate::constant::{CapabilityFlags, CommandByte, EOF_HEADER, ERR_HEADER, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::command::prepared::{read_prepare_ok, write_close_statement, write_prepare};
use crate::protocol::command::utility;
use crate::protocol::connection::{Handshake, HandshakeConfig, HandshakeResult, InitialHandshake};
use crate::protocol::packet::PacketCodec;
use crate::protocol::response::{ErrPayloadBytes, OkPayload, read_ok_response};

/// Lifecycle of a [`BackendConn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    HandshakeReceived,
    Authenticating,
    Ready,
    Busy,
    Failed,
    Closed,
}

/// Statement registered on the backend by [`BackendConn::prepare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedStatement {
    pub statement_id: u32,
    pub num_params: u16,
    pub num_columns: u16,
    pub warning_count: u16,
}

/// Shuts the backend socket down from another thread
///
/// A read blocked in the owning [`BackendConn`] returns with a connection error.
#[derive(Debug)]
pub struct CancelHandle {
    socket: TcpStream,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if let Err(err) = self.socket.shutdown(Shutdown::Both) {
            tracing::debug!(error = %err, "cancel on a closed socket");
        }
    }
}

/// Blocking connection to the backend MySQL server
///
/// One socket, one sequence counter, one command at a time.
/// Any fatal error moves the connection to [`ConnState::Failed`] and drops the
/// socket; commands then fail with [`Error::NotReady`] until [`reconnect`](Self::reconnect).
#[derive(Debug)]
pub struct BackendConn {
    opts: Opts,
    stream: Option<Stream>,
    codec: PacketCodec,
    buffer_set: BufferSet,
    state: ConnState,
    initial_handshake: Option<InitialHandshake>,
    capability_flags: CapabilityFlags,
    status_flags: ServerStatusFlags,
    last_ping: Option<Instant>,
    deadline: Option<Instant>,
}

impl BackendConn {
    /// Create a disconnected connection. Nothing is dialed until [`reconnect`](Self::reconnect).
    pub fn new(opts: Opts) -> Self {
        let codec = PacketCodec::new(opts.max_payload_size);
        Self {
            opts,
            stream: None,
            codec,
            buffer_set: BufferSet::new(),
            state: ConnState::Disconnected,
            initial_handshake: None,
            capability_flags: CapabilityFlags::empty(),
            status_flags: ServerStatusFlags::empty(),
            last_ping: None,
            deadline: None,
        }
    }

    /// Create a connection and bring it up
    pub fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let mut conn = Self::new(opts.try_into()?);
        conn.reconnect()?;
        Ok(conn)
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnState::Ready
    }

    pub fn is_busy(&self) -> bool {
        self.state == ConnState::Busy
    }

    /// Server version string from the last initial handshake
    pub fn server_version(&self) -> Option<&str> {
        self.initial_handshake
            .as_ref()
            .map(|hs| hs.server_version.as_str())
    }

    /// Connection id assigned by the server in the last initial handshake
    pub fn connection_id(&self) -> Option<u32> {
        self.initial_handshake.as_ref().map(|hs| hs.connection_id)
    }

    /// Capabilities negotiated during the last bring-up
    pub fn capability_flags(&self) -> CapabilityFlags {
        self.capability_flags
    }

    /// Status flags from the most recent OK packet
    pub fn status_flags(&self) -> ServerStatusFlags {
        self.status_flags
    }

    /// Close any existing socket, dial the backend and authenticate.
    ///
    /// Exactly one attempt. On failure the connection is left in [`ConnState::Failed`].
    #[tracing::instrument(skip_all, fields(backend = %self.opts.backend_addr))]
    pub fn reconnect(&mut self) -> Result<()> {
        self.drop_socket();
        self.state = ConnState::Connecting;
        self.last_ping = None;

        match self.bring_up() {
            Ok(()) => {
                self.state = ConnState::Ready;
                tracing::info!(
                    server_version = self.server_version().unwrap_or_default(),
                    connection_id = self.connection_id().unwrap_or_default(),
                    "connected to backend"
                );
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn bring_up(&mut self) -> Result<()> {
        let connect_timeout = self.bounded_by_deadline(self.opts.connect_timeout)?;
        let stream = Stream::connect(
            &self.opts.backend_addr,
            connect_timeout,
            self.opts.tcp_nodelay,
        )?;
        self.stream = Some(stream);
        self.codec = PacketCodec::new(self.opts.max_payload_size);
        self.buffer_set.clear();
        self.arm_timeout()?;

        let mut handshake = Handshake::new(HandshakeConfig {
            username: self.opts.user.clone(),
            password: self.opts.password.clone(),
            database: self.opts.db.clone(),
            charset: self.opts.charset,
        });

        loop {
            self.read_payload()?;
            match handshake.drive(&self.buffer_set.read_buffer)? {
                HandshakeResult::InitialHandshake {
                    handshake_response,
                    initial_handshake,
                } => {
                    self.state = ConnState::HandshakeReceived;
                    self.initial_handshake = Some(initial_handshake);
                    self.send(&handshake_response)?;
                    self.state = ConnState::Authenticating;
                }
                HandshakeResult::Write(packet) => self.send(&packet)?,
                HandshakeResult::Connected {
                    capability_flags,
                    ok,
                } => {
                    self.capability_flags = capability_flags;
                    self.status_flags = ok.status_flags;
                    return Ok(());
                }
            }
        }
    }

    /// Send COM_PING unless a ping succeeded within `ping_interval`
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if let Some(last_ping) = self.last_ping
            && last_ping.elapsed() <= self.opts.ping_interval
        {
            return Ok(());
        }

        self.send_command(utility::write_ping)?;
        self.read_generic_response()?;
        self.last_ping = Some(Instant::now());
        tracing::trace!("backend ping");
        Ok(())
    }

    /// Prepare a statement, draining the parameter and column definitions
    #[tracing::instrument(skip_all)]
    pub fn prepare(&mut self, query: &str) -> Result<PreparedStatement> {
        self.run(|conn| {
            conn.codec.reset_sequence();
            write_prepare(conn.buffer_set.new_write_buffer(), query);
            conn.send_write_buffer()?;

            conn.read_payload()?;
            let payload = &conn.buffer_set.read_buffer;
            if payload.first() == Some(&ERR_HEADER) {
                return Err(ErrPayloadBytes(payload).into());
            }

            let prepare_ok = read_prepare_ok(payload)?;
            let statement = PreparedStatement {
                statement_id: prepare_ok.statement_id(),
                num_params: prepare_ok.num_params(),
                num_columns: prepare_ok.num_columns(),
                warning_count: prepare_ok.warning_count(),
            };

            conn.skip_definitions(statement.num_params)?;
            conn.skip_definitions(statement.num_columns)?;
            tracing::debug!(statement_id = statement.statement_id, "prepared");
            Ok(statement)
        })
    }

    /// COM_STMT_CLOSE. The server sends no response.
    pub fn close_statement(&mut self, statement_id: u32) -> Result<()> {
        self.run(|conn| {
            conn.codec.reset_sequence();
            write_close_statement(conn.buffer_set.new_write_buffer(), statement_id);
            conn.send_write_buffer()
        })
    }

    /// COM_INIT_DB
    pub fn init_db(&mut self, database: &str) -> Result<OkPayload> {
        self.send_command(|out| utility::write_init_db(out, database))?;
        self.read_generic_response()
    }

    /// COM_RESET_CONNECTION
    pub fn reset(&mut self) -> Result<OkPayload> {
        self.send_command(utility::write_reset_connection)?;
        self.read_generic_response()
    }

    /// Start a new command: reset the sequence and send `command` followed by `args`
    pub fn write_command(&mut self, command: CommandByte, args: Option<&[u8]>) -> Result<()> {
        self.send_command(|out| utility::write_command(out, command, args))
    }

    /// Read one packet and decode it as OK, or fail with [`Error::ServerError`]
    pub fn read_generic_response(&mut self) -> Result<OkPayload> {
        self.run(|conn| {
            conn.read_payload()?;
            let ok = read_ok_response(&conn.buffer_set.read_buffer)?;
            conn.status_flags = ok.status_flags;
            Ok(ok)
        })
    }

    /// Claim the connection for one command sequence
    pub fn mark_busy(&mut self) -> Result<()> {
        match self.state {
            ConnState::Ready => {
                self.state = ConnState::Busy;
                Ok(())
            }
            ConnState::Busy => Err(Error::ConnectionBusy),
            state => Err(Error::NotReady(state)),
        }
    }

    pub fn mark_ready(&mut self) {
        if self.state == ConnState::Busy {
            self.state = ConnState::Ready;
        }
    }

    /// Bound every following blocking operation. `None` removes the bound.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn cancel_handle(&self) -> Result<CancelHandle> {
        let stream = self.stream.as_ref().ok_or(Error::NotReady(self.state))?;
        Ok(CancelHandle {
            socket: stream.try_clone_socket()?,
        })
    }

    /// Send COM_QUIT if the connection is usable, then drop the socket
    pub fn close(&mut self) {
        if matches!(self.state, ConnState::Ready | ConnState::Busy) && self.stream.is_some() {
            self.codec.reset_sequence();
            utility::write_quit(self.buffer_set.new_write_buffer());
            if let Err(err) = self.send_write_buffer() {
                tracing::debug!(error = %err, "COM_QUIT failed");
            }
        }
        self.drop_socket();
        self.state = ConnState::Closed;
        tracing::debug!("backend connection closed");
    }

    fn send_command(&mut self, write: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        self.run(|conn| {
            conn.codec.reset_sequence();
            write(conn.buffer_set.new_write_buffer());
            conn.send_write_buffer()
        })
    }

    /// Run one step of a command, failing the connection on fatal errors
    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.ensure_usable()?;
        self.arm_timeout()?;

        let result = op(self);
        if let Err(err) = &result
            && err.is_fatal()
        {
            self.fail(err);
        }
        result
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            ConnState::Ready | ConnState::Busy if self.stream.is_some() => Ok(()),
            state => Err(Error::NotReady(state)),
        }
    }

    fn fail(&mut self, err: &Error) {
        tracing::warn!(
            error = %err,
            state = ?self.state,
            protocol_error = err.is_protocol_error(),
            "backend connection failed"
        );
        self.drop_socket();
        self.state = ConnState::Failed;
    }

    fn drop_socket(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
        }
    }

    /// Clamp `timeout` to the time left before the deadline
    fn bounded_by_deadline(&self, timeout: Option<Duration>) -> Result<Option<Duration>> {
        let Some(deadline) = self.deadline else {
            return Ok(timeout);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::TimeoutError(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "deadline elapsed",
            )));
        }
        Ok(Some(timeout.map_or(remaining, |t| t.min(remaining))))
    }

    /// Fails without touching the socket if the deadline already passed
    fn arm_timeout(&mut self) -> Result<()> {
        self.bounded_by_deadline(None)?;
        let stream = self.stream.as_mut().ok_or(Error::NotReady(self.state))?;
        stream.set_limits(self.opts.io_timeout, self.deadline)
    }

    fn read_payload(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotReady(self.state))?;
        self.codec
            .read_payload(stream, &mut self.buffer_set.read_buffer)?;
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotReady(self.state))?;
        self.codec.write_payload(stream, payload)
    }

    fn send_write_buffer(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotReady(self.state))?;
        self.codec
            .write_payload(stream, self.buffer_set.write_buffer())
    }

    /// Read `count` definition packets and their EOF terminator
    fn skip_definitions(&mut self, count: u16) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        for _ in 0..count {
            self.read_payload()?;
        }
        self.read_payload()?;
        match self.buffer_set.read_buffer.first() {
            Some(&EOF_HEADER) => Ok(()),
            Some(&header) => Err(Error::UnexpectedPacket(header)),
            None => Err(Error::InvalidPacket),
        }
    }
}
