use thiserror::Error;

use crate::backend::ConnState;
use crate::protocol::response::ErrPayload;

#[derive(Debug, Error)]
pub enum Error {
    /// An ERR packet in response to a command. The connection stays usable.
    #[error("Server Error: {0}")]
    ServerError(ErrPayload),

    #[error("Connection error: {0}")]
    ConnectionError(std::io::Error),

    #[error("Timed out: {0}")]
    TimeoutError(std::io::Error),

    #[error("Packet sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },

    #[error("Payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid packet")]
    InvalidPacket,

    #[error("Unexpected end of packet")]
    UnexpectedEof,

    #[error("Invalid length-encoded integer marker 0x{0:02X}")]
    InvalidLengthEncoding(u8),

    #[error("Unexpected packet with header 0x{0:02X}")]
    UnexpectedPacket(u8),

    /// The server answered the connection with an ERR packet instead of a handshake
    #[error("Handshake rejected: {0}")]
    HandshakeError(ErrPayload),

    #[error("Unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("Authentication failed: {0}")]
    AuthenticationError(ErrPayload),

    #[error("Unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    #[error("Connection is not ready (state: {0:?})")]
    NotReady(ConnState),

    #[error("Connection is busy with another command")]
    ConnectionBusy,

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Library bug: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    /// Framing or stream errors after which the socket must not be reused.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::SequenceMismatch { .. }
                | Error::PayloadTooLarge { .. }
                | Error::InvalidPacket
                | Error::UnexpectedEof
                | Error::InvalidLengthEncoding(_)
                | Error::UnexpectedPacket(_)
        )
    }

    /// Whether the connection that produced this error has to be torn down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ServerError(_)
                | Error::NotReady(_)
                | Error::ConnectionBusy
                | Error::BadConfigError(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Error::TimeoutError(err)
            }
            _ => Error::ConnectionError(err),
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;
