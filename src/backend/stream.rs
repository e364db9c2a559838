use std::io::{BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Buffered TCP stream to the backend server
///
/// Reads go through the `BufReader`; writes bypass it.
/// With a deadline set, the socket timeout is recomputed before every read and
/// write, so a peer trickling bytes cannot stretch an operation past it.
#[derive(Debug)]
pub struct Stream {
    inner: BufReader<TcpStream>,
    io_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self {
            inner: BufReader::new(stream),
            io_timeout: None,
            deadline: None,
        }
    }

    /// Dial `addr`, trying every resolved address in order
    pub fn connect(addr: &str, timeout: Option<Duration>, nodelay: bool) -> Result<Self> {
        let mut last_err = None;
        for socket_addr in addr.to_socket_addrs().map_err(Error::ConnectionError)? {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&socket_addr, timeout),
                None => TcpStream::connect(socket_addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(nodelay)?;
                    return Ok(Self::tcp(stream));
                }
                Err(err) => {
                    tracing::debug!(%socket_addr, error = %err, "dial failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.map_or_else(
            || {
                Error::ConnectionError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{addr} did not resolve to any address"),
                ))
            },
            Error::from,
        ))
    }

    /// Bound every following read and write by `io_timeout` and by the time
    /// left before `deadline`. `None` for both blocks indefinitely.
    pub fn set_limits(
        &mut self,
        io_timeout: Option<Duration>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        self.io_timeout = io_timeout.filter(|t| !t.is_zero());
        self.deadline = deadline;
        Ok(self.arm()?)
    }

    fn arm(&self) -> std::io::Result<()> {
        let timeout = match self.deadline {
            None => self.io_timeout,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "deadline elapsed",
                    ));
                }
                Some(self.io_timeout.map_or(remaining, |t| t.min(remaining)))
            }
        };
        let socket = self.inner.get_ref();
        socket.set_read_timeout(timeout)?;
        socket.set_write_timeout(timeout)?;
        Ok(())
    }

    /// A second handle to the same socket, used to cancel blocked operations
    pub fn try_clone_socket(&self) -> Result<TcpStream> {
        Ok(self.inner.get_ref().try_clone()?)
    }

    pub fn shutdown(&self) {
        if let Err(err) = self.inner.get_ref().shutdown(Shutdown::Both) {
            tracing::trace!(error = %err, "socket shutdown");
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.deadline.is_some() {
            self.arm()?;
        }
        self.inner.read(buf)
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.deadline.is_some() {
            self.arm()?;
        }
        self.inner.get_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.get_mut().flush()
    }
}
