use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;

use crate::error::Result;

/// Longer lines are logged in pieces of this size
const MAX_LINE_LEN: usize = 4096;

/// One accepted client connection
///
/// Only logs what the client sends, one line at a time. Client-side protocol
/// handling is not implemented.
#[derive(Debug)]
pub struct ClientSession {
    socket: TcpStream,
    peer: SocketAddr,
}

impl ClientSession {
    pub fn new(socket: TcpStream, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Log incoming lines until the client hangs up
    #[tracing::instrument(skip_all, fields(peer = %self.peer))]
    pub async fn run(self) -> Result<()> {
        tracing::info!("client connected");

        let mut reader = BufReader::new(self.socket);
        let lines = log_lines(&mut reader).await?;

        tracing::info!(lines, "client disconnected");
        Ok(())
    }
}

/// Log `reader` line by line until EOF, returning how many pieces were logged
async fn log_lines<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<usize> {
    let mut line = Vec::with_capacity(MAX_LINE_LEN);
    let mut count = 0;
    loop {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(count);
        }
        count += 1;
        let text = String::from_utf8_lossy(&line);
        tracing::info!(line = %text.trim_end(), "client sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn long_lines_are_split() {
        let mut input = vec![b'x'; 3 * MAX_LINE_LEN];
        input.extend_from_slice(b"tail\n");
        let mut reader = &input[..];
        assert_eq!(log_lines(&mut reader).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn unterminated_last_line() {
        let mut reader = &b"one\ntwo"[..];
        assert_eq!(log_lines(&mut reader).await.unwrap(), 2);
    }
}
