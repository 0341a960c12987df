//! Bounded line framing.
//!
//! Reads from a connection until the first `\n`, never buffering more than
//! `max_len - 1` bytes, newline included. The last byte of the buffer is
//! reserved, so input that fills the buffer without a newline is rejected
//! rather than truncated.

use super::RawLine;
use crate::config::DEFAULT_MAX_LINE;
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Why no line could be framed from a connection.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The buffer filled up before a newline arrived.
    #[error("line too long")]
    LineTooLong,
    /// The peer closed the connection, a read failed, or a read timed out.
    #[error("connection error: {0}")]
    ConnectionError(#[from] io::Error),
}

/// Reads a single newline-terminated line.
#[derive(Debug, Clone, Copy)]
pub struct LineReader {
    max_len: usize,
    timeout: Option<Duration>,
}

impl LineReader {
    /// Create a reader with a buffer of `max_len` bytes, one of which is
    /// reserved; a line and its newline must fit in `max_len - 1` bytes.
    pub fn new(max_len: usize) -> Self {
        assert!(max_len >= 2, "line buffer must hold at least 2 bytes");
        Self {
            max_len,
            timeout: None,
        }
    }

    /// Fail any single read that stays idle for longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Most bytes buffered for one line, newline included.
    pub fn limit(&self) -> usize {
        self.max_len - 1
    }

    /// Read until the first newline and return the bytes before it.
    ///
    /// Anything received after the newline is dropped. EOF before a newline
    /// is a [`FramingError::ConnectionError`], so a partial line is never
    /// returned.
    pub async fn read_line<R>(&self, reader: &mut R) -> Result<RawLine, FramingError>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.limit();
        // Grows on demand up to `limit`; `take` in `read_some` enforces the bound.
        let mut buffer = BytesMut::with_capacity(self.max_len.min(DEFAULT_MAX_LINE));

        loop {
            let start = buffer.len();
            if start >= limit {
                return Err(FramingError::LineTooLong);
            }

            let n = self.read_some(reader, &mut buffer, limit - start).await?;

            if let Some(pos) = buffer[start..start + n].iter().position(|&b| b == b'\n') {
                buffer.truncate(start + pos);
                return Ok(RawLine::new(buffer.freeze()));
            }
        }
    }

    /// Append at most `remaining` bytes to `buffer`, honouring the idle timeout.
    async fn read_some<R>(
        &self,
        reader: &mut R,
        buffer: &mut BytesMut,
        remaining: usize,
    ) -> Result<usize, FramingError>
    where
        R: AsyncRead + Unpin,
    {
        let mut limited = (&mut *reader).take(remaining as u64);
        let read = limited.read_buf(buffer);

        let n = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??,
            None => read.await?,
        };

        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before newline",
            )
            .into());
        }

        Ok(n)
    }
}
