//! Per-connection read/respond loop.
//!
//! The handler never looks at what it reads. Every read that returns at least
//! one byte is answered with one copy of [`RESPONSE`]; a zero-length read,
//! any I/O error, or an expired idle timeout ends the connection. Reads and
//! writes strictly alternate, so a request split over two reads gets two
//! responses and two requests arriving in one read get one.

use crate::config::Config;
use crate::response::RESPONSE;
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Drives one connection until the peer goes away.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionHandler {
    buffer_size: usize,
    idle_timeout: Option<Duration>,
}

impl ConnectionHandler {
    /// Create a handler reading at most `buffer_size` bytes per call.
    pub fn new(buffer_size: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            buffer_size,
            idle_timeout,
        }
    }

    /// Create a handler from the connection settings in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.buffer_size, config.idle_timeout)
    }

    /// Serve `stream` until EOF or the first error.
    ///
    /// The stream is consumed and dropped on every exit path, which closes
    /// the socket. Returns the number of responses written when the peer
    /// closed cleanly.
    pub async fn serve<S>(&self, mut stream: S) -> io::Result<u64>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buffer = BytesMut::with_capacity(self.buffer_size);
        let mut responses = 0u64;

        loop {
            buffer.clear();

            let n = self.read(&mut stream, &mut buffer).await?;
            if n == 0 {
                trace!(responses, "Connection closed by client");
                return Ok(responses);
            }

            trace!(bytes = n, "Discarding request bytes");
            stream.write_all(RESPONSE).await?;
            responses += 1;
        }
    }

    async fn read<S>(&self, stream: &mut S, buffer: &mut BytesMut) -> io::Result<usize>
    where
        S: AsyncRead + Unpin,
    {
        // BytesMut may hand out more spare capacity than requested.
        let mut limited = (&mut *stream).take(self.buffer_size as u64);
        let read = limited.read_buf(buffer);

        match self.idle_timeout {
            None => read.await,
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection idle timeout"))?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn handler() -> ConnectionHandler {
        ConnectionHandler::new(1024, None)
    }

    #[tokio::test]
    async fn test_single_request() {
        let mock = Builder::new()
            .read(b"GET / HTTP/1.1\r\n\r\n")
            .write(RESPONSE)
            .build();

        assert_eq!(handler().serve(mock).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_immediate_eof_writes_nothing() {
        let mock = Builder::new().build();
        assert_eq!(handler().serve(mock).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repeated_round_trips() {
        let mut builder = Builder::new();
        for i in 0..10u8 {
            builder.read(&[i]).write(RESPONSE);
        }

        assert_eq!(handler().serve(builder.build()).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_content_is_ignored() {
        let mock = Builder::new()
            .read(b"\x00\xff garbage")
            .write(RESPONSE)
            .read(b"PING\r\n")
            .write(RESPONSE)
            .build();

        assert_eq!(handler().serve(mock).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_split_request_answered_per_read() {
        let mock = Builder::new()
            .read(b"GET / HTTP/1.1\r\n")
            .write(RESPONSE)
            .read(b"\r\n")
            .write(RESPONSE)
            .build();

        assert_eq!(handler().serve(mock).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_once() {
        let mock = Builder::new()
            .read(b"GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n")
            .write(RESPONSE)
            .build();

        assert_eq!(handler().serve(mock).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reads_are_capped_at_buffer_size() {
        // Ten bytes with a four-byte buffer take three reads.
        let mock = Builder::new()
            .read(b"0123456789")
            .write(RESPONSE)
            .write(RESPONSE)
            .write(RESPONSE)
            .build();

        let handler = ConnectionHandler::new(4, None);
        assert_eq!(handler.serve(mock).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_read_error_ends_connection() {
        let mock = Builder::new()
            .read(b"x")
            .write(RESPONSE)
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();

        let err = handler().serve(mock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_write_error_ends_connection() {
        let mock = Builder::new()
            .read(b"x")
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();

        let err = handler().serve(mock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            buffer_size: 2048,
            idle_timeout: Some(Duration::from_secs(5)),
            ..Config::default()
        };

        let handler = ConnectionHandler::from_config(&config);
        assert_eq!(handler.buffer_size, 2048);
        assert_eq!(handler.idle_timeout, Some(Duration::from_secs(5)));
    }
}
