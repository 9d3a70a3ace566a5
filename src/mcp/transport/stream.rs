//! Newline-delimited stream transport.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! The framing is independent of stdio, so the same type runs over pipes,
//! sockets or in-memory duplex streams.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::TransportError;
use crate::mcp::transport::Transport;

/// Transport over the process's stdin and stdout.
pub type StdioTransport = StreamTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

/// A newline-delimited JSON transport over a reader/writer pair.
#[derive(Debug)]
pub struct StreamTransport<R, W> {
    /// Buffered inbound stream.
    reader: R,
    /// Outbound stream.
    writer: W,
    /// Bytes of a line whose read has not completed yet.
    pending: Vec<u8>,
    /// Set once `close` has run.
    closed: bool,
}

impl StdioTransport {
    /// Creates a transport over stdin/stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a transport over the given streams.
    pub const fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// Consumes the transport, returning the underlying streams.
    #[must_use]
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Reads the next non-blank line, without its terminator.
    ///
    /// Returns `None` if the stream is closed (EOF). Bytes read before a
    /// failed read are kept and completed by the next call.
    async fn read_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            let bytes_read = self.reader.read_until(b'\n', &mut self.pending).await?;

            if bytes_read == 0 && self.pending.is_empty() {
                return Ok(None);
            }

            let mut line = std::mem::take(&mut self.pending);
            if line.ends_with(b"\n") {
                line.pop();
                if line.ends_with(b"\r") {
                    line.pop();
                }
            }

            if !line.iter().all(u8::is_ascii_whitespace) {
                return Ok(Some(line));
            }
        }
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        // Newline framing: a message must not contain a raw newline
        debug_assert!(
            !message.contains(&b'\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(message).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.read_line().await?)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
