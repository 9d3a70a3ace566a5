//! Transports carrying encoded MCP messages between the server and its peer.
//!
//! - [`stream::StreamTransport`] -- newline-delimited JSON over any byte
//!   stream; [`stream::StdioTransport`] is the stdin/stdout flavour.
//! - [`http::HttpTransport`] -- one message per HTTP POST body, the reply in
//!   the HTTP response body.
//!
//! A transport only moves whole messages. Parsing, routing and error
//! responses are the server's job.

use async_trait::async_trait;

use crate::error::TransportError;

pub mod http;
pub mod stream;

pub use http::HttpTransport;
pub use stream::{StdioTransport, StreamTransport};

/// A bidirectional message channel to one peer.
#[async_trait]
pub trait Transport: Send {
    /// Sends one encoded message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be written.
    async fn send(&mut self, message: &[u8]) -> Result<(), TransportError>;

    /// Waits for the next complete message.
    ///
    /// Returns `Ok(None)` on clean end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails. The failure may be transient;
    /// callers can keep receiving.
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Releases the underlying stream or socket.
    ///
    /// # Errors
    ///
    /// Returns an error if shutting down the stream fails.
    async fn close(&mut self) -> Result<(), TransportError>;
}
