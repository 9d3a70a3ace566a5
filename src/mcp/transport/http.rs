//! HTTP request/response transport.
//!
//! Each `POST` to the MCP endpoint carries one JSON-RPC message in its body.
//! The HTTP handler parks the request until the dispatch loop either sends a
//! reply (returned as `200 application/json`) or moves on to the next
//! message without replying (returned as `202 Accepted`, e.g. for
//! notifications).
//!
//! ```text
//! POST /mcp ──▶ axum handler ──(mpsc)──▶ receive() ──▶ server
//!                    ▲                                   │
//!                    └───────────(oneshot)─── send() ◀───┘
//! ```
//!
//! Each exchange carries at most one outbound message. A queued server
//! message flushed while a notification's exchange is still open rides on
//! that response. There is no server-to-client stream: a message sent while
//! no exchange is open cannot be delivered and is dropped.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::mcp::transport::Transport;

/// Requests waiting for the dispatch loop.
const INBOUND_QUEUE_DEPTH: usize = 32;

/// One HTTP request waiting for its reply.
#[derive(Debug)]
struct Exchange {
    body: Bytes,
    reply: oneshot::Sender<Vec<u8>>,
}

/// Transport serving MCP over plain HTTP POST requests.
#[derive(Debug)]
pub struct HttpTransport {
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Requests handed over by the HTTP server task.
    inbound: mpsc::Receiver<Exchange>,
    /// Reply slot of the request currently being processed.
    open_reply: Option<oneshot::Sender<Vec<u8>>>,
    /// Signals the HTTP server to stop accepting connections.
    shutdown: Option<oneshot::Sender<()>>,
    /// The HTTP server task.
    server: Option<JoinHandle<std::io::Result<()>>>,
}

impl HttpTransport {
    /// Binds `addr` (e.g. `127.0.0.1:8080`) and serves MCP on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: &str, path: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(path, inbound_tx);

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(%local_addr, path, "HTTP transport listening");

        Ok(Self {
            local_addr,
            inbound,
            open_reply: None,
            shutdown: Some(shutdown_tx),
            server: Some(server),
        })
    }

    /// Returns the bound address, useful when binding port 0.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        if self.shutdown.is_none() {
            return Err(TransportError::Closed);
        }

        match self.open_reply.take() {
            Some(reply) => {
                if reply.send(message.to_vec()).is_err() {
                    tracing::debug!("HTTP client disconnected before the reply was sent");
                }
            }
            None => {
                tracing::debug!("No open HTTP exchange; dropping outbound message");
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        // Whatever was not answered by now gets 202 Accepted.
        self.open_reply = None;

        match self.inbound.recv().await {
            Some(exchange) => {
                self.open_reply = Some(exchange.reply);
                Ok(Some(exchange.body.to_vec()))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };

        // Release every parked request so graceful shutdown can finish.
        self.open_reply = None;
        self.inbound.close();
        while self.inbound.try_recv().is_ok() {}

        let _ = shutdown.send(());
        if let Some(server) = self.server.take() {
            match server.await {
                Ok(result) => result?,
                Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
            }
        }

        tracing::info!(local_addr = %self.local_addr, "HTTP transport closed");
        Ok(())
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Builds the axum router feeding `inbound`.
fn router(path: &str, inbound: mpsc::Sender<Exchange>) -> Router {
    Router::new()
        .route(path, post(mcp_endpoint))
        .route("/health", get(health))
        .with_state(inbound)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn mcp_endpoint(State(inbound): State<mpsc::Sender<Exchange>>, body: Bytes) -> Response {
    let (reply, reply_rx) = oneshot::channel();

    if inbound.send(Exchange { body, reply }).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match reply_rx.await {
        Ok(message) => ([(header::CONTENT_TYPE, "application/json")], message).into_response(),
        Err(_) => StatusCode::ACCEPTED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_reports_local_addr() {
        let mut transport = HttpTransport::bind("127.0.0.1:0", "/mcp").await.unwrap();
        assert_ne!(transport.local_addr().port(), 0);
        transport.close().await.unwrap();
        assert!(matches!(
            transport.send(b"{}").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let err = HttpTransport::bind("not-an-address", "/mcp").await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[tokio::test]
    async fn send_without_exchange_is_dropped() {
        let mut transport = HttpTransport::bind("127.0.0.1:0", "/mcp").await.unwrap();
        transport.send(b"{}").await.unwrap();
        transport.close().await.unwrap();
    }
}
