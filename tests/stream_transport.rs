//! End-to-end tests of the dispatch loop over an in-memory byte stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mcp_engine::builtin;
use mcp_engine::mcp::server::{McpServer, ServerState};
use mcp_engine::mcp::transport::StreamTransport;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_test::io::Builder;

/// The client end of a session.
struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    async fn send(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "server closed the stream");
        serde_json::from_str(&line).unwrap()
    }

    async fn initialize(&mut self) {
        self.send(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{}}}"#,
        )
        .await;
        let reply = self.recv().await;
        assert_eq!(reply["id"], 1);
        self.send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
    }

    async fn hang_up(mut self) {
        self.writer.shutdown().await.unwrap();
    }
}

fn spawn_session(
    mut server: McpServer,
    shutdown: Option<oneshot::Receiver<()>>,
) -> (Client, JoinHandle<McpServer>) {
    let (client, server_end) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_end);
    let (client_read, client_write) = tokio::io::split(client);

    let handle = tokio::spawn(async move {
        let mut transport = StreamTransport::new(BufReader::new(server_read), server_write);
        let result = match shutdown {
            Some(rx) => {
                server
                    .run_until(&mut transport, async {
                        let _ = rx.await;
                    })
                    .await
            }
            None => server.run(&mut transport).await,
        };
        result.unwrap();
        server
    });

    (
        Client {
            reader: BufReader::new(client_read),
            writer: client_write,
        },
        handle,
    )
}

#[tokio::test]
async fn session_runs_until_end_of_stream() {
    let mut server = McpServer::default();
    builtin::register_builtins(&mut server);
    let (mut client, handle) = spawn_session(server, None);

    client.initialize().await;

    client.send("this is not json").await;
    let reply = client.recv().await;
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());

    client
        .send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"message":"over the wire"}}}"#)
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["result"]["content"][0]["text"], "over the wire");

    client.hang_up().await;
    let server = handle.await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn responses_keep_request_order() {
    let mut server = McpServer::default();
    builtin::register_builtins(&mut server);
    let (mut client, handle) = spawn_session(server, None);
    client.initialize().await;

    // Pipelined without waiting for replies.
    for id in 10..15 {
        client
            .send(&format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"ping"}}"#))
            .await;
    }
    for id in 10..15 {
        assert_eq!(client.recv().await["id"], id);
    }

    client.hang_up().await;
    handle.await.unwrap();
}

#[tokio::test]
async fn queued_server_request_is_flushed_and_answered() {
    let mut server = McpServer::default();
    let answered = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&answered);
    server.send_request("roots/list", None, move |outcome| {
        assert_eq!(outcome.unwrap(), json!({"roots": []}));
        flag.store(true, Ordering::SeqCst);
    });

    let (mut client, handle) = spawn_session(server, None);

    let request = client.recv().await;
    assert_eq!(request["method"], "roots/list");
    let id = request["id"].as_i64().unwrap();

    client
        .send(&format!(r#"{{"jsonrpc":"2.0","id":{id},"result":{{"roots":[]}}}}"#))
        .await;
    client.hang_up().await;

    let server = handle.await.unwrap();
    assert!(answered.load(Ordering::SeqCst));
    assert_eq!(server.pending_requests(), 0);
}

#[tokio::test]
async fn unanswered_requests_are_abandoned() {
    let mut server = McpServer::default();
    let answered = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&answered);
    server.send_request("sampling/createMessage", None, move |_| {
        flag.store(true, Ordering::SeqCst);
    });

    let (mut client, handle) = spawn_session(server, None);
    assert_eq!(client.recv().await["method"], "sampling/createMessage");
    client.hang_up().await;

    let server = handle.await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.pending_requests(), 0);
    assert!(!answered.load(Ordering::SeqCst));
}

#[tokio::test]
async fn shutdown_signal_stops_loop() {
    let (tx, rx) = oneshot::channel();
    let (mut client, handle) = spawn_session(McpServer::default(), Some(rx));
    client.initialize().await;

    tx.send(()).unwrap();
    let server = handle.await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);

    // The server closed its side of the stream.
    let mut line = String::new();
    assert_eq!(client.reader.read_line(&mut line).await.unwrap(), 0);
}

#[tokio::test]
async fn read_failure_keeps_serving_with_request_ids() {
    let reader = Builder::new()
        .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{\"protocolVersion\":\"2025-06-18\"}}\n")
        .read_error(std::io::Error::other("interrupted"))
        .read(b"{\"jsonrpc\":\"2.0\",")
        .read_error(std::io::Error::other("interrupted again"))
        .read(b"\"id\":2,\"method\":\"ping\"}\n")
        .build();
    let mut transport = StreamTransport::new(BufReader::new(reader), Vec::new());

    let mut server = McpServer::default();
    server.run(&mut transport).await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);

    let (_, written) = transport.into_parts();
    let replies: Vec<Value> = written
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect();

    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], 1);
    assert_eq!(replies[0]["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(replies[1]["id"], 2);
    assert_eq!(replies[1]["result"], json!({}));
}
