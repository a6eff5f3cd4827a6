//! Common test utilities for tether-client integration tests
//!
//! This module provides a scriptable WebSocket server that speaks the tether
//! frame format, so client behavior can be tested over a real socket.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// What the server does in reaction to a frame, or on request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send a frame
    Frame(Value),
    /// Send raw text, which need not be a valid frame
    Raw(String),
    /// Send a binary message
    Binary(Vec<u8>),
    /// Close the connection with a status code
    Close(u16, String),
}

type Handler = Arc<dyn Fn(&Value) -> Vec<Reply> + Send + Sync>;

/// Mock tether server for client testing
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    frames_rx: Mutex<mpsc::UnboundedReceiver<Value>>,
    push_tx: broadcast::Sender<Reply>,
    connections: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a server that accepts every session and answers the
    /// functions known to [`standard_reply`]
    pub async fn new() -> Self {
        Self::with_handler(standard_reply).await
    }

    /// Start a server with a custom frame handler
    ///
    /// The handler sees every frame the client sends and returns what to do
    /// in response, in order.
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> Vec<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handler: Handler = Arc::new(handler);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (push_tx, _) = broadcast::channel(16);
        let connections = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let push = push_tx.clone();
        let accepted = connections.clone();
        let finished = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accept_result = listener.accept() => {
                        let Ok((stream, _)) = accept_result else { continue };
                        accepted.fetch_add(1, Ordering::SeqCst);
                        let connection = serve_connection(
                            stream,
                            handler.clone(),
                            frames_tx.clone(),
                            push.subscribe(),
                        );
                        let finished = finished.clone();
                        tokio::spawn(async move {
                            connection.await;
                            finished.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            frames_rx: Mutex::new(frames_rx),
            push_tx,
            connections,
            closed,
        }
    }

    /// Server endpoint in the `http://` form accepted by the client
    pub fn url(&self) -> String {
        format!("http://{}/live", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of WebSocket connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Number of connections that have ended
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next frame received from any client, waiting up to five seconds
    pub async fn next_frame(&self) -> Option<Value> {
        let mut rx = self.frames_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next frame with the given tag, skipping others
    pub async fn next_frame_tagged(&self, tag: &str) -> Option<Value> {
        loop {
            let frame = self.next_frame().await?;
            if frame[0] == tag {
                return Some(frame);
            }
        }
    }

    /// Deliver `reply` on every open connection
    pub fn push(&self, reply: Reply) {
        let _ = self.push_tx.send(reply);
    }

    /// Stop accepting connections
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    handler: Handler,
    frames_tx: mpsc::UnboundedSender<Value>,
    mut push_rx: broadcast::Receiver<Reply>,
) {
    let Ok(ws_stream) = accept_async(stream).await else { return };
    let (mut write, mut read) = ws_stream.split();

    loop {
        let replies = tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    let _ = frames_tx.send(frame.clone());
                    handler(&frame)
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            },
            pushed = push_rx.recv() => match pushed {
                Ok(reply) => vec![reply],
                Err(_) => continue,
            },
        };

        for reply in replies {
            let message = match reply {
                Reply::Frame(frame) => Message::Text(frame.to_string()),
                Reply::Raw(text) => Message::Text(text),
                Reply::Binary(bytes) => Message::Binary(bytes),
                Reply::Close(code, reason) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    return;
                }
            };
            if write.send(message).await.is_err() {
                return;
            }
        }
    }
}

/// Accepts sessions, echoing the context back, and answers a few functions:
///
/// - `add`: sum of `a` and `b`
/// - `echo`: the arguments
/// - `fail`: a remote error with code `bad_call`
/// - `slow`: never answered
pub fn standard_reply(frame: &Value) -> Vec<Reply> {
    match frame[0].as_str() {
        Some("session_request") => vec![Reply::Frame(session_accepted(None))],
        Some("rpc_request") => rpc_reply(&frame[1]).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn rpc_reply(request: &Value) -> Option<Reply> {
    let id = request["requestId"].as_u64()?;
    let arguments = &request["arguments"];
    let reply = match request["function"].as_str()? {
        "add" => rpc_result(
            id,
            json!(arguments["a"].as_i64().unwrap_or(0) + arguments["b"].as_i64().unwrap_or(0)),
        ),
        "echo" => rpc_result(id, arguments.clone()),
        "fail" => rpc_error(id, "no go, buddy", "bad_call"),
        _ => return None,
    };
    Some(Reply::Frame(reply))
}

pub fn session_accepted(context: Option<Value>) -> Value {
    match context {
        Some(context) => json!(["session_response", {"ok": true, "result": context}]),
        None => json!(["session_response", {"ok": true}]),
    }
}

pub fn session_refused(message: &str) -> Value {
    json!(["session_response", {"ok": false, "error": {"message": message}}])
}

pub fn rpc_result(id: u64, result: Value) -> Value {
    json!(["rpc_response", {"requestId": id, "result": result}])
}

pub fn rpc_error(id: u64, message: &str, code: &str) -> Value {
    json!(["rpc_response", {"requestId": id, "error": {"message": message, "code": code}}])
}

pub fn user_event(name: &str, data: Value) -> Value {
    json!(["user_event", {"name": name, "data": data}])
}

/// Poll `condition` until it holds, for up to five seconds
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_reply() {
        let replies = standard_reply(&json!(["session_request", {"test": 123}]));
        assert!(matches!(&replies[..], [Reply::Frame(f)] if f[0] == "session_response"));

        let replies = standard_reply(&json!([
            "rpc_request",
            {"requestId": 4, "function": "add", "arguments": {"a": 5, "b": 3}}
        ]));
        assert!(matches!(&replies[..], [Reply::Frame(f)] if *f == rpc_result(4, json!(8))));

        assert!(standard_reply(&json!(["rpc_request", {"requestId": 5, "function": "slow"}])).is_empty());
    }

    #[tokio::test]
    async fn test_mock_server_creation() {
        let server = MockWsServer::new().await;
        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert_eq!(server.connections(), 0);
        server.shutdown().await;
    }
}
